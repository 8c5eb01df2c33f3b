use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tracing::info;

use super::ObjectStorage;

/// Stores objects as plain files below a root directory.
///
/// Returned locations are `<public_base>/<key>` when a public base is set,
/// otherwise the absolute file path.
pub struct LocalObjectStorage {
    root: PathBuf,
    public_base: Option<String>,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base: None,
        }
    }

    pub fn with_public_base(mut self, base: impl Into<String>) -> Self {
        self.public_base = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            anyhow::bail!("Invalid storage key: {:?}", key);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn upload_file(&self, key: &str, local_path: &Path) -> Result<String> {
        let target = self.object_path(key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(local_path, &target)
            .await
            .with_context(|| format!("failed to store {} as {}", local_path.display(), key))?;
        info!("Stored {} as {}", local_path.display(), key);

        Ok(match &self.public_base {
            Some(base) => format!("{}/{}", base, key),
            None => target.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_copies_under_key() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("task.mp4");
        std::fs::write(&source, b"video").unwrap();

        let storage = LocalObjectStorage::new(dir.path().join("bucket"))
            .with_public_base("https://cdn.example.com/");
        let url = storage.upload_file("videos/task.mp4", &source).await.unwrap();

        assert_eq!(url, "https://cdn.example.com/videos/task.mp4");
        let stored = std::fs::read(dir.path().join("bucket/videos/task.mp4")).unwrap();
        assert_eq!(stored, b"video");
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("task.mp4");
        std::fs::write(&source, b"video").unwrap();
        let storage = LocalObjectStorage::new(dir.path().join("bucket"));

        for key in ["../outside.mp4", "/abs.mp4", ""] {
            assert!(storage.upload_file(key, &source).await.is_err(), "{key}");
        }
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalObjectStorage::new(dir.path());
        let result = storage
            .upload_file("videos/task.mp4", &dir.path().join("missing.mp4"))
            .await;
        assert!(result.is_err());
    }
}
