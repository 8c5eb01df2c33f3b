use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

pub mod local;

pub use local::LocalObjectStorage;

/// Destination for finished artifacts.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload `local_path` under `key` and return where it can be downloaded.
    async fn upload_file(&self, key: &str, local_path: &Path) -> Result<String>;
}
