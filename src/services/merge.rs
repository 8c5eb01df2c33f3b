use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use super::ClipMerger;

/// Joins rendered clips with ffmpeg's concat demuxer (stream copy, no
/// re-encode). A single clip is copied as is.
pub struct FfmpegConcatMerger {
    ffmpeg: PathBuf,
}

impl Default for FfmpegConcatMerger {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

impl FfmpegConcatMerger {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self { ffmpeg: ffmpeg.into() }
    }
}

#[async_trait]
impl ClipMerger for FfmpegConcatMerger {
    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        match inputs {
            [] => Err(anyhow::anyhow!("No clips to merge into {}", output.display())),
            [single] => {
                fs::copy(single, output).await?;
                info!("Single clip copied to {}", output.display());
                Ok(())
            }
            _ => {
                let list_path = output.with_extension("concat.txt");
                fs::write(&list_path, concat_list(inputs)).await?;

                debug!("Merging {} clips into {}", inputs.len(), output.display());
                let result = Command::new(&self.ffmpeg)
                    .args(["-y", "-f", "concat", "-safe", "0", "-i"])
                    .arg(&list_path)
                    .args(["-c", "copy"])
                    .arg(output)
                    .output()
                    .await;
                let _ = fs::remove_file(&list_path).await;

                let result = result.map_err(|e| anyhow::anyhow!("Failed to execute ffmpeg: {}", e))?;
                if !result.status.success() {
                    return Err(anyhow::anyhow!(
                        "ffmpeg exited with {}: {}",
                        result.status,
                        String::from_utf8_lossy(&result.stderr)
                    ));
                }
                info!("Merged {} clips into {}", inputs.len(), output.display());
                Ok(())
            }
        }
    }
}

fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| format!("file '{}'\n", p.display().to_string().replace('\'', r"'\''")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_list_escapes_quotes() {
        let list = concat_list(&[PathBuf::from("/tmp/a.mp4"), PathBuf::from("/tmp/it's.mp4")]);
        assert_eq!(list, "file '/tmp/a.mp4'\nfile '/tmp/it'\\''s.mp4'\n");
    }

    #[tokio::test]
    async fn test_single_clip_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip-1.mp4");
        std::fs::write(&input, b"clip").unwrap();
        let output = dir.path().join("final").join("task.mp4");

        FfmpegConcatMerger::default().merge(&[input], &output).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"clip");
    }

    #[tokio::test]
    async fn test_nothing_to_merge() {
        let dir = tempfile::tempdir().unwrap();
        let result = FfmpegConcatMerger::default()
            .merge(&[], &dir.path().join("task.mp4"))
            .await;
        assert!(result.is_err());
    }
}
