use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::assembly::RawSegment;

pub mod images;
pub mod keyword;
pub mod merge;
pub mod podcast;
pub mod render;

pub use images::HttpImageSearch;
pub use keyword::HttpKeywordExtractor;
pub use merge::FfmpegConcatMerger;
pub use podcast::HttpContentGenerator;
pub use render::HttpRenderService;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BilingualPair {
    pub original: String,
    pub translated: String,
}

/// Cut boundary of one clip inside the generated stream, with its words.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipBoundary {
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default)]
    pub segments: Vec<RawSegment>,
    /// Byte range of this clip inside the decoded audio. Without it the
    /// clip refers to the whole buffer.
    #[serde(default)]
    pub byte_offset: Option<usize>,
    #[serde(default)]
    pub byte_length: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub content: Vec<BilingualPair>,
    #[serde(skip_serializing)]
    pub audio_base64: String,
    pub clips: Vec<ClipBoundary>,
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn check_health(&self) -> Result<bool>;
    /// `Ok(None)` when the service answered without usable content.
    async fn generate_content(&self, prompt: &str) -> Result<Option<GenerationResponse>>;
}

#[async_trait]
pub trait KeywordExtractor: Send + Sync {
    async fn extract_keyword(&self, prompt: &str, poll_interval: Duration, timeout: Duration) -> Result<String>;
}

#[async_trait]
pub trait ImageSearch: Send + Sync {
    async fn search_images(&self, query: &str, count: usize) -> Result<Vec<Bytes>>;
}

/// Joins rendered clips into the final video.
#[async_trait]
pub trait ClipMerger: Send + Sync {
    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;
}
