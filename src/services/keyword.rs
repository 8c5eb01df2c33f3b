use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio::time::{sleep, timeout, Instant};
use tracing::{info, warn};

use super::KeywordExtractor;
use crate::utils::http::{ensure_success, join_url};

/// Client for the best-keyword service used to build the image search query.
pub struct HttpKeywordExtractor {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct KeywordRequest<'a> {
    prompt: &'a str,
}

impl HttpKeywordExtractor {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        let url = join_url(&self.base_url, "v1/find-best-keyword");
        let response = self
            .client
            .post(&url)
            .json(&KeywordRequest { prompt })
            .send()
            .await?;
        let body = ensure_success(response).await?.text().await?;
        Ok(clean_keyword(&body))
    }
}

#[async_trait]
impl KeywordExtractor for HttpKeywordExtractor {
    /// Ask for a keyword, retrying every `poll_interval` until `timeout`.
    async fn extract_keyword(&self, prompt: &str, poll_interval: Duration, timeout_after: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout_after;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt = timeout(remaining, self.request(prompt))
                .await
                .context("keyword extraction timed out")
                .and_then(|r| r);

            match attempt {
                Ok(keyword) => {
                    info!("Best keyword extracted: {:?}", keyword);
                    return Ok(keyword);
                }
                Err(e) if Instant::now() + poll_interval < deadline => {
                    warn!("Keyword extraction failed, retrying in {:?}: {:#}", poll_interval, e);
                    sleep(poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Keywords come back as raw text, sometimes JSON-quoted.
fn clean_keyword(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}
