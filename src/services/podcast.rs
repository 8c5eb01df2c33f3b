use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{BilingualPair, ClipBoundary, ContentGenerator, GenerationResponse};
use crate::utils::http::{ensure_success, join_url};

/// Client for the bilingual podcast service, which produces the bilingual
/// script, the narrated audio and the per-clip word timings in one call.
pub struct HttpContentGenerator {
    client: Client,
    base_url: String,
    languages: [String; 2],
}

#[derive(Debug, Serialize)]
struct PodcastRequest<'a> {
    prompt: &'a str,
    languages: &'a [String; 2],
}

#[derive(Debug, Deserialize)]
struct PodcastResponse {
    #[serde(default)]
    choices: Vec<PodcastChoice>,
}

#[derive(Debug, Deserialize)]
struct PodcastChoice {
    message: PodcastMessage,
}

#[derive(Debug, Deserialize)]
struct PodcastMessage {
    #[serde(default)]
    content: Vec<BilingualPair>,
    audio: Option<PodcastAudio>,
}

#[derive(Debug, Deserialize)]
struct PodcastAudio {
    #[serde(default)]
    data: String,
    #[serde(default)]
    trimmed: Vec<ClipBoundary>,
}

impl HttpContentGenerator {
    pub fn new(client: Client, base_url: impl Into<String>, languages: [String; 2]) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            languages,
        }
    }
}

#[async_trait]
impl ContentGenerator for HttpContentGenerator {
    async fn check_health(&self) -> Result<bool> {
        let url = join_url(&self.base_url, "health");
        debug!("Checking service health at {}", url);
        let response = self.client.get(&url).send().await?;
        let healthy = response.status().is_success();
        if !healthy {
            warn!("Health check at {} returned {}", url, response.status());
        }
        Ok(healthy)
    }

    async fn generate_content(&self, prompt: &str) -> Result<Option<GenerationResponse>> {
        let url = join_url(&self.base_url, "api/podcasts");
        info!("Requesting podcast generation from {}", url);

        let response = self
            .client
            .post(&url)
            .json(&PodcastRequest {
                prompt,
                languages: &self.languages,
            })
            .send()
            .await?;
        let body = ensure_success(response).await?.text().await?;
        parse_podcast_response(&body)
    }
}

/// Validate the loosely shaped podcast payload into a [`GenerationResponse`].
/// A payload without a first choice or without audio is "no result".
fn parse_podcast_response(body: &str) -> Result<Option<GenerationResponse>> {
    let response: PodcastResponse = serde_json::from_str(body)
        .map_err(|e| anyhow::anyhow!("Malformed podcast response: {}", e))?;

    let Some(choice) = response.choices.into_iter().next() else {
        return Ok(None);
    };
    let Some(audio) = choice.message.audio else {
        return Ok(None);
    };
    if audio.data.is_empty() {
        return Ok(None);
    }

    Ok(Some(GenerationResponse {
        content: choice.message.content,
        audio_base64: audio.data,
        clips: audio.trimmed,
    }))
}
