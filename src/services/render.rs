use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::assembly::VideoJobSpec;
use crate::poller::{JobService, JobStatus};
use crate::utils::http::ensure_success;

/// Client for the per-clip video creation service.
///
/// Jobs are created with a multipart upload of the clip's media and caption
/// data; the service answers with a correlation id that is then polled at
/// `<api_url><correlation_id>` until it serves an MP4.
pub struct HttpRenderService {
    client: Client,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    correlation_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct StatusBody {
    status: Option<String>,
    progress: Option<f64>,
    error: Option<String>,
}

impl HttpRenderService {
    pub fn new(client: Client, api_url: impl Into<String>) -> Self {
        let mut api_url = api_url.into();
        if !api_url.ends_with('/') {
            api_url.push('/');
        }
        Self { client, api_url }
    }

    async fn file_part(path: &Path) -> Result<Part> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Part::bytes(data).file_name(name))
    }

    async fn build_form(spec: &VideoJobSpec) -> Result<Form> {
        let mut form = Form::new()
            .part("speech_file", Self::file_part(&spec.speech_path).await?)
            .part("music_file", Self::file_part(&spec.music_path).await?);
        for image in spec.image_paths.iter() {
            form = form.part("image_file", Self::file_part(image).await?);
        }

        let form = form
            .text("text_data", serde_json::to_string(&spec.words)?)
            .text("video_size", serde_json::to_string(&[spec.frame_size.0, spec.frame_size.1])?)
            .text("text_config", serde_json::to_string(&spec.text_config)?)
            .text("fps", spec.fps.to_string())
            .text("duration", spec.duration.to_string());
        Ok(form)
    }
}

#[async_trait]
impl JobService for HttpRenderService {
    type Spec = VideoJobSpec;

    async fn submit(&self, spec: &VideoJobSpec) -> Result<String> {
        debug!("Submitting clip {} for rendering", spec.clip_index);
        let form = Self::build_form(spec).await?;
        let response = self
            .client
            .post(&self.api_url)
            .multipart(form)
            .send()
            .await?;
        let submitted: SubmitResponse = ensure_success(response).await?.json().await?;
        info!(
            "Video processing for clip {} started. Correlation ID: {}",
            spec.clip_index, submitted.correlation_id
        );
        Ok(submitted.correlation_id)
    }

    async fn status(&self, correlation_id: &str) -> Result<JobStatus> {
        let url = format!("{}{}", self.api_url, correlation_id);
        let response = self.client.get(&url).send().await?;
        let http_status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        Ok(parse_status(http_status, content_type.as_deref(), body))
    }
}

/// Map the renderer's raw answer onto [`JobStatus`].
fn parse_status(http_status: StatusCode, content_type: Option<&str>, body: Bytes) -> JobStatus {
    if !http_status.is_success() {
        return JobStatus::Error(format!("status endpoint returned {}", http_status));
    }
    if content_type.is_some_and(|ct| ct.starts_with("video/")) {
        return JobStatus::Ready(body);
    }

    let parsed: StatusBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => return JobStatus::Error(format!("unreadable status body: {}", e)),
    };
    if let Some(error) = parsed.error {
        return JobStatus::Error(error);
    }
    match parsed.status.as_deref() {
        Some("failed") | Some("error") => JobStatus::Error("render job reported failure".to_string()),
        _ => JobStatus::Pending(parsed.progress.map(|p| p.clamp(0.0, 100.0).round() as u8)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_payload_is_ready() {
        let status = parse_status(StatusCode::OK, Some("video/mp4"), Bytes::from_static(b"mp4"));
        assert_eq!(status, JobStatus::Ready(Bytes::from_static(b"mp4")));
    }

    #[test]
    fn test_json_progress_is_pending() {
        let body = Bytes::from_static(br#"{"status": "processing", "progress": 142.0}"#);
        assert_eq!(
            parse_status(StatusCode::OK, Some("application/json"), body),
            JobStatus::Pending(Some(100))
        );

        let body = Bytes::from_static(br#"{"status": "queued"}"#);
        assert_eq!(
            parse_status(StatusCode::OK, Some("application/json"), body),
            JobStatus::Pending(None)
        );
    }

    #[test]
    fn test_errors_are_transient() {
        let body = Bytes::from_static(br#"{"error": "worker lost"}"#);
        assert_eq!(
            parse_status(StatusCode::OK, None, body),
            JobStatus::Error("worker lost".to_string())
        );
        assert!(matches!(
            parse_status(StatusCode::BAD_GATEWAY, None, Bytes::new()),
            JobStatus::Error(_)
        ));
        assert!(matches!(
            parse_status(StatusCode::OK, Some("text/html"), Bytes::from_static(b"<html>")),
            JobStatus::Error(_)
        ));
    }
}
