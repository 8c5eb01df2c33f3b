use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use reqwest::{Client, Response};
use tracing::{debug, info};

/// Client shared by the HTTP service adapters.
pub fn build_client(timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
    Ok(client)
}

/// Turn a non-2xx response into an error carrying the status and body.
pub async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(anyhow::anyhow!(
        "HTTP request to {} failed with status {}: {}",
        url,
        status,
        body.chars().take(200).collect::<String>()
    ))
}

pub async fn download_bytes(client: &Client, url: &str) -> Result<Bytes> {
    debug!("Starting download from URL: {}", url);

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("HTTP request failed: {}", e))?;
    let response = ensure_success(response).await?;

    let bytes = response
        .bytes()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read response: {}", e))?;

    info!("Downloaded {} bytes from {}", bytes.len(), url);
    Ok(bytes)
}

/// Join a base URL and a path without doubling or dropping the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
