use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::try_join_all;
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use super::ImageSearch;
use crate::utils::http::{download_bytes, ensure_success, join_url};

pub struct HttpImageSearch {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    images: Vec<String>,
}

impl HttpImageSearch {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ImageSearch for HttpImageSearch {
    async fn search_images(&self, query: &str, count: usize) -> Result<Vec<Bytes>> {
        let url = join_url(&self.base_url, "search");
        let response = self
            .client
            .get(&url)
            .query(&[("q", query.to_string()), ("count", count.to_string())])
            .send()
            .await?;
        let found: SearchResponse = ensure_success(response).await?.json().await?;
        info!("Image search for {:?} returned {} results", query, found.images.len());

        let downloads = found
            .images
            .iter()
            .take(count)
            .map(|image_url| download_bytes(&self.client, image_url));
        try_join_all(downloads).await
    }
}
