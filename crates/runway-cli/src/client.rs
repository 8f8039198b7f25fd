//! HTTP client for the Runway server API.

use anyhow::{Context, Result, bail};
use runway_core::{Build, BuildId, BuildStatus, BuildType, Channel};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// One page of build output as served by the output endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutputPage {
    pub outputs: Vec<OutputEntry>,
    pub status: BuildStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutputEntry {
    pub content: String,
    pub channel: Channel,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn recent_builds(&self, limit: usize) -> Result<Vec<Build>> {
        self.get("/api/v1/builds", &[("limit", limit.to_string())])
            .await
    }

    /// Newest builds of one ref, at most `limit` of them.
    pub async fn ref_builds(
        &self,
        build_type: BuildType,
        ref_name: &str,
        limit: usize,
    ) -> Result<Vec<Build>> {
        self.get(
            &format!("/api/v1/refs/{}/builds", build_type),
            &[
                ("ref", ref_name.to_string()),
                ("start", "0".to_string()),
                ("end", limit.to_string()),
            ],
        )
        .await
    }

    pub async fn build(&self, id: BuildId) -> Result<Build> {
        self.get(&format!("/api/v1/builds/{}", id), &[]).await
    }

    /// Output lines from `start` to the latest line.
    pub async fn output(&self, id: BuildId, start: u64) -> Result<OutputPage> {
        self.get(
            &format!("/api/v1/builds/{}/output", id),
            &[("start", start.to_string())],
        )
        .await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, query = ?query, "GET");
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.to_string(),
            };
            bail!("Server returned {}: {}", status.as_u16(), message);
        }

        response
            .json()
            .await
            .with_context(|| format!("Invalid response from {}", url))
    }
}
