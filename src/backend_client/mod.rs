//! BackendClient - REST collaborator
//!
//! Only the reads the live layer needs: recent detections for hydration
//! after (re)connect, and a health check.

use crate::detection_store::{Detection, DetectionFields};
use crate::error::{Error, Result};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// BackendClient instance
pub struct BackendClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl BackendClient {
    /// Create new BackendClient
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Most recent detections, newest first
    pub async fn fetch_recent_detections(&self, limit: usize) -> Result<Vec<Detection>> {
        let resp = self
            .get("/api/events")
            .query(&[("limit", limit)])
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Unauthorized(format!("event history: {}", status)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api(format!(
                "event history fetch failed: {} - {}",
                status, body
            )));
        }

        let records: Vec<DetectionFields> = resp.json().await?;
        let received_at = Utc::now();
        let mut detections = Vec::with_capacity(records.len());
        for fields in records {
            match Detection::from_fields(fields, received_at) {
                Ok(det) => detections.push(det),
                Err(e) => tracing::warn!(error = %e, "Skipping malformed history record"),
            }
        }
        Ok(detections)
    }

    /// Backend health check
    pub async fn health_check(&self) -> Result<bool> {
        let resp = self.get("/health").send().await?;
        Ok(resp.status().is_success())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}
