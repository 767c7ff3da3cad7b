//! Shared models and types
//!
//! Response shapes used by the web API.

use crate::notification_policy::NotificationItem;
use crate::stream_client::ConnectionSnapshot;
use serde::{Deserialize, Serialize};

/// Standard API response wrapper (errors use `Error::into_response`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub stream_connected: bool,
    pub backend_connected: bool,
}

/// Detection list header numbers
#[derive(Debug, Clone, Serialize)]
pub struct DetectionSummary {
    pub total: usize,
    pub total_today: usize,
    pub connected: bool,
}

/// Notification feed with its unread badge count
#[derive(Debug, Clone, Serialize)]
pub struct NotificationFeed {
    pub unread: usize,
    pub items: Vec<NotificationItem>,
}

/// Push connection status
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub url: String,
    #[serde(flatten)]
    pub connection: ConnectionSnapshot,
}
