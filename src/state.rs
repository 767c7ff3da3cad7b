//! Application state
//!
//! Holds all shared components and state

use crate::backend_client::BackendClient;
use crate::detection_store::DetectionStore;
use crate::notification_center::{NotificationCenter, NotificationConfig};
use crate::live_router::RouterConfig;
use crate::stream_client::StreamConnectionManager;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Push endpoint (SSE)
    pub stream_url: String,
    /// Backend REST base URL
    pub backend_url: String,
    /// Bearer token for push and REST, if the backend requires one
    pub api_key: Option<String>,
    /// Server port
    pub port: u16,
    /// Server host
    pub host: String,
    /// No bytes for this long means the connection is treated as lost
    pub stream_idle_timeout: Duration,
    /// Detection notification throttle window
    pub notify_throttle: Duration,
    /// Unread process notifications older than this are settled
    pub notify_stale_age: Duration,
    /// How often stale notifications are settled
    pub notify_settle_interval: Duration,
    /// Notification feed size
    pub notify_capacity: usize,
    /// Detection store size
    pub max_detections: usize,
    /// Records fetched from the backend on (re)connect
    pub hydrate_limit: usize,
    /// How long a finished reclassification stays on its detection
    pub reclassify_linger: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            stream_url: std::env::var("STREAM_URL")
                .unwrap_or_else(|_| "http://localhost:8946/api/sse".to_string()),
            backend_url: std::env::var("BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:8946".to_string()),
            api_key: std::env::var("API_KEY").ok().filter(|k| !k.is_empty()),
            port: env_or("PORT", 8090),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            stream_idle_timeout: Duration::from_secs(env_or("STREAM_IDLE_TIMEOUT_SEC", 90)),
            notify_throttle: Duration::from_millis(env_or("NOTIFY_THROTTLE_MS", 60_000)),
            notify_stale_age: Duration::from_secs(env_or("NOTIFY_STALE_AGE_SEC", 600)),
            notify_settle_interval: Duration::from_secs(env_or("NOTIFY_SETTLE_INTERVAL_SEC", 60)),
            notify_capacity: env_or("NOTIFY_CAPACITY", 200),
            max_detections: env_or("MAX_DETECTIONS", 500),
            hydrate_limit: env_or("HYDRATE_LIMIT", 50),
            reclassify_linger: Duration::from_secs(env_or("RECLASSIFY_LINGER_SEC", 5)),
        }
    }
}

impl AppConfig {
    pub fn notification_config(&self) -> NotificationConfig {
        NotificationConfig {
            capacity: self.notify_capacity,
            detection_throttle: self.notify_throttle,
            stale_age: self.notify_stale_age,
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            hydrate_limit: self.hydrate_limit,
            reclassify_linger: self.reclassify_linger,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// DetectionStore (live detection list)
    pub store: Arc<DetectionStore>,
    /// NotificationCenter (feed + throttling)
    pub notifications: Arc<NotificationCenter>,
    /// StreamConnectionManager (push connection)
    pub stream: Arc<StreamConnectionManager>,
    /// BackendClient (REST), absent when the backend URL is unusable
    pub backend: Option<Arc<BackendClient>>,
    /// Process start
    pub started_at: Instant,
}
