//! LiveRouter - Push event dispatch
//!
//! Decodes each raw push payload and applies it to the DetectionStore,
//! raising notifications through the NotificationCenter. Failures stay
//! local to the message that caused them.

use crate::backend_client::BackendClient;
use crate::detection_store::{AddOutcome, Detection, DetectionStore};
use crate::error::{Error, Result};
use crate::event_decoder::{self, DomainEvent};
use crate::notification_center::NotificationCenter;
use crate::stream_client::{HandlerSignal, StreamHandler};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Router options
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// How many records to fetch from the backend on (re)connect
    pub hydrate_limit: usize,
    /// How long a completed reclassification stays attached
    pub reclassify_linger: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            hydrate_limit: 50,
            reclassify_linger: Duration::from_secs(5),
        }
    }
}

/// LiveRouter instance
pub struct LiveRouter {
    store: Arc<DetectionStore>,
    notifications: Arc<NotificationCenter>,
    backend: Option<Arc<BackendClient>>,
    config: RouterConfig,
}

impl LiveRouter {
    pub fn new(
        store: Arc<DetectionStore>,
        notifications: Arc<NotificationCenter>,
        backend: Option<Arc<BackendClient>>,
        config: RouterConfig,
    ) -> Self {
        Self {
            store,
            notifications,
            backend,
            config,
        }
    }

    /// Apply one decoded event
    pub async fn apply(&self, event: DomainEvent) -> Result<()> {
        match event {
            DomainEvent::Connected { message } => {
                tracing::debug!(message = ?message, "Stream hello received");
            }
            DomainEvent::Detection(fields) => {
                let detection = Detection::from_fields(fields, Utc::now())?;
                let outcome = self.store.add_detection(detection.clone()).await;
                if outcome == AddOutcome::Inserted {
                    self.notifications.notify_detection(&detection).await;
                }
            }
            DomainEvent::DetectionUpdated { event_id, fields } => {
                self.store.update_detection(&event_id, &fields).await;
            }
            DomainEvent::DetectionDeleted {
                event_id,
                timestamp,
            } => {
                self.store.remove_detection(&event_id, Some(timestamp)).await;
            }
            DomainEvent::ReclassificationStarted { event_id, start } => {
                if let Some(detection) = self.store.start_reclassification(&event_id, &start).await {
                    self.notifications
                        .notify_reclassification_started(&detection)
                        .await;
                }
            }
            DomainEvent::ReclassificationProgress { event_id, progress } => {
                self.store
                    .update_reclassification_progress(&event_id, &progress)
                    .await;
            }
            DomainEvent::ReclassificationCompleted { event_id, results } => {
                let top_label = results
                    .get("top_label")
                    .or_else(|| results.get("label"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);

                if let Some(detection) = self.store.complete_reclassification(&event_id, results).await {
                    let label = top_label.or_else(|| {
                        detection
                            .reclassification
                            .as_ref()
                            .and_then(|r| r.top_label.clone())
                    });
                    self.notifications
                        .notify_reclassification_completed(&event_id, label.as_deref())
                        .await;
                    self.schedule_reclassification_clear(event_id);
                }
            }
        }
        Ok(())
    }

    fn schedule_reclassification_clear(&self, event_id: String) {
        let store = self.store.clone();
        let linger = self.config.reclassify_linger;
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            if store.clear_reclassification(&event_id).await {
                tracing::debug!(event_id = %event_id, "Cleared finished reclassification");
            }
        });
    }

    async fn hydrate(&self) -> HandlerSignal {
        let Some(backend) = &self.backend else {
            return HandlerSignal::Continue;
        };
        match backend.fetch_recent_detections(self.config.hydrate_limit).await {
            Ok(snapshot) => {
                let fetched = snapshot.len();
                let inserted = self.store.hydrate(snapshot).await;
                tracing::info!(fetched = fetched, inserted = inserted, "Hydrated detections from backend");
            }
            Err(Error::Unauthorized(reason)) => {
                tracing::warn!(reason = %reason, "Backend rejected the session during hydration");
                return HandlerSignal::SessionExpired;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Detection hydration failed, continuing with live events");
            }
        }
        HandlerSignal::Continue
    }
}

#[async_trait]
impl StreamHandler for LiveRouter {
    async fn on_connected(&self) -> HandlerSignal {
        self.store.set_connected(true).await;
        self.hydrate().await
    }

    async fn on_disconnected(&self) {
        self.store.set_connected(false).await;
    }

    async fn on_message(&self, raw: &str) {
        let event = match event_decoder::decode(raw) {
            Ok(event) => event,
            Err(e) => {
                e.log(raw);
                return;
            }
        };

        let kind = event.kind();
        if let Err(e) = self.apply(event).await {
            tracing::warn!(event_type = %kind, error = %e, "Failed to apply push event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification_center::NotificationConfig;
    use crate::notification_policy::SystemClock;
    use serde_json::json;

    fn router() -> (Arc<DetectionStore>, Arc<NotificationCenter>, LiveRouter) {
        let store = Arc::new(DetectionStore::default());
        let notifications = Arc::new(NotificationCenter::new(
            NotificationConfig::default(),
            Arc::new(SystemClock),
        ));
        let router = LiveRouter::new(
            store.clone(),
            notifications.clone(),
            None,
            RouterConfig::default(),
        );
        (store, notifications, router)
    }

    fn detection_msg(event_id: &str, name: &str, ts: &str) -> String {
        json!({
            "type": "detection",
            "data": {
                "event_id": event_id,
                "display_name": name,
                "camera_name": "feeder",
                "score": 0.9,
                "detection_time": ts
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_bad_messages_do_not_stop_processing() {
        let (store, _notifications, router) = router();

        router.on_message("garbage").await;
        router.on_message(r#"{"type":"mystery"}"#).await;
        router.on_message(r#"{"type":"detection","data":{}}"#).await;
        router
            .on_message(&detection_msg("a", "Robin", "2024-05-01T10:00:00Z"))
            .await;

        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_detection_notifies_once() {
        let (store, notifications, router) = router();
        let msg = detection_msg("a", "Robin", "2024-05-01T10:00:00Z");
        router.on_message(&msg).await;
        router.on_message(&msg).await;

        assert_eq!(store.len().await, 1);
        assert_eq!(notifications.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_then_delete() {
        let (store, _notifications, router) = router();
        router
            .on_message(&detection_msg("a", "Robin", "2024-05-01T10:00:00Z"))
            .await;
        router
            .on_message(
                &json!({"type": "detection_updated", "data": {"eventId": "a", "is_hidden": true}})
                    .to_string(),
            )
            .await;
        assert!(store.get("a").await.unwrap().is_hidden);

        // stale delete
        router
            .on_message(
                &json!({"type": "detection_deleted", "data": {"eventId": "a", "timestamp": "2024-05-01T09:00:00Z"}})
                    .to_string(),
            )
            .await;
        assert_eq!(store.len().await, 1);

        router
            .on_message(
                &json!({"type": "detection_deleted", "data": {"eventId": "a", "timestamp": "2024-05-01T10:00:00Z"}})
                    .to_string(),
            )
            .await;
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reclassification_flow() {
        let (store, notifications, router) = router();
        router
            .on_message(&detection_msg("a", "Robin", "2024-05-01T10:00:00Z"))
            .await;
        router
            .on_message(
                &json!({"type": "reclassification_started", "data": {"eventId": "a", "total_frames": 6}})
                    .to_string(),
            )
            .await;
        router
            .on_message(
                &json!({"type": "reclassification_progress", "data": {
                    "eventId": "a", "current_frame": 2, "total_frames": 6,
                    "frame_score": 0.7, "top_label": "Robin"
                }})
                .to_string(),
            )
            .await;

        let state = store.get("a").await.unwrap().reclassification.unwrap();
        assert_eq!(state.current_frame, 2);

        router
            .on_message(
                &json!({"type": "reclassification_completed", "data": {"eventId": "a", "results": {"label": "Robin"}}})
                    .to_string(),
            )
            .await;

        let items = notifications.list().await;
        assert!(items.iter().any(|i| i.message.contains("Reclassification finished: Robin")));
        assert!(store.get("a").await.unwrap().reclassification.is_some());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(store.get("a").await.unwrap().reclassification.is_none());
    }

    #[tokio::test]
    async fn test_update_with_hidden_flag_hides_detection() {
        let (store, _notifications, router) = router();
        router
            .on_message(&detection_msg("a", "Robin", "2024-05-01T10:00:00Z"))
            .await;
        router
            .on_message(
                &json!({"type": "detection_updated", "data": {"eventId": "a", "hidden": true}})
                    .to_string(),
            )
            .await;
        assert!(store.get("a").await.unwrap().is_hidden);
    }

    #[tokio::test]
    async fn test_orphan_progress_dropped() {
        let (store, notifications, router) = router();
        router
            .on_message(
                &json!({"type": "reclassification_progress", "data": {"eventId": "ghost", "current_frame": 1}})
                    .to_string(),
            )
            .await;
        assert_eq!(store.len().await, 0);
        assert!(notifications.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_flips_connected() {
        let (store, _notifications, router) = router();
        assert_eq!(router.on_connected().await, HandlerSignal::Continue);
        assert!(store.connected().await);
        router.on_disconnected().await;
        assert!(!store.connected().await);
    }

    async fn backend_answering(status: axum::http::StatusCode) -> Arc<BackendClient> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route(
            "/api/events",
            axum::routing::get(move || async move { status }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Arc::new(BackendClient::new(format!("http://{}", addr), None).unwrap())
    }

    fn router_with(backend: Arc<BackendClient>) -> (Arc<DetectionStore>, LiveRouter) {
        let store = Arc::new(DetectionStore::default());
        let notifications = Arc::new(NotificationCenter::new(
            NotificationConfig::default(),
            Arc::new(SystemClock),
        ));
        let router = LiveRouter::new(store.clone(), notifications, Some(backend), RouterConfig::default());
        (store, router)
    }

    #[tokio::test]
    async fn test_rejected_hydration_signals_session_expiry() {
        let backend = backend_answering(axum::http::StatusCode::FORBIDDEN).await;
        let (_store, router) = router_with(backend);
        assert_eq!(router.on_connected().await, HandlerSignal::SessionExpired);
    }

    #[tokio::test]
    async fn test_failed_hydration_is_not_fatal() {
        let backend = backend_answering(axum::http::StatusCode::BAD_GATEWAY).await;
        let (store, router) = router_with(backend);
        assert_eq!(router.on_connected().await, HandlerSignal::Continue);
        assert!(store.connected().await);
    }
}
