//! API Routes

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::detection_store::Detection;
use crate::error::{Error, Result};
use crate::models::{ApiResponse, DetectionSummary, NotificationFeed, StreamStatus};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Push connection
        .route("/api/stream/status", get(stream_status))
        .route("/api/stream/reconnect", post(stream_reconnect))
        .route("/api/stream/visible", post(stream_visible))
        .route("/api/session/restored", post(session_restored))
        // Detections
        .route("/api/detections", get(list_detections))
        .route("/api/detections/summary", get(detection_summary))
        // Notifications
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/read-all", post(mark_all_notifications_read))
        .route("/api/notifications/:id/read", post(mark_notification_read))
        .with_state(state)
}

// ========================================
// Stream Handlers
// ========================================

fn current_status(state: &AppState) -> StreamStatus {
    StreamStatus {
        url: state.config.stream_url.clone(),
        connection: state.stream.status(),
    }
}

async fn stream_status(State(state): State<AppState>) -> Json<ApiResponse<StreamStatus>> {
    Json(ApiResponse::success(current_status(&state)))
}

/// Manual reconnect (fresh connection, pending retry discarded)
async fn stream_reconnect(State(state): State<AppState>) -> Json<ApiResponse<StreamStatus>> {
    tracing::info!("Manual stream reconnect requested");
    state.stream.connect().await;
    Json(ApiResponse::success(current_status(&state)))
}

/// Host reports the dashboard became visible again
async fn stream_visible(State(state): State<AppState>) -> Json<ApiResponse<StreamStatus>> {
    state.stream.on_visibility_restored();
    Json(ApiResponse::success(current_status(&state)))
}

/// Host finished re-authentication
async fn session_restored(State(state): State<AppState>) -> Json<ApiResponse<StreamStatus>> {
    tracing::info!("Session restored, resuming event stream");
    state.stream.resume_after_reauth().await;
    Json(ApiResponse::success(current_status(&state)))
}

// ========================================
// Detection Handlers
// ========================================

#[derive(Debug, Default, Deserialize)]
struct DetectionQuery {
    include_hidden: Option<bool>,
    limit: Option<usize>,
}

async fn list_detections(
    State(state): State<AppState>,
    Query(query): Query<DetectionQuery>,
) -> Json<ApiResponse<Vec<Detection>>> {
    let include_hidden = query.include_hidden.unwrap_or(false);
    let limit = query.limit.unwrap_or(usize::MAX);

    let detections: Vec<Detection> = state
        .store
        .detections()
        .await
        .into_iter()
        .filter(|d| include_hidden || !d.is_hidden)
        .take(limit)
        .collect();

    Json(ApiResponse::success(detections))
}

async fn detection_summary(State(state): State<AppState>) -> Json<ApiResponse<DetectionSummary>> {
    Json(ApiResponse::success(DetectionSummary {
        total: state.store.len().await,
        total_today: state.store.total_today().await,
        connected: state.store.connected().await,
    }))
}

// ========================================
// Notification Handlers
// ========================================

async fn list_notifications(State(state): State<AppState>) -> Json<ApiResponse<NotificationFeed>> {
    let items = state.notifications.list().await;
    let unread = items.iter().filter(|i| !i.read).count();
    Json(ApiResponse::success(NotificationFeed { unread, items }))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>> {
    if !state.notifications.mark_read(id).await {
        return Err(Error::NotFound(format!("notification {}", id)));
    }
    Ok(Json(ApiResponse::success(json!({ "id": id, "read": true }))))
}

async fn mark_all_notifications_read(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let marked = state.notifications.mark_all_read().await;
    Json(ApiResponse::success(json!({ "marked": marked })))
}
