//! WebAPI - Local REST API
//!
//! ## Responsibilities
//!
//! - Read access to the live detection list and notification feed
//! - Host signals: visibility restored, session restored, manual reconnect
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let backend_ok = match &state.backend {
        Some(backend) => backend.health_check().await.unwrap_or(false),
        None => false,
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        stream_connected: state.stream.is_connected(),
        backend_connected: backend_ok,
    })
}
