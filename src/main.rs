//! Birdwatch Live
//!
//! Main entry point: keeps the dashboard's push connection alive and serves
//! the live detection list and notification feed over a local REST API.

use birdwatch_live::{
    backend_client::BackendClient,
    detection_store::DetectionStore,
    live_router::LiveRouter,
    notification_center::NotificationCenter,
    notification_policy::SystemClock,
    session_guard::SessionGuard,
    state::{AppConfig, AppState},
    stream_client::{SseTransport, StreamConnectionManager},
    web_api,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "birdwatch_live=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Birdwatch Live v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        stream_url = %config.stream_url,
        backend_url = %config.backend_url,
        authenticated = config.api_key.is_some(),
        idle_timeout_sec = config.stream_idle_timeout.as_secs(),
        "Configuration loaded"
    );

    // Initialize components
    let store = Arc::new(DetectionStore::new(config.max_detections));
    tracing::info!(max_detections = config.max_detections, "DetectionStore initialized");

    let notifications = Arc::new(NotificationCenter::new(
        config.notification_config(),
        Arc::new(SystemClock),
    ));
    tracing::info!("NotificationCenter initialized");

    let backend = match BackendClient::new(config.backend_url.clone(), config.api_key.clone()) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!(error = %e, "BackendClient unavailable, hydration disabled");
            None
        }
    };

    let router = Arc::new(LiveRouter::new(
        store.clone(),
        notifications.clone(),
        backend.clone(),
        config.router_config(),
    ));

    let session = Arc::new(SessionGuard::new(|| {
        tracing::warn!("Dashboard session expired; POST /api/session/restored after signing in again");
    }));

    let transport = Arc::new(
        SseTransport::new(config.stream_url.clone())
            .with_token(config.api_key.clone())
            .with_idle_timeout(config.stream_idle_timeout),
    );
    let stream = StreamConnectionManager::new(transport, router, session);
    stream.connect().await;
    tracing::info!("StreamConnectionManager started");

    let _settle_task = notifications
        .clone()
        .start_settle_task(config.notify_settle_interval);
    tracing::info!(
        interval_sec = config.notify_settle_interval.as_secs(),
        "Notification settle task started"
    );

    let state = AppState {
        config: config.clone(),
        store,
        notifications,
        stream: stream.clone(),
        backend,
        started_at: Instant::now(),
    };

    let app = web_api::create_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await?;

    stream.disconnect().await;
    Ok(())
}
