//! Birdwatch Live Library
//!
//! Live event sync and notification throttling for the bird-detection
//! dashboard.
//!
//! ## Architecture
//!
//! 1. StreamClient - Push connection, reconnect backoff, visibility recovery
//! 2. SessionGuard - Session expiry signalling
//! 3. EventDecoder - Raw push payload -> typed domain event
//! 4. DetectionStore - Newest-first live detection list
//! 5. NotificationPolicy - Throttle and stale-settlement decisions
//! 6. NotificationCenter - Bounded notification feed
//! 7. LiveRouter - Applies decoded events to the store and feed
//! 8. BackendClient - REST hydration after (re)connect
//! 9. WebAPI - Local REST surface
//!
//! ## Data Flow
//!
//! push transport -> StreamClient -> LiveRouter -> EventDecoder
//!     -> DetectionStore / NotificationCenter -> WebAPI

pub mod backend_client;
pub mod detection_store;
pub mod error;
pub mod event_decoder;
pub mod live_router;
pub mod models;
pub mod notification_center;
pub mod notification_policy;
pub mod session_guard;
pub mod state;
pub mod stream_client;
pub mod web_api;

pub use error::{Error, Result};
