//! StreamClient - Push Connection Management
//!
//! ## Responsibilities
//!
//! - Own the single logical push connection to the backend
//! - Reconnect with bounded exponential backoff (1s .. 30s, no jitter)
//! - Visibility-aware recovery and session-expiry suspension
//! - Forward raw messages, in arrival order, to a [`StreamHandler`]
//!
//! ## Tasks
//!
//! At most two tasks exist per manager: the live connection task and the
//! pending retry timer. Both are aborted on `disconnect()`.

mod machine;
mod sse;
mod transport;

pub use machine::{
    reconnect_delay, ConnectionSnapshot, ConnectionState, LossOutcome, ReconnectMachine,
    BASE_RETRY_DELAY_MS, MAX_RETRY_DELAY_MS,
};
pub use transport::{MessageStream, PushTransport, SseTransport, TransportError};

use crate::session_guard::SessionGuard;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Handler verdict on a freshly opened connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerSignal {
    Continue,
    /// A collaborator rejected the session; suspend like a 401 on open
    SessionExpired,
}

/// Receives connection lifecycle signals and raw messages
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn on_connected(&self) -> HandlerSignal;
    async fn on_disconnected(&self);
    async fn on_message(&self, raw: &str);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// StreamConnectionManager instance
pub struct StreamConnectionManager {
    transport: Arc<dyn PushTransport>,
    handler: Arc<dyn StreamHandler>,
    session: Arc<SessionGuard>,
    machine: Mutex<ReconnectMachine>,
    live: Mutex<Option<JoinHandle<()>>>,
    retry: Mutex<Option<JoinHandle<()>>>,
}

impl StreamConnectionManager {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        handler: Arc<dyn StreamHandler>,
        session: Arc<SessionGuard>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            handler,
            session,
            machine: Mutex::new(ReconnectMachine::new()),
            live: Mutex::new(None),
            retry: Mutex::new(None),
        })
    }

    /// Open a new connection, tearing down any existing one first
    pub async fn connect(self: &Arc<Self>) {
        self.cancel_retry();
        self.close_live();
        let (epoch, was_connected) = {
            let mut machine = lock(&self.machine);
            let was_connected = machine.state() == ConnectionState::Connected;
            (machine.begin_connect(), was_connected)
        };
        if was_connected {
            self.handler.on_disconnected().await;
        }
        tracing::info!(epoch = epoch, "Connecting to event stream");
        self.spawn_live(epoch);
    }

    /// Clean teardown; terminal until `connect()` is called again
    pub async fn disconnect(&self) {
        let was_connected = {
            let mut machine = lock(&self.machine);
            let was_connected = machine.state() == ConnectionState::Connected;
            machine.disconnect();
            was_connected
        };
        self.cancel_retry();
        self.close_live();
        if was_connected {
            self.handler.on_disconnected().await;
        }
        tracing::info!("Event stream disconnected");
    }

    /// Host environment became foreground-visible again
    pub fn on_visibility_restored(self: &Arc<Self>) {
        let epoch = lock(&self.machine).on_visible();
        match epoch {
            Some(epoch) => {
                tracing::info!(epoch = epoch, "Visible again, reconnecting immediately");
                self.close_live();
                self.spawn_live(epoch);
            }
            None => {
                tracing::debug!("Visibility restored, no reconnect needed");
            }
        }
    }

    /// Re-authentication finished; start a new failure episode and reconnect
    pub async fn resume_after_reauth(self: &Arc<Self>) {
        self.session.reset();
        self.connect().await;
    }

    pub fn status(&self) -> ConnectionSnapshot {
        lock(&self.machine).snapshot()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.machine).state() == ConnectionState::Connected
    }

    // ========================================
    // Internal
    // ========================================

    fn spawn_live(self: &Arc<Self>, epoch: u64) {
        let handle = tokio::spawn(Arc::clone(self).run_live(epoch));
        *lock(&self.live) = Some(handle);
    }

    fn close_live(&self) {
        if let Some(handle) = lock(&self.live).take() {
            handle.abort();
        }
    }

    fn cancel_retry(&self) {
        if let Some(handle) = lock(&self.retry).take() {
            handle.abort();
        }
    }

    async fn run_live(self: Arc<Self>, epoch: u64) {
        let mut messages = match self.transport.open().await {
            Ok(messages) => messages,
            Err(e) if e.is_auth_failure() => {
                self.handle_session_expired(epoch, &e.to_string()).await;
                return;
            }
            Err(e) => {
                tracing::warn!(epoch = epoch, error = %e, "Event stream connect failed");
                self.handle_loss(epoch).await;
                return;
            }
        };

        let opened = lock(&self.machine).on_open(epoch);
        if !opened {
            return;
        }
        tracing::info!(epoch = epoch, "Event stream connected");
        if self.handler.on_connected().await == HandlerSignal::SessionExpired {
            self.handle_session_expired(epoch, "backend rejected the session")
                .await;
            return;
        }

        while let Some(item) = messages.next().await {
            let current = lock(&self.machine).is_current(epoch);
            if !current {
                return;
            }
            match item {
                Ok(raw) => self.handler.on_message(&raw).await,
                Err(e) => {
                    tracing::warn!(epoch = epoch, error = %e, "Event stream error");
                    break;
                }
            }
        }

        tracing::info!(epoch = epoch, "Event stream closed");
        self.handle_loss(epoch).await;
    }

    async fn handle_loss(self: &Arc<Self>, epoch: u64) {
        let outcome = lock(&self.machine).on_lost(epoch);
        match outcome {
            LossOutcome::Stale => {}
            LossOutcome::AlreadyScheduled => {
                self.handler.on_disconnected().await;
            }
            LossOutcome::Retry(delay) => {
                self.handler.on_disconnected().await;
                self.schedule_retry(delay);
            }
        }
    }

    async fn handle_session_expired(&self, epoch: u64, reason: &str) {
        let suspended = lock(&self.machine).suspend(epoch);
        if !suspended {
            return;
        }
        tracing::warn!(epoch = epoch, reason = %reason, "Session expired, reconnects suspended");
        self.cancel_retry();
        // this task is the live one; detach instead of aborting itself
        lock(&self.live).take();
        self.handler.on_disconnected().await;
        self.session.report_expired();
    }

    fn schedule_retry(self: &Arc<Self>, delay: Duration) {
        let attempt = lock(&self.machine).attempt();
        tracing::info!(
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling event stream reconnect"
        );

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.retry_elapsed();
        });
        *lock(&self.retry) = Some(handle);
    }

    fn retry_elapsed(self: &Arc<Self>) {
        // the timer task itself; detach
        lock(&self.retry).take();
        let epoch = lock(&self.machine).on_retry_elapsed();
        if let Some(epoch) = epoch {
            tracing::debug!(epoch = epoch, "Backoff elapsed, reconnecting");
            self.close_live();
            self.spawn_live(epoch);
        }
    }
}
