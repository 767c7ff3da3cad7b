//! Reconnect state machine
//!
//! Pure bookkeeping for the push connection: state, backoff attempt, the
//! single pending-retry slot, and a connection epoch. Every connection
//! attempt gets a fresh epoch; signals carrying an older epoch come from a
//! torn-down connection and are ignored.

use serde::Serialize;
use std::time::Duration;

/// First retry delay
pub const BASE_RETRY_DELAY_MS: u64 = 1_000;
/// Upper bound for the retry delay
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// `min(1000 * 2^attempt, 30000)` ms, no jitter
pub fn reconnect_delay(attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    let ms = BASE_RETRY_DELAY_MS
        .saturating_mul(factor)
        .min(MAX_RETRY_DELAY_MS);
    Duration::from_millis(ms)
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// What the driver should do after a connection loss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossOutcome {
    /// Signal from a torn-down connection, nothing to do
    Stale,
    /// Lost, but a retry is already pending
    AlreadyScheduled,
    /// Lost, schedule a retry after the delay
    Retry(Duration),
}

/// Read-only view of the machine
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub connected: bool,
    pub attempt: u32,
    pub retry_pending: bool,
    pub suspended: bool,
    pub epoch: u64,
}

#[derive(Debug)]
pub struct ReconnectMachine {
    state: ConnectionState,
    attempt: u32,
    retry_pending: bool,
    epoch: u64,
    stopped: bool,
    suspended: bool,
}

impl ReconnectMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            retry_pending: false,
            epoch: 0,
            stopped: true,
            suspended: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        !self.stopped && self.epoch == epoch
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            connected: self.state == ConnectionState::Connected,
            attempt: self.attempt,
            retry_pending: self.retry_pending,
            suspended: self.suspended,
            epoch: self.epoch,
        }
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.state = ConnectionState::Connecting;
        self.epoch
    }

    /// `connect()`: supersedes any live connection and pending retry
    pub fn begin_connect(&mut self) -> u64 {
        self.stopped = false;
        self.suspended = false;
        self.retry_pending = false;
        self.next_epoch()
    }

    /// Transport opened; returns false for a stale epoch
    pub fn on_open(&mut self, epoch: u64) -> bool {
        if !self.is_current(epoch) {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.attempt = 0;
        true
    }

    /// Transport failed or closed without being asked to
    pub fn on_lost(&mut self, epoch: u64) -> LossOutcome {
        if !self.is_current(epoch) || self.suspended {
            return LossOutcome::Stale;
        }
        self.state = ConnectionState::Reconnecting;
        if self.retry_pending {
            return LossOutcome::AlreadyScheduled;
        }
        self.retry_pending = true;
        LossOutcome::Retry(reconnect_delay(self.attempt))
    }

    /// Backoff elapsed; returns the epoch of the new attempt
    pub fn on_retry_elapsed(&mut self) -> Option<u64> {
        if !self.retry_pending || self.stopped {
            return None;
        }
        self.retry_pending = false;
        self.attempt = self.attempt.saturating_add(1);
        Some(self.next_epoch())
    }

    /// Host became foreground-visible again
    ///
    /// Restarts immediately with a fresh backoff unless connected, already
    /// waiting on a retry, explicitly stopped, or suspended for re-auth.
    pub fn on_visible(&mut self) -> Option<u64> {
        if self.state == ConnectionState::Connected
            || self.state == ConnectionState::Reconnecting
            || self.retry_pending
            || self.stopped
            || self.suspended
        {
            return None;
        }
        self.attempt = 0;
        Some(self.next_epoch())
    }

    /// Explicit `disconnect()` / teardown
    pub fn disconnect(&mut self) {
        self.stopped = true;
        self.retry_pending = false;
        self.state = ConnectionState::Disconnected;
        self.epoch += 1;
    }

    /// Session expired: stop until re-authenticated; false for a stale epoch
    pub fn suspend(&mut self, epoch: u64) -> bool {
        if !self.is_current(epoch) {
            return false;
        }
        self.disconnect();
        self.suspended = true;
        true
    }
}

impl Default for ReconnectMachine {
    fn default() -> Self {
        Self::new()
    }
}
