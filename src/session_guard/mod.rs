//! SessionGuard - Session expiry signalling
//!
//! The push endpoint answers 401/403 once the dashboard session is gone.
//! The registered callback runs at most once per failure episode; an
//! episode ends when re-authentication completes and `reset()` is called.

use std::sync::atomic::{AtomicBool, Ordering};

type ExpiredCallback = Box<dyn Fn() + Send + Sync>;

/// SessionGuard instance
pub struct SessionGuard {
    expired: AtomicBool,
    on_expired: ExpiredCallback,
}

impl SessionGuard {
    pub fn new(on_expired: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            expired: AtomicBool::new(false),
            on_expired: Box::new(on_expired),
        }
    }

    /// Guard without a callback (tests, headless use)
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Report an expired session; returns true if this opened a new episode
    pub fn report_expired(&self) -> bool {
        if self.expired.swap(true, Ordering::AcqRel) {
            tracing::debug!("Session expiry already reported for this episode");
            return false;
        }
        tracing::warn!("Session expired");
        (self.on_expired)();
        true
    }

    /// Re-authenticated
    pub fn reset(&self) {
        self.expired.store(false, Ordering::Release);
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }
}

impl Default for SessionGuard {
    fn default() -> Self {
        Self::noop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_callback_once_per_episode() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let guard = SessionGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(guard.report_expired());
        assert!(!guard.report_expired());
        assert!(guard.is_expired());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        guard.reset();
        assert!(!guard.is_expired());
        assert!(guard.report_expired());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
