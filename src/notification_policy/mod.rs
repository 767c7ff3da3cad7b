//! NotificationPolicy - Novelty / Throttle Decisions
//!
//! ## Responsibilities
//!
//! - Decide whether a locally raised notification should be surfaced
//!   (same identity + same signature inside the throttle window = duplicate)
//! - Housekeeping: 24h TTL prune before every decision, 500 entry cap
//!   evicting the least recently emitted identities
//! - Settle stale "process" notifications into read "update" items
//!
//! The policy never originates notification content; it only reads and
//! transforms items produced by its call sites.

mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Maximum age of a policy entry
pub const POLICY_TTL_HOURS: i64 = 24;
/// Maximum number of tracked identities
pub const POLICY_CAPACITY: usize = 500;
/// Appended to the message of a settled notification
pub const STALE_SUFFIX: &str = " • stale";

/// Notification type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Long-running work in progress (e.g. video reclassification)
    Process,
    /// Finished work or changed state
    Update,
    /// New detection
    Detection,
    System,
}

/// User-visible notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationItem {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub read: bool,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl NotificationItem {
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            read: false,
            timestamp,
            title: title.into(),
            message: message.into(),
            meta: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }

    fn is_stale(&self, now: DateTime<Utc>, stale_age_ms: i64) -> bool {
        self.kind == NotificationKind::Process
            && !self.read
            && (now - self.timestamp).num_milliseconds() > stale_age_ms
    }
}

#[derive(Debug, Clone)]
struct PolicyEntry {
    signature: String,
    last_emitted: DateTime<Utc>,
}

/// Notification policy engine
pub struct NotificationPolicy {
    entries: HashMap<String, PolicyEntry>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    capacity: usize,
}

impl NotificationPolicy {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(clock, Duration::hours(POLICY_TTL_HOURS), POLICY_CAPACITY)
    }

    pub fn with_limits(clock: Arc<dyn Clock>, ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            clock,
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Whether a notification for `identity` carrying `signature` should be shown now
    pub fn should_emit(
        &mut self,
        identity: &str,
        signature: &str,
        throttle_window: std::time::Duration,
    ) -> bool {
        let now = self.clock.now();
        self.prune_expired(now);

        if let Some(entry) = self.entries.get(identity) {
            let elapsed_ms = (now - entry.last_emitted).num_milliseconds();
            let window_ms = i64::try_from(throttle_window.as_millis()).unwrap_or(i64::MAX);
            if entry.signature == signature && elapsed_ms < window_ms {
                tracing::trace!(
                    identity = %identity,
                    elapsed_ms = elapsed_ms,
                    "Duplicate notification suppressed"
                );
                return false;
            }
        }

        self.entries.insert(
            identity.to_string(),
            PolicyEntry {
                signature: signature.to_string(),
                last_emitted: now,
            },
        );
        self.enforce_capacity(identity);
        true
    }

    /// Run the TTL prune outside of a decision
    pub fn prune(&mut self) -> usize {
        let now = self.clock.now();
        self.prune_expired(now)
    }

    /// Convert stale "process" items to read "update" items
    ///
    /// Pure: the input slice and the policy state are left untouched.
    pub fn settle_stale(
        &self,
        items: &[NotificationItem],
        stale_age: std::time::Duration,
    ) -> Vec<NotificationItem> {
        let now = self.clock.now();
        let stale_age_ms = i64::try_from(stale_age.as_millis()).unwrap_or(i64::MAX);

        items
            .iter()
            .map(|item| {
                if !item.is_stale(now, stale_age_ms) {
                    return item.clone();
                }

                let mut meta = item.meta.clone();
                let source = meta
                    .get("source")
                    .cloned()
                    .filter(|v| !v.is_null())
                    .unwrap_or_else(|| Value::from("system"));
                meta.insert("source".to_string(), source);
                meta.insert("stale".to_string(), Value::Bool(true));

                NotificationItem {
                    id: item.id,
                    kind: NotificationKind::Update,
                    read: true,
                    timestamp: now,
                    title: item.title.clone(),
                    message: format!("{}{}", item.message, STALE_SUFFIX),
                    meta,
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.contains_key(identity)
    }

    fn prune_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, e| now - e.last_emitted <= ttl);
        let pruned = before - self.entries.len();
        if pruned > 0 {
            tracing::debug!(pruned = pruned, "Pruned expired notification policy entries");
        }
        pruned
    }

    /// Evict least recently emitted entries; `keep` is the identity just recorded
    fn enforce_capacity(&mut self, keep: &str) {
        if self.entries.len() <= self.capacity {
            return;
        }

        let mut candidates: Vec<(DateTime<Utc>, String)> = self
            .entries
            .iter()
            .filter(|(id, _)| id.as_str() != keep)
            .map(|(id, e)| (e.last_emitted, id.clone()))
            .collect();
        candidates.sort();

        let excess = self.entries.len() - self.capacity;
        for (_, id) in candidates.into_iter().take(excess) {
            self.entries.remove(&id);
            tracing::debug!(identity = %id, "Evicted notification policy entry (capacity)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration as StdDuration;

    fn policy() -> (Arc<ManualClock>, NotificationPolicy) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let policy = NotificationPolicy::new(clock.clone());
        (clock, policy)
    }

    #[test]
    fn test_throttle_suppression_and_expiry() {
        let (clock, mut policy) = policy();
        let window = StdDuration::from_millis(5000);

        assert!(policy.should_emit("cam1", "sigA", window));
        assert!(!policy.should_emit("cam1", "sigA", window));

        clock.advance_ms(4999);
        assert!(!policy.should_emit("cam1", "sigA", window));

        clock.advance_ms(1);
        assert!(policy.should_emit("cam1", "sigA", window));
    }

    #[test]
    fn test_signature_change_bypasses_throttle() {
        let (_clock, mut policy) = policy();
        let window = StdDuration::from_millis(5000);

        assert!(policy.should_emit("cam1", "sigA", window));
        assert!(policy.should_emit("cam1", "sigB", window));
        // sigB is now the recorded signature
        assert!(!policy.should_emit("cam1", "sigB", window));
        assert_eq!(policy.len(), 1);
    }

    #[test]
    fn test_identities_are_independent() {
        let (_clock, mut policy) = policy();
        let window = StdDuration::from_secs(60);
        assert!(policy.should_emit("cam1", "sig", window));
        assert!(policy.should_emit("cam2", "sig", window));
    }

    #[test]
    fn test_ttl_prune() {
        let (clock, mut policy) = policy();
        let window = StdDuration::from_secs(1);
        assert!(policy.should_emit("old", "sig", window));

        clock.advance(Duration::hours(24));
        assert_eq!(policy.prune(), 0);

        clock.advance_ms(1);
        assert!(policy.should_emit("new", "sig", window));
        assert!(!policy.contains("old"));
        assert_eq!(policy.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_least_recently_emitted() {
        let (clock, mut policy) = policy();
        let window = StdDuration::from_secs(60);

        for i in 0..POLICY_CAPACITY {
            assert!(policy.should_emit(&format!("id-{}", i), "sig", window));
            clock.advance_ms(1);
        }
        // Re-emit id-0 with a new signature so id-1 becomes the oldest
        assert!(policy.should_emit("id-0", "other", window));
        clock.advance_ms(1);

        assert!(policy.should_emit("id-new", "sig", window));
        assert_eq!(policy.len(), POLICY_CAPACITY);
        assert!(!policy.contains("id-1"));
        assert!(policy.contains("id-0"));
        assert!(policy.contains("id-new"));
    }

    #[test]
    fn test_capacity_with_501_identities() {
        let (clock, mut policy) = policy();
        let window = StdDuration::from_secs(60);
        for i in 0..=POLICY_CAPACITY {
            policy.should_emit(&format!("id-{}", i), "sig", window);
            clock.advance_ms(10);
        }
        assert_eq!(policy.len(), 500);
        assert!(!policy.contains("id-0"));
        assert!(policy.contains("id-500"));
    }

    #[test]
    fn test_settle_stale() {
        let (clock, policy) = policy();
        let now = clock.now();

        let stale = NotificationItem::new(
            NotificationKind::Process,
            "Reclassifying",
            "Robin",
            now - Duration::hours(2),
        );
        let fresh = NotificationItem::new(
            NotificationKind::Process,
            "Reclassifying",
            "Wren",
            now - Duration::minutes(10),
        );
        let sourced = NotificationItem::new(
            NotificationKind::Process,
            "Reclassifying",
            "Jay",
            now - Duration::hours(3),
        )
        .with_meta("source", "reclassification");
        let items = vec![stale.clone(), fresh.clone(), sourced];

        let settled = policy.settle_stale(&items, StdDuration::from_secs(3600));

        assert_eq!(settled.len(), 3);
        assert_eq!(settled[0].kind, NotificationKind::Update);
        assert!(settled[0].read);
        assert!(settled[0].message.ends_with("• stale"));
        assert_eq!(settled[0].timestamp, now);
        assert_eq!(settled[0].meta["stale"], Value::Bool(true));
        assert_eq!(settled[0].meta["source"], Value::from("system"));
        assert_eq!(settled[0].id, stale.id);

        assert_eq!(settled[1], fresh);

        assert_eq!(settled[2].meta["source"], Value::from("reclassification"));

        // input untouched
        assert_eq!(items[0], stale);
    }

    #[test]
    fn test_settle_skips_read_and_other_kinds() {
        let (clock, policy) = policy();
        let old = clock.now() - Duration::hours(5);
        let mut read = NotificationItem::new(NotificationKind::Process, "t", "m", old);
        read.read = true;
        let update = NotificationItem::new(NotificationKind::Update, "t", "m", old);
        let items = vec![read.clone(), update.clone()];

        let settled = policy.settle_stale(&items, StdDuration::from_secs(60));
        assert_eq!(settled, items);
    }
}
