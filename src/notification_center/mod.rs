//! NotificationCenter - Dashboard Notification Feed
//!
//! ## Responsibilities
//!
//! - Raise notifications for live detection / reclassification events
//! - Consult the NotificationPolicy before surfacing anything
//! - Bounded newest-first feed with read state
//! - Periodic settlement of stale "process" items

use crate::detection_store::Detection;
use crate::notification_policy::{
    Clock, NotificationItem, NotificationKind, NotificationPolicy,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Feed configuration
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Maximum number of items kept in the feed
    pub capacity: usize,
    /// Same species on the same camera within this window is not re-announced
    pub detection_throttle: Duration,
    /// Unread "process" items older than this are settled
    pub stale_age: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            capacity: 200,
            detection_throttle: Duration::from_millis(60_000),
            stale_age: Duration::from_secs(600),
        }
    }
}

/// NotificationCenter instance
pub struct NotificationCenter {
    items: RwLock<VecDeque<NotificationItem>>,
    policy: Mutex<NotificationPolicy>,
    clock: Arc<dyn Clock>,
    config: NotificationConfig,
}

impl NotificationCenter {
    pub fn new(config: NotificationConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            items: RwLock::new(VecDeque::new()),
            policy: Mutex::new(NotificationPolicy::new(clock.clone())),
            clock,
            config,
        }
    }

    async fn push(&self, item: NotificationItem) {
        let mut items = self.items.write().await;
        items.push_front(item);
        items.truncate(self.config.capacity.max(1));
    }

    /// Announce a new detection unless throttled
    pub async fn notify_detection(&self, detection: &Detection) -> Option<NotificationItem> {
        if detection.is_hidden {
            return None;
        }

        let identity = format!("detection:{}", detection.camera_name);
        let emit = self.policy.lock().await.should_emit(
            &identity,
            &detection.display_name,
            self.config.detection_throttle,
        );
        if !emit {
            tracing::debug!(
                event_id = %detection.event_id,
                camera = %detection.camera_name,
                "Detection notification throttled"
            );
            return None;
        }

        let message = if detection.camera_name.is_empty() {
            format!("{} ({:.0}%)", detection.display_name, detection.score * 100.0)
        } else {
            format!(
                "{} at {} ({:.0}%)",
                detection.display_name,
                detection.camera_name,
                detection.score * 100.0
            )
        };
        let item = NotificationItem::new(
            NotificationKind::Detection,
            "New detection",
            message,
            self.clock.now(),
        )
        .with_meta("source", "detection")
        .with_meta("event_id", detection.event_id.clone());

        self.push(item.clone()).await;
        Some(item)
    }

    /// Open a "process" item for a running reclassification
    pub async fn notify_reclassification_started(
        &self,
        detection: &Detection,
    ) -> Option<NotificationItem> {
        let identity = format!("reclassify:{}", detection.event_id);
        let emit = self.policy.lock().await.should_emit(
            &identity,
            "started",
            self.config.detection_throttle,
        );
        if !emit {
            return None;
        }

        let item = NotificationItem::new(
            NotificationKind::Process,
            "Reclassifying",
            format!("Re-scoring {} from video", detection.display_name),
            self.clock.now(),
        )
        .with_meta("source", "reclassification")
        .with_meta("event_id", detection.event_id.clone());

        self.push(item.clone()).await;
        Some(item)
    }

    /// Close the reclassification item for `event_id`
    ///
    /// The open "process" item is converted in place; without one a fresh
    /// "update" item is added.
    pub async fn notify_reclassification_completed(
        &self,
        event_id: &str,
        top_label: Option<&str>,
    ) -> NotificationItem {
        let message = match top_label {
            Some(label) => format!("Reclassification finished: {}", label),
            None => "Reclassification finished".to_string(),
        };
        let now = self.clock.now();

        let mut items = self.items.write().await;
        let open = items.iter_mut().find(|item| {
            item.kind == NotificationKind::Process
                && item.meta.get("event_id").and_then(|v| v.as_str()) == Some(event_id)
        });

        if let Some(item) = open {
            item.kind = NotificationKind::Update;
            item.title = "Reclassified".to_string();
            item.message = message;
            item.timestamp = now;
            return item.clone();
        }

        let item = NotificationItem::new(NotificationKind::Update, "Reclassified", message, now)
            .with_meta("source", "reclassification")
            .with_meta("event_id", event_id.to_string());
        items.push_front(item.clone());
        items.truncate(self.config.capacity.max(1));
        item
    }

    /// Settle stale process items; returns how many changed
    pub async fn settle_stale(&self) -> usize {
        let mut items = self.items.write().await;
        let current: Vec<NotificationItem> = items.iter().cloned().collect();
        let settled = self
            .policy
            .lock()
            .await
            .settle_stale(&current, self.config.stale_age);

        let changed = current
            .iter()
            .zip(settled.iter())
            .filter(|(before, after)| before != after)
            .count();
        *items = settled.into();

        if changed > 0 {
            tracing::info!(settled = changed, "Settled stale notifications");
        }
        changed
    }

    /// Periodic settlement task
    pub fn start_settle_task(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.settle_stale().await;
            }
        })
    }

    /// Newest-first copy of the feed
    pub async fn list(&self) -> Vec<NotificationItem> {
        self.items.read().await.iter().cloned().collect()
    }

    pub async fn unread_count(&self) -> usize {
        self.items.read().await.iter().filter(|i| !i.read).count()
    }

    pub async fn mark_read(&self, id: Uuid) -> bool {
        let mut items = self.items.write().await;
        match items.iter_mut().find(|i| i.id == id) {
            Some(item) => {
                item.read = true;
                true
            }
            None => false,
        }
    }

    pub async fn mark_all_read(&self) -> usize {
        let mut items = self.items.write().await;
        let mut marked = 0;
        for item in items.iter_mut().filter(|i| !i.read) {
            item.read = true;
            marked += 1;
        }
        marked
    }
}
