//! DetectionStore - Live Detection State
//!
//! ## Responsibilities
//!
//! - Single source of truth for detection records shown on the dashboard
//! - Reconcile pushed add/update/delete/progress events (duplicates and
//!   stale deletes tolerated, last write wins per field)
//! - Derived views: newest-first list, today's count, connection flag
//!
//! All mutation goes through the named operations below so that the
//! one-record-per-event_id invariant always holds.

mod types;

pub use types::{
    parse_timestamp, Detection, DetectionFields, ReclassificationProgress,
    ReclassificationStart, ReclassificationState, ReclassificationStatus,
};
pub(crate) use types::de_opt_timestamp;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Default maximum number of records kept in memory
pub const DEFAULT_MAX_DETECTIONS: usize = 500;

/// Result of `add_detection`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// New record inserted at the head
    Inserted,
    /// Duplicate delivery, existing record updated in place
    Merged,
}

/// Ordered detection collection (newest first)
pub struct DetectionCollection {
    records: VecDeque<Detection>,
    connected: bool,
    max_records: usize,
}

impl DetectionCollection {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: VecDeque::new(),
            connected: false,
            max_records: max_records.max(1),
        }
    }

    fn position(&self, event_id: &str) -> Option<usize> {
        self.records.iter().position(|d| d.event_id == event_id)
    }

    fn find_mut(&mut self, event_id: &str) -> Option<&mut Detection> {
        self.records.iter_mut().find(|d| d.event_id == event_id)
    }

    fn trim(&mut self) {
        while self.records.len() > self.max_records {
            if let Some(evicted) = self.records.pop_back() {
                tracing::debug!(event_id = %evicted.event_id, "Evicted oldest detection");
            }
        }
    }

    pub fn add_detection(&mut self, detection: Detection) -> AddOutcome {
        if let Some(existing) = self.find_mut(&detection.event_id) {
            tracing::debug!(
                event_id = %detection.event_id,
                "Duplicate detection delivery, updating in place"
            );
            existing.replace_with(detection);
            return AddOutcome::Merged;
        }

        tracing::debug!(
            event_id = %detection.event_id,
            display_name = %detection.display_name,
            camera = %detection.camera_name,
            "Detection added"
        );
        self.records.push_front(detection);
        self.trim();
        AddOutcome::Inserted
    }

    pub fn update_detection(&mut self, event_id: &str, fields: &DetectionFields) -> bool {
        match self.find_mut(event_id) {
            Some(existing) => {
                existing.merge(fields);
                true
            }
            None => {
                tracing::warn!(event_id = %event_id, "Update for unknown detection ignored");
                false
            }
        }
    }

    /// Remove by id, guarded by the stored timestamp when one is given
    pub fn remove_detection(
        &mut self,
        event_id: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Option<Detection> {
        let Some(idx) = self.position(event_id) else {
            tracing::debug!(event_id = %event_id, "Delete for unknown detection ignored");
            return None;
        };

        if let Some(ts) = timestamp {
            let stored = self.records[idx].detection_time;
            if stored != ts {
                tracing::warn!(
                    event_id = %event_id,
                    stored = %stored,
                    requested = %ts,
                    "Stale delete ignored (timestamp mismatch)"
                );
                return None;
            }
        }

        let removed = self.records.remove(idx);
        tracing::debug!(event_id = %event_id, "Detection removed");
        removed
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn start_reclassification(
        &mut self,
        event_id: &str,
        start: &ReclassificationStart,
        now: DateTime<Utc>,
    ) -> bool {
        match self.find_mut(event_id) {
            Some(det) => {
                det.reclassification = Some(ReclassificationState::started(start.total_frames, now));
                tracing::debug!(
                    event_id = %event_id,
                    total_frames = ?start.total_frames,
                    "Reclassification started"
                );
                true
            }
            None => {
                tracing::warn!(event_id = %event_id, "Reclassification start for unknown detection dropped");
                false
            }
        }
    }

    pub fn update_reclassification_progress(
        &mut self,
        event_id: &str,
        progress: &ReclassificationProgress,
        now: DateTime<Utc>,
    ) -> bool {
        match self.find_mut(event_id) {
            Some(det) => {
                det.reclassification
                    .get_or_insert_with(|| ReclassificationState::started(progress.total_frames, now))
                    .apply_progress(progress, now);
                true
            }
            None => {
                tracing::warn!(
                    event_id = %event_id,
                    current_frame = ?progress.current_frame,
                    "Reclassification progress for unknown detection dropped"
                );
                false
            }
        }
    }

    pub fn complete_reclassification(
        &mut self,
        event_id: &str,
        results: serde_json::Value,
        now: DateTime<Utc>,
    ) -> bool {
        match self.find_mut(event_id) {
            Some(det) => {
                det.reclassification
                    .get_or_insert_with(|| ReclassificationState::started(None, now))
                    .complete(results, now);
                tracing::debug!(event_id = %event_id, "Reclassification completed");
                true
            }
            None => {
                tracing::warn!(event_id = %event_id, "Reclassification result for unknown detection dropped");
                false
            }
        }
    }

    /// Drop a finished reclassification sub-state; running ones are kept
    pub fn clear_reclassification(&mut self, event_id: &str) -> bool {
        let Some(det) = self.find_mut(event_id) else {
            return false;
        };
        match &det.reclassification {
            Some(state) if state.status == ReclassificationStatus::Completed => {
                det.reclassification = None;
                true
            }
            _ => false,
        }
    }

    /// Merge a snapshot fetched from the backend; returns the number of new records
    pub fn hydrate(&mut self, snapshot: Vec<Detection>) -> usize {
        let mut inserted = 0;
        for detection in snapshot {
            if let Some(existing) = self.find_mut(&detection.event_id) {
                existing.replace_with(detection);
            } else {
                self.records.push_back(detection);
                inserted += 1;
            }
        }

        self.records
            .make_contiguous()
            .sort_by(|a, b| b.detection_time.cmp(&a.detection_time));
        self.trim();
        inserted
    }

    pub fn get(&self, event_id: &str) -> Option<&Detection> {
        self.records.iter().find(|d| d.event_id == event_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.records.iter()
    }

    /// Count records whose timestamp falls on `date` in `tz`
    pub fn total_on<Tz: TimeZone>(&self, date: NaiveDate, tz: &Tz) -> usize {
        self.records
            .iter()
            .filter(|d| d.detection_time.with_timezone(tz).date_naive() == date)
            .count()
    }

    /// Records detected on the current local calendar day, computed at read time
    pub fn total_today(&self) -> usize {
        self.total_on(Local::now().date_naive(), &Local)
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// DetectionStore instance
pub struct DetectionStore {
    inner: RwLock<DetectionCollection>,
}

impl DetectionStore {
    /// Create new DetectionStore
    pub fn new(max_records: usize) -> Self {
        Self {
            inner: RwLock::new(DetectionCollection::new(max_records)),
        }
    }

    pub async fn add_detection(&self, detection: Detection) -> AddOutcome {
        self.inner.write().await.add_detection(detection)
    }

    pub async fn update_detection(&self, event_id: &str, fields: &DetectionFields) -> bool {
        self.inner.write().await.update_detection(event_id, fields)
    }

    pub async fn remove_detection(
        &self,
        event_id: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Option<Detection> {
        self.inner.write().await.remove_detection(event_id, timestamp)
    }

    pub async fn set_connected(&self, connected: bool) {
        self.inner.write().await.set_connected(connected);
    }

    /// Returns the updated record when the detection is known
    pub async fn start_reclassification(
        &self,
        event_id: &str,
        start: &ReclassificationStart,
    ) -> Option<Detection> {
        let mut inner = self.inner.write().await;
        if inner.start_reclassification(event_id, start, Utc::now()) {
            inner.get(event_id).cloned()
        } else {
            None
        }
    }

    pub async fn update_reclassification_progress(
        &self,
        event_id: &str,
        progress: &ReclassificationProgress,
    ) -> bool {
        self.inner
            .write()
            .await
            .update_reclassification_progress(event_id, progress, Utc::now())
    }

    /// Returns the updated record when the detection is known
    pub async fn complete_reclassification(
        &self,
        event_id: &str,
        results: serde_json::Value,
    ) -> Option<Detection> {
        let mut inner = self.inner.write().await;
        if inner.complete_reclassification(event_id, results, Utc::now()) {
            inner.get(event_id).cloned()
        } else {
            None
        }
    }

    pub async fn clear_reclassification(&self, event_id: &str) -> bool {
        self.inner.write().await.clear_reclassification(event_id)
    }

    pub async fn hydrate(&self, snapshot: Vec<Detection>) -> usize {
        self.inner.write().await.hydrate(snapshot)
    }

    /// Newest-first copy of all records
    pub async fn detections(&self) -> Vec<Detection> {
        self.inner.read().await.iter().cloned().collect()
    }

    pub async fn get(&self, event_id: &str) -> Option<Detection> {
        self.inner.read().await.get(event_id).cloned()
    }

    pub async fn total_today(&self) -> usize {
        self.inner.read().await.total_today()
    }

    pub async fn connected(&self) -> bool {
        self.inner.read().await.connected()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

impl Default for DetectionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DETECTIONS)
    }
}
