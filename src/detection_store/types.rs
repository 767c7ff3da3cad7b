//! Detection record types
//!
//! Wire shapes (as pushed by the backend) and the local record they are
//! reconciled into.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Detection record fields as carried by `detection` / `detection_updated`
///
/// Every field is optional so the same shape serves full inserts and
/// partial updates. `None` means "not present in this message".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "WireDetectionFields")]
pub struct DetectionFields {
    pub event_id: Option<String>,
    pub detection_time: Option<DateTime<Utc>>,
    pub display_name: Option<String>,
    pub scientific_name: Option<String>,
    pub common_name: Option<String>,
    pub category_name: Option<String>,
    pub score: Option<f64>,
    pub camera_name: Option<String>,
    pub audio_confirmed: Option<bool>,
    pub audio_species: Option<String>,
    pub audio_score: Option<f64>,
    pub temperature: Option<f64>,
    pub weather_condition: Option<String>,
    pub is_hidden: Option<bool>,
}

/// Raw wire shape; producers may send several spellings of the same key
/// in one payload, so each spelling gets its own slot.
#[derive(Deserialize)]
struct WireDetectionFields {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default, rename = "eventId")]
    event_id_camel: Option<String>,
    #[serde(default)]
    frigate_event: Option<String>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    detection_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    scientific_name: Option<String>,
    #[serde(default)]
    common_name: Option<String>,
    #[serde(default)]
    category_name: Option<String>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    camera_name: Option<String>,
    #[serde(default)]
    audio_confirmed: Option<bool>,
    #[serde(default)]
    audio_species: Option<String>,
    #[serde(default)]
    audio_score: Option<f64>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    weather_condition: Option<String>,
    #[serde(default)]
    is_hidden: Option<bool>,
    #[serde(default)]
    hidden: Option<bool>,
}

impl From<WireDetectionFields> for DetectionFields {
    fn from(wire: WireDetectionFields) -> Self {
        Self {
            event_id: wire.event_id.or(wire.event_id_camel).or(wire.frigate_event),
            detection_time: wire.detection_time.or(wire.timestamp),
            display_name: wire.display_name,
            scientific_name: wire.scientific_name,
            common_name: wire.common_name,
            category_name: wire.category_name,
            score: wire.score,
            camera_name: wire.camera_name,
            audio_confirmed: wire.audio_confirmed,
            audio_species: wire.audio_species,
            audio_score: wire.audio_score,
            temperature: wire.temperature,
            weather_condition: wire.weather_condition,
            is_hidden: wire.is_hidden.or(wire.hidden),
        }
    }
}

/// `reclassification_started` data
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReclassificationStart {
    #[serde(default)]
    pub total_frames: Option<u32>,
}

/// `reclassification_progress` data
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReclassificationProgress {
    #[serde(default)]
    pub current_frame: Option<u32>,
    #[serde(default)]
    pub total_frames: Option<u32>,
    #[serde(default)]
    pub frame_score: Option<f64>,
    #[serde(default)]
    pub top_label: Option<String>,
}

/// Reclassification lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclassificationStatus {
    Running,
    Completed,
}

/// Video reclassification sub-state attached to a detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReclassificationState {
    pub status: ReclassificationStatus,
    pub current_frame: u32,
    pub total_frames: u32,
    pub frame_score: Option<f64>,
    pub top_label: Option<String>,
    pub results: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReclassificationState {
    pub fn started(total_frames: Option<u32>, now: DateTime<Utc>) -> Self {
        Self {
            status: ReclassificationStatus::Running,
            current_frame: 0,
            total_frames: total_frames.unwrap_or(0),
            frame_score: None,
            top_label: None,
            results: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn apply_progress(&mut self, progress: &ReclassificationProgress, now: DateTime<Utc>) {
        if let Some(current) = progress.current_frame {
            self.current_frame = current;
        }
        if let Some(total) = progress.total_frames {
            self.total_frames = total;
        }
        if progress.frame_score.is_some() {
            self.frame_score = progress.frame_score;
        }
        if progress.top_label.is_some() {
            self.top_label = progress.top_label.clone();
        }
        self.updated_at = now;
    }

    pub fn complete(&mut self, results: serde_json::Value, now: DateTime<Utc>) {
        self.status = ReclassificationStatus::Completed;
        if self.total_frames > 0 {
            self.current_frame = self.total_frames;
        }
        self.results = Some(results);
        self.updated_at = now;
    }
}

/// Detection record held by the store
///
/// Identity is `(event_id, detection_time)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub event_id: String,
    pub detection_time: DateTime<Utc>,
    pub display_name: String,
    pub scientific_name: Option<String>,
    pub common_name: Option<String>,
    pub category_name: Option<String>,
    pub score: f64,
    pub camera_name: String,
    pub audio_confirmed: bool,
    pub audio_species: Option<String>,
    pub audio_score: Option<f64>,
    pub temperature: Option<f64>,
    pub weather_condition: Option<String>,
    pub is_hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reclassification: Option<ReclassificationState>,
}

impl Detection {
    /// Build a record from wire fields
    ///
    /// `received_at` stamps records that arrive without a timestamp.
    pub fn from_fields(fields: DetectionFields, received_at: DateTime<Utc>) -> Result<Self> {
        let event_id = match fields.event_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => {
                return Err(Error::Validation(
                    "detection record without event_id".to_string(),
                ))
            }
        };

        let display_name = fields
            .display_name
            .or_else(|| fields.common_name.clone())
            .or_else(|| fields.category_name.clone())
            .unwrap_or_else(|| "Unknown".to_string());

        Ok(Self {
            event_id,
            detection_time: fields.detection_time.unwrap_or(received_at),
            display_name,
            scientific_name: fields.scientific_name,
            common_name: fields.common_name,
            category_name: fields.category_name,
            score: fields.score.unwrap_or(0.0),
            camera_name: fields.camera_name.unwrap_or_default(),
            audio_confirmed: fields.audio_confirmed.unwrap_or(false),
            audio_species: fields.audio_species,
            audio_score: fields.audio_score,
            temperature: fields.temperature,
            weather_condition: fields.weather_condition,
            is_hidden: fields.is_hidden.unwrap_or(false),
            reclassification: None,
        })
    }

    /// Merge the present fields of an update into this record
    pub fn merge(&mut self, fields: &DetectionFields) {
        if let Some(ts) = fields.detection_time {
            self.detection_time = ts;
        }
        if let Some(v) = &fields.display_name {
            self.display_name = v.clone();
        }
        if fields.scientific_name.is_some() {
            self.scientific_name = fields.scientific_name.clone();
        }
        if fields.common_name.is_some() {
            self.common_name = fields.common_name.clone();
        }
        if fields.category_name.is_some() {
            self.category_name = fields.category_name.clone();
        }
        if let Some(v) = fields.score {
            self.score = v;
        }
        if let Some(v) = &fields.camera_name {
            self.camera_name = v.clone();
        }
        if let Some(v) = fields.audio_confirmed {
            self.audio_confirmed = v;
        }
        if fields.audio_species.is_some() {
            self.audio_species = fields.audio_species.clone();
        }
        if fields.audio_score.is_some() {
            self.audio_score = fields.audio_score;
        }
        if fields.temperature.is_some() {
            self.temperature = fields.temperature;
        }
        if fields.weather_condition.is_some() {
            self.weather_condition = fields.weather_condition.clone();
        }
        if let Some(v) = fields.is_hidden {
            self.is_hidden = v;
        }
    }

    /// Replace every attribute with `newer`, keeping the reclassification
    /// sub-state when `newer` carries none
    pub fn replace_with(&mut self, newer: Detection) {
        let reclassification = newer
            .reclassification
            .clone()
            .or_else(|| self.reclassification.take());
        *self = newer;
        self.reclassification = reclassification;
    }
}

/// Parse an ISO-8601 instant
///
/// RFC 3339 first; offset-less timestamps are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub(crate) fn de_opt_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw))),
    }
}
