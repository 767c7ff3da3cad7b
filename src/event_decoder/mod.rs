//! EventDecoder - Push message validation
//!
//! Maps one raw push payload to a typed [`DomainEvent`]. Decoding is pure:
//! malformed input becomes a [`DecodeError`] and the caller logs it with
//! [`DecodeError::log`]. Nothing here can end the stream.
//!
//! Envelope: `{ "type": "<event-type>", "message"?: string, "data"?: {...} }`

use crate::detection_store::{
    DetectionFields, ReclassificationProgress, ReclassificationStart,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Recognized push event types
pub const EVENT_TYPES: [&str; 7] = [
    "connected",
    "detection",
    "detection_updated",
    "detection_deleted",
    "reclassification_started",
    "reclassification_progress",
    "reclassification_completed",
];

/// Typed domain event
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// Server hello, informational only
    Connected { message: Option<String> },
    /// New detection (or duplicate delivery of one)
    Detection(DetectionFields),
    /// Field updates for a known detection
    DetectionUpdated {
        event_id: String,
        fields: DetectionFields,
    },
    DetectionDeleted {
        event_id: String,
        timestamp: DateTime<Utc>,
    },
    ReclassificationStarted {
        event_id: String,
        start: ReclassificationStart,
    },
    ReclassificationProgress {
        event_id: String,
        progress: ReclassificationProgress,
    },
    ReclassificationCompleted {
        event_id: String,
        results: Value,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::Connected { .. } => "connected",
            DomainEvent::Detection(_) => "detection",
            DomainEvent::DetectionUpdated { .. } => "detection_updated",
            DomainEvent::DetectionDeleted { .. } => "detection_deleted",
            DomainEvent::ReclassificationStarted { .. } => "reclassification_started",
            DomainEvent::ReclassificationProgress { .. } => "reclassification_progress",
            DomainEvent::ReclassificationCompleted { .. } => "reclassification_completed",
        }
    }
}

/// Decode rejection
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload has no type field")]
    MissingType,

    #[error("unknown event type: {0}")]
    UnknownType(String),

    #[error("{event_type} event missing required field {field}")]
    MissingField {
        event_type: &'static str,
        field: &'static str,
    },

    #[error("{event_type} event has malformed data: {reason}")]
    Malformed {
        event_type: &'static str,
        reason: String,
    },
}

impl DecodeError {
    /// Emit the rejection log; unknown types are a warning, the rest errors
    pub fn log(&self, raw: &str) {
        let preview: String = raw.chars().take(200).collect();
        match self {
            DecodeError::UnknownType(event_type) => {
                tracing::warn!(event_type = %event_type, "Ignoring unknown push event type");
            }
            DecodeError::Parse(e) => {
                tracing::error!(error = %e, payload = %preview, "Failed to parse push message");
            }
            DecodeError::MissingField { event_type, field } => {
                tracing::error!(
                    event_type = %event_type,
                    field = %field,
                    "Push event missing correlating field"
                );
            }
            other => {
                tracing::error!(error = %other, payload = %preview, "Malformed push message");
            }
        }
    }
}

/// Correlation fields shared by all detection-scoped events
///
/// Producers may send several spellings in one payload; each gets its own
/// slot and the first present wins.
#[derive(Debug, Default, Deserialize)]
struct EventRef {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default, rename = "eventId")]
    event_id_camel: Option<String>,
    #[serde(default)]
    frigate_event: Option<String>,
    #[serde(default, deserialize_with = "crate::detection_store::de_opt_timestamp")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "crate::detection_store::de_opt_timestamp")]
    detection_time: Option<DateTime<Utc>>,
}

impl EventRef {
    fn event_id(&self) -> Option<String> {
        [&self.event_id, &self.event_id_camel, &self.frigate_event]
            .into_iter()
            .flatten()
            .find(|id| !id.trim().is_empty())
            .cloned()
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.or(self.detection_time)
    }
}

/// Completion carries a `results` object
#[derive(Debug, Default, Deserialize)]
struct CompletionData {
    #[serde(default)]
    results: Option<Value>,
}

/// Decode one raw push payload
pub fn decode(raw: &str) -> Result<DomainEvent, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    let envelope = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let event_type = envelope
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;
    let event_type = EVENT_TYPES
        .iter()
        .copied()
        .find(|t| *t == event_type)
        .ok_or_else(|| DecodeError::UnknownType(event_type.to_string()))?;

    if event_type == "connected" {
        let message = envelope
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok(DomainEvent::Connected { message });
    }

    let data = match envelope.get("data") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(_) => {
            return Err(DecodeError::Malformed {
                event_type,
                reason: "data is not an object".to_string(),
            })
        }
    };
    let data = Value::Object(data);

    let reference: EventRef = parse_data(event_type, &data)?;
    let event_id = reference.event_id().ok_or(DecodeError::MissingField {
            event_type,
            field: "eventId",
        })?;

    let event = match event_type {
        "detection" => {
            let mut fields: DetectionFields = parse_data(event_type, &data)?;
            fields.event_id = Some(event_id);
            DomainEvent::Detection(fields)
        }
        "detection_updated" => {
            let fields: DetectionFields = parse_data(event_type, &data)?;
            DomainEvent::DetectionUpdated { event_id, fields }
        }
        "detection_deleted" => {
            let timestamp = reference.timestamp().ok_or(DecodeError::MissingField {
                event_type,
                field: "timestamp",
            })?;
            DomainEvent::DetectionDeleted {
                event_id,
                timestamp,
            }
        }
        "reclassification_started" => DomainEvent::ReclassificationStarted {
            event_id,
            start: parse_data(event_type, &data)?,
        },
        "reclassification_progress" => DomainEvent::ReclassificationProgress {
            event_id,
            progress: parse_data(event_type, &data)?,
        },
        "reclassification_completed" => {
            let completion: CompletionData = parse_data(event_type, &data)?;
            let results = match completion.results {
                Some(results @ Value::Object(_)) => results,
                Some(Value::Null) | None => Value::Object(Map::new()),
                Some(_) => {
                    return Err(DecodeError::Malformed {
                        event_type,
                        reason: "results is not an object".to_string(),
                    })
                }
            };
            DomainEvent::ReclassificationCompleted { event_id, results }
        }
        _ => return Err(DecodeError::UnknownType(event_type.to_string())),
    };

    Ok(event)
}

fn parse_data<T: DeserializeOwned>(
    event_type: &'static str,
    data: &Value,
) -> Result<T, DecodeError> {
    T::deserialize(data).map_err(|e| DecodeError::Malformed {
        event_type,
        reason: e.to_string(),
    })
}
