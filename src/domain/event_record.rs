use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Event time in whole seconds since the Unix epoch.
pub type Timestamp = i64;

static NULL_VALUE: Value = Value::Null;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Record has no '{0}' field")]
    MissingTimestamp(String),
    #[error("Field '{field}' is not an integer timestamp: {value}")]
    InvalidTimestamp { field: String, value: String },
    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Names of the row fields used to build the tracking envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub user_id: String,
    pub event: String,
    pub timestamp: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            user_id: "user_id".to_string(),
            event: "event".to_string(),
            timestamp: "timestamp".to_string(),
        }
    }
}

/// A single enriched event row fetched from the warehouse.
///
/// The payload is kept opaque; only the event timestamp is extracted, because
/// it drives the checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    fields: Map<String, Value>,
    timestamp: Timestamp,
}

/// Wire form of a record as accepted by the ingestion batch endpoint.
#[derive(Debug, Serialize)]
pub struct TrackEvent<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "userId")]
    user_id: &'a Value,
    event: &'a Value,
    properties: &'a Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

impl EventRecord {
    pub fn new(fields: Map<String, Value>, timestamp: Timestamp) -> Self {
        Self { fields, timestamp }
    }

    /// Build a record from a raw row, reading the event time from `timestamp_field`.
    pub fn from_row(
        fields: Map<String, Value>,
        timestamp_field: &str,
    ) -> Result<Self, RecordError> {
        let raw = fields
            .get(timestamp_field)
            .ok_or_else(|| RecordError::MissingTimestamp(timestamp_field.to_string()))?;
        let timestamp = parse_timestamp(raw).ok_or_else(|| RecordError::InvalidTimestamp {
            field: timestamp_field.to_string(),
            value: raw.to_string(),
        })?;

        Ok(Self { fields, timestamp })
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn to_track_event<'a>(&'a self, mapping: &FieldMapping) -> TrackEvent<'a> {
        TrackEvent {
            kind: "track",
            user_id: self.fields.get(&mapping.user_id).unwrap_or(&NULL_VALUE),
            event: self.fields.get(&mapping.event).unwrap_or(&NULL_VALUE),
            properties: &self.fields,
            timestamp: DateTime::from_timestamp(self.timestamp, 0)
                .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }

    /// Serialize the record exactly as it will appear inside a batch body.
    pub fn encode(&self, mapping: &FieldMapping) -> Result<Vec<u8>, RecordError> {
        Ok(serde_json::to_vec(&self.to_track_event(mapping))?)
    }
}

fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
