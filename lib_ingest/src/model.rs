//! # Data Model
//!
//! Wire and domain types shared by the stream session, the dispatcher and the
//! stores: raw SSE events, the classified event kind, the decoded
//! `object.values.update` payload and the records written downstream.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{IngestError, IngestResult};

/// Measurement name written to the time-series sink for every update.
pub const MEASUREMENT: &str = "Building Data";

/// Timestamp layout used by the platform for token expiry (`expires`).
pub const EXPIRY_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A single event as framed off the server-sent-event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Per-event identifier, if the platform sent one.
    pub id: Option<String>,
    /// Event type; `"message"` when the frame carried no `event:` field.
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
    /// Reconnection time hint in milliseconds.
    pub retry: Option<u64>,
}

impl SseEvent {
    /// Builds an event with the given type and data and no id.
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self { id: None, event: event.into(), data: data.into(), retry: None }
    }

    /// Same event, carrying `id`.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Classifies the event by its type string.
    pub fn kind(&self) -> EventKind {
        EventKind::from_type(&self.event)
    }
}

/// Event types the dispatcher knows how to handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Session establishment, carries the stream id.
    Hello,
    /// `object.values.update`: new present values for subscribed objects.
    Update,
    /// `object.values.heartbeat`: liveness only.
    Heartbeat,
    /// Anything else; the original type string is kept for logging.
    Unknown(String),
}

impl EventKind {
    /// Maps a raw SSE event type onto a kind.
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            "hello" => EventKind::Hello,
            "object.values.update" => EventKind::Update,
            "object.values.heartbeat" => EventKind::Heartbeat,
            other => EventKind::Unknown(other.to_string()),
        }
    }
}

/// The `item` part of an update element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateItem {
    /// Object GUID.
    pub id: String,
    /// Current present value.
    pub present_value: f64,
    /// Human-readable object reference (e.g. `site:NAE/Trunk.Device.AI1`).
    pub item_reference: String,
}

/// Reliability and priority of the reported present value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentValueCondition {
    pub reliability: String,
    pub priority: String,
}

/// The `condition` part of an update element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCondition {
    pub present_value: PresentValueCondition,
}

/// One element of an `object.values.update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueUpdate {
    pub item: UpdateItem,
    pub condition: UpdateCondition,
}

impl ValueUpdate {
    /// Decodes the first element of an update payload (a JSON array).
    ///
    /// Extra elements are ignored, matching what the platform sends for
    /// single-object subscriptions.
    pub fn parse_first(data: &str) -> IngestResult<Self> {
        let elements: Vec<serde_json::Value> = serde_json::from_str(data)
            .map_err(|e| IngestError::Decode(format!("update payload is not a JSON array: {}", e)))?;
        let first = elements
            .into_iter()
            .next()
            .ok_or_else(|| IngestError::Decode("update payload is an empty array".to_string()))?;
        serde_json::from_value(first)
            .map_err(|e| IngestError::Decode(format!("malformed update element: {}", e)))
    }

    /// Condition rendered as compact JSON, stored as event metadata.
    pub fn metadata(&self) -> String {
        serde_json::to_string(&self.condition).unwrap_or_default()
    }
}

/// A persisted telemetry reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_id: Option<String>,
    pub guid: String,
    pub present_value: f64,
    pub metadata: String,
    pub stream_id: String,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryEvent {
    /// Builds the durable record for an update received on `stream_id`.
    pub fn from_update(
        update: &ValueUpdate,
        event_id: Option<&str>,
        stream_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event_id.map(str::to_string),
            guid: update.item.id.clone(),
            present_value: update.item.present_value,
            metadata: update.metadata(),
            stream_id: stream_id.to_string(),
            timestamp,
        }
    }
}

/// A durable subscription row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub guid: String,
    pub active: bool,
}

/// Trims `raw` and checks it can sit in one URL path segment.
///
/// GUIDs reach the platform as `objects/{guid}/...`, so path separators,
/// query or fragment markers, percent escapes and dot segments are refused.
pub fn check_guid(raw: &str) -> IngestResult<&str> {
    let guid = raw.trim();
    if guid.is_empty() {
        return Err(IngestError::Config("GUID must not be empty".to_string()));
    }
    let escapes_segment = guid.chars().any(|c| matches!(c, '/' | '\\' | '?' | '#' | '%') || c.is_whitespace());
    if escapes_segment || guid == "." || guid == ".." {
        return Err(IngestError::Config(format!("GUID {:?} is not a valid object identifier", guid)));
    }
    Ok(guid)
}

impl SubscriptionRecord {
    /// A freshly created, active subscription.
    pub fn active(guid: impl Into<String>) -> Self {
        Self { guid: guid.into(), active: true }
    }
}

/// The record forwarded to the time-series sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub measurement: String,
    pub present_value: f64,
    pub guid: String,
    pub item_reference: String,
}

impl From<&ValueUpdate> for MetricRecord {
    fn from(update: &ValueUpdate) -> Self {
        Self {
            measurement: MEASUREMENT.to_string(),
            present_value: update.item.present_value,
            guid: update.item.id.clone(),
            item_reference: update.item.item_reference.clone(),
        }
    }
}

/// Bearer credential issued by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Body of `/login` and `/refreshToken` responses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub expires: String,
}

impl TokenResponse {
    /// Converts the wire shape into a credential, validating the expiry.
    pub fn into_credential(self) -> IngestResult<Credential> {
        let expires_at = parse_expiry(&self.expires)?;
        Ok(Credential { access_token: self.access_token, expires_at })
    }
}

/// Parses a UTC `YYYY-MM-DDTHH:MM:SSZ` timestamp.
pub fn parse_expiry(raw: &str) -> IngestResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, EXPIRY_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| IngestError::Auth(format!("unparsable token expiry '{}': {}", raw, e)))
}
