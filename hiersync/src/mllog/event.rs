use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;

/// Prefix of every rendered log line.
pub const LINE_PREFIX: &str = ":::MLLOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    IntervalStart,
    IntervalEnd,
    PointInTime,
}

/// One structured log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub namespace: String,
    pub time_ms: u64,
    pub event_type: EventType,
    pub key: String,
    pub value: Value,
    pub metadata: Value,
}

impl LogEvent {
    /// A record stamped with the current wall-clock time. Missing metadata
    /// becomes an empty object.
    pub fn now(
        namespace: &str,
        event_type: EventType,
        key: &str,
        value: Value,
        metadata: Option<Value>,
    ) -> Self {
        let time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            namespace: namespace.to_string(),
            time_ms,
            event_type,
            key: key.to_string(),
            value,
            metadata: metadata.unwrap_or_else(|| Value::Object(Default::default())),
        }
    }

    /// Render as `:::MLLOG {json}`.
    pub fn to_line(&self) -> crate::error::Result<String> {
        Ok(format!("{LINE_PREFIX} {}", serde_json::to_string(self)?))
    }
}
