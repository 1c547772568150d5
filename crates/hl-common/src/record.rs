//! Timestamped telemetry records.

use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Opaque structured payload of a record.
pub type Payload = Map<String, Value>;

/// Kind of record. Each kind has its own cache and report directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Periodic machine snapshot.
    Hardware,
    /// Process start/close transition.
    Event,
}

impl RecordKind {
    /// All kinds, in rollup order.
    pub const ALL: [RecordKind; 2] = [RecordKind::Hardware, RecordKind::Event];

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Hardware => "hardware",
            RecordKind::Event => "events",
        }
    }

    /// Directory name under the cache and report roots.
    pub fn dir_name(&self) -> &'static str {
        match self {
            RecordKind::Hardware => "Hardware",
            RecordKind::Event => "Events",
        }
    }

    /// Suffix used in report artifact names.
    pub fn report_suffix(&self) -> &'static str {
        self.as_str()
    }

    /// Inverse of [`RecordKind::report_suffix`].
    pub fn from_report_suffix(suffix: &str) -> Option<Self> {
        RecordKind::ALL
            .into_iter()
            .find(|kind| kind.report_suffix() == suffix)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hardware" => Ok(RecordKind::Hardware),
            "event" | "events" => Ok(RecordKind::Event),
            _ => Err(format!("unknown record kind: {}", s)),
        }
    }
}

/// Process lifecycle transition carried by an event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Start,
    Close,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Start => "start",
            EventType::Close => "close",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single timestamped record.
///
/// `timestamp` is the local wall-clock creation instant. Records are never
/// mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub kind: RecordKind,
    pub timestamp: NaiveDateTime,
    pub payload: Payload,
}

impl Record {
    pub fn new(kind: RecordKind, timestamp: NaiveDateTime, payload: Payload) -> Self {
        Self {
            kind,
            timestamp,
            payload,
        }
    }

    /// Hardware record stamped with the current local time.
    pub fn hardware(payload: Payload) -> Self {
        Self::new(RecordKind::Hardware, Local::now().naive_local(), payload)
    }

    /// Event record for a process transition at `timestamp`.
    pub fn event(
        timestamp: NaiveDateTime,
        event_type: EventType,
        pid: u32,
        app_name: &str,
        path: &str,
    ) -> Self {
        let mut payload = Payload::new();
        payload.insert("event_type".into(), Value::from(event_type.as_str()));
        payload.insert("app_name".into(), Value::from(app_name));
        payload.insert("path".into(), Value::from(path));
        payload.insert("pid".into(), Value::from(pid));
        Self::new(RecordKind::Event, timestamp, payload)
    }

    /// Calendar day the record belongs to.
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// Event type, if this is a well-formed event record.
    pub fn event_type(&self) -> Option<EventType> {
        match self.payload.get("event_type").and_then(Value::as_str)? {
            "start" => Some(EventType::Start),
            "close" => Some(EventType::Close),
            _ => None,
        }
    }
}
