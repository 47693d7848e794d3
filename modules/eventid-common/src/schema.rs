//! Wire contract for events on the broker.
//!
//! The enums are closed: an event type or platform outside these lists fails
//! decoding. Adding a type means adding a variant (and to `EventType::ALL`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::EventIdError;

/// Key in `event_data` counting how many workflow hops produced this event.
pub const CAUSATION_DEPTH_KEY: &str = "causation_depth";
/// Key in `event_data` holding the `event_id` of the event that caused this one.
pub const CAUSED_BY_KEY: &str = "caused_by";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    RegulatoryUpdate,
    LawFetched,
    SpecGenerated,
    SpecUpdated,
    SpecRequested,
    AuditStarted,
    AuditCompleted,
    ViolationFound,
    ScanRequested,
    DocumentUploaded,
    ComplianceCheck,
    GapIdentified,
    ReviewRequested,
    WorkflowStarted,
    WorkflowCompleted,
    ValidationStatus,
}

impl EventType {
    pub const ALL: [EventType; 16] = [
        EventType::RegulatoryUpdate,
        EventType::LawFetched,
        EventType::SpecGenerated,
        EventType::SpecUpdated,
        EventType::SpecRequested,
        EventType::AuditStarted,
        EventType::AuditCompleted,
        EventType::ViolationFound,
        EventType::ScanRequested,
        EventType::DocumentUploaded,
        EventType::ComplianceCheck,
        EventType::GapIdentified,
        EventType::ReviewRequested,
        EventType::WorkflowStarted,
        EventType::WorkflowCompleted,
        EventType::ValidationStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RegulatoryUpdate => "REGULATORY_UPDATE",
            EventType::LawFetched => "LAW_FETCHED",
            EventType::SpecGenerated => "SPEC_GENERATED",
            EventType::SpecUpdated => "SPEC_UPDATED",
            EventType::SpecRequested => "SPEC_REQUESTED",
            EventType::AuditStarted => "AUDIT_STARTED",
            EventType::AuditCompleted => "AUDIT_COMPLETED",
            EventType::ViolationFound => "VIOLATION_FOUND",
            EventType::ScanRequested => "SCAN_REQUESTED",
            EventType::DocumentUploaded => "DOCUMENT_UPLOADED",
            EventType::ComplianceCheck => "COMPLIANCE_CHECK",
            EventType::GapIdentified => "GAP_IDENTIFIED",
            EventType::ReviewRequested => "REVIEW_REQUESTED",
            EventType::WorkflowStarted => "WORKFLOW_STARTED",
            EventType::WorkflowCompleted => "WORKFLOW_COMPLETED",
            EventType::ValidationStatus => "VALIDATION_STATUS",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EventIdError::MalformedEnvelope(format!("unknown event type: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Scraper,
    Code,
    Scan,
    Review,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Scraper,
        Platform::Code,
        Platform::Scan,
        Platform::Review,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Scraper => "scraper",
            Platform::Code => "code",
            Platform::Scan => "scan",
            Platform::Review => "review",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = EventIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| EventIdError::MalformedEnvelope(format!("unknown platform: {s}")))
    }
}

/// An event as it travels on the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_version: i32,
    pub event_type: EventType,
    pub platform: Platform,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub event_data: Value,
}

impl EventEnvelope {
    /// A fresh root event with a time-ordered id.
    pub fn new(event_type: EventType, platform: Platform, event_data: Value) -> Self {
        Self {
            event_id: Uuid::now_v7().to_string(),
            event_version: 1,
            event_type,
            platform,
            timestamp: Utc::now(),
            correlation_id: None,
            user_id: None,
            event_data: normalize_data(event_data),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.event_version = version;
        self
    }

    /// An event produced by a workflow reacting to `parent`.
    ///
    /// Inherits the parent's correlation (the parent's own id when it has
    /// none) and user, and carries one more hop of causation depth.
    pub fn follow_up(
        parent: &EventEnvelope,
        event_type: EventType,
        platform: Platform,
        event_data: Value,
    ) -> Self {
        let mut data = match normalize_data(event_data) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        data.insert(
            CAUSATION_DEPTH_KEY.to_string(),
            json!(parent.causation_depth() + 1),
        );
        data.insert(CAUSED_BY_KEY.to_string(), json!(parent.event_id));

        let mut event = Self::new(event_type, platform, Value::Object(data));
        event.correlation_id = Some(parent.correlation_key().to_string());
        event.user_id = parent.user_id.clone();
        event
    }

    /// Decode a broker payload. Anything that is not a well-formed envelope
    /// is a `MalformedEnvelope` error.
    pub fn decode(bytes: &[u8]) -> Result<Self, EventIdError> {
        let mut envelope: EventEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| EventIdError::MalformedEnvelope(e.to_string()))?;

        if envelope.event_id.trim().is_empty() {
            return Err(EventIdError::MalformedEnvelope(
                "event_id must not be empty".into(),
            ));
        }
        envelope.event_data = normalize_data(envelope.event_data);
        if !envelope.event_data.is_object() {
            return Err(EventIdError::MalformedEnvelope(
                "event_data must be an object".into(),
            ));
        }
        Ok(envelope)
    }

    pub fn encode(&self) -> Result<Vec<u8>, EventIdError> {
        serde_json::to_vec(self).map_err(|e| EventIdError::MalformedEnvelope(e.to_string()))
    }

    /// Correlation id if present, otherwise the event's own id.
    pub fn correlation_key(&self) -> &str {
        self.correlation_id.as_deref().unwrap_or(&self.event_id)
    }

    /// Broker partition key. Events of one workflow chain share a partition.
    pub fn partition_key(&self) -> &str {
        self.correlation_key()
    }

    /// Dotted-path lookup into `event_data`, e.g. `jurisdiction.framework`.
    pub fn data_at(&self, path: &str) -> Option<&Value> {
        value_at(&self.event_data, path)
    }

    pub fn causation_depth(&self) -> u32 {
        self.event_data
            .get(CAUSATION_DEPTH_KEY)
            .and_then(Value::as_u64)
            .map(|d| d.min(u32::MAX as u64) as u32)
            .unwrap_or(0)
    }

    /// The workspace this event is addressed to, if any.
    pub fn target_workspace(&self) -> Option<&str> {
        self.event_data.get("workspace_id").and_then(Value::as_str)
    }
}

/// Walk a dotted path through nested JSON objects.
pub fn value_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| current.get(segment))
}

fn normalize_data(data: Value) -> Value {
    match data {
        Value::Null => Value::Object(Map::new()),
        other => other,
    }
}
