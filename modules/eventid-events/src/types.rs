//! Row and query types for the event store.

use chrono::{DateTime, Utc};
use eventid_common::{EventEnvelope, EventType, Platform};
use serde::{Deserialize, Serialize};

/// Default and maximum row count returned by a single query.
pub const DEFAULT_QUERY_LIMIT: i64 = 500;
pub const MAX_QUERY_LIMIT: i64 = 10_000;

/// An event as persisted. Returned by all read methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub event_id: String,
    pub event_version: i32,
    pub event_type: EventType,
    pub platform: Platform,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub user_id: Option<String>,
    pub event_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl StoredEvent {
    pub fn to_envelope(&self) -> EventEnvelope {
        EventEnvelope {
            event_id: self.event_id.clone(),
            event_version: self.event_version,
            event_type: self.event_type,
            platform: self.platform,
            timestamp: self.timestamp,
            correlation_id: self.correlation_id.clone(),
            user_id: self.user_id.clone(),
            event_data: self.event_data.clone(),
        }
    }
}

/// Read-side filter. All set fields must match; `text` is a full-text search
/// over the payload. Results are ordered by event timestamp, then insertion.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub platform: Option<Platform>,
    pub event_type: Option<EventType>,
    /// Inclusive lower bound on `timestamp`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `timestamp`.
    pub until: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
    pub user_id: Option<String>,
    pub text: Option<String>,
    pub limit: Option<i64>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.until = Some(until);
        self
    }

    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, MAX_QUERY_LIMIT)
    }

    /// In-process evaluation of the filter. The text clause is an approximation
    /// of Postgres full-text search: every term must occur in the payload,
    /// case-insensitively.
    pub fn matches(&self, event: &StoredEvent) -> bool {
        if self.platform.is_some_and(|p| p != event.platform) {
            return false;
        }
        if self.event_type.is_some_and(|t| t != event.event_type) {
            return false;
        }
        if self.from.is_some_and(|from| event.timestamp < from) {
            return false;
        }
        if self.until.is_some_and(|until| event.timestamp >= until) {
            return false;
        }
        if let Some(correlation_id) = &self.correlation_id {
            if event.correlation_id.as_ref() != Some(correlation_id) {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if event.user_id.as_ref() != Some(user_id) {
                return false;
            }
        }
        if let Some(text) = &self.text {
            let haystack = event.event_data.to_string().to_lowercase();
            return text
                .split_whitespace()
                .all(|term| haystack.contains(&term.to_lowercase()));
        }
        true
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEvent {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;

        let event_type: String = row.try_get("event_type")?;
        let platform: String = row.try_get("platform")?;
        Ok(StoredEvent {
            id: row.try_get("id")?,
            event_id: row.try_get("event_id")?,
            event_version: row.try_get("event_version")?,
            event_type: event_type.parse().map_err(|e| sqlx::Error::ColumnDecode {
                index: "event_type".into(),
                source: Box::new(e),
            })?,
            platform: platform.parse().map_err(|e| sqlx::Error::ColumnDecode {
                index: "platform".into(),
                source: Box::new(e),
            })?,
            timestamp: row.try_get("timestamp")?,
            correlation_id: row.try_get("correlation_id")?,
            user_id: row.try_get("user_id")?,
            event_data: row.try_get("event_data")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
