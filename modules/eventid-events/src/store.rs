//! EventStore: append-only audit trail backed by Postgres.
//!
//! Idempotency rides on the `event_id` unique constraint: concurrent inserts of
//! the same id from different ingestor instances resolve inside Postgres via
//! `ON CONFLICT DO NOTHING`, with no application-level locking.

use async_trait::async_trait;
use eventid_common::{EventEnvelope, EventIdError};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use crate::db::classify;
use crate::types::{EventQuery, StoredEvent};

const SELECT_COLUMNS: &str = "SELECT id, event_id, event_version, event_type, platform, timestamp, \
     correlation_id, user_id, event_data, created_at FROM events";

/// Persistence seam for the audit trail.
///
/// Implemented by `EventStore` (postgres) and `MemoryEventStore` (tests).
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Persist an event. Returns `false` when the `event_id` was already stored.
    async fn store_event(&self, event: &EventEnvelope) -> Result<bool, EventIdError>;

    async fn get_event(&self, event_id: &str) -> Result<Option<StoredEvent>, EventIdError>;

    async fn query_events(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, EventIdError>;
}

#[derive(Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Every event in one correlation chain, oldest first.
    pub async fn read_correlated(&self, correlation_id: &str) -> Result<Vec<StoredEvent>, EventIdError> {
        self.query_events(&EventQuery::new().correlation_id(correlation_id))
            .await
    }

    /// Full-text search over the payload.
    pub async fn search(&self, text: &str, limit: i64) -> Result<Vec<StoredEvent>, EventIdError> {
        self.query_events(&EventQuery::new().text(text).limit(limit))
            .await
    }

    pub async fn count(&self) -> Result<i64, EventIdError> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        Ok(row.0)
    }
}

#[async_trait]
impl EventRepository for EventStore {
    async fn store_event(&self, event: &EventEnvelope) -> Result<bool, EventIdError> {
        let inserted = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO events (event_id, event_version, event_type, platform, timestamp,
                                correlation_id, user_id, event_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (event_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&event.event_id)
        .bind(event.event_version)
        .bind(event.event_type.as_str())
        .bind(event.platform.as_str())
        .bind(event.timestamp)
        .bind(&event.correlation_id)
        .bind(&event.user_id)
        .bind(&event.event_data)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        match inserted {
            Some((id,)) => {
                debug!(event_id = event.event_id.as_str(), id, "Stored event");
                Ok(true)
            }
            None => {
                debug!(event_id = event.event_id.as_str(), "Duplicate event, already stored");
                Ok(false)
            }
        }
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<StoredEvent>, EventIdError> {
        let sql = format!("{SELECT_COLUMNS} WHERE event_id = $1");
        sqlx::query_as::<_, StoredEvent>(&sql)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)
    }

    async fn query_events(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, EventIdError> {
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        qb.push(" WHERE TRUE");

        if let Some(platform) = query.platform {
            qb.push(" AND platform = ").push_bind(platform.as_str());
        }
        if let Some(event_type) = query.event_type {
            qb.push(" AND event_type = ").push_bind(event_type.as_str());
        }
        if let Some(from) = query.from {
            qb.push(" AND timestamp >= ").push_bind(from);
        }
        if let Some(until) = query.until {
            qb.push(" AND timestamp < ").push_bind(until);
        }
        if let Some(correlation_id) = &query.correlation_id {
            qb.push(" AND correlation_id = ").push_bind(correlation_id.clone());
        }
        if let Some(user_id) = &query.user_id {
            qb.push(" AND user_id = ").push_bind(user_id.clone());
        }
        if let Some(text) = &query.text {
            qb.push(" AND to_tsvector('english', event_data::text) @@ plainto_tsquery('english', ")
                .push_bind(text.clone())
                .push(")");
        }
        qb.push(" ORDER BY timestamp ASC, id ASC LIMIT ")
            .push_bind(query.effective_limit());

        qb.build_query_as::<StoredEvent>()
            .fetch_all(&self.pool)
            .await
            .map_err(classify)
    }
}
