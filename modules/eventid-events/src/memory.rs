//! In-memory event store for tests. Same contract as the Postgres store:
//! idempotent on `event_id`, append-only, no mutation API.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use eventid_common::{EventEnvelope, EventIdError};
use tokio::sync::RwLock;

use crate::store::EventRepository;
use crate::types::{EventQuery, StoredEvent};

#[derive(Default)]
pub struct MemoryEventStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    rows: Vec<StoredEvent>,
    by_event_id: HashMap<String, usize>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored events in insertion order (for test assertions).
    pub async fn events(&self) -> Vec<StoredEvent> {
        self.inner.read().await.rows.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventRepository for MemoryEventStore {
    async fn store_event(&self, event: &EventEnvelope) -> Result<bool, EventIdError> {
        let mut inner = self.inner.write().await;
        if inner.by_event_id.contains_key(&event.event_id) {
            return Ok(false);
        }

        let id = inner.rows.len() as i64 + 1;
        inner.rows.push(StoredEvent {
            id,
            event_id: event.event_id.clone(),
            event_version: event.event_version,
            event_type: event.event_type,
            platform: event.platform,
            timestamp: event.timestamp,
            correlation_id: event.correlation_id.clone(),
            user_id: event.user_id.clone(),
            event_data: event.event_data.clone(),
            created_at: Utc::now(),
        });
        let index = inner.rows.len() - 1;
        inner.by_event_id.insert(event.event_id.clone(), index);
        Ok(true)
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<StoredEvent>, EventIdError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_event_id
            .get(event_id)
            .and_then(|&i| inner.rows.get(i))
            .cloned())
    }

    async fn query_events(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, EventIdError> {
        let inner = self.inner.read().await;
        let mut matched: Vec<StoredEvent> = inner
            .rows
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        matched.truncate(query.effective_limit() as usize);
        Ok(matched)
    }
}
