//! Durable record of messages the ingestor gave up on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventid_common::EventIdError;
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::error;

use crate::db::classify;

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Present when the payload decoded far enough to know it.
    pub event_id: Option<String>,
    pub error_kind: String,
    pub error_message: String,
    pub payload: Vec<u8>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, letter: &DeadLetter) -> Result<(), EventIdError>;
}

#[derive(Clone)]
pub struct PgDeadLetterStore {
    pool: PgPool,
}

impl PgDeadLetterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterSink for PgDeadLetterStore {
    async fn record(&self, letter: &DeadLetter) -> Result<(), EventIdError> {
        sqlx::query(
            r#"
            INSERT INTO dead_letters (topic, partition, "offset", event_id, error_kind,
                                      error_message, payload, attempts, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&letter.topic)
        .bind(letter.partition)
        .bind(letter.offset)
        .bind(&letter.event_id)
        .bind(&letter.error_kind)
        .bind(&letter.error_message)
        .bind(&letter.payload)
        .bind(letter.attempts as i32)
        .bind(letter.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let err = classify(e);
            error!(
                partition = letter.partition,
                offset = letter.offset,
                error = %err,
                "Failed to persist dead letter"
            );
            err
        })?;
        Ok(())
    }
}

/// In-memory dead letters (tests).
#[derive(Default)]
pub struct MemoryDeadLetters {
    letters: RwLock<Vec<DeadLetter>>,
}

impl MemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn letters(&self) -> Vec<DeadLetter> {
        self.letters.read().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetters {
    async fn record(&self, letter: &DeadLetter) -> Result<(), EventIdError> {
        self.letters.write().await.push(letter.clone());
        Ok(())
    }
}
