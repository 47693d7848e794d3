//! Workflow history persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use eventid_common::EventIdError;
use eventid_events::classify;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tokio::sync::RwLock;

use crate::run::{StepRecord, WorkflowRun, WorkflowStatus};

/// Storage for workflow runs, keyed by (trigger_event_id, workspace_id, rule).
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert `run` unless a run for the same key exists. Returns the stored
    /// run and whether this call created it.
    async fn create_if_absent(&self, run: &WorkflowRun) -> Result<(WorkflowRun, bool), EventIdError>;

    /// Persist a run's progress. Returns false, without writing, when the
    /// stored run is already terminal.
    async fn save(&self, run: &WorkflowRun) -> Result<bool, EventIdError>;

    async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowRun>, EventIdError>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs triggered by one event, in start order.
    pub async fn for_trigger(&self, trigger_event_id: &str) -> Result<Vec<WorkflowRun>, EventIdError> {
        sqlx::query_as::<_, WorkflowRun>(
            r#"
            SELECT workflow_id, workspace_id, workflow_type, trigger_event_id, status,
                   steps, result, started_at, completed_at, error_message
            FROM workflow_history
            WHERE trigger_event_id = $1
            ORDER BY started_at, workflow_id
            "#,
        )
        .bind(trigger_event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)
    }
}

impl<'r> FromRow<'r, PgRow> for WorkflowRun {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<WorkflowStatus>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let steps: serde_json::Value = row.try_get("steps")?;
        let steps: Vec<StepRecord> =
            serde_json::from_value(steps).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(Self {
            workflow_id: row.try_get("workflow_id")?,
            workspace_id: row.try_get("workspace_id")?,
            workflow_type: row.try_get("workflow_type")?,
            trigger_event_id: row.try_get("trigger_event_id")?,
            status,
            steps,
            result: row.try_get("result")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error_message: row.try_get("error_message")?,
        })
    }
}

fn steps_json(run: &WorkflowRun) -> Result<serde_json::Value, EventIdError> {
    serde_json::to_value(&run.steps).map_err(|e| EventIdError::Anyhow(e.into()))
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn create_if_absent(&self, run: &WorkflowRun) -> Result<(WorkflowRun, bool), EventIdError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO workflow_history
                (workflow_id, workspace_id, workflow_type, trigger_event_id, status,
                 steps, result, started_at, completed_at, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (trigger_event_id, workspace_id, workflow_type) DO NOTHING
            RETURNING workflow_id
            "#,
        )
        .bind(&run.workflow_id)
        .bind(&run.workspace_id)
        .bind(&run.workflow_type)
        .bind(&run.trigger_event_id)
        .bind(run.status.as_str())
        .bind(steps_json(run)?)
        .bind(&run.result)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(&run.error_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        if inserted.is_some() {
            return Ok((run.clone(), true));
        }

        let existing = sqlx::query_as::<_, WorkflowRun>(
            r#"
            SELECT workflow_id, workspace_id, workflow_type, trigger_event_id, status,
                   steps, result, started_at, completed_at, error_message
            FROM workflow_history
            WHERE trigger_event_id = $1 AND workspace_id = $2 AND workflow_type = $3
            "#,
        )
        .bind(&run.trigger_event_id)
        .bind(&run.workspace_id)
        .bind(&run.workflow_type)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        Ok((existing, false))
    }

    async fn save(&self, run: &WorkflowRun) -> Result<bool, EventIdError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_history
            SET status = $2, steps = $3, result = $4, completed_at = $5, error_message = $6
            WHERE workflow_id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(&run.workflow_id)
        .bind(run.status.as_str())
        .bind(steps_json(run)?)
        .bind(&run.result)
        .bind(run.completed_at)
        .bind(&run.error_message)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowRun>, EventIdError> {
        sqlx::query_as::<_, WorkflowRun>(
            r#"
            SELECT workflow_id, workspace_id, workflow_type, trigger_event_id, status,
                   steps, result, started_at, completed_at, error_message
            FROM workflow_history
            WHERE workflow_id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)
    }
}

// ---------------------------------------------------------------------------
// MemoryWorkflowStore (tests, no database required)
// ---------------------------------------------------------------------------

/// In-memory workflow store. Also records every accepted save as
/// `(workflow_id, status)` so tests can assert on transition order.
#[derive(Default)]
pub struct MemoryWorkflowStore {
    inner: RwLock<MemoryRuns>,
}

#[derive(Default)]
struct MemoryRuns {
    runs: HashMap<String, WorkflowRun>,
    order: Vec<String>,
    transitions: Vec<(String, WorkflowStatus)>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All runs in creation order.
    pub async fn runs(&self) -> Vec<WorkflowRun> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.runs.get(id).cloned())
            .collect()
    }

    pub async fn transitions(&self) -> Vec<(String, WorkflowStatus)> {
        self.inner.read().await.transitions.clone()
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn create_if_absent(&self, run: &WorkflowRun) -> Result<(WorkflowRun, bool), EventIdError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.runs.get(&run.workflow_id) {
            return Ok((existing.clone(), false));
        }
        inner.runs.insert(run.workflow_id.clone(), run.clone());
        inner.order.push(run.workflow_id.clone());
        inner
            .transitions
            .push((run.workflow_id.clone(), run.status));
        Ok((run.clone(), true))
    }

    async fn save(&self, run: &WorkflowRun) -> Result<bool, EventIdError> {
        let mut inner = self.inner.write().await;
        match inner.runs.get(&run.workflow_id) {
            Some(stored) if stored.status.is_terminal() => return Ok(false),
            Some(_) => {}
            None => return Ok(false),
        }
        inner.runs.insert(run.workflow_id.clone(), run.clone());
        inner
            .transitions
            .push((run.workflow_id.clone(), run.status));
        Ok(true)
    }

    async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowRun>, EventIdError> {
        Ok(self.inner.read().await.runs.get(workflow_id).cloned())
    }
}
