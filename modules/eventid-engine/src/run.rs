//! Workflow run state machine: `started → in_progress → {completed | failed}`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use eventid_common::EventIdError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Prefix of `error_message` for runs stopped by an external signal.
pub const CANCELLED_PREFIX: &str = "cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Started,
    InProgress,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Started => "started",
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// Forward-only. `started` may fail directly (cancelled before any action).
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Started, InProgress) | (Started, Failed) | (InProgress, Completed) | (InProgress, Failed)
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = EventIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(WorkflowStatus::Started),
            "in_progress" => Ok(WorkflowStatus::InProgress),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            other => Err(EventIdError::Database(format!(
                "unknown workflow status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    RetriedThenSucceeded,
    Failed,
}

/// The recorded outcome of one action. Steps are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub action: String,
    pub outcome: StepOutcome,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StepRecord {
    /// An action still running when its run was cancelled. It may have taken
    /// effect; nothing is rolled back.
    pub fn cancelled(action: impl Into<String>, reason: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            action: action.into(),
            outcome: StepOutcome::Failed,
            attempts: 1,
            error: Some(format!("{CANCELLED_PREFIX}: {reason}")),
            output: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome != StepOutcome::Failed
    }
}

/// One execution of one rule for one triggering event in one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub workflow_id: String,
    pub workspace_id: String,
    /// The rule name.
    pub workflow_type: String,
    pub trigger_event_id: String,
    pub status: WorkflowStatus,
    pub steps: Vec<StepRecord>,
    pub result: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Deterministic id for the (trigger, workspace, rule) key, so concurrent
/// creators of the same run agree on its id.
pub fn workflow_id_for(trigger_event_id: &str, workspace_id: &str, rule_name: &str) -> String {
    let name = format!("{trigger_event_id}|{workspace_id}|{rule_name}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Deterministic id for the event emitted by the action at `action_index` of
/// a run. Retried publishes of one action therefore share an `event_id`.
pub fn follow_up_event_id(workflow_id: &str, action_index: usize) -> String {
    let name = format!("{workflow_id}|action|{action_index}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

impl WorkflowRun {
    pub fn new(trigger_event_id: &str, workspace_id: &str, rule_name: &str) -> Self {
        Self {
            workflow_id: workflow_id_for(trigger_event_id, workspace_id, rule_name),
            workspace_id: workspace_id.to_string(),
            workflow_type: rule_name.to_string(),
            trigger_event_id: trigger_event_id.to_string(),
            status: WorkflowStatus::Started,
            steps: Vec::new(),
            result: None,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }

    pub fn rule_name(&self) -> &str {
        &self.workflow_type
    }

    pub fn transition(&mut self, next: WorkflowStatus) -> Result<(), EventIdError> {
        self.ensure_can_transition(next)?;
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    fn ensure_can_transition(&self, next: WorkflowStatus) -> Result<(), EventIdError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(EventIdError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            })
        }
    }

    pub fn begin(&mut self) -> Result<(), EventIdError> {
        self.transition(WorkflowStatus::InProgress)
    }

    pub fn record_step(&mut self, step: StepRecord) -> Result<(), EventIdError> {
        if self.status.is_terminal() {
            return Err(EventIdError::InvalidTransition {
                from: self.status.to_string(),
                to: format!("step {}", step.action),
            });
        }
        self.steps.push(step);
        Ok(())
    }

    /// `completed` when every step succeeded, otherwise `failed` with the
    /// first failed step's error.
    ///
    /// A rejected call leaves the run untouched.
    pub fn finish(&mut self) -> Result<(), EventIdError> {
        let first_failure = self.steps.iter().find(|s| !s.succeeded());
        match first_failure {
            None => {
                self.ensure_can_transition(WorkflowStatus::Completed)?;
                self.result = Some(serde_json::json!({
                    "actions": self.steps.len(),
                    "outputs": self
                        .steps
                        .iter()
                        .map(|s| s.output.clone().unwrap_or(Value::Null))
                        .collect::<Vec<_>>(),
                }));
                self.transition(WorkflowStatus::Completed)
            }
            Some(step) => {
                self.ensure_can_transition(WorkflowStatus::Failed)?;
                self.error_message = Some(
                    step.error
                        .clone()
                        .unwrap_or_else(|| format!("{} failed", step.action)),
                );
                self.transition(WorkflowStatus::Failed)
            }
        }
    }

    pub fn cancel(&mut self, reason: &str) -> Result<(), EventIdError> {
        self.ensure_can_transition(WorkflowStatus::Failed)?;
        self.error_message = Some(format!("{CANCELLED_PREFIX}: {reason}"));
        self.transition(WorkflowStatus::Failed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == WorkflowStatus::Failed
            && self
                .error_message
                .as_deref()
                .is_some_and(|m| m.starts_with(CANCELLED_PREFIX))
    }
}
