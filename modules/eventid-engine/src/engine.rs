//! The workflow runner.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eventid_common::{Backoff, Config, EventEnvelope, EventIdError};
use eventid_workspaces::{Action, AutomationRule, RuleMatch, Workspace};
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::executor::{ActionContext, ActionExecutor};
use crate::run::{StepOutcome, StepRecord, WorkflowRun};
use crate::store::WorkflowStore;

/// Per-action timeout and retry budget.
#[derive(Debug, Clone, Copy)]
pub struct ActionPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl ActionPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.action_timeout,
            max_retries: config.action_max_retries,
            backoff: Backoff::new(Duration::from_millis(500), Duration::from_secs(10)),
        }
    }
}

impl Default for ActionPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            backoff: Backoff::new(Duration::from_millis(500), Duration::from_secs(10)),
        }
    }
}

/// Stops in-flight and future runs. Runs it catches end `failed` with a
/// cancellation message; actions already invoked are not rolled back.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl CancelHandle {
    pub fn cancel(&self, reason: impl Into<String>) {
        self.tx.send_replace(Some(reason.into()));
    }
}

/// A run returned by [`WorkflowEngine::execute_all`], with whether this call
/// created it or found it already recorded.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub run: WorkflowRun,
    pub created: bool,
}

pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    executor: Arc<dyn ActionExecutor>,
    policy: ActionPolicy,
    cancel_tx: Arc<watch::Sender<Option<String>>>,
    cancel_rx: watch::Receiver<Option<String>>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        executor: Arc<dyn ActionExecutor>,
        policy: ActionPolicy,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(None);
        Self {
            store,
            executor,
            policy,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    /// Run `rule` for `event` in `workspace`, unless a run for the same
    /// (event, workspace, rule) already exists, in which case that run is
    /// returned unchanged.
    pub async fn execute(
        &self,
        event: &EventEnvelope,
        workspace: &Workspace,
        rule: &AutomationRule,
    ) -> Result<WorkflowRun, EventIdError> {
        self.dispatch(event, workspace, rule).await.map(|d| d.run)
    }

    /// Execute every match in order. Runs are isolated: an action failure
    /// only shows up in that run's status. A storage error is returned after
    /// the remaining matches have been attempted, so the caller can retry the
    /// whole event and rely on idempotent creation.
    pub async fn execute_all(
        &self,
        event: &EventEnvelope,
        matches: &[RuleMatch],
    ) -> Result<Vec<Dispatched>, EventIdError> {
        let mut dispatched = Vec::with_capacity(matches.len());
        let mut first_error = None;

        for m in matches {
            match self.dispatch(event, &m.workspace, &m.rule).await {
                Ok(d) => dispatched.push(d),
                Err(e) => {
                    warn!(
                        event_id = event.event_id.as_str(),
                        workspace_id = m.workspace_id(),
                        rule_name = m.rule.rule_name.as_str(),
                        error = %e,
                        "Workflow could not be recorded"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(dispatched),
        }
    }

    async fn dispatch(
        &self,
        event: &EventEnvelope,
        workspace: &Workspace,
        rule: &AutomationRule,
    ) -> Result<Dispatched, EventIdError> {
        let candidate = WorkflowRun::new(&event.event_id, &workspace.workspace_id, &rule.rule_name);
        let (mut run, created) = self.store.create_if_absent(&candidate).await?;
        if !created {
            debug!(
                workflow_id = run.workflow_id.as_str(),
                status = %run.status,
                "Workflow already recorded"
            );
            return Ok(Dispatched { run, created });
        }

        let pending_cancel = self.cancel_rx.borrow().clone();
        if let Some(reason) = pending_cancel {
            run.cancel(&reason)?;
            self.persist(&run).await?;
            return Ok(Dispatched { run, created });
        }

        run.begin()?;
        self.persist(&run).await?;
        info!(
            workflow_id = run.workflow_id.as_str(),
            workspace_id = workspace.workspace_id.as_str(),
            rule_name = rule.rule_name.as_str(),
            trigger_event_id = event.event_id.as_str(),
            actions = rule.actions.len(),
            "Workflow started"
        );

        let workflow_id = run.workflow_id.clone();
        let base = ActionContext {
            event,
            workspace,
            rule_name: &rule.rule_name,
            workflow_id: &workflow_id,
            action_index: 0,
        };

        let launched_at = Utc::now();
        let mut slots: Vec<Option<StepRecord>> = rule.actions.iter().map(|_| None).collect();
        let launches: Vec<_> = rule.actions.iter().enumerate().map(|(action_index, action)| {
            let ctx = ActionContext { action_index, ..base };
            async move { (action_index, self.run_action(action, &ctx).await) }
        }).collect();
        let mut pending = stream::iter(launches)
        .buffer_unordered(rule.actions.len().max(1));

        let mut cancel_rx = self.cancel_rx.clone();
        let cancelled_by = loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some((index, step)) => slots[index] = Some(step),
                    None => break None,
                },
                reason = cancelled(&mut cancel_rx) => break Some(reason),
            }
        };
        drop(pending);

        // Steps go in listed order. On cancellation, finished actions keep
        // their real outcome and unfinished ones are recorded as cancelled.
        for (slot, action) in slots.into_iter().zip(&rule.actions) {
            let step = match (slot, &cancelled_by) {
                (Some(step), _) => step,
                (None, Some(reason)) => StepRecord::cancelled(action.label(), reason, launched_at),
                (None, None) => continue,
            };
            run.record_step(step)?;
        }
        match &cancelled_by {
            None => run.finish()?,
            Some(reason) => run.cancel(reason)?,
        }

        if !self.persist(&run).await? {
            warn!(
                workflow_id = run.workflow_id.as_str(),
                "Workflow already terminal in store, final state not written"
            );
        }

        info!(
            workflow_id = run.workflow_id.as_str(),
            status = %run.status,
            steps = run.steps.len(),
            error = run.error_message.as_deref().unwrap_or(""),
            "Workflow finished"
        );
        Ok(Dispatched { run, created })
    }

    /// Save `run`, retrying transient storage errors with backoff until the
    /// write lands. Once the row exists a redelivery returns it unchanged, so
    /// a dropped progress write would strand the run.
    async fn persist(&self, run: &WorkflowRun) -> Result<bool, EventIdError> {
        let mut attempt: u32 = 0;
        loop {
            match self.store.save(run).await {
                Ok(saved) => return Ok(saved),
                Err(e) if e.is_retryable() => {
                    warn!(
                        workflow_id = run.workflow_id.as_str(),
                        status = %run.status,
                        attempt,
                        error = %e,
                        "Workflow save failed, retrying"
                    );
                    self.policy.backoff.wait(attempt).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_action(&self, action: &Action, ctx: &ActionContext<'_>) -> StepRecord {
        let label = action.label();
        let started_at = Utc::now();
        let mut attempt: u32 = 0;

        loop {
            let error = match tokio::time::timeout(
                self.policy.timeout,
                self.executor.execute(action, ctx),
            )
            .await
            {
                Ok(Ok(output)) => {
                    return StepRecord {
                        action: label,
                        outcome: if attempt == 0 {
                            StepOutcome::Succeeded
                        } else {
                            StepOutcome::RetriedThenSucceeded
                        },
                        attempts: attempt + 1,
                        error: None,
                        output,
                        started_at,
                        finished_at: Utc::now(),
                    };
                }
                Ok(Err(e)) => describe_failure(&label, e),
                Err(_) => EventIdError::ActionFailure {
                    action: label.clone(),
                    message: format!("timed out after {}ms", self.policy.timeout.as_millis()),
                }
                .to_string(),
            };

            if attempt >= self.policy.max_retries {
                warn!(
                    workflow_id = ctx.workflow_id,
                    action = label.as_str(),
                    attempts = attempt + 1,
                    error = error.as_str(),
                    "Action failed"
                );
                return StepRecord {
                    action: label,
                    outcome: StepOutcome::Failed,
                    attempts: attempt + 1,
                    error: Some(error),
                    output: None,
                    started_at,
                    finished_at: Utc::now(),
                };
            }

            debug!(
                workflow_id = ctx.workflow_id,
                action = label.as_str(),
                attempt,
                error = error.as_str(),
                "Action attempt failed, retrying"
            );
            self.policy.backoff.wait(attempt).await;
            attempt += 1;
        }
    }
}

fn describe_failure(label: &str, error: EventIdError) -> String {
    match error {
        e @ EventIdError::ActionFailure { .. } => e.to_string(),
        other => EventIdError::ActionFailure {
            action: label.to_string(),
            message: other.to_string(),
        }
        .to_string(),
    }
}

/// Resolves with the cancellation reason once one is set.
async fn cancelled(rx: &mut watch::Receiver<Option<String>>) -> String {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(reason) = current {
            return reason;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}
