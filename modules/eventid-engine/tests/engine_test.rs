//! WorkflowEngine behaviour against in-memory stores and scripted actions.
//! The Postgres workflow store tests need DATABASE_TEST_URL or are skipped.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use eventid_common::{Backoff, EventEnvelope, EventIdError, EventType, Platform};
use eventid_engine::{
    follow_up_event_id, ActionContext, ActionExecutor, ActionPolicy, DefaultActionExecutor,
    EventPublisher, MemoryWorkflowStore, PgWorkflowStore, PlatformClient, StepOutcome,
    WorkflowEngine, WorkflowRun, WorkflowStatus, WorkflowStore,
};
use eventid_events::{EventRepository, EventStore, MemoryEventStore};
use eventid_workspaces::{Action, AutomationRule, RuleMatch, Workspace};
use serde_json::{json, Value};
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Scripted executor
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail(&'static str),
    Hang,
}

/// Plays a per-label script of attempt outcomes; the last entry repeats.
/// Unscripted labels succeed.
#[derive(Default)]
struct ScriptedExecutor {
    scripts: HashMap<String, Vec<Behavior>>,
    attempts: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedExecutor {
    fn with_script(mut self, label: &str, script: Vec<Behavior>) -> Self {
        self.scripts.insert(label.to_string(), script);
        self
    }

    /// (rule_name, action label) in invocation order.
    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        action: &Action,
        ctx: &ActionContext<'_>,
    ) -> Result<Option<Value>, EventIdError> {
        let label = action.label();
        self.calls
            .lock()
            .unwrap()
            .push((ctx.rule_name.to_string(), label.clone()));

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(label.clone()).or_insert(0);
            *n += 1;
            *n - 1
        };
        let behavior = self
            .scripts
            .get(&label)
            .and_then(|script| script.get(attempt).or(script.last()).copied())
            .unwrap_or(Behavior::Succeed);

        match behavior {
            Behavior::Succeed => Ok(Some(json!({ "label": label }))),
            Behavior::Fail(message) => Err(EventIdError::ActionFailure {
                action: label,
                message: message.to_string(),
            }),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_policy() -> ActionPolicy {
    ActionPolicy {
        timeout: Duration::from_millis(50),
        max_retries: 2,
        backoff: Backoff::new(Duration::from_millis(1), Duration::from_millis(5)),
    }
}

fn engine_with(
    executor: Arc<ScriptedExecutor>,
) -> (WorkflowEngine, Arc<MemoryWorkflowStore>) {
    let store = Arc::new(MemoryWorkflowStore::new());
    let engine = WorkflowEngine::new(store.clone(), executor, fast_policy());
    (engine, store)
}

fn trigger() -> EventEnvelope {
    EventEnvelope::new(
        EventType::RegulatoryUpdate,
        Platform::Scraper,
        json!({"jurisdiction": {"framework": "GDPR", "region": "EU"}}),
    )
    .with_correlation_id("corr-gdpr-1")
}

fn saas() -> Workspace {
    Workspace::new("ws_saas_product", "user-1", "SaaS Product")
        .with_frameworks(["GDPR", "SOC2"])
        .with_jurisdiction("EU")
}

fn spec_action() -> Action {
    Action::emit(EventType::SpecRequested, Platform::Code, json!({}))
}

fn scan_action() -> Action {
    Action::invoke(Platform::Scan, "rescan", json!({"scope": "privacy"}))
}

const SPEC_LABEL: &str = "emit_event:SPEC_REQUESTED";
const SCAN_LABEL: &str = "invoke_platform:scan/rescan";

// =========================================================================
// Action outcomes
// =========================================================================

#[tokio::test]
async fn all_actions_succeeding_completes_the_run() {
    let executor = Arc::new(ScriptedExecutor::default());
    let (engine, _) = engine_with(executor.clone());
    let rule = AutomationRule::new("ws_saas_product", "regulatory_change", EventType::RegulatoryUpdate)
        .with_action(spec_action())
        .with_action(scan_action());

    let run = engine.execute(&trigger(), &saas(), &rule).await.unwrap();

    assert_eq!(run.status, WorkflowStatus::Completed);
    assert_eq!(run.steps.len(), 2);
    assert!(run.steps.iter().all(|s| s.outcome == StepOutcome::Succeeded));
    assert!(run.completed_at.is_some());
    assert!(run.error_message.is_none());
    assert!(run.result.is_some());
}

#[tokio::test]
async fn timed_out_action_fails_the_run_and_keeps_both_steps() {
    let executor = Arc::new(
        ScriptedExecutor::default().with_script(SCAN_LABEL, vec![Behavior::Hang]),
    );
    let (engine, _) = engine_with(executor.clone());
    let rule = AutomationRule::new("ws_saas_product", "regulatory_change", EventType::RegulatoryUpdate)
        .with_action(spec_action())
        .with_action(scan_action());

    let run = engine.execute(&trigger(), &saas(), &rule).await.unwrap();

    assert_eq!(run.status, WorkflowStatus::Failed);
    assert_eq!(run.steps.len(), 2);
    assert_eq!(run.steps[0].action, SPEC_LABEL);
    assert_eq!(run.steps[0].outcome, StepOutcome::Succeeded);
    assert_eq!(run.steps[1].action, SCAN_LABEL);
    assert_eq!(run.steps[1].outcome, StepOutcome::Failed);
    assert_eq!(run.steps[1].attempts, 3);

    let message = run.error_message.unwrap();
    assert!(message.contains(SCAN_LABEL), "{message}");
    assert!(message.contains("timed out"), "{message}");
    assert!(run.completed_at.is_some());
}

#[tokio::test]
async fn retried_action_is_recorded_as_retried_then_succeeded() {
    let executor = Arc::new(ScriptedExecutor::default().with_script(
        SCAN_LABEL,
        vec![Behavior::Fail("scanner busy"), Behavior::Succeed],
    ));
    let (engine, _) = engine_with(executor);
    let rule = AutomationRule::new("ws_saas_product", "rescan", EventType::RegulatoryUpdate)
        .with_action(scan_action());

    let run = engine.execute(&trigger(), &saas(), &rule).await.unwrap();

    assert_eq!(run.status, WorkflowStatus::Completed);
    assert_eq!(run.steps[0].outcome, StepOutcome::RetriedThenSucceeded);
    assert_eq!(run.steps[0].attempts, 2);
}

#[tokio::test]
async fn error_message_is_the_first_failed_action() {
    let executor = Arc::new(
        ScriptedExecutor::default()
            .with_script(SPEC_LABEL, vec![Behavior::Fail("code platform down")])
            .with_script(SCAN_LABEL, vec![Behavior::Fail("scanner down")]),
    );
    let (engine, _) = engine_with(executor);
    let rule = AutomationRule::new("ws_saas_product", "both", EventType::RegulatoryUpdate)
        .with_action(spec_action())
        .with_action(scan_action());

    let run = engine.execute(&trigger(), &saas(), &rule).await.unwrap();

    assert_eq!(run.status, WorkflowStatus::Failed);
    assert!(run.error_message.unwrap().contains("code platform down"));
}

#[tokio::test]
async fn rule_without_actions_completes() {
    let (engine, _) = engine_with(Arc::new(ScriptedExecutor::default()));
    let rule = AutomationRule::new("ws_saas_product", "noop", EventType::RegulatoryUpdate);

    let run = engine.execute(&trigger(), &saas(), &rule).await.unwrap();
    assert_eq!(run.status, WorkflowStatus::Completed);
    assert!(run.steps.is_empty());
}

// =========================================================================
// Idempotency and state machine
// =========================================================================

#[tokio::test]
async fn redelivered_trigger_returns_the_existing_run() {
    let executor = Arc::new(ScriptedExecutor::default());
    let (engine, store) = engine_with(executor.clone());
    let event = trigger();
    let rule = AutomationRule::new("ws_saas_product", "regulatory_change", EventType::RegulatoryUpdate)
        .with_action(spec_action());

    let first = engine.execute(&event, &saas(), &rule).await.unwrap();
    let second = engine.execute(&event, &saas(), &rule).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.runs().await.len(), 1);
    assert_eq!(executor.calls().len(), 1);
}

#[tokio::test]
async fn concurrent_redelivery_creates_one_run() {
    let executor = Arc::new(ScriptedExecutor::default());
    let (engine, store) = engine_with(executor.clone());
    let engine = Arc::new(engine);
    let event = trigger();
    let rule = AutomationRule::new("ws_saas_product", "regulatory_change", EventType::RegulatoryUpdate)
        .with_action(spec_action());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let event = event.clone();
            let rule = rule.clone();
            tokio::spawn(async move { engine.execute(&event, &saas(), &rule).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(store.runs().await.len(), 1);
    assert_eq!(executor.calls().len(), 1);
}

#[tokio::test]
async fn transitions_only_move_forward() {
    let executor = Arc::new(
        ScriptedExecutor::default().with_script(SCAN_LABEL, vec![Behavior::Fail("nope")]),
    );
    let (engine, store) = engine_with(executor);
    let ok = AutomationRule::new("ws_saas_product", "ok", EventType::RegulatoryUpdate)
        .with_action(spec_action());
    let bad = AutomationRule::new("ws_saas_product", "bad", EventType::RegulatoryUpdate)
        .with_action(scan_action());

    let ok_run = engine.execute(&trigger(), &saas(), &ok).await.unwrap();
    let bad_run = engine.execute(&trigger(), &saas(), &bad).await.unwrap();

    let statuses = |id: String| {
        let store = store.clone();
        async move {
            store
                .transitions()
                .await
                .into_iter()
                .filter(|(wf, _)| *wf == id)
                .map(|(_, s)| s)
                .collect::<Vec<_>>()
        }
    };
    assert_eq!(
        statuses(ok_run.workflow_id).await,
        vec![
            WorkflowStatus::Started,
            WorkflowStatus::InProgress,
            WorkflowStatus::Completed
        ]
    );
    assert_eq!(
        statuses(bad_run.workflow_id).await,
        vec![
            WorkflowStatus::Started,
            WorkflowStatus::InProgress,
            WorkflowStatus::Failed
        ]
    );
}

// =========================================================================
// Ordering and isolation across rules
// =========================================================================

fn rule_match(rule: AutomationRule) -> RuleMatch {
    RuleMatch {
        workspace: saas(),
        rule,
    }
}

#[tokio::test]
async fn higher_priority_workflow_runs_first() {
    let executor = Arc::new(ScriptedExecutor::default());
    let (engine, store) = engine_with(executor.clone());
    let matches = vec![
        rule_match(
            AutomationRule::new("ws_saas_product", "urgent", EventType::RegulatoryUpdate)
                .with_action(scan_action())
                .with_priority(10),
        ),
        rule_match(
            AutomationRule::new("ws_saas_product", "routine", EventType::RegulatoryUpdate)
                .with_action(spec_action())
                .with_priority(5),
        ),
    ];

    engine.execute_all(&trigger(), &matches).await.unwrap();

    let rules: Vec<String> = executor.calls().into_iter().map(|(rule, _)| rule).collect();
    assert_eq!(rules, vec!["urgent", "routine"]);
    let created: Vec<String> = store
        .runs()
        .await
        .into_iter()
        .map(|r| r.workflow_type)
        .collect();
    assert_eq!(created, vec!["urgent", "routine"]);
}

#[tokio::test]
async fn failing_rule_does_not_stop_its_siblings() {
    let executor = Arc::new(
        ScriptedExecutor::default().with_script(SCAN_LABEL, vec![Behavior::Fail("broken")]),
    );
    let (engine, _) = engine_with(executor);
    let matches = vec![
        rule_match(
            AutomationRule::new("ws_saas_product", "first", EventType::RegulatoryUpdate)
                .with_action(scan_action())
                .with_priority(10),
        ),
        rule_match(
            AutomationRule::new("ws_saas_product", "second", EventType::RegulatoryUpdate)
                .with_action(spec_action())
                .with_priority(5),
        ),
    ];

    let dispatched = engine.execute_all(&trigger(), &matches).await.unwrap();

    assert_eq!(dispatched.len(), 2);
    assert_eq!(dispatched[0].run.status, WorkflowStatus::Failed);
    assert_eq!(dispatched[1].run.status, WorkflowStatus::Completed);
    assert!(dispatched.iter().all(|d| d.created));
}

// =========================================================================
// Cancellation
// =========================================================================

#[tokio::test]
async fn cancel_fails_an_in_flight_run() {
    let executor = Arc::new(
        ScriptedExecutor::default().with_script(SCAN_LABEL, vec![Behavior::Hang]),
    );
    let store = Arc::new(MemoryWorkflowStore::new());
    let policy = ActionPolicy {
        timeout: Duration::from_secs(600),
        ..fast_policy()
    };
    let engine = WorkflowEngine::new(store.clone(), executor.clone(), policy);
    let handle = engine.cancel_handle();
    let rule = AutomationRule::new("ws_saas_product", "slow", EventType::RegulatoryUpdate)
        .with_action(scan_action());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel("shutdown");
    });
    let run = engine.execute(&trigger(), &saas(), &rule).await.unwrap();
    canceller.await.unwrap();

    assert_eq!(run.status, WorkflowStatus::Failed);
    assert!(run.is_cancelled());
    assert_eq!(run.error_message.as_deref(), Some("cancelled: shutdown"));
    assert_eq!(executor.calls().len(), 1);

    let stored = store.get(&run.workflow_id).await.unwrap().unwrap();
    assert_eq!(stored.status, WorkflowStatus::Failed);
}

#[tokio::test]
async fn cancel_keeps_steps_of_finished_actions() {
    let executor = Arc::new(
        ScriptedExecutor::default().with_script(SCAN_LABEL, vec![Behavior::Hang]),
    );
    let store = Arc::new(MemoryWorkflowStore::new());
    let policy = ActionPolicy {
        timeout: Duration::from_secs(600),
        ..fast_policy()
    };
    let engine = WorkflowEngine::new(store.clone(), executor.clone(), policy);
    let handle = engine.cancel_handle();
    let rule = AutomationRule::new("ws_saas_product", "mixed", EventType::RegulatoryUpdate)
        .with_action(spec_action())
        .with_action(scan_action());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel("shutdown");
    });
    let run = engine.execute(&trigger(), &saas(), &rule).await.unwrap();
    canceller.await.unwrap();

    assert_eq!(run.status, WorkflowStatus::Failed);
    assert_eq!(run.error_message.as_deref(), Some("cancelled: shutdown"));
    assert_eq!(run.steps.len(), 2);
    assert_eq!(run.steps[0].action, SPEC_LABEL);
    assert_eq!(run.steps[0].outcome, StepOutcome::Succeeded);
    assert!(run.steps[0].output.is_some());
    assert_eq!(run.steps[1].action, SCAN_LABEL);
    assert_eq!(run.steps[1].outcome, StepOutcome::Failed);
    assert_eq!(run.steps[1].error.as_deref(), Some("cancelled: shutdown"));

    let stored = store.get(&run.workflow_id).await.unwrap().unwrap();
    assert_eq!(stored.steps, run.steps);
}

#[tokio::test]
async fn cancelled_engine_does_not_start_new_runs() {
    let executor = Arc::new(ScriptedExecutor::default());
    let (engine, _) = engine_with(executor.clone());
    engine.cancel_handle().cancel("draining");
    let rule = AutomationRule::new("ws_saas_product", "late", EventType::RegulatoryUpdate)
        .with_action(spec_action());

    let run = engine.execute(&trigger(), &saas(), &rule).await.unwrap();

    assert_eq!(run.status, WorkflowStatus::Failed);
    assert!(run.is_cancelled());
    assert!(executor.calls().is_empty());
}

// =========================================================================
// Storage hiccups while a run is being recorded
// =========================================================================

/// Fails the first `failures` saves with a transient error, then defers to
/// an in-memory store.
struct FlakySaves {
    inner: MemoryWorkflowStore,
    failures: AtomicU32,
}

impl FlakySaves {
    fn failing(failures: u32) -> Self {
        Self {
            inner: MemoryWorkflowStore::new(),
            failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl WorkflowStore for FlakySaves {
    async fn create_if_absent(&self, run: &WorkflowRun) -> Result<(WorkflowRun, bool), EventIdError> {
        self.inner.create_if_absent(run).await
    }

    async fn save(&self, run: &WorkflowRun) -> Result<bool, EventIdError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(EventIdError::TransientStorage("connection reset".into()));
        }
        self.inner.save(run).await
    }

    async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowRun>, EventIdError> {
        self.inner.get(workflow_id).await
    }
}

#[tokio::test]
async fn transient_save_failure_does_not_strand_the_run() {
    let executor = Arc::new(ScriptedExecutor::default());
    let store = Arc::new(FlakySaves::failing(1));
    let engine = WorkflowEngine::new(store.clone(), executor.clone(), fast_policy());
    let rule = AutomationRule::new("ws_saas_product", "regulatory_change", EventType::RegulatoryUpdate)
        .with_action(spec_action());
    let event = trigger();

    let run = engine.execute(&event, &saas(), &rule).await.unwrap();

    assert_eq!(run.status, WorkflowStatus::Completed);
    assert_eq!(executor.calls().len(), 1);
    let stored = store.get(&run.workflow_id).await.unwrap().unwrap();
    assert_eq!(stored.status, WorkflowStatus::Completed);
    assert_eq!(stored.steps.len(), 1);

    let again = engine.execute(&event, &saas(), &rule).await.unwrap();
    assert_eq!(again.status, WorkflowStatus::Completed);
    assert_eq!(executor.calls().len(), 1);
}

#[tokio::test]
async fn repeated_save_failures_are_retried_until_they_land() {
    let executor = Arc::new(ScriptedExecutor::default());
    let store = Arc::new(FlakySaves::failing(4));
    let engine = WorkflowEngine::new(store.clone(), executor.clone(), fast_policy());
    let rule = AutomationRule::new("ws_saas_product", "regulatory_change", EventType::RegulatoryUpdate)
        .with_action(spec_action())
        .with_action(scan_action());

    let run = engine.execute(&trigger(), &saas(), &rule).await.unwrap();

    assert_eq!(run.status, WorkflowStatus::Completed);
    let stored = store.get(&run.workflow_id).await.unwrap().unwrap();
    assert_eq!(stored, run);
}

// =========================================================================
// Default executor: follow-up events keep the correlation
// =========================================================================

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<EventEnvelope>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &EventEnvelope) -> Result<(), EventIdError> {
        self.published.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPlatforms {
    calls: Mutex<Vec<(Platform, String, Value)>>,
}

#[async_trait]
impl PlatformClient for RecordingPlatforms {
    async fn invoke(
        &self,
        platform: Platform,
        operation: &str,
        body: &Value,
    ) -> Result<Value, EventIdError> {
        self.calls
            .lock()
            .unwrap()
            .push((platform, operation.to_string(), body.clone()));
        Ok(json!({"accepted": true}))
    }
}

#[tokio::test]
async fn emitted_events_carry_the_trigger_correlation() {
    let publisher = Arc::new(RecordingPublisher::default());
    let platforms = Arc::new(RecordingPlatforms::default());
    let executor = Arc::new(DefaultActionExecutor::new(publisher.clone(), platforms.clone()));
    let engine = WorkflowEngine::new(Arc::new(MemoryWorkflowStore::new()), executor, fast_policy());
    let rule = AutomationRule::new("ws_saas_product", "regulatory_change", EventType::RegulatoryUpdate)
        .with_action(spec_action())
        .with_action(scan_action());
    let event = trigger();

    let run = engine.execute(&event, &saas(), &rule).await.unwrap();

    assert_eq!(run.status, WorkflowStatus::Completed);
    let published = publisher.published.lock().unwrap().clone();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].event_type, EventType::SpecRequested);
    assert_eq!(published[0].correlation_id.as_deref(), Some("corr-gdpr-1"));
    assert_eq!(published[0].target_workspace(), Some("ws_saas_product"));

    let calls = platforms.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, Platform::Scan);
    assert_eq!(calls[0].2["correlation_id"], "corr-gdpr-1");
    assert_eq!(calls[0].2["trigger_event_id"], event.event_id.as_str());
}

#[tokio::test]
async fn uncorrelated_trigger_lends_its_id_to_follow_ups() {
    let publisher = Arc::new(RecordingPublisher::default());
    let executor = Arc::new(DefaultActionExecutor::new(
        publisher.clone(),
        Arc::new(RecordingPlatforms::default()),
    ));
    let engine = WorkflowEngine::new(Arc::new(MemoryWorkflowStore::new()), executor, fast_policy());
    let rule = AutomationRule::new("ws_saas_product", "regulatory_change", EventType::RegulatoryUpdate)
        .with_action(spec_action());
    let event = EventEnvelope::new(EventType::RegulatoryUpdate, Platform::Scraper, json!({}));

    engine.execute(&event, &saas(), &rule).await.unwrap();

    let published = publisher.published.lock().unwrap().clone();
    assert_eq!(published[0].correlation_id.as_deref(), Some(event.event_id.as_str()));
}

/// Accepts the event, then answers too late for the action timeout.
#[derive(Default)]
struct SlowAckPublisher {
    published: Mutex<Vec<EventEnvelope>>,
}

#[async_trait]
impl EventPublisher for SlowAckPublisher {
    async fn publish(&self, event: &EventEnvelope) -> Result<(), EventIdError> {
        self.published.lock().unwrap().push(event.clone());
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(())
    }
}

#[tokio::test]
async fn retried_emit_republishes_the_same_event() {
    let publisher = Arc::new(SlowAckPublisher::default());
    let executor = Arc::new(DefaultActionExecutor::new(
        publisher.clone(),
        Arc::new(RecordingPlatforms::default()),
    ));
    let engine = WorkflowEngine::new(Arc::new(MemoryWorkflowStore::new()), executor, fast_policy());
    let rule = AutomationRule::new("ws_saas_product", "regulatory_change", EventType::RegulatoryUpdate)
        .with_action(spec_action());

    let run = engine.execute(&trigger(), &saas(), &rule).await.unwrap();

    assert_eq!(run.status, WorkflowStatus::Failed);
    let published = publisher.published.lock().unwrap().clone();
    assert_eq!(published.len(), 3);
    let ids: HashSet<&str> = published.iter().map(|e| e.event_id.as_str()).collect();
    assert_eq!(ids.len(), 1);
    assert_eq!(published[0].event_id, follow_up_event_id(&run.workflow_id, 0));

    let audit = MemoryEventStore::new();
    for event in &published {
        audit.store_event(event).await.unwrap();
    }
    assert_eq!(audit.len().await, 1);
}

// =========================================================================
// Postgres workflow store
// =========================================================================

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    eventid_events::migrate(&pool).await.ok()?;
    Some(pool)
}

fn unique_trigger() -> String {
    uuid::Uuid::now_v7().to_string()
}

#[tokio::test]
async fn pg_create_if_absent_is_race_safe() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = Arc::new(PgWorkflowStore::new(pool));
    let trigger_id = unique_trigger();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let trigger_id = trigger_id.clone();
            tokio::spawn(async move {
                store
                    .create_if_absent(&WorkflowRun::new(&trigger_id, "ws-pg", "rule"))
                    .await
            })
        })
        .collect();

    let mut created = 0;
    for task in tasks {
        let (_, was_created) = task.await.unwrap().unwrap();
        if was_created {
            created += 1;
        }
    }
    assert_eq!(created, 1);
    assert_eq!(store.for_trigger(&trigger_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn pg_terminal_run_is_not_regressed() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgWorkflowStore::new(pool);
    let mut run = WorkflowRun::new(&unique_trigger(), "ws-pg", "rule");
    store.create_if_absent(&run).await.unwrap();

    run.begin().unwrap();
    assert!(store.save(&run).await.unwrap());
    let stale = run.clone();
    run.finish().unwrap();
    assert!(store.save(&run).await.unwrap());

    assert!(!store.save(&stale).await.unwrap());
    let stored = store.get(&run.workflow_id).await.unwrap().unwrap();
    assert_eq!(stored.status, WorkflowStatus::Completed);
    assert!(stored.completed_at.is_some());
}
