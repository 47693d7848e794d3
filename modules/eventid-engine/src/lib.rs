//! Workflow execution.
//!
//! A matched (workspace, rule) pair becomes one `WorkflowRun`, created at most
//! once per triggering event, driven `started → in_progress → completed | failed`
//! while the rule's actions run concurrently with per-action timeouts and
//! retries.

pub mod engine;
pub mod executor;
pub mod run;
pub mod store;

pub use engine::{ActionPolicy, CancelHandle, Dispatched, WorkflowEngine};
pub use executor::{
    follow_up_event, ActionContext, ActionExecutor, DefaultActionExecutor, EventPublisher,
    HttpPlatformClient, PlatformClient,
};
pub use run::{follow_up_event_id, workflow_id_for, StepOutcome, StepRecord, WorkflowRun, WorkflowStatus};
pub use store::{MemoryWorkflowStore, PgWorkflowStore, WorkflowStore};
