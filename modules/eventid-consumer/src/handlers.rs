//! Event-type → handler dispatch, and the default audit pipeline handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use eventid_common::{EventEnvelope, EventIdError, EventType};
use eventid_engine::WorkflowEngine;
use eventid_events::EventRepository;
use eventid_workspaces::WorkspaceMatcher;
use tracing::{debug, warn};

use crate::metrics::IngestMetrics;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &EventEnvelope) -> Result<(), EventIdError>;
}

/// Closed mapping from the recognized event types to their handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `handler` registered for every recognized event type.
    pub fn with_defaults(handler: Arc<dyn EventHandler>) -> Self {
        let mut registry = Self::new();
        for event_type in EventType::ALL {
            registry.register(event_type, handler.clone());
        }
        registry
    }

    /// Replaces any handler already registered for `event_type`.
    pub fn register(&mut self, event_type: EventType, handler: Arc<dyn EventHandler>) -> &mut Self {
        self.handlers.insert(event_type, handler);
        self
    }

    pub fn unregister(&mut self, event_type: EventType) -> &mut Self {
        self.handlers.remove(&event_type);
        self
    }

    pub fn get(&self, event_type: EventType) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(&event_type)
    }

    /// Recognized types with no handler.
    pub fn missing(&self) -> Vec<EventType> {
        EventType::ALL
            .into_iter()
            .filter(|t| !self.handlers.contains_key(t))
            .collect()
    }
}

/// Store → match → execute.
///
/// Storage is idempotent and matching is pure, so a redelivered event redoes
/// both harmlessly; workflow creation is idempotent per (event, workspace,
/// rule), so the same workflows are found rather than started again.
pub struct AuditPipeline {
    store: Arc<dyn EventRepository>,
    matcher: WorkspaceMatcher,
    engine: Arc<WorkflowEngine>,
    metrics: Arc<IngestMetrics>,
    max_causation_depth: u32,
}

impl AuditPipeline {
    pub fn new(
        store: Arc<dyn EventRepository>,
        matcher: WorkspaceMatcher,
        engine: Arc<WorkflowEngine>,
        metrics: Arc<IngestMetrics>,
        max_causation_depth: u32,
    ) -> Self {
        Self {
            store,
            matcher,
            engine,
            metrics,
            max_causation_depth,
        }
    }
}

#[async_trait]
impl EventHandler for AuditPipeline {
    async fn handle(&self, event: &EventEnvelope) -> Result<(), EventIdError> {
        if self.store.store_event(event).await? {
            self.metrics.stored();
            debug!(
                event_id = event.event_id.as_str(),
                event_type = %event.event_type,
                "Event stored"
            );
        } else {
            self.metrics.duplicate();
            debug!(event_id = event.event_id.as_str(), "Event already stored");
        }

        let depth = event.causation_depth();
        if depth > self.max_causation_depth {
            self.metrics.error("causation_depth_exceeded");
            warn!(
                event_id = event.event_id.as_str(),
                event_type = %event.event_type,
                depth,
                max = self.max_causation_depth,
                "Causation depth exceeded, not matching"
            );
            return Ok(());
        }

        let matches = self.matcher.match_event(event).await?;
        if matches.is_empty() {
            return Ok(());
        }

        let dispatched = self.engine.execute_all(event, &matches).await?;
        for d in dispatched.iter().filter(|d| d.created) {
            self.metrics.workflow_run(d.run.status.as_str());
        }
        Ok(())
    }
}
