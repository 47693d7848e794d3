//! Ingestion counters on an explicitly owned Prometheus registry.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub struct IngestMetrics {
    registry: Registry,
    consumed: IntCounter,
    stored: IntCounter,
    duplicates: IntCounter,
    errors: IntCounterVec,
    dead_letters: IntCounter,
    workflow_runs: IntCounterVec,
}

impl IngestMetrics {
    /// A fresh registry; nothing is shared with other instances.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let consumed = IntCounter::new(
            "regulatory_events_consumed_total",
            "Total number of regulatory events consumed",
        )?;
        let stored = IntCounter::new(
            "regulatory_events_stored_total",
            "Total number of regulatory events stored",
        )?;
        let duplicates = IntCounter::new(
            "regulatory_events_duplicate_total",
            "Events already present in the audit log",
        )?;
        let errors = IntCounterVec::new(
            Opts::new("event_consumer_errors_total", "Total number of consumer errors"),
            &["error_type"],
        )?;
        let dead_letters = IntCounter::new(
            "event_consumer_dead_letters_total",
            "Messages given up on and recorded as failed",
        )?;
        let workflow_runs = IntCounterVec::new(
            Opts::new("workflow_runs_total", "Workflow runs by final status"),
            &["status"],
        )?;

        registry.register(Box::new(consumed.clone()))?;
        registry.register(Box::new(stored.clone()))?;
        registry.register(Box::new(duplicates.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(dead_letters.clone()))?;
        registry.register(Box::new(workflow_runs.clone()))?;

        Ok(Self {
            registry,
            consumed,
            stored,
            duplicates,
            errors,
            dead_letters,
            workflow_runs,
        })
    }

    pub fn consumed(&self) {
        self.consumed.inc();
    }

    pub fn stored(&self) {
        self.stored.inc();
    }

    pub fn duplicate(&self) {
        self.duplicates.inc();
    }

    pub fn error(&self, error_type: &str) {
        self.errors.with_label_values(&[error_type]).inc();
    }

    pub fn dead_lettered(&self) {
        self.dead_letters.inc();
    }

    pub fn workflow_run(&self, status: &str) {
        self.workflow_runs.with_label_values(&[status]).inc();
    }

    pub fn consumed_total(&self) -> u64 {
        self.consumed.get()
    }

    pub fn stored_total(&self) -> u64 {
        self.stored.get()
    }

    pub fn duplicate_total(&self) -> u64 {
        self.duplicates.get()
    }

    pub fn dead_letter_total(&self) -> u64 {
        self.dead_letters.get()
    }

    pub fn errors_of(&self, error_type: &str) -> u64 {
        self.errors.with_label_values(&[error_type]).get()
    }

    pub fn workflow_runs_of(&self, status: &str) -> u64 {
        self.workflow_runs.with_label_values(&[status]).get()
    }

    /// Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
