use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventIdError {
    /// Connection loss, pool exhaustion, timeouts. Retried at the ingestor boundary.
    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    /// An UPDATE or DELETE reached an append-only table. Never expected.
    #[error("Immutability violation: {0}")]
    ImmutabilityViolation(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Action {action} failed: {message}")]
    ActionFailure { action: String, message: String },

    #[error("Invalid workflow transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl EventIdError {
    /// Stable label used for the `error_type` metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            EventIdError::TransientStorage(_) => "transient_storage",
            EventIdError::ImmutabilityViolation(_) => "immutability_violation",
            EventIdError::MalformedEnvelope(_) => "malformed_envelope",
            EventIdError::ActionFailure { .. } => "action_failure",
            EventIdError::InvalidTransition { .. } => "invalid_transition",
            EventIdError::Config(_) => "config",
            EventIdError::Database(_) => "database",
            EventIdError::Anyhow(_) => "internal",
        }
    }

    /// Only transient storage failures can succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EventIdError::TransientStorage(_))
    }
}

pub type Result<T, E = EventIdError> = std::result::Result<T, E>;
