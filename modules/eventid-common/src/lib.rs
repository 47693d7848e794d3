//! Shared vocabulary for the event-sourced workspace automation engine:
//! the broker envelope, configuration, and the error taxonomy.

pub mod config;
pub mod error;
pub mod retry;
pub mod schema;

pub use config::Config;
pub use error::{EventIdError, Result};
pub use retry::Backoff;
pub use schema::{value_at, EventEnvelope, EventType, Platform};
