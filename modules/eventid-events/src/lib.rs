//! Append-only audit trail of consumed events.
//!
//! `StoreEvent` is idempotent on `event_id`: at-least-once delivery means the
//! same envelope arrives more than once, and every arrival after the first is
//! a successful no-op. Rows are never updated or deleted; Postgres triggers
//! reject both, and the Rust API offers no way to ask.

pub mod db;
pub mod dead_letter;
pub mod memory;
pub mod store;
pub mod types;

pub use db::{classify, connect, migrate};
pub use dead_letter::{DeadLetter, DeadLetterSink, MemoryDeadLetters, PgDeadLetterStore};
pub use memory::MemoryEventStore;
pub use store::{EventRepository, EventStore};
pub use types::{EventQuery, StoredEvent};
