//! Broker consumer: decode, store, match, execute, acknowledge.
//!
//! Delivery is at-least-once. Each partition is processed strictly in order by
//! its own worker; offsets advance only after the handler succeeds or the
//! message is dead-lettered.

pub mod broker;
pub mod handlers;
pub mod ingestor;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod metrics;
pub mod server;

pub use broker::{Delivery, MemoryBroker, MemoryConsumer, MessageSource};
pub use handlers::{AuditPipeline, EventHandler, HandlerRegistry};
pub use ingestor::{EventIngestor, RetryPolicy};
#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;
pub use metrics::IngestMetrics;
