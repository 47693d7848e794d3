//! Workspace registry and event-to-rule matching.
//!
//! The registry is owned by an external management plane; this crate only
//! reads it. Matching is a pure function of an event and a registry snapshot.

pub mod action;
pub mod condition;
pub mod matcher;
pub mod memory;
pub mod registry;
pub mod types;

pub use action::Action;
pub use condition::{Condition, MatchContext, Severity};
pub use matcher::{match_snapshot, RuleMatch, WorkspaceMatcher};
pub use memory::MemoryRegistry;
pub use registry::{PgWorkspaceRegistry, RegistrySnapshot, WorkspaceRegistry};
pub use types::{AutomationRule, EventSubscription, PlatformIntegration, Workspace};
