//! Event → (workspace, rule) matching.
//!
//! `match_snapshot` is the pure half: given an event and a registry snapshot it
//! returns the ordered pairs that must react. `WorkspaceMatcher` takes the
//! snapshot and calls it.

use std::cmp::Ordering;
use std::sync::Arc;

use eventid_common::{EventEnvelope, EventIdError};
use tracing::debug;

use crate::condition::MatchContext;
use crate::registry::{RegistrySnapshot, WorkspaceRegistry};
use crate::types::{AutomationRule, Workspace};

/// One (workspace, rule) pair that must react to an event.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub workspace: Workspace,
    pub rule: AutomationRule,
}

impl RuleMatch {
    pub fn workspace_id(&self) -> &str {
        &self.workspace.workspace_id
    }
}

/// Ordered by descending priority, then ascending rule name, then workspace id.
pub fn match_snapshot(event: &EventEnvelope, snapshot: &RegistrySnapshot) -> Vec<RuleMatch> {
    let target = event.target_workspace();
    let mut matches = Vec::new();

    for subscription in &snapshot.subscriptions {
        if !subscription.enabled
            || subscription.event_type != event.event_type
            || subscription.platform != event.platform
        {
            continue;
        }
        let workspace_id = subscription.workspace_id.as_str();

        if target.is_some_and(|t| t != workspace_id) {
            debug!(workspace_id, "Excluded: event targets another workspace");
            continue;
        }

        match snapshot.integrations.get(workspace_id) {
            Some(integration) if integration.enabled => {}
            Some(_) => {
                debug!(workspace_id, platform = %event.platform, "Excluded: integration disabled");
                continue;
            }
            None => {
                debug!(workspace_id, platform = %event.platform, "Excluded: no integration");
                continue;
            }
        }

        let Some(workspace) = snapshot.workspaces.get(workspace_id) else {
            debug!(workspace_id, "Excluded: workspace not found");
            continue;
        };
        if !workspace.active {
            debug!(workspace_id, "Excluded: workspace inactive");
            continue;
        }

        let ctx = MatchContext { event, workspace };
        if let Some(filters) = &subscription.filters {
            if !filters.evaluate(&ctx) {
                debug!(workspace_id, "Excluded: subscription filters");
                continue;
            }
        }

        let Some(rules) = snapshot.rules.get(workspace_id) else {
            continue;
        };
        for rule in rules {
            if !rule.enabled || rule.event_type != event.event_type {
                continue;
            }
            if rule
                .conditions
                .as_ref()
                .is_some_and(|conditions| !conditions.evaluate(&ctx))
            {
                debug!(
                    workspace_id,
                    rule_name = rule.rule_name.as_str(),
                    "Rule conditions not met"
                );
                continue;
            }
            matches.push(RuleMatch {
                workspace: workspace.clone(),
                rule: rule.clone(),
            });
        }
    }

    matches.sort_by(compare_matches);
    matches
}

fn compare_matches(a: &RuleMatch, b: &RuleMatch) -> Ordering {
    b.rule
        .priority
        .cmp(&a.rule.priority)
        .then_with(|| a.rule.rule_name.cmp(&b.rule.rule_name))
        .then_with(|| a.workspace.workspace_id.cmp(&b.workspace.workspace_id))
}

#[derive(Clone)]
pub struct WorkspaceMatcher {
    registry: Arc<dyn WorkspaceRegistry>,
}

impl WorkspaceMatcher {
    pub fn new(registry: Arc<dyn WorkspaceRegistry>) -> Self {
        Self { registry }
    }

    /// Reads a fresh snapshot per call. Safe to re-run on redelivery.
    pub async fn match_event(&self, event: &EventEnvelope) -> Result<Vec<RuleMatch>, EventIdError> {
        let snapshot = self.registry.snapshot(event.event_type, event.platform).await?;
        let matches = match_snapshot(event, &snapshot);
        debug!(
            event_id = event.event_id.as_str(),
            event_type = %event.event_type,
            subscriptions = snapshot.subscriptions.len(),
            matches = matches.len(),
            "Matched event"
        );
        Ok(matches)
    }
}
