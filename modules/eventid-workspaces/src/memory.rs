//! In-memory registry for tests. Mirrors the Postgres uniqueness rules:
//! upserting an integration or subscription replaces the existing row.

use async_trait::async_trait;
use eventid_common::{EventIdError, EventType, Platform};
use tokio::sync::RwLock;

use crate::registry::{RegistrySnapshot, WorkspaceRegistry};
use crate::types::{AutomationRule, EventSubscription, PlatformIntegration, Workspace};

#[derive(Default)]
pub struct MemoryRegistry {
    inner: RwLock<Rows>,
}

#[derive(Default)]
struct Rows {
    workspaces: Vec<Workspace>,
    integrations: Vec<PlatformIntegration>,
    subscriptions: Vec<EventSubscription>,
    rules: Vec<AutomationRule>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_workspace(&self, workspace: Workspace) {
        let mut rows = self.inner.write().await;
        rows.workspaces
            .retain(|w| w.workspace_id != workspace.workspace_id);
        rows.workspaces.push(workspace);
    }

    pub async fn upsert_integration(&self, integration: PlatformIntegration) {
        let mut rows = self.inner.write().await;
        rows.integrations.retain(|i| {
            !(i.workspace_id == integration.workspace_id && i.platform == integration.platform)
        });
        rows.integrations.push(integration);
    }

    pub async fn upsert_subscription(&self, subscription: EventSubscription) {
        let mut rows = self.inner.write().await;
        rows.subscriptions.retain(|s| {
            !(s.workspace_id == subscription.workspace_id
                && s.event_type == subscription.event_type
                && s.platform == subscription.platform)
        });
        rows.subscriptions.push(subscription);
    }

    pub async fn add_rule(&self, rule: AutomationRule) {
        self.inner.write().await.rules.push(rule);
    }

    pub async fn remove_integration(&self, workspace_id: &str, platform: Platform) {
        self.inner
            .write()
            .await
            .integrations
            .retain(|i| !(i.workspace_id == workspace_id && i.platform == platform));
    }

    pub async fn set_workspace_active(&self, workspace_id: &str, active: bool) {
        let mut rows = self.inner.write().await;
        for workspace in rows.workspaces.iter_mut() {
            if workspace.workspace_id == workspace_id {
                workspace.active = active;
            }
        }
    }
}

#[async_trait]
impl WorkspaceRegistry for MemoryRegistry {
    async fn snapshot(
        &self,
        event_type: EventType,
        platform: Platform,
    ) -> Result<RegistrySnapshot, EventIdError> {
        let rows = self.inner.read().await;
        let mut snapshot = RegistrySnapshot {
            subscriptions: rows
                .subscriptions
                .iter()
                .filter(|s| s.event_type == event_type && s.platform == platform && s.enabled)
                .cloned()
                .collect(),
            ..RegistrySnapshot::default()
        };

        for subscription in &snapshot.subscriptions {
            let id = subscription.workspace_id.as_str();
            if let Some(workspace) = rows.workspaces.iter().find(|w| w.workspace_id == id) {
                snapshot.workspaces.insert(id.to_string(), workspace.clone());
            }
            if let Some(integration) = rows
                .integrations
                .iter()
                .find(|i| i.workspace_id == id && i.platform == platform)
            {
                snapshot
                    .integrations
                    .insert(id.to_string(), integration.clone());
            }
            let rules: Vec<AutomationRule> = rows
                .rules
                .iter()
                .filter(|r| r.workspace_id == id && r.event_type == event_type && r.enabled)
                .cloned()
                .collect();
            if !rules.is_empty() {
                snapshot.rules.insert(id.to_string(), rules);
            }
        }

        Ok(snapshot)
    }
}
