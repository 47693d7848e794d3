//! Read access to workspaces, integrations, subscriptions and rules.

use std::collections::HashMap;

use async_trait::async_trait;
use eventid_common::{EventIdError, EventType, Platform};
use eventid_events::classify;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::warn;

use crate::action::Action;
use crate::condition::Condition;
use crate::types::{AutomationRule, EventSubscription, PlatformIntegration, Workspace};

/// Everything needed to match one event, read at one point in time.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    /// Subscriptions for the event's (type, platform).
    pub subscriptions: Vec<EventSubscription>,
    /// Subscribed workspaces by id.
    pub workspaces: HashMap<String, Workspace>,
    /// Integrations for the event's platform, by workspace id.
    pub integrations: HashMap<String, PlatformIntegration>,
    /// Rules for the event's type, by workspace id.
    pub rules: HashMap<String, Vec<AutomationRule>>,
}

#[async_trait]
pub trait WorkspaceRegistry: Send + Sync {
    async fn snapshot(
        &self,
        event_type: EventType,
        platform: Platform,
    ) -> Result<RegistrySnapshot, EventIdError>;
}

#[derive(Clone)]
pub struct PgWorkspaceRegistry {
    pool: PgPool,
}

impl PgWorkspaceRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkspaceRegistry for PgWorkspaceRegistry {
    async fn snapshot(
        &self,
        event_type: EventType,
        platform: Platform,
    ) -> Result<RegistrySnapshot, EventIdError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        let subscription_rows = sqlx::query(
            r#"
            SELECT workspace_id, event_type, platform, enabled, filters
            FROM event_subscriptions
            WHERE event_type = $1 AND platform = $2 AND enabled
            "#,
        )
        .bind(event_type.as_str())
        .bind(platform.as_str())
        .fetch_all(&mut *tx)
        .await
        .map_err(classify)?;

        let subscriptions: Vec<EventSubscription> = subscription_rows
            .iter()
            .filter_map(|row| decode_subscription(row, event_type, platform))
            .collect();

        if subscriptions.is_empty() {
            tx.commit().await.map_err(classify)?;
            return Ok(RegistrySnapshot::default());
        }

        let ids: Vec<String> = subscriptions.iter().map(|s| s.workspace_id.clone()).collect();

        let workspaces: HashMap<String, Workspace> = sqlx::query(
            r#"
            SELECT workspace_id, user_id, name, frameworks, jurisdiction, modules,
                   github_repo, active, settings, created_at, updated_at
            FROM workspaces
            WHERE workspace_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(classify)?
        .iter()
        .map(decode_workspace)
        .collect::<Result<Vec<_>, _>>()
        .map_err(classify)?
        .into_iter()
        .map(|w| (w.workspace_id.clone(), w))
        .collect();

        let integrations: HashMap<String, PlatformIntegration> = sqlx::query(
            r#"
            SELECT workspace_id, enabled, configuration, last_sync
            FROM platform_integrations
            WHERE platform = $1 AND workspace_id = ANY($2)
            "#,
        )
        .bind(platform.as_str())
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(classify)?
        .iter()
        .map(|row| decode_integration(row, platform))
        .collect::<Result<Vec<_>, _>>()
        .map_err(classify)?
        .into_iter()
        .map(|i| (i.workspace_id.clone(), i))
        .collect();

        let rule_rows = sqlx::query(
            r#"
            SELECT workspace_id, rule_name, conditions, actions, enabled, priority
            FROM automation_rules
            WHERE event_type = $1 AND workspace_id = ANY($2) AND enabled
            "#,
        )
        .bind(event_type.as_str())
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(classify)?;

        let mut rules: HashMap<String, Vec<AutomationRule>> = HashMap::new();
        for rule in rule_rows
            .iter()
            .filter_map(|row| decode_rule(row, event_type))
        {
            rules.entry(rule.workspace_id.clone()).or_default().push(rule);
        }

        tx.commit().await.map_err(classify)?;

        Ok(RegistrySnapshot {
            subscriptions,
            workspaces,
            integrations,
            rules,
        })
    }
}

fn decode_workspace(row: &PgRow) -> Result<Workspace, sqlx::Error> {
    Ok(Workspace {
        workspace_id: row.try_get("workspace_id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        frameworks: row.try_get("frameworks")?,
        jurisdiction: row.try_get("jurisdiction")?,
        modules: row.try_get("modules")?,
        github_repo: row.try_get("github_repo")?,
        active: row.try_get("active")?,
        settings: row.try_get("settings")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn decode_integration(row: &PgRow, platform: Platform) -> Result<PlatformIntegration, sqlx::Error> {
    Ok(PlatformIntegration {
        workspace_id: row.try_get("workspace_id")?,
        platform,
        enabled: row.try_get("enabled")?,
        configuration: row.try_get("configuration")?,
        last_sync: row.try_get("last_sync")?,
    })
}

/// Rows with undecodable filters are dropped: an unreadable filter excludes
/// the workspace rather than widening the match.
fn decode_subscription(
    row: &PgRow,
    event_type: EventType,
    platform: Platform,
) -> Option<EventSubscription> {
    let workspace_id: String = row.try_get("workspace_id").ok()?;
    let filters: Option<serde_json::Value> = row.try_get("filters").ok()?;
    let filters = match filters {
        None | Some(serde_json::Value::Null) => None,
        Some(raw) => match serde_json::from_value::<Condition>(raw) {
            Ok(condition) => Some(condition),
            Err(e) => {
                warn!(
                    workspace_id = workspace_id.as_str(),
                    %event_type,
                    error = %e,
                    "Skipping subscription with invalid filters"
                );
                return None;
            }
        },
    };
    Some(EventSubscription {
        workspace_id,
        event_type,
        platform,
        enabled: row.try_get("enabled").ok()?,
        filters,
    })
}

fn decode_rule(row: &PgRow, event_type: EventType) -> Option<AutomationRule> {
    let workspace_id: String = row.try_get("workspace_id").ok()?;
    let rule_name: String = row.try_get("rule_name").ok()?;

    let conditions: Option<serde_json::Value> = row.try_get("conditions").ok()?;
    let conditions = match conditions {
        None | Some(serde_json::Value::Null) => None,
        Some(raw) => match serde_json::from_value::<Condition>(raw) {
            Ok(condition) => Some(condition),
            Err(e) => {
                warn!(
                    workspace_id = workspace_id.as_str(),
                    rule_name = rule_name.as_str(),
                    error = %e,
                    "Skipping rule with invalid conditions"
                );
                return None;
            }
        },
    };

    let actions: serde_json::Value = row.try_get("actions").ok()?;
    let actions = match serde_json::from_value::<Vec<Action>>(actions) {
        Ok(actions) => actions,
        Err(e) => {
            warn!(
                workspace_id = workspace_id.as_str(),
                rule_name = rule_name.as_str(),
                error = %e,
                "Skipping rule with invalid actions"
            );
            return None;
        }
    };

    Some(AutomationRule {
        workspace_id,
        rule_name,
        event_type,
        conditions,
        actions,
        enabled: row.try_get("enabled").ok()?,
        priority: row.try_get("priority").ok()?,
    })
}
