//! Registry rows. Read-only from the engine's point of view.

use chrono::{DateTime, Utc};
use eventid_common::{EventType, Platform};
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::condition::Condition;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub workspace_id: String,
    pub user_id: String,
    pub name: String,
    /// Compliance framework tags, e.g. `GDPR`, `HIPAA`, `SOC2`.
    pub frameworks: Vec<String>,
    pub jurisdiction: String,
    /// Capability tags.
    pub modules: Vec<String>,
    pub github_repo: Option<String>,
    pub active: bool,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(workspace_id: impl Into<String>, user_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
            name: name.into(),
            frameworks: Vec::new(),
            jurisdiction: String::new(),
            modules: Vec::new(),
            github_repo: None,
            active: true,
            settings: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_frameworks<I, S>(mut self, frameworks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.frameworks = frameworks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = jurisdiction.into();
        self
    }

    pub fn with_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modules = modules.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_github_repo(mut self, repo: impl Into<String>) -> Self {
        self.github_repo = Some(repo.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn has_framework(&self, framework: &str) -> bool {
        self.frameworks.iter().any(|f| f.eq_ignore_ascii_case(framework))
    }

    pub fn has_module(&self, module: &str) -> bool {
        self.modules.iter().any(|m| m.eq_ignore_ascii_case(module))
    }
}

/// One per (workspace, platform).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformIntegration {
    pub workspace_id: String,
    pub platform: Platform,
    pub enabled: bool,
    pub configuration: serde_json::Value,
    pub last_sync: Option<DateTime<Utc>>,
}

impl PlatformIntegration {
    pub fn enabled(workspace_id: impl Into<String>, platform: Platform) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            platform,
            enabled: true,
            configuration: serde_json::json!({}),
            last_sync: None,
        }
    }

    pub fn disabled(workspace_id: impl Into<String>, platform: Platform) -> Self {
        Self {
            enabled: false,
            ..Self::enabled(workspace_id, platform)
        }
    }
}

/// One per (workspace, event type, platform).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubscription {
    pub workspace_id: String,
    pub event_type: EventType,
    pub platform: Platform,
    pub enabled: bool,
    /// Extra predicate; `None` accepts every event.
    pub filters: Option<Condition>,
}

impl EventSubscription {
    pub fn new(workspace_id: impl Into<String>, event_type: EventType, platform: Platform) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            event_type,
            platform,
            enabled: true,
            filters: None,
        }
    }

    pub fn with_filters(mut self, filters: Condition) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub workspace_id: String,
    pub rule_name: String,
    pub event_type: EventType,
    /// `None` always holds.
    pub conditions: Option<Condition>,
    pub actions: Vec<Action>,
    pub enabled: bool,
    /// Higher runs first.
    pub priority: i32,
}

impl AutomationRule {
    pub fn new(
        workspace_id: impl Into<String>,
        rule_name: impl Into<String>,
        event_type: EventType,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            rule_name: rule_name.into(),
            event_type,
            conditions: None,
            actions: Vec::new(),
            enabled: true,
            priority: 0,
        }
    }

    pub fn with_conditions(mut self, conditions: Condition) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
