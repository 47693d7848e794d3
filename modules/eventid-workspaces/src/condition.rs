//! Typed predicate AST for subscription filters and rule conditions.
//!
//! Paths are dotted lookups into the event's `event_data`
//! (`jurisdiction.framework`, `risk_context.change_severity`, ...).
//! Evaluation is deterministic and has no side effects. A missing path never
//! matches, except under `Not`.

use std::fmt;
use std::str::FromStr;

use eventid_common::EventEnvelope;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Workspace;

pub const FRAMEWORK_PATH: &str = "jurisdiction.framework";
pub const REGION_PATH: &str = "jurisdiction.region";
pub const SEVERITY_PATH: &str = "risk_context.change_severity";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    All {
        conditions: Vec<Condition>,
    },
    Any {
        conditions: Vec<Condition>,
    },
    Not {
        condition: Box<Condition>,
    },
    Equals {
        path: String,
        value: Value,
    },
    OneOf {
        path: String,
        values: Vec<Value>,
    },
    Exists {
        path: String,
    },
    /// String contains substring (case-insensitive), or array contains element.
    Contains {
        path: String,
        value: Value,
    },
    SeverityAtLeast {
        #[serde(default = "default_severity_path")]
        path: String,
        level: Severity,
    },
    /// The event's `jurisdiction.framework` is one of the workspace's frameworks.
    FrameworkInWorkspace,
    /// The event's `jurisdiction.region` equals the workspace's jurisdiction.
    RegionMatchesWorkspace,
    WorkspaceHasModule {
        module: String,
    },
}

fn default_severity_path() -> String {
    SEVERITY_PATH.to_string()
}

/// What a condition is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub event: &'a EventEnvelope,
    pub workspace: &'a Workspace,
}

impl Condition {
    pub fn all(conditions: Vec<Condition>) -> Self {
        Condition::All { conditions }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Condition::Any { conditions }
    }

    pub fn negate(condition: Condition) -> Self {
        Condition::Not {
            condition: Box::new(condition),
        }
    }

    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Equals {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn severity_at_least(level: Severity) -> Self {
        Condition::SeverityAtLeast {
            path: default_severity_path(),
            level,
        }
    }

    pub fn evaluate(&self, ctx: &MatchContext<'_>) -> bool {
        match self {
            Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(ctx)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.evaluate(ctx)),
            Condition::Not { condition } => !condition.evaluate(ctx),
            Condition::Equals { path, value } => ctx
                .event
                .data_at(path)
                .is_some_and(|actual| values_equal(actual, value)),
            Condition::OneOf { path, values } => ctx
                .event
                .data_at(path)
                .is_some_and(|actual| values.iter().any(|v| values_equal(actual, v))),
            Condition::Exists { path } => ctx.event.data_at(path).is_some_and(|v| !v.is_null()),
            Condition::Contains { path, value } => match ctx.event.data_at(path) {
                Some(Value::String(haystack)) => value
                    .as_str()
                    .is_some_and(|needle| haystack.to_lowercase().contains(&needle.to_lowercase())),
                Some(Value::Array(items)) => items.iter().any(|item| values_equal(item, value)),
                _ => false,
            },
            Condition::SeverityAtLeast { path, level } => ctx
                .event
                .data_at(path)
                .and_then(Value::as_str)
                .and_then(|raw| raw.parse::<Severity>().ok())
                .is_some_and(|actual| actual >= *level),
            Condition::FrameworkInWorkspace => ctx
                .event
                .data_at(FRAMEWORK_PATH)
                .and_then(Value::as_str)
                .is_some_and(|framework| ctx.workspace.has_framework(framework)),
            Condition::RegionMatchesWorkspace => ctx
                .event
                .data_at(REGION_PATH)
                .and_then(Value::as_str)
                .is_some_and(|region| region.eq_ignore_ascii_case(&ctx.workspace.jurisdiction)),
            Condition::WorkspaceHasModule { module } => ctx.workspace.has_module(module),
        }
    }
}

/// Strings compare case-insensitively; everything else structurally.
fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

/// Ordered change severity carried in `risk_context.change_severity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventid_common::{EventType, Platform};
    use serde_json::json;

    fn event(data: Value) -> EventEnvelope {
        EventEnvelope::new(EventType::RegulatoryUpdate, Platform::Scraper, data)
    }

    fn saas() -> Workspace {
        Workspace::new("ws_saas_product", "user-1", "SaaS Product")
            .with_frameworks(["GDPR", "SOC2"])
            .with_jurisdiction("EU")
            .with_modules(["privacy", "code-scan"])
    }

    fn eval(condition: &Condition, event: &EventEnvelope, workspace: &Workspace) -> bool {
        condition.evaluate(&MatchContext { event, workspace })
    }

    #[test]
    fn framework_and_region_match_workspace() {
        let gdpr_eu = event(json!({"jurisdiction": {"framework": "GDPR", "region": "EU"}}));
        let ws = saas();
        assert!(eval(&Condition::FrameworkInWorkspace, &gdpr_eu, &ws));
        assert!(eval(&Condition::RegionMatchesWorkspace, &gdpr_eu, &ws));

        let hipaa_us = event(json!({"jurisdiction": {"framework": "HIPAA", "region": "US"}}));
        assert!(!eval(&Condition::FrameworkInWorkspace, &hipaa_us, &ws));
        assert!(!eval(&Condition::RegionMatchesWorkspace, &hipaa_us, &ws));
    }

    #[test]
    fn framework_match_is_case_insensitive() {
        let lower = event(json!({"jurisdiction": {"framework": "gdpr"}}));
        assert!(eval(&Condition::FrameworkInWorkspace, &lower, &saas()));
    }

    #[test]
    fn missing_paths_never_match() {
        let bare = event(json!({}));
        let ws = saas();
        assert!(!eval(&Condition::FrameworkInWorkspace, &bare, &ws));
        assert!(!eval(&Condition::equals("jurisdiction.region", "EU"), &bare, &ws));
        assert!(!eval(&Condition::severity_at_least(Severity::Low), &bare, &ws));
        assert!(eval(
            &Condition::negate(Condition::Exists { path: "risk_context".into() }),
            &bare,
            &ws
        ));
    }

    #[test]
    fn severity_threshold_is_ordered() {
        let high = event(json!({"risk_context": {"change_severity": "HIGH"}}));
        let ws = saas();
        assert!(eval(&Condition::severity_at_least(Severity::Medium), &high, &ws));
        assert!(eval(&Condition::severity_at_least(Severity::High), &high, &ws));
        assert!(!eval(&Condition::severity_at_least(Severity::Critical), &high, &ws));

        let garbage = event(json!({"risk_context": {"change_severity": "apocalyptic"}}));
        assert!(!eval(&Condition::severity_at_least(Severity::Low), &garbage, &ws));
    }

    #[test]
    fn combinators_compose() {
        let e = event(json!({
            "jurisdiction": {"framework": "GDPR", "region": "EU"},
            "risk_context": {"change_severity": "low"},
            "tags": ["erasure", "consent"],
            "title": "Right to Erasure clarified"
        }));
        let ws = saas();

        let gdpr_and_serious = Condition::all(vec![
            Condition::FrameworkInWorkspace,
            Condition::severity_at_least(Severity::High),
        ]);
        assert!(!eval(&gdpr_and_serious, &e, &ws));

        let gdpr_or_serious = Condition::any(vec![
            Condition::FrameworkInWorkspace,
            Condition::severity_at_least(Severity::High),
        ]);
        assert!(eval(&gdpr_or_serious, &e, &ws));

        let tagged = Condition::Contains {
            path: "tags".into(),
            value: json!("consent"),
        };
        assert!(eval(&tagged, &e, &ws));

        let titled = Condition::Contains {
            path: "title".into(),
            value: json!("erasure"),
        };
        assert!(eval(&titled, &e, &ws));

        let one_of = Condition::OneOf {
            path: "jurisdiction.region".into(),
            values: vec![json!("US"), json!("EU")],
        };
        assert!(eval(&one_of, &e, &ws));

        assert!(eval(&Condition::all(vec![]), &e, &ws));
        assert!(!eval(&Condition::any(vec![]), &e, &ws));
    }

    #[test]
    fn numbers_compare_by_value() {
        let e = event(json!({"score": 3}));
        assert!(eval(&Condition::equals("score", json!(3.0)), &e, &saas()));
    }

    #[test]
    fn workspace_module_condition() {
        let e = event(json!({}));
        assert!(eval(
            &Condition::WorkspaceHasModule { module: "code-scan".into() },
            &e,
            &saas()
        ));
        assert!(!eval(
            &Condition::WorkspaceHasModule { module: "spec-gen".into() },
            &e,
            &saas()
        ));
    }

    #[test]
    fn conditions_deserialize_from_registry_json() {
        let raw = json!({
            "op": "all",
            "conditions": [
                {"op": "framework_in_workspace"},
                {"op": "severity_at_least", "level": "high"},
                {"op": "equals", "path": "jurisdiction.region", "value": "EU"}
            ]
        });
        let parsed: Condition = serde_json::from_value(raw).unwrap();
        assert_eq!(
            parsed,
            Condition::all(vec![
                Condition::FrameworkInWorkspace,
                Condition::severity_at_least(Severity::High),
                Condition::equals("jurisdiction.region", "EU"),
            ])
        );
    }
}
