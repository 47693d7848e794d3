//! Rule actions. Opaque units of work from the engine's point of view: the
//! engine only tracks their outcome, the downstream platform owns the logic.

use eventid_common::{EventType, Platform};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Publish a follow-up event onto the broker.
    EmitEvent {
        event_type: EventType,
        platform: Platform,
        #[serde(default)]
        data: Value,
    },
    /// Call a downstream platform endpoint.
    InvokePlatform {
        platform: Platform,
        operation: String,
        #[serde(default)]
        params: Value,
    },
}

impl Action {
    pub fn emit(event_type: EventType, platform: Platform, data: Value) -> Self {
        Action::EmitEvent {
            event_type,
            platform,
            data,
        }
    }

    pub fn invoke(platform: Platform, operation: impl Into<String>, params: Value) -> Self {
        Action::InvokePlatform {
            platform,
            operation: operation.into(),
            params,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::EmitEvent { .. } => "emit_event",
            Action::InvokePlatform { .. } => "invoke_platform",
        }
    }

    /// Human-readable label recorded in workflow steps.
    pub fn label(&self) -> String {
        match self {
            Action::EmitEvent { event_type, .. } => format!("emit_event:{event_type}"),
            Action::InvokePlatform {
                platform,
                operation,
                ..
            } => format!("invoke_platform:{platform}/{operation}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn actions_deserialize_from_rule_json() {
        let raw = json!([
            {"type": "emit_event", "event_type": "SPEC_REQUESTED", "platform": "code", "data": {"priority": "high"}},
            {"type": "invoke_platform", "platform": "scan", "operation": "rescan"}
        ]);
        let actions: Vec<Action> = serde_json::from_value(raw).unwrap();

        assert_eq!(
            actions[0],
            Action::emit(EventType::SpecRequested, Platform::Code, json!({"priority": "high"}))
        );
        assert_eq!(actions[1], Action::invoke(Platform::Scan, "rescan", Value::Null));
    }

    #[test]
    fn labels_name_the_target() {
        assert_eq!(
            Action::emit(EventType::ReviewRequested, Platform::Review, json!({})).label(),
            "emit_event:REVIEW_REQUESTED"
        );
        assert_eq!(
            Action::invoke(Platform::Code, "generate_spec", json!({})).label(),
            "invoke_platform:code/generate_spec"
        );
    }
}
