//! Action execution seams: publishing follow-up events and calling platforms.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventid_common::{EventEnvelope, EventIdError, EventType, Platform};
use eventid_workspaces::{Action, Workspace};
use serde_json::{json, Value};
use tracing::debug;

use crate::run::follow_up_event_id;

/// Publishes envelopes onto the broker. Follow-up events always round-trip
/// through here, never straight back into the pipeline.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &EventEnvelope) -> Result<(), EventIdError>;
}

#[async_trait]
impl<P: EventPublisher + ?Sized> EventPublisher for Arc<P> {
    async fn publish(&self, event: &EventEnvelope) -> Result<(), EventIdError> {
        (**self).publish(event).await
    }
}

/// What an action runs against.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub event: &'a EventEnvelope,
    pub workspace: &'a Workspace,
    pub rule_name: &'a str,
    pub workflow_id: &'a str,
    /// Position of the action in the rule's list.
    pub action_index: usize,
}

/// Runs one attempt of one action. Timeouts and retries are the engine's job.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        action: &Action,
        ctx: &ActionContext<'_>,
    ) -> Result<Option<Value>, EventIdError>;
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn invoke(
        &self,
        platform: Platform,
        operation: &str,
        body: &Value,
    ) -> Result<Value, EventIdError>;
}

// ---------------------------------------------------------------------------
// HTTP platform client
// ---------------------------------------------------------------------------

/// POSTs JSON to `{base_url}/{operation}`. Non-2xx is an action failure.
pub struct HttpPlatformClient {
    client: reqwest::Client,
    base_urls: HashMap<Platform, String>,
}

impl HttpPlatformClient {
    pub fn new(base_urls: HashMap<Platform, String>, timeout: Duration) -> Result<Self, EventIdError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EventIdError::Config(format!("http client: {e}")))?;
        Ok(Self { client, base_urls })
    }

    fn url(&self, platform: Platform, operation: &str) -> Option<String> {
        self.base_urls.get(&platform).map(|base| {
            format!(
                "{}/{}",
                base.trim_end_matches('/'),
                operation.trim_start_matches('/')
            )
        })
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn invoke(
        &self,
        platform: Platform,
        operation: &str,
        body: &Value,
    ) -> Result<Value, EventIdError> {
        let label = format!("invoke_platform:{platform}/{operation}");
        let Some(url) = self.url(platform, operation) else {
            return Err(EventIdError::ActionFailure {
                action: label,
                message: format!("no endpoint configured for platform {platform}"),
            });
        };

        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| EventIdError::ActionFailure {
                action: label.clone(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(EventIdError::ActionFailure {
                action: label,
                message: format!("{status}: {}", text.chars().take(200).collect::<String>()),
            });
        }

        // Empty or non-JSON bodies are fine; the status is the outcome.
        let text = resp.text().await.unwrap_or_default();
        Ok(serde_json::from_str(&text).unwrap_or(json!({ "status": status.as_u16() })))
    }
}

// ---------------------------------------------------------------------------
// Default executor
// ---------------------------------------------------------------------------

pub struct DefaultActionExecutor {
    publisher: Arc<dyn EventPublisher>,
    platforms: Arc<dyn PlatformClient>,
}

impl DefaultActionExecutor {
    pub fn new(publisher: Arc<dyn EventPublisher>, platforms: Arc<dyn PlatformClient>) -> Self {
        Self {
            publisher,
            platforms,
        }
    }
}

/// Builds the follow-up envelope for an `emit_event` action. The follow-up is
/// addressed to the reacting workspace unless the action's data names one.
///
/// The `event_id` is derived from the workflow and the action's position, so
/// every retry of the same action publishes the same event and the audit log
/// stores it once.
pub fn follow_up_event(
    action_data: &Value,
    event_type: EventType,
    platform: Platform,
    ctx: &ActionContext<'_>,
) -> EventEnvelope {
    let mut data = match action_data {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    data.entry("workspace_id")
        .or_insert_with(|| json!(ctx.workspace.workspace_id));
    data.insert("workflow_id".to_string(), json!(ctx.workflow_id));
    data.insert("rule_name".to_string(), json!(ctx.rule_name));
    let mut event = EventEnvelope::follow_up(ctx.event, event_type, platform, Value::Object(data));
    event.event_id = follow_up_event_id(ctx.workflow_id, ctx.action_index);
    event
}

#[async_trait]
impl ActionExecutor for DefaultActionExecutor {
    async fn execute(
        &self,
        action: &Action,
        ctx: &ActionContext<'_>,
    ) -> Result<Option<Value>, EventIdError> {
        match action {
            Action::EmitEvent {
                event_type,
                platform,
                data,
            } => {
                let event = follow_up_event(data, *event_type, *platform, ctx);
                self.publisher.publish(&event).await?;
                debug!(
                    event_id = event.event_id.as_str(),
                    event_type = %event.event_type,
                    correlation_id = event.correlation_key(),
                    workflow_id = ctx.workflow_id,
                    "Emitted follow-up event"
                );
                Ok(Some(json!({ "event_id": event.event_id })))
            }
            Action::InvokePlatform {
                platform,
                operation,
                params,
            } => {
                let body = json!({
                    "operation": operation,
                    "params": params,
                    "workspace_id": ctx.workspace.workspace_id,
                    "workflow_id": ctx.workflow_id,
                    "trigger_event_id": ctx.event.event_id,
                    "correlation_id": ctx.event.correlation_key(),
                });
                let response = self.platforms.invoke(*platform, operation, &body).await?;
                Ok(Some(response))
            }
        }
    }
}
