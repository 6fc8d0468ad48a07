//! Action Dispatchers
//!
//! Deliver resolved workflow actions. The webhook dispatcher hands each
//! action to an external delivery service; the logging dispatcher is used
//! when none is configured.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::workflows::{ActionDispatcher, ActionRequest, ActionResult, DispatchError};

/// Records actions in the log without delivering them
#[derive(Debug, Default, Clone)]
pub struct LoggingDispatcher;

#[async_trait]
impl ActionDispatcher for LoggingDispatcher {
    async fn dispatch(&self, request: &ActionRequest) -> Result<ActionResult, DispatchError> {
        info!(
            "Action {} for run {} (company {}, position {}): {}",
            request.action_type,
            request.context.run_id,
            request.context.company_id,
            request.context.position,
            serde_json::Value::Object(request.parameters.clone())
        );
        Ok(ActionResult::success(Some(serde_json::json!({ "delivered": false }))))
    }
}

/// Posts each action as JSON to a delivery endpoint
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::new("webhook", e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ActionDispatcher for WebhookDispatcher {
    async fn dispatch(&self, request: &ActionRequest) -> Result<ActionResult, DispatchError> {
        let start = Instant::now();
        let action_type = request.action_type.as_str();

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| DispatchError::new(action_type, format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::new(
                action_type,
                format!("Status: {}, Body: {}", status, body),
            ));
        }

        let output = response.json::<serde_json::Value>().await.ok();
        let elapsed = start.elapsed().as_millis() as i64;
        debug!("Delivered {} for run {} in {}ms", action_type, request.context.run_id, elapsed);

        Ok(ActionResult::success(output).with_duration(elapsed))
    }
}
