// Workflow Actions - Action types, parameter contracts and the dispatch boundary

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::error::{DispatchError, ValidationError};

/// Types of actions that workflows can execute
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SendEmail,
    SendSms,
    CreateTask,
    SendNotification,
    UpdateField,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendEmail => "send_email",
            Self::SendSms => "send_sms",
            Self::CreateTask => "create_task",
            Self::SendNotification => "send_notification",
            Self::UpdateField => "update_field",
        }
    }

    /// Parameters the dispatcher needs for this action type
    pub fn required_parameters(&self) -> &'static [&'static str] {
        match self {
            Self::SendEmail => &["to", "subject", "body"],
            Self::SendSms => &["to", "message"],
            Self::CreateTask => &["title", "description", "priority", "assigned_to"],
            Self::SendNotification => &["message", "user_id"],
            Self::UpdateField => &["table", "field", "value"],
        }
    }

    /// Check that every required parameter is configured
    pub fn validate_parameters(
        &self,
        parameters: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), ValidationError> {
        for name in self.required_parameters() {
            match parameters.get(*name) {
                None | Some(serde_json::Value::Null) => {
                    return Err(ValidationError::MissingParameter {
                        action_type: self.as_str().to_string(),
                        parameter: name.to_string(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send_email" => Ok(Self::SendEmail),
            "send_sms" => Ok(Self::SendSms),
            "create_task" => Ok(Self::CreateTask),
            "send_notification" => Ok(Self::SendNotification),
            "update_field" => Ok(Self::UpdateField),
            other => Err(ValidationError::UnknownActionType(other.to_string())),
        }
    }
}

/// Identifies the run an action belongs to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchContext {
    pub company_id: Uuid,
    pub workflow_id: Uuid,
    pub run_id: Uuid,
    pub record_id: Option<Uuid>,
    pub position: i32,
}

/// One resolved action handed to the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRequest {
    pub action_type: ActionType,
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub context: DispatchContext,
}

impl ActionRequest {
    pub fn parameter_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(|v| v.as_str())
    }
}

/// Result of a successful dispatch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub output: Option<serde_json::Value>,
    pub duration_ms: i64,
}

impl ActionResult {
    pub fn success(output: Option<serde_json::Value>) -> Self {
        Self {
            output,
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Performs the concrete side effect of an action step. Retries and rate
/// limiting belong to implementations, never to the engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(&self, request: &ActionRequest) -> Result<ActionResult, DispatchError>;
}
