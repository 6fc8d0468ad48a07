// Workflow Definitions - Authored workflows and their load-time compiled form

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use leadflow_shared::StepType;

use super::actions::ActionType;
use super::conditions::{CompiledGroup, ConditionGroup};
use super::error::ValidationError;
use super::templates::TemplateValue;
use super::triggers::TriggerSpec;

/// A workflow as authored and stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger: TriggerSpec,
    pub steps: Vec<WorkflowStep>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub position: i32,
    pub step_type: StepType,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActionConfig {
    action_type: String,
    #[serde(default)]
    parameters: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConditionConfig {
    #[serde(flatten)]
    group: ConditionGroup,
    #[serde(default)]
    false_path_position: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DelayConfig {
    delay_seconds: u64,
}

impl WorkflowDefinition {
    pub fn new(company_id: Uuid, name: &str, trigger: TriggerSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            company_id,
            name: name.to_string(),
            description: None,
            trigger,
            steps: Vec::new(),
            active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn next_position(&self) -> i32 {
        self.steps.iter().map(|s| s.position + 1).max().unwrap_or(1)
    }

    pub fn with_action(mut self, action_type: ActionType, parameters: serde_json::Value) -> Self {
        let position = self.next_position();
        self.steps.push(WorkflowStep {
            position,
            step_type: StepType::Action,
            config: serde_json::json!({
                "action_type": action_type.as_str(),
                "parameters": parameters,
            }),
        });
        self
    }

    pub fn with_condition(mut self, group: ConditionGroup) -> Self {
        let position = self.next_position();
        self.steps.push(WorkflowStep {
            position,
            step_type: StepType::Condition,
            config: serde_json::to_value(ConditionConfig {
                group,
                false_path_position: None,
            })
            .unwrap_or_default(),
        });
        self
    }

    pub fn with_delay(mut self, delay_seconds: u64) -> Self {
        let position = self.next_position();
        self.steps.push(WorkflowStep {
            position,
            step_type: StepType::Delay,
            config: serde_json::json!({ "delay_seconds": delay_seconds }),
        });
        self
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }
}

/// A step whose configuration has been validated and whose templates have
/// been parsed
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Action {
        action_type: ActionType,
        parameters: Vec<(String, TemplateValue)>,
    },
    Condition {
        group: CompiledGroup,
        false_path_position: Option<i32>,
    },
    Delay {
        delay_seconds: u64,
    },
    /// Failed validation; executed as a non-matching step
    Invalid {
        error: ValidationError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStep {
    pub position: i32,
    pub step_type: StepType,
    pub kind: StepKind,
}

impl CompiledStep {
    fn compile(step: &WorkflowStep) -> Self {
        let kind = match Self::compile_kind(step) {
            Ok(kind) => kind,
            Err(error) => StepKind::Invalid { error },
        };
        Self {
            position: step.position,
            step_type: step.step_type,
            kind,
        }
    }

    fn compile_kind(step: &WorkflowStep) -> Result<StepKind, ValidationError> {
        let invalid = |e: serde_json::Error| ValidationError::InvalidStepConfig {
            step_type: step.step_type.to_string(),
            message: e.to_string(),
        };

        match step.step_type {
            StepType::Action => {
                let config: ActionConfig = serde_json::from_value(step.config.clone()).map_err(invalid)?;
                let action_type = config.action_type.parse::<ActionType>()?;
                action_type.validate_parameters(&config.parameters)?;
                Ok(StepKind::Action {
                    action_type,
                    parameters: config
                        .parameters
                        .iter()
                        .map(|(k, v)| (k.clone(), TemplateValue::compile(v)))
                        .collect(),
                })
            }
            StepType::Condition => {
                let config: ConditionConfig = serde_json::from_value(step.config.clone()).map_err(invalid)?;
                if let Some(target) = config.false_path_position {
                    if target <= step.position {
                        return Err(ValidationError::BackwardBranch {
                            position: step.position,
                            target,
                        });
                    }
                }
                Ok(StepKind::Condition {
                    group: CompiledGroup::try_from(&config.group)?,
                    false_path_position: config.false_path_position,
                })
            }
            StepType::Delay => {
                let config: DelayConfig = serde_json::from_value(step.config.clone()).map_err(invalid)?;
                Ok(StepKind::Delay {
                    delay_seconds: config.delay_seconds,
                })
            }
        }
    }
}

/// A definition ready for execution: validated, templates parsed once,
/// steps sorted by position
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub trigger: TriggerSpec,
    pub steps: Vec<CompiledStep>,
}

impl CompiledWorkflow {
    /// Rejects definitions whose trigger is malformed or whose step
    /// positions collide or fall outside `0..i32::MAX`. Individual malformed steps are kept as
    /// [`StepKind::Invalid`].
    pub fn compile(definition: &WorkflowDefinition) -> Result<Self, ValidationError> {
        definition.trigger.validate()?;

        let mut seen = HashSet::new();
        for step in &definition.steps {
            // the executor advances to `position + 1`
            if step.position < 0 || step.position == i32::MAX {
                return Err(ValidationError::PositionOutOfRange(step.position));
            }
            if !seen.insert(step.position) {
                return Err(ValidationError::DuplicatePosition(step.position));
            }
        }

        let mut steps: Vec<CompiledStep> = definition.steps.iter().map(CompiledStep::compile).collect();
        steps.sort_by_key(|s| s.position);

        Ok(Self {
            id: definition.id,
            company_id: definition.company_id,
            name: definition.name.clone(),
            trigger: definition.trigger.clone(),
            steps,
        })
    }

    /// First step at or after `position`
    pub fn next_step(&self, position: i32) -> Option<&CompiledStep> {
        self.steps.iter().find(|s| s.position >= position)
    }

    pub fn invalid_steps(&self) -> impl Iterator<Item = (&CompiledStep, &ValidationError)> {
        self.steps.iter().filter_map(|s| match &s.kind {
            StepKind::Invalid { error } => Some((s, error)),
            _ => None,
        })
    }
}
