// Workflow Errors - Error taxonomy for rule evaluation and run execution

use thiserror::Error;
use uuid::Uuid;

/// Malformed rule, step or trigger configuration. Fatal only for the
/// offending rule or step, which is then treated as non-matching.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Unknown condition operator '{0}'")]
    UnknownOperator(String),
    #[error("Unknown logic operator '{0}'")]
    UnknownLogic(String),
    #[error("Unknown action type '{0}'")]
    UnknownActionType(String),
    #[error("Action '{action_type}' is missing required parameter '{parameter}'")]
    MissingParameter { action_type: String, parameter: String },
    #[error("Condition field must not be empty")]
    EmptyField,
    #[error("Step position {0} is used more than once")]
    DuplicatePosition(i32),
    #[error("Step position {0} is out of range")]
    PositionOutOfRange(i32),
    #[error("Step at position {position} branches backwards to {target}")]
    BackwardBranch { position: i32, target: i32 },
    #[error("Invalid {step_type} step config: {message}")]
    InvalidStepConfig { step_type: String, message: String },
    #[error("Invalid trigger config: {0}")]
    InvalidTrigger(String),
}

/// A condition could not be evaluated against the record. Always folded
/// into "does not match" by the public evaluators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Field '{0}' is not present on the record")]
    MissingField(String),
    #[error("Field '{field}' is not a {expected}")]
    TypeMismatch { field: String, expected: &'static str },
    #[error("Operand '{0}' could not be parsed")]
    UnparseableOperand(String),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// The action dispatcher reported a failure. Fatal to the run.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Dispatch of '{action_type}' failed: {message}")]
pub struct DispatchError {
    pub action_type: String,
    pub message: String,
}

impl DispatchError {
    pub fn new(action_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Run {run_id} was modified concurrently (expected version {expected_version})")]
    VersionConflict { run_id: Uuid, expected_version: i64 },
    #[error("Run {0} not found")]
    RunNotFound(Uuid),
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
    #[error("Table '{0}' is not available to automations")]
    UnknownTable(String),
}

/// Error surfaced at the tick boundary, always attributable to a tenant
/// and, where known, a run.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

pub type EngineResult<T> = Result<T, EngineError>;
