// Workflow Automation Engine
//
// Tick-driven automation for CRM records: triggers start durable runs that
// walk ordered condition, action and delay steps.

pub mod actions;
pub mod conditions;
pub mod definition;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fields;
pub mod postgres;
pub mod store;
pub mod templates;
pub mod triggers;

pub use actions::{ActionDispatcher, ActionRequest, ActionResult, ActionType, DispatchContext};
pub use conditions::{Condition, ConditionEvaluator, ConditionGroup, ConditionOperator, LogicOperator};
pub use definition::{CompiledWorkflow, WorkflowDefinition, WorkflowStep};
pub use engine::{EngineConfig, TickError, TickReport, WorkflowEngine};
pub use error::{DispatchError, EngineError, EvaluationError, PersistenceError, ValidationError};
pub use executor::{ExecutionResult, WorkflowExecutor};
pub use fields::{FieldRegistry, FieldType, Record, SchemaRegistry};
pub use postgres::PgWorkflowStore;
pub use store::{RecordSource, WorkflowStore};
pub use templates::{Template, TemplateInterpolator};
pub use triggers::{Tick, TriggerMatcher, TriggerSpec};
