// Workflow Store - Persistence boundary for definitions, runs and record lookup

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use leadflow_shared::WorkflowRun;

use super::definition::WorkflowDefinition;
use super::error::PersistenceError;
use super::fields::Record;

pub type StoreResult<T> = Result<T, PersistenceError>;

/// Durable state owned by the engine.
///
/// `save_run` is the single-writer guard: it must only succeed when the
/// stored version equals `run.version`, and it returns the new version.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Active definitions across all tenants, ordered by tenant
    async fn active_workflows(&self) -> StoreResult<Vec<WorkflowDefinition>>;

    async fn insert_run(&self, run: &WorkflowRun) -> StoreResult<()>;

    async fn load_run(&self, run_id: Uuid) -> StoreResult<Option<WorkflowRun>>;

    async fn save_run(&self, run: &WorkflowRun) -> StoreResult<i64>;

    /// `workflow_id = ? AND status = pending`
    async fn pending_runs(&self, workflow_id: Uuid) -> StoreResult<Vec<WorkflowRun>>;

    /// `status = waiting_delay AND resume_at <= now`
    async fn due_runs(&self, now: DateTime<Utc>) -> StoreResult<Vec<WorkflowRun>>;

    /// `status = running AND updated_at <= claimed_before`: claims whose
    /// holder stopped saving progress
    async fn stalled_runs(&self, claimed_before: DateTime<Utc>) -> StoreResult<Vec<WorkflowRun>>;

    async fn schedule_cursor(&self, workflow_id: Uuid) -> StoreResult<Option<DateTime<Utc>>>;

    async fn set_schedule_cursor(&self, workflow_id: Uuid, evaluated_at: DateTime<Utc>) -> StoreResult<()>;
}

/// Read access to the CRM records automations run against
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch(&self, company_id: Uuid, table: &str, record_id: Uuid) -> StoreResult<Option<Record>>;

    /// Every record of a tenant's table, for schedule triggers
    async fn list(&self, company_id: Uuid, table: &str) -> StoreResult<Vec<(Uuid, Record)>>;
}
