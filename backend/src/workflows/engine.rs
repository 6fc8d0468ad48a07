// Workflow Engine - Tick-driven orchestration of triggers and runs

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use leadflow_shared::{RecordEvent, RunStatus, WorkflowRun};

use super::actions::ActionDispatcher;
use super::definition::CompiledWorkflow;
use super::error::{EngineError, EngineResult, PersistenceError};
use super::executor::{ExecutionResult, WorkflowExecutor};
use super::fields::{Record, SchemaRegistry};
use super::store::{RecordSource, WorkflowStore};
use super::triggers::{Tick, TriggerMatcher, TriggerSpec};
use crate::scoring::ScoringService;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on runs executing at once within a tick phase
    pub max_concurrent_runs: usize,
    /// Add `lead_score` and `quality_tier` to snapshots of new runs
    pub score_on_trigger: bool,
    /// A running run that has not saved progress for this long is
    /// returned to pending and redone from its last saved position
    pub claim_lease: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 16,
            score_on_trigger: true,
            claim_lease: Duration::minutes(10),
        }
    }
}

/// A failure isolated to one tenant, workflow or run during a tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickError {
    pub company_id: Uuid,
    pub workflow_id: Option<Uuid>,
    pub run_id: Option<Uuid>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickReport {
    pub runs_created: usize,
    pub runs_recovered: usize,
    pub runs_completed: usize,
    pub runs_failed: usize,
    pub runs_suspended: usize,
    pub actions_dispatched: usize,
    pub errors: Vec<TickError>,
}

impl TickReport {
    fn record(&mut self, result: &ExecutionResult) {
        self.actions_dispatched += result.actions_dispatched;
        match result.status {
            RunStatus::Completed => self.runs_completed += 1,
            RunStatus::Failed => self.runs_failed += 1,
            RunStatus::WaitingDelay => self.runs_suspended += 1,
            _ => {}
        }
    }

    fn error(&mut self, company_id: Uuid, workflow_id: Option<Uuid>, run_id: Option<Uuid>, error: impl ToString) {
        self.errors.push(TickError {
            company_id,
            workflow_id,
            run_id,
            error: error.to_string(),
        });
    }
}

pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    records: Arc<dyn RecordSource>,
    executor: WorkflowExecutor,
    scoring: Option<Arc<ScoringService>>,
    config: EngineConfig,
    workflows: Arc<RwLock<Vec<Arc<CompiledWorkflow>>>>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        records: Arc<dyn RecordSource>,
        dispatcher: Arc<dyn ActionDispatcher>,
        schema: Arc<SchemaRegistry>,
        config: EngineConfig,
    ) -> Self {
        let executor = WorkflowExecutor::new(store.clone(), dispatcher, schema);

        Self {
            store,
            records,
            executor,
            scoring: None,
            config,
            workflows: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_scoring(mut self, scoring: Arc<ScoringService>) -> Self {
        self.scoring = Some(scoring);
        self
    }

    /// Reload and compile all active workflows. Definitions that fail to
    /// compile are logged and left out.
    pub async fn reload_workflows(&self) -> EngineResult<usize> {
        let definitions = self.store.active_workflows().await?;

        let mut compiled = Vec::with_capacity(definitions.len());
        for definition in definitions.iter().filter(|d| d.active) {
            match CompiledWorkflow::compile(definition) {
                Ok(workflow) => {
                    for (step, err) in workflow.invalid_steps() {
                        warn!(
                            "Workflow '{}' ({}, company {}): step {} is invalid and will be skipped: {}",
                            workflow.name, workflow.id, workflow.company_id, step.position, err
                        );
                    }
                    compiled.push(Arc::new(workflow));
                }
                Err(e) => {
                    error!(
                        "Workflow '{}' ({}, company {}) failed validation: {}",
                        definition.name, definition.id, definition.company_id, e
                    );
                }
            }
        }

        let mut workflows = self.workflows.write().await;
        *workflows = compiled;

        info!("Loaded {} active workflows", workflows.len());
        Ok(workflows.len())
    }

    pub async fn workflow_count(&self) -> usize {
        self.workflows.read().await.len()
    }

    /// Process one tick: start runs for a matching record event, fire due
    /// schedules, recover runs whose claim lapsed, execute pending runs and
    /// resume delayed runs whose time has come. Failures of individual runs are collected in the report.
    pub async fn tick(&self, tick: Tick) -> EngineResult<TickReport> {
        let workflows = self.workflows.read().await.clone();
        let mut report = TickReport::default();

        if let Some(event) = &tick.event {
            self.start_event_runs(&workflows, event, tick.now, &mut report).await;
        }
        self.start_scheduled_runs(&workflows, tick.now, &mut report).await;
        self.recover_stalled_runs(tick.now, &mut report).await;

        let mut batch = Vec::new();
        for workflow in &workflows {
            match self.store.pending_runs(workflow.id).await {
                Ok(runs) => batch.extend(runs.into_iter().map(|run| (workflow.clone(), run.id))),
                Err(e) => {
                    error!("Failed to load pending runs of workflow {} (company {}): {}", workflow.id, workflow.company_id, e);
                    report.error(workflow.company_id, Some(workflow.id), None, e);
                }
            }
        }
        self.execute_batch(batch, tick.now, &mut report).await;

        let by_id: HashMap<Uuid, Arc<CompiledWorkflow>> = workflows.iter().map(|w| (w.id, w.clone())).collect();
        let mut batch = Vec::new();
        for run in self.store.due_runs(tick.now).await? {
            match by_id.get(&run.workflow_id) {
                Some(workflow) => batch.push((workflow.clone(), run.id)),
                None => debug!("Run {} belongs to inactive workflow {}; leaving it suspended", run.id, run.workflow_id),
            }
        }
        self.execute_batch(batch, tick.now, &mut report).await;

        if !report.errors.is_empty() {
            warn!("Tick at {} finished with {} isolated errors", tick.now, report.errors.len());
        }
        Ok(report)
    }

    /// Cancel a run that has not finished yet. Finished runs are returned
    /// unchanged.
    pub async fn cancel_run(&self, run_id: Uuid) -> EngineResult<WorkflowRun> {
        let mut run = self
            .store
            .load_run(run_id)
            .await?
            .ok_or(PersistenceError::RunNotFound(run_id))?;

        if run.status.is_terminal() {
            debug!("Run {} is already {}", run.id, run.status);
            return Ok(run);
        }

        run.status = RunStatus::Cancelled;
        run.resume_at = None;
        run.updated_at = Utc::now();
        run.version = self.store.save_run(&run).await?;

        info!("Cancelled run {} (company {})", run.id, run.company_id);
        Ok(run)
    }

    /// Return runs whose claim outlived the lease to pending. The version
    /// check keeps a still-live holder from being overwritten twice.
    async fn recover_stalled_runs(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let claimed_before = now - self.config.claim_lease;
        let stalled = match self.store.stalled_runs(claimed_before).await {
            Ok(runs) => runs,
            Err(e) => {
                error!("Failed to load stalled runs: {}", e);
                return;
            }
        };

        for mut run in stalled {
            warn!(
                "Run {} (company {}) held its claim since {}; returning it to pending at position {}",
                run.id, run.company_id, run.updated_at, run.current_position
            );
            run.status = RunStatus::Pending;
            run.resume_at = None;
            run.updated_at = now;

            match self.store.save_run(&run).await {
                Ok(_) => report.runs_recovered += 1,
                Err(PersistenceError::VersionConflict { .. }) => {
                    debug!("Run {} moved on before it could be recovered", run.id);
                }
                Err(e) => {
                    error!("Failed to recover run {} (company {}): {}", run.id, run.company_id, e);
                    report.error(run.company_id, Some(run.workflow_id), Some(run.id), e);
                }
            }
        }
    }

    async fn start_event_runs(
        &self,
        workflows: &[Arc<CompiledWorkflow>],
        event: &RecordEvent,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let matching: Vec<&Arc<CompiledWorkflow>> = workflows
            .iter()
            .filter(|w| w.company_id == event.company_id && TriggerMatcher::matches_event(&w.trigger, event))
            .collect();

        if matching.is_empty() {
            debug!("No workflows match {} event on record {}", event.table, event.record_id);
            return;
        }

        let record = match self.records.fetch(event.company_id, &event.table, event.record_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("Record {} in {} (company {}) not found", event.record_id, event.table, event.company_id);
                report.error(event.company_id, None, None, format!("record {} not found", event.record_id));
                return;
            }
            Err(e) => {
                error!("Failed to fetch record {} (company {}): {}", event.record_id, event.company_id, e);
                report.error(event.company_id, None, None, e);
                return;
            }
        };
        let snapshot = self.snapshot(event.company_id, &event.table, event.record_id, record, now).await;

        for workflow in matching {
            self.insert_run(workflow, event.record_id, snapshot.clone(), now, report).await;
        }
    }

    async fn start_scheduled_runs(&self, workflows: &[Arc<CompiledWorkflow>], now: DateTime<Utc>, report: &mut TickReport) {
        for workflow in workflows.iter().filter(|w| w.trigger.is_schedule()) {
            if let Err(e) = self.fire_schedule(workflow, now, report).await {
                error!("Schedule of workflow '{}' (company {}) failed: {}", workflow.name, workflow.company_id, e);
                report.error(workflow.company_id, Some(workflow.id), None, e);
            }
        }
    }

    async fn fire_schedule(
        &self,
        workflow: &CompiledWorkflow,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<(), PersistenceError> {
        let last = self.store.schedule_cursor(workflow.id).await?;

        if TriggerMatcher::schedule_due(&workflow.trigger, last, now) {
            let table = match &workflow.trigger {
                TriggerSpec::Schedule { table, .. } => table.as_str(),
                _ => return Ok(()),
            };
            let records = self.records.list(workflow.company_id, table).await?;
            info!(
                "Schedule of workflow '{}' (company {}) fired for {} records",
                workflow.name,
                workflow.company_id,
                records.len()
            );
            for (record_id, record) in records {
                let snapshot = self.snapshot(workflow.company_id, table, record_id, record, now).await;
                self.insert_run(workflow, record_id, snapshot, now, report).await;
            }
        }

        self.store.set_schedule_cursor(workflow.id, now).await
    }

    async fn snapshot(
        &self,
        company_id: Uuid,
        table: &str,
        record_id: Uuid,
        mut record: Record,
        now: DateTime<Utc>,
    ) -> serde_json::Value {
        if let (true, Some(scoring)) = (self.config.score_on_trigger, &self.scoring) {
            match scoring.rescore(company_id, table, record_id, &record, now).await {
                Ok(computation) => {
                    record.insert("lead_score", serde_json::json!(computation.score));
                    record.insert("quality_tier", serde_json::json!(computation.quality_tier.as_str()));
                }
                Err(e) => warn!("Scoring record {} (company {}) failed: {}", record_id, company_id, e),
            }
        }
        record.into_value()
    }

    async fn insert_run(
        &self,
        workflow: &CompiledWorkflow,
        record_id: Uuid,
        snapshot: serde_json::Value,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let run = WorkflowRun::new(workflow.id, workflow.company_id, Some(record_id), snapshot, now);
        match self.store.insert_run(&run).await {
            Ok(()) => {
                debug!("Created run {} of workflow '{}' for record {}", run.id, workflow.name, record_id);
                report.runs_created += 1;
            }
            Err(e) => {
                error!("Failed to create run of workflow '{}' (company {}): {}", workflow.name, workflow.company_id, e);
                report.error(workflow.company_id, Some(workflow.id), None, e);
            }
        }
    }

    async fn execute_batch(&self, batch: Vec<(Arc<CompiledWorkflow>, Uuid)>, now: DateTime<Utc>, report: &mut TickReport) {
        if batch.is_empty() {
            return;
        }

        let results: Vec<_> = stream::iter(batch)
            .map(|(workflow, run_id)| async move {
                let outcome = self.executor.execute(&workflow, run_id, now).await;
                (workflow, run_id, outcome)
            })
            .buffer_unordered(self.config.max_concurrent_runs.max(1))
            .collect()
            .await;

        for (workflow, run_id, outcome) in results {
            match outcome {
                Ok(Some(result)) => report.record(&result),
                Ok(None) => {}
                Err(e) => {
                    error!(
                        "Run {} of workflow '{}' (company {}) aborted: {}",
                        run_id, workflow.name, workflow.company_id, e
                    );
                    report.error(workflow.company_id, Some(workflow.id), Some(run_id), EngineError::from(e));
                }
            }
        }
    }
}
