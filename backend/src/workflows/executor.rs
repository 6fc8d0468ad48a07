// Workflow Executor - Per-run state machine over compiled workflow steps

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use leadflow_shared::{RunStatus, StepOutcome, StepResult, StepType, WorkflowRun};

use super::actions::{ActionDispatcher, ActionRequest, DispatchContext};
use super::conditions::ConditionEvaluator;
use super::definition::{CompiledStep, CompiledWorkflow, StepKind};
use super::error::PersistenceError;
use super::fields::{format_timestamp, Record, SchemaRegistry};
use super::store::WorkflowStore;
use super::templates::TemplateInterpolator;

/// Summary of one executor pass over a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub company_id: Uuid,
    pub status: RunStatus,
    pub steps_executed: usize,
    pub actions_dispatched: usize,
    pub resume_at: Option<DateTime<Utc>>,
    pub duration_ms: i64,
}

pub struct WorkflowExecutor {
    store: Arc<dyn WorkflowStore>,
    dispatcher: Arc<dyn ActionDispatcher>,
    schema: Arc<SchemaRegistry>,
}

impl WorkflowExecutor {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        dispatcher: Arc<dyn ActionDispatcher>,
        schema: Arc<SchemaRegistry>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            schema,
        }
    }

    /// Run or resume `run_id` until it completes, fails or suspends on a
    /// delay. Returns `None` when the run is not runnable at `now`
    /// (cancelled, finished, not yet due, or claimed by another writer).
    pub async fn execute(
        &self,
        workflow: &CompiledWorkflow,
        run_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<ExecutionResult>, PersistenceError> {
        let start = Instant::now();

        let mut run = self
            .store
            .load_run(run_id)
            .await?
            .ok_or(PersistenceError::RunNotFound(run_id))?;

        if !run.is_runnable_at(now) {
            debug!("Run {} is {} and not runnable at {}", run.id, run.status, now);
            return Ok(None);
        }

        let resuming = run.status == RunStatus::WaitingDelay;
        run.status = RunStatus::Running;
        run.resume_at = None;

        match self.persist(&mut run, now).await {
            Ok(()) => {}
            Err(PersistenceError::VersionConflict { .. }) => {
                debug!("Run {} was claimed by another writer", run.id);
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        if resuming {
            info!(
                "Resuming run {} of workflow '{}' (company {}) at position {}",
                run.id, workflow.name, run.company_id, run.current_position
            );
        } else {
            info!(
                "Starting run {} of workflow '{}' (company {})",
                run.id, workflow.name, run.company_id
            );
        }

        let record = Record::new(run.record_snapshot.clone());
        let mut steps_executed = 0;
        let mut actions_dispatched = 0;

        loop {
            let Some(step) = workflow.next_step(run.current_position) else {
                run.status = RunStatus::Completed;
                break;
            };
            steps_executed += 1;

            let outcome = match &step.kind {
                StepKind::Action { .. } => self.execute_action(workflow, step, &mut run, &record, now).await,
                StepKind::Condition { .. } => self.execute_condition(workflow, step, &mut run, &record, now),
                StepKind::Delay { delay_seconds } => execute_delay(step, *delay_seconds, &mut run, now),
                StepKind::Invalid { error } => {
                    warn!(
                        "Run {} (company {}): step {} of workflow '{}' is invalid: {}",
                        run.id, run.company_id, step.position, workflow.name, error
                    );
                    push_result(&mut run, step, StepOutcome::Skipped, Some(error.to_string()), now);
                    run.current_position = step.position + 1;
                    if step.step_type == StepType::Condition {
                        run.status = RunStatus::Completed;
                    }
                    StepOutcome::Skipped
                }
            };

            if outcome == StepOutcome::Dispatched {
                actions_dispatched += 1;
            }

            if run.status != RunStatus::Running {
                break;
            }
            self.persist(&mut run, now).await?;
        }

        self.persist(&mut run, now).await?;

        match run.status {
            RunStatus::Completed => info!("Run {} of workflow '{}' completed", run.id, workflow.name),
            RunStatus::WaitingDelay => info!(
                "Run {} of workflow '{}' waiting until {:?}",
                run.id, workflow.name, run.resume_at
            ),
            RunStatus::Failed => error!("Run {} of workflow '{}' failed", run.id, workflow.name),
            _ => {}
        }

        Ok(Some(ExecutionResult {
            run_id: run.id,
            workflow_id: run.workflow_id,
            company_id: run.company_id,
            status: run.status,
            steps_executed,
            actions_dispatched,
            resume_at: run.resume_at,
            duration_ms: start.elapsed().as_millis() as i64,
        }))
    }

    async fn execute_action(
        &self,
        workflow: &CompiledWorkflow,
        step: &CompiledStep,
        run: &mut WorkflowRun,
        record: &Record,
        now: DateTime<Utc>,
    ) -> StepOutcome {
        let StepKind::Action { action_type, parameters } = &step.kind else {
            return StepOutcome::Skipped;
        };

        let interpolator = TemplateInterpolator::new(record, now);
        let request = ActionRequest {
            action_type: *action_type,
            parameters: parameters
                .iter()
                .map(|(name, value)| (name.clone(), interpolator.interpolate_value(value)))
                .collect(),
            context: DispatchContext {
                company_id: run.company_id,
                workflow_id: workflow.id,
                run_id: run.id,
                record_id: run.record_id,
                position: step.position,
            },
        };

        run.current_position = step.position + 1;

        match self.dispatcher.dispatch(&request).await {
            Ok(result) => {
                debug!("Run {}: dispatched {} at position {}", run.id, action_type, step.position);
                let detail = result.output.map(|o| o.to_string());
                push_result(run, step, StepOutcome::Dispatched, detail, now);
                StepOutcome::Dispatched
            }
            Err(e) => {
                error!(
                    "Run {} (company {}): {} at position {} failed: {}",
                    run.id, run.company_id, action_type, step.position, e
                );
                push_result(run, step, StepOutcome::Failed, Some(e.to_string()), now);
                run.status = RunStatus::Failed;
                StepOutcome::Failed
            }
        }
    }

    fn execute_condition(
        &self,
        workflow: &CompiledWorkflow,
        step: &CompiledStep,
        run: &mut WorkflowRun,
        record: &Record,
        now: DateTime<Utc>,
    ) -> StepOutcome {
        let StepKind::Condition { group, false_path_position } = &step.kind else {
            return StepOutcome::Skipped;
        };

        let registry = self.schema.for_table(workflow.trigger.table());
        if ConditionEvaluator::new(registry, now).evaluate_group(group, record) {
            push_result(run, step, StepOutcome::Matched, None, now);
            run.current_position = step.position + 1;
            return StepOutcome::Matched;
        }

        match false_path_position {
            Some(target) => {
                push_result(run, step, StepOutcome::Skipped, Some(format!("branching to position {}", target)), now);
                run.current_position = *target;
            }
            None => {
                push_result(run, step, StepOutcome::Skipped, Some("conditions not met".to_string()), now);
                run.current_position = step.position + 1;
                run.status = RunStatus::Completed;
            }
        }
        StepOutcome::Skipped
    }

    async fn persist(&self, run: &mut WorkflowRun, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        run.updated_at = now;
        run.version = self.store.save_run(run).await?;
        Ok(())
    }
}

fn execute_delay(step: &CompiledStep, delay_seconds: u64, run: &mut WorkflowRun, now: DateTime<Utc>) -> StepOutcome {
    run.current_position = step.position + 1;

    if delay_seconds == 0 {
        push_result(run, step, StepOutcome::Delayed, None, now);
        return StepOutcome::Delayed;
    }

    let resume_at = i64::try_from(delay_seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|d| now.checked_add_signed(d));

    match resume_at {
        Some(at) => {
            push_result(run, step, StepOutcome::Delayed, Some(format!("resume at {}", format_timestamp(at))), now);
            run.status = RunStatus::WaitingDelay;
            run.resume_at = Some(at);
            StepOutcome::Delayed
        }
        None => {
            push_result(run, step, StepOutcome::Failed, Some(format!("delay of {}s is out of range", delay_seconds)), now);
            run.status = RunStatus::Failed;
            StepOutcome::Failed
        }
    }
}

fn push_result(
    run: &mut WorkflowRun,
    step: &CompiledStep,
    outcome: StepOutcome,
    detail: Option<String>,
    now: DateTime<Utc>,
) {
    run.step_results.push(StepResult {
        position: step.position,
        step_type: step.step_type,
        outcome,
        detail,
        recorded_at: now,
    });
}
