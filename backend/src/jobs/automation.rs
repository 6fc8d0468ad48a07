// Automation Jobs - Periodic engine tick and workflow reload

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::workflows::{EngineError, Tick, TickReport, WorkflowEngine};

pub struct AutomationTickJob {
    engine: Arc<WorkflowEngine>,
}

impl AutomationTickJob {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    /// Time-only tick: fires due schedules, runs pending work and resumes
    /// delayed runs.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<TickReport, EngineError> {
        let report = self.engine.tick(Tick::at(now)).await?;

        for err in &report.errors {
            warn!(
                "Automation tick error (company {}, workflow {:?}, run {:?}): {}",
                err.company_id, err.workflow_id, err.run_id, err.error
            );
        }
        info!(
            "Automation tick: {} created, {} recovered, {} completed, {} suspended, {} failed",
            report.runs_created, report.runs_recovered, report.runs_completed, report.runs_suspended, report.runs_failed
        );

        Ok(report)
    }
}

pub struct WorkflowReloadJob {
    engine: Arc<WorkflowEngine>,
}

impl WorkflowReloadJob {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    pub async fn run(&self) -> Result<usize, EngineError> {
        self.engine.reload_workflows().await
    }
}
