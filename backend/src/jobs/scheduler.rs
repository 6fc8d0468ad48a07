// Job Scheduler - Cron-driven automation jobs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use super::{AutomationTickJob, WorkflowReloadJob};
use crate::workflows::WorkflowEngine;

const MAX_EXECUTION_LOGS: usize = 100;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Unknown job: {0}")]
    UnknownJob(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Six-field cron expression (with seconds) for the engine tick
    pub automation_tick_cron: String,
    pub workflow_reload_cron: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            automation_tick_cron: "0 * * * * *".to_string(),
            workflow_reload_cron: "30 */5 * * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: i32,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    PartialFailure,
}

pub const AUTOMATION_TICK: &str = "automation_tick";
pub const WORKFLOW_RELOAD: &str = "workflow_reload";

/// Most recent job executions, shared between the scheduler and the API
#[derive(Clone, Default)]
pub struct JobLog {
    entries: Arc<RwLock<Vec<JobExecutionLog>>>,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, log: JobExecutionLog) {
        let mut entries = self.entries.write().await;
        entries.push(log);
        if entries.len() > MAX_EXECUTION_LOGS {
            entries.remove(0);
        }
    }

    pub async fn entries(&self) -> Vec<JobExecutionLog> {
        self.entries.read().await.clone()
    }
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    engine: Arc<WorkflowEngine>,
    config: JobConfig,
    log: JobLog,
}

impl JobScheduler {
    pub async fn new(engine: Arc<WorkflowEngine>, config: JobConfig, log: JobLog) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            engine,
            config,
            log,
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting automation job scheduler");

        self.schedule(AUTOMATION_TICK, &self.config.automation_tick_cron).await?;
        self.schedule(WORKFLOW_RELOAD, &self.config.workflow_reload_cron).await?;

        self.scheduler.start().await?;

        info!("Automation job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down automation job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    async fn schedule(&self, job_name: &'static str, cron_expr: &str) -> JobResult<()> {
        let engine = self.engine.clone();
        let log = self.log.clone();

        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let engine = engine.clone();
            let log = log.clone();

            Box::pin(async move {
                if let Err(e) = run_job_now(&engine, &log, job_name).await {
                    error!("Job '{}' could not run: {}", job_name, e);
                }
            })
        })
        .map_err(|e| JobError::ConfigError(format!("Invalid cron '{}' for {}: {}", cron_expr, job_name, e)))?;

        self.scheduler.add(job).await?;
        info!("Scheduled {} on '{}'", job_name, cron_expr);

        Ok(())
    }
}

/// Run a job by name outside its schedule and record the execution.
/// Job failures are recorded in the returned log, not returned as errors.
pub async fn run_job_now(engine: &Arc<WorkflowEngine>, log: &JobLog, job_name: &str) -> JobResult<JobExecutionLog> {
    let started_at = Utc::now();

    let entry = match job_name {
        AUTOMATION_TICK => match AutomationTickJob::new(engine.clone()).run(started_at).await {
            Ok(report) => {
                let errors: Vec<String> = report
                    .errors
                    .iter()
                    .map(|e| format!("company {}: {}", e.company_id, e.error))
                    .collect();
                let processed = report.runs_completed + report.runs_suspended + report.runs_failed;
                execution_log(job_name, started_at, processed, errors)
            }
            Err(e) => {
                error!("Automation tick failed: {}", e);
                failed_log(job_name, started_at, e.to_string())
            }
        },
        WORKFLOW_RELOAD => match WorkflowReloadJob::new(engine.clone()).run().await {
            Ok(count) => execution_log(job_name, started_at, count, Vec::new()),
            Err(e) => {
                error!("Workflow reload failed: {}", e);
                failed_log(job_name, started_at, e.to_string())
            }
        },
        _ => return Err(JobError::UnknownJob(job_name.to_string())),
    };

    log.record(entry.clone()).await;
    Ok(entry)
}

fn execution_log(job_name: &str, started_at: DateTime<Utc>, processed: usize, errors: Vec<String>) -> JobExecutionLog {
    let completed_at = Utc::now();
    JobExecutionLog {
        id: Uuid::new_v4(),
        job_name: job_name.to_string(),
        started_at,
        completed_at: Some(completed_at),
        status: if errors.is_empty() { JobStatus::Completed } else { JobStatus::PartialFailure },
        items_processed: i32::try_from(processed).unwrap_or(i32::MAX),
        errors,
        duration_ms: Some((completed_at - started_at).num_milliseconds()),
    }
}

fn failed_log(job_name: &str, started_at: DateTime<Utc>, error: String) -> JobExecutionLog {
    JobExecutionLog {
        status: JobStatus::Failed,
        ..execution_log(job_name, started_at, 0, vec![error])
    }
}
