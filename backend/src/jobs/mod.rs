// Background Jobs
//
// Scheduled automation jobs. The workflow engine has no timer of its own;
// these jobs drive it using tokio-cron-scheduler.

pub mod automation;
pub mod scheduler;

pub use automation::{AutomationTickJob, WorkflowReloadJob};
pub use scheduler::{run_job_now, JobConfig, JobError, JobExecutionLog, JobLog, JobResult, JobScheduler, JobStatus};
