use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use leadflow_shared::{RecordEvent, WorkflowRun};

use crate::error::ApiResult;
use crate::jobs::{self, JobExecutionLog};
use crate::workflows::{Tick, TickReport};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TickRequest {
    /// Evaluate as of this instant instead of the current time
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

pub fn automation_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", post(process_event))
        .route("/tick", post(run_tick))
        .route("/runs/:id/cancel", post(cancel_run))
        .route("/workflows/reload", post(reload_workflows))
        .route("/jobs", get(list_job_executions))
        .route("/jobs/:name/run", post(run_job))
}

async fn process_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<RecordEvent>,
) -> ApiResult<Json<TickReport>> {
    tracing::info!(
        "Record event on {} {} (company {})",
        event.table, event.record_id, event.company_id
    );
    let report = state.engine.tick(Tick::with_event(Utc::now(), event)).await?;
    Ok(Json(report))
}

async fn run_tick(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<TickRequest>>,
) -> ApiResult<Json<TickReport>> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let report = state.engine.tick(Tick::at(request.now.unwrap_or_else(Utc::now))).await?;
    Ok(Json(report))
}

async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<WorkflowRun>> {
    let run = state.engine.cancel_run(run_id).await?;
    Ok(Json(run))
}

async fn reload_workflows(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let loaded = state.engine.reload_workflows().await?;
    Ok(Json(json!({ "workflows_loaded": loaded })))
}

async fn list_job_executions(State(state): State<Arc<AppState>>) -> Json<Vec<JobExecutionLog>> {
    Json(state.job_log.entries().await)
}

async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<JobExecutionLog>> {
    tracing::info!("Running job {} on request", name);
    let entry = jobs::run_job_now(&state.engine, &state.job_log, &name).await?;
    Ok(Json(entry))
}
