use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;
use std::sync::Arc;

use crate::database;
use crate::AppState;

pub mod automation;
pub mod scoring;

pub use automation::automation_routes;
pub use scoring::scoring_routes;

pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database_ok = database::health_check(&state.db_pool).await;
    let status = if database_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status,
        Json(json!({
            "status": if database_ok { "healthy" } else { "degraded" },
            "service": "leadflow-automation",
            "database": database_ok,
            "pool": database::get_pool_stats(&state.db_pool),
            "workflows_loaded": state.engine.workflow_count().await,
        })),
    )
}
