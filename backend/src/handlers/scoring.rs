use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use leadflow_shared::{Rule, ScoreComputation};

use crate::error::{ApiError, ApiResult};
use crate::scoring::RuleDefinition;
use crate::workflows::Record;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub company_id: Uuid,
    #[serde(default = "default_table")]
    pub table: String,
    /// Score this data instead of the stored record
    #[serde(default)]
    pub record: Option<serde_json::Value>,
}

fn default_table() -> String {
    "leads".to_string()
}

pub fn scoring_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rules", post(create_rule))
        .route("/:record_id", post(score_record))
}

async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RuleDefinition>,
) -> ApiResult<(StatusCode, Json<Rule>)> {
    let rule = payload.into_rule(Utc::now())?;
    state.scoring.create_rule(&rule).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn score_record(
    State(state): State<Arc<AppState>>,
    Path(record_id): Path<Uuid>,
    Json(request): Json<ScoreRequest>,
) -> ApiResult<Json<ScoreComputation>> {
    let record = match request.record {
        Some(data) if data.is_object() => Record::new(data),
        Some(_) => return Err(ApiError::bad_request("record must be a JSON object")),
        None => state
            .records
            .fetch(request.company_id, &request.table, record_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Record {}", record_id)))?,
    };

    let computation = state
        .scoring
        .rescore(request.company_id, &request.table, record_id, &record, Utc::now())
        .await?;
    Ok(Json(computation))
}
