use axum::{
    http::Method,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod database;
mod error;
mod handlers;
mod jobs;
mod scoring;
mod services;
mod workflows;

pub use error::{ApiError, ApiResult, AppError};

#[cfg(test)]
mod tests;

use scoring::ScoringService;
use services::{LoggingDispatcher, WebhookDispatcher};
use workflows::{ActionDispatcher, EngineConfig, PgWorkflowStore, RecordSource, SchemaRegistry, WorkflowEngine};

pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub engine: Arc<WorkflowEngine>,
    pub scoring: Arc<ScoringService>,
    pub records: Arc<dyn RecordSource>,
    pub job_log: jobs::JobLog,
}

pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Leadflow Automation API v0.1.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1/automation", handlers::automation_routes())
        .nest("/api/v1/scoring", handlers::scoring_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let automation = &config.automation;

    let pool_config = database::PoolConfig::from_env().sized_for_runs(automation.max_concurrent_runs);
    let db_pool = database::create_pool(&config.database_url, pool_config).await?;
    database::migrate(&db_pool).await?;

    let store = Arc::new(PgWorkflowStore::new(db_pool.clone(), automation.record_tables.clone()));
    let schema = Arc::new(SchemaRegistry::crm());

    let dispatcher: Arc<dyn ActionDispatcher> = match &automation.action_webhook_url {
        Some(url) => {
            tracing::info!("Delivering workflow actions to {}", url);
            Arc::new(WebhookDispatcher::new(url, automation.webhook_timeout())?)
        }
        None => {
            tracing::warn!("AUTOMATION_ACTION_WEBHOOK_URL is not set; workflow actions will only be logged");
            Arc::new(LoggingDispatcher)
        }
    };

    let scoring = Arc::new(ScoringService::new(store.clone(), schema.clone()));
    let engine = WorkflowEngine::new(
        store.clone(),
        store.clone(),
        dispatcher,
        schema,
        EngineConfig {
            max_concurrent_runs: automation.max_concurrent_runs,
            score_on_trigger: automation.score_on_trigger,
            claim_lease: automation.claim_lease(),
        },
    )
    .with_scoring(scoring.clone());
    let engine = Arc::new(engine);
    engine.reload_workflows().await?;

    let job_log = jobs::JobLog::new();
    let mut scheduler = jobs::JobScheduler::new(
        engine.clone(),
        jobs::JobConfig {
            automation_tick_cron: automation.tick_cron.clone(),
            workflow_reload_cron: automation.reload_cron.clone(),
        },
        job_log.clone(),
    )
    .await?;
    scheduler.start().await?;

    let app_state = Arc::new(AppState {
        db_pool,
        engine,
        scoring,
        records: store,
        job_log,
    });

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app(app_state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    scheduler.shutdown().await?;
    Ok(())
}
