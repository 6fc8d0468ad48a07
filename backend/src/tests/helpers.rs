use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use leadflow_shared::{QualityTier, Rule, RunStatus, ScoreComputation, WorkflowRun};

use crate::scoring::{ScoreStore, ScoringService};
use crate::workflows::actions::{ActionDispatcher, ActionResult, MockActionDispatcher};
use crate::workflows::store::StoreResult;
use crate::workflows::{
    EngineConfig, PersistenceError, Record, RecordSource, SchemaRegistry, WorkflowDefinition, WorkflowEngine,
    WorkflowStore,
};

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("leadflow_backend=debug"))
        .with_test_writer()
        .try_init();
}

/// Workflow, record and score storage for tests, with the same version
/// semantics as the PostgreSQL store
#[derive(Default)]
pub struct InMemoryStore {
    workflows: Mutex<Vec<WorkflowDefinition>>,
    runs: Mutex<HashMap<Uuid, WorkflowRun>>,
    cursors: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    records: Mutex<HashMap<(Uuid, String), Vec<(Uuid, serde_json::Value)>>>,
    rules: Mutex<Vec<Rule>>,
    scores: Mutex<HashMap<(Uuid, Uuid), ScoreComputation>>,
    score_writes: AtomicUsize,
    failing_companies: Mutex<HashSet<Uuid>>,
    save_calls: AtomicUsize,
    failing_save: Mutex<Option<usize>>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_workflow(&self, definition: WorkflowDefinition) {
        self.workflows.lock().unwrap().push(definition);
    }

    pub fn add_record(&self, company_id: Uuid, table: &str, record_id: Uuid, data: serde_json::Value) {
        let mut records = self.records.lock().unwrap();
        let table = records.entry((company_id, table.to_string())).or_default();
        table.push((record_id, data));
        table.sort_by_key(|(id, _)| *id);
    }

    pub fn add_rule(&self, rule: Rule) {
        self.rules.lock().unwrap().push(rule);
    }

    /// Insert a run directly, bypassing the engine
    pub fn seed_run(&self, run: WorkflowRun) {
        self.runs.lock().unwrap().insert(run.id, run);
    }

    pub fn run(&self, run_id: Uuid) -> Option<WorkflowRun> {
        self.runs.lock().unwrap().get(&run_id).cloned()
    }

    pub fn runs_of(&self, workflow_id: Uuid) -> Vec<WorkflowRun> {
        let mut runs: Vec<WorkflowRun> = self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.created_at);
        runs
    }

    pub fn score(&self, company_id: Uuid, record_id: Uuid) -> Option<ScoreComputation> {
        self.scores.lock().unwrap().get(&(company_id, record_id)).cloned()
    }

    pub fn score_writes(&self) -> usize {
        self.score_writes.load(Ordering::SeqCst)
    }

    /// Make every run save for `company_id` fail
    pub fn fail_saves_for(&self, company_id: Uuid) {
        self.failing_companies.lock().unwrap().insert(company_id);
    }

    /// Fail the `nth` (1-based) `save_run` call from now on, once
    pub fn fail_save_at(&self, nth: usize) {
        let seen = self.save_calls.load(Ordering::SeqCst);
        *self.failing_save.lock().unwrap() = Some(seen + nth);
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn active_workflows(&self) -> StoreResult<Vec<WorkflowDefinition>> {
        let mut workflows: Vec<WorkflowDefinition> =
            self.workflows.lock().unwrap().iter().filter(|w| w.active).cloned().collect();
        workflows.sort_by_key(|w| (w.company_id, w.created_at));
        Ok(workflows)
    }

    async fn insert_run(&self, run: &WorkflowRun) -> StoreResult<()> {
        self.runs.lock().unwrap().insert(run.id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> StoreResult<Option<WorkflowRun>> {
        Ok(self.run(run_id))
    }

    async fn save_run(&self, run: &WorkflowRun) -> StoreResult<i64> {
        if self.failing_companies.lock().unwrap().contains(&run.company_id) {
            return Err(PersistenceError::Corrupt(format!("injected save failure for run {}", run.id)));
        }
        let call = self.save_calls.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut failing = self.failing_save.lock().unwrap();
            if *failing == Some(call) {
                *failing = None;
                return Err(PersistenceError::Corrupt(format!("injected save failure for run {}", run.id)));
            }
        }

        let mut runs = self.runs.lock().unwrap();
        let stored = runs.get(&run.id).ok_or(PersistenceError::RunNotFound(run.id))?;
        if stored.version != run.version {
            return Err(PersistenceError::VersionConflict {
                run_id: run.id,
                expected_version: run.version,
            });
        }

        let mut saved = run.clone();
        saved.version = run.version + 1;
        let version = saved.version;
        runs.insert(run.id, saved);
        Ok(version)
    }

    async fn pending_runs(&self, workflow_id: Uuid) -> StoreResult<Vec<WorkflowRun>> {
        Ok(self
            .runs_of(workflow_id)
            .into_iter()
            .filter(|r| r.status == RunStatus::Pending)
            .collect())
    }

    async fn due_runs(&self, now: DateTime<Utc>) -> StoreResult<Vec<WorkflowRun>> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == RunStatus::WaitingDelay && r.resume_at.is_some_and(|at| at <= now))
            .cloned()
            .collect())
    }

    async fn stalled_runs(&self, claimed_before: DateTime<Utc>) -> StoreResult<Vec<WorkflowRun>> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == RunStatus::Running && r.updated_at <= claimed_before)
            .cloned()
            .collect())
    }

    async fn schedule_cursor(&self, workflow_id: Uuid) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.cursors.lock().unwrap().get(&workflow_id).copied())
    }

    async fn set_schedule_cursor(&self, workflow_id: Uuid, evaluated_at: DateTime<Utc>) -> StoreResult<()> {
        self.cursors.lock().unwrap().insert(workflow_id, evaluated_at);
        Ok(())
    }
}

#[async_trait]
impl RecordSource for InMemoryStore {
    async fn fetch(&self, company_id: Uuid, table: &str, record_id: Uuid) -> StoreResult<Option<Record>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(company_id, table.to_string()))
            .and_then(|rows| rows.iter().find(|(id, _)| *id == record_id))
            .map(|(_, data)| Record::new(data.clone())))
    }

    async fn list(&self, company_id: Uuid, table: &str) -> StoreResult<Vec<(Uuid, Record)>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(company_id, table.to_string()))
            .map(|rows| rows.iter().map(|(id, data)| (*id, Record::new(data.clone()))).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ScoreStore for InMemoryStore {
    async fn rules_for(&self, company_id: Uuid) -> StoreResult<Vec<Rule>> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.is_system_rule || r.owner_id == Some(company_id))
            .cloned()
            .collect())
    }

    async fn insert_rule(&self, rule: &Rule) -> StoreResult<()> {
        self.add_rule(rule.clone());
        Ok(())
    }

    async fn current_score(&self, company_id: Uuid, record_id: Uuid) -> StoreResult<Option<(i32, QualityTier)>> {
        Ok(self.score(company_id, record_id).map(|s| (s.score, s.quality_tier)))
    }

    async fn save_score(&self, computation: &ScoreComputation) -> StoreResult<()> {
        self.score_writes.fetch_add(1, Ordering::SeqCst);
        self.scores
            .lock()
            .unwrap()
            .insert((computation.company_id, computation.record_id), computation.clone());
        Ok(())
    }
}

pub fn scoring_service(store: &Arc<InMemoryStore>) -> Arc<ScoringService> {
    Arc::new(ScoringService::new(store.clone(), Arc::new(SchemaRegistry::crm())))
}

/// Engine over `store` with scoring enrichment enabled
pub async fn engine_with(store: &Arc<InMemoryStore>, dispatcher: Arc<dyn ActionDispatcher>) -> WorkflowEngine {
    let engine = WorkflowEngine::new(
        store.clone(),
        store.clone(),
        dispatcher,
        Arc::new(SchemaRegistry::crm()),
        EngineConfig {
            max_concurrent_runs: 4,
            score_on_trigger: true,
            claim_lease: chrono::Duration::minutes(10),
        },
    )
    .with_scoring(scoring_service(store));

    engine.reload_workflows().await.unwrap();
    engine
}

/// Dispatcher that accepts every action and expects exactly `times` calls
pub fn accepting_dispatcher(times: usize) -> MockActionDispatcher {
    let mut dispatcher = MockActionDispatcher::new();
    dispatcher
        .expect_dispatch()
        .times(times)
        .returning(|_| Ok(ActionResult::success(None)));
    dispatcher
}

/// Dispatcher that must never be called
pub fn silent_dispatcher() -> MockActionDispatcher {
    let mut dispatcher = MockActionDispatcher::new();
    dispatcher.expect_dispatch().never();
    dispatcher
}
