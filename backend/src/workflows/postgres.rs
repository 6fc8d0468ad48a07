// PostgreSQL Store - Workflow definitions, runs, schedule cursors, CRM
// records and lead scores

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{debug, warn};
use uuid::Uuid;

use leadflow_shared::{QualityTier, Rule, RunStatus, ScoreComputation, StepResult, WorkflowRun};

use super::definition::{WorkflowDefinition, WorkflowStep};
use super::error::PersistenceError;
use super::fields::Record;
use super::store::{RecordSource, StoreResult, WorkflowStore};
use super::triggers::TriggerSpec;
use crate::scoring::ScoreStore;

#[derive(Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
    record_tables: Vec<String>,
}

impl PgWorkflowStore {
    /// `record_tables` is the allow-list of CRM tables record lookups may
    /// touch; names that are not plain identifiers are dropped.
    pub fn new(pool: PgPool, record_tables: Vec<String>) -> Self {
        let record_tables = record_tables
            .into_iter()
            .filter(|t| {
                let ok = is_identifier(t);
                if !ok {
                    warn!("Ignoring record table '{}': not a valid identifier", t);
                }
                ok
            })
            .collect();
        Self { pool, record_tables }
    }

    fn record_table(&self, table: &str) -> StoreResult<&str> {
        self.record_tables
            .iter()
            .find(|t| t.as_str() == table)
            .map(|t| t.as_str())
            .ok_or_else(|| PersistenceError::UnknownTable(table.to_string()))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[derive(FromRow)]
struct RunRow {
    id: Uuid,
    workflow_id: Uuid,
    company_id: Uuid,
    record_id: Option<Uuid>,
    record_snapshot: serde_json::Value,
    current_position: i32,
    status: String,
    resume_at: Option<DateTime<Utc>>,
    step_results: serde_json::Value,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RunRow> for WorkflowRun {
    type Error = PersistenceError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<RunStatus>()
            .map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        let step_results: Vec<StepResult> = serde_json::from_value(row.step_results)?;

        Ok(WorkflowRun {
            id: row.id,
            workflow_id: row.workflow_id,
            company_id: row.company_id,
            record_id: row.record_id,
            record_snapshot: row.record_snapshot,
            current_position: row.current_position,
            status,
            resume_at: row.resume_at,
            step_results,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const RUN_COLUMNS: &str = "id, workflow_id, company_id, record_id, record_snapshot, current_position, \
     status, resume_at, step_results, version, created_at, updated_at";

fn into_runs(rows: Vec<RunRow>) -> StoreResult<Vec<WorkflowRun>> {
    rows.into_iter().map(WorkflowRun::try_from).collect()
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn active_workflows(&self) -> StoreResult<Vec<WorkflowDefinition>> {
        let rows = sqlx::query_as::<_, (
            Uuid, Uuid, String, Option<String>, serde_json::Value, serde_json::Value,
            bool, DateTime<Utc>, Option<DateTime<Utc>>
        )>(
            r#"
            SELECT id, company_id, name, description, trigger_config, steps,
                   is_active, created_at, updated_at
            FROM workflows
            WHERE is_active = true
            ORDER BY company_id, created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut definitions = Vec::with_capacity(rows.len());
        for row in rows {
            let trigger: TriggerSpec = match serde_json::from_value(row.4) {
                Ok(trigger) => trigger,
                Err(e) => {
                    warn!("Workflow '{}' ({}) has an unreadable trigger: {}", row.2, row.0, e);
                    continue;
                }
            };
            let steps: Vec<WorkflowStep> = match serde_json::from_value(row.5) {
                Ok(steps) => steps,
                Err(e) => {
                    warn!("Workflow '{}' ({}) has unreadable steps: {}", row.2, row.0, e);
                    continue;
                }
            };

            definitions.push(WorkflowDefinition {
                id: row.0,
                company_id: row.1,
                name: row.2,
                description: row.3,
                trigger,
                steps,
                active: row.6,
                created_at: row.7,
                updated_at: row.8,
            });
        }

        Ok(definitions)
    }

    async fn insert_run(&self, run: &WorkflowRun) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_runs
            (id, workflow_id, company_id, record_id, record_snapshot, current_position,
             status, resume_at, step_results, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(run.id)
        .bind(run.workflow_id)
        .bind(run.company_id)
        .bind(run.record_id)
        .bind(&run.record_snapshot)
        .bind(run.current_position)
        .bind(run.status.as_str())
        .bind(run.resume_at)
        .bind(serde_json::to_value(&run.step_results)?)
        .bind(run.version)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> StoreResult<Option<WorkflowRun>> {
        let row = sqlx::query_as::<_, RunRow>(&format!("SELECT {} FROM workflow_runs WHERE id = $1", RUN_COLUMNS))
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(WorkflowRun::try_from).transpose()
    }

    async fn save_run(&self, run: &WorkflowRun) -> StoreResult<i64> {
        let version = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE workflow_runs
            SET current_position = $3, status = $4, resume_at = $5, step_results = $6,
                updated_at = $7, version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(run.id)
        .bind(run.version)
        .bind(run.current_position)
        .bind(run.status.as_str())
        .bind(run.resume_at)
        .bind(serde_json::to_value(&run.step_results)?)
        .bind(run.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        version.ok_or(PersistenceError::VersionConflict {
            run_id: run.id,
            expected_version: run.version,
        })
    }

    async fn pending_runs(&self, workflow_id: Uuid) -> StoreResult<Vec<WorkflowRun>> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {} FROM workflow_runs WHERE workflow_id = $1 AND status = 'pending' ORDER BY created_at",
            RUN_COLUMNS
        ))
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        into_runs(rows)
    }

    async fn due_runs(&self, now: DateTime<Utc>) -> StoreResult<Vec<WorkflowRun>> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {} FROM workflow_runs WHERE status = 'waiting_delay' AND resume_at <= $1 ORDER BY resume_at",
            RUN_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        into_runs(rows)
    }

    async fn stalled_runs(&self, claimed_before: DateTime<Utc>) -> StoreResult<Vec<WorkflowRun>> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {} FROM workflow_runs WHERE status = 'running' AND updated_at <= $1 ORDER BY updated_at",
            RUN_COLUMNS
        ))
        .bind(claimed_before)
        .fetch_all(&self.pool)
        .await?;

        into_runs(rows)
    }

    async fn schedule_cursor(&self, workflow_id: Uuid) -> StoreResult<Option<DateTime<Utc>>> {
        let cursor = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT last_evaluated_at FROM workflow_schedule_cursors WHERE workflow_id = $1",
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(cursor)
    }

    async fn set_schedule_cursor(&self, workflow_id: Uuid, evaluated_at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_schedule_cursors (workflow_id, last_evaluated_at)
            VALUES ($1, $2)
            ON CONFLICT (workflow_id) DO UPDATE SET last_evaluated_at = EXCLUDED.last_evaluated_at
            "#,
        )
        .bind(workflow_id)
        .bind(evaluated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RecordSource for PgWorkflowStore {
    async fn fetch(&self, company_id: Uuid, table: &str, record_id: Uuid) -> StoreResult<Option<Record>> {
        let table = self.record_table(table)?;
        let data = sqlx::query_scalar::<_, serde_json::Value>(&format!(
            "SELECT to_jsonb(t) FROM {} t WHERE t.company_id = $1 AND t.id = $2",
            table
        ))
        .bind(company_id)
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(data.map(Record::new))
    }

    async fn list(&self, company_id: Uuid, table: &str) -> StoreResult<Vec<(Uuid, Record)>> {
        let table = self.record_table(table)?;
        let rows = sqlx::query_as::<_, (Uuid, serde_json::Value)>(&format!(
            "SELECT t.id, to_jsonb(t) FROM {} t WHERE t.company_id = $1 ORDER BY t.id",
            table
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        debug!("Listed {} {} records for company {}", rows.len(), table, company_id);
        Ok(rows.into_iter().map(|(id, data)| (id, Record::new(data))).collect())
    }
}

#[async_trait]
impl ScoreStore for PgWorkflowStore {
    async fn rules_for(&self, company_id: Uuid) -> StoreResult<Vec<Rule>> {
        let rules = sqlx::query_as::<_, Rule>(
            r#"
            SELECT id, name, category, condition_field, condition_operator, condition_value,
                   score_points, is_active, is_system_rule, owner_id, created_at
            FROM scoring_rules
            WHERE is_active = true AND (is_system_rule = true OR owner_id = $1)
            ORDER BY is_system_rule DESC, name ASC
            "#,
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rules)
    }

    async fn insert_rule(&self, rule: &Rule) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scoring_rules
            (id, name, category, condition_field, condition_operator, condition_value,
             score_points, is_active, is_system_rule, owner_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(&rule.category)
        .bind(&rule.condition_field)
        .bind(&rule.condition_operator)
        .bind(&rule.condition_value)
        .bind(rule.score_points)
        .bind(rule.is_active)
        .bind(rule.is_system_rule)
        .bind(rule.owner_id)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn current_score(&self, company_id: Uuid, record_id: Uuid) -> StoreResult<Option<(i32, QualityTier)>> {
        let row = sqlx::query_as::<_, (i32, String)>(
            "SELECT score, quality_tier FROM record_scores WHERE company_id = $1 AND record_id = $2",
        )
        .bind(company_id)
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(score, tier)| {
            tier.parse::<QualityTier>()
                .map(|tier| (score, tier))
                .map_err(|e| PersistenceError::Corrupt(e.to_string()))
        })
        .transpose()
    }

    async fn save_score(&self, computation: &ScoreComputation) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO record_scores
            (record_id, company_id, score, quality_tier, applied_rules, rules_considered_count, computed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (company_id, record_id) DO UPDATE SET
                score = EXCLUDED.score,
                quality_tier = EXCLUDED.quality_tier,
                applied_rules = EXCLUDED.applied_rules,
                rules_considered_count = EXCLUDED.rules_considered_count,
                computed_at = EXCLUDED.computed_at
            "#,
        )
        .bind(computation.record_id)
        .bind(computation.company_id)
        .bind(computation.score)
        .bind(computation.quality_tier.as_str())
        .bind(serde_json::to_value(&computation.applied_rules)?)
        .bind(i32::try_from(computation.rules_considered_count).unwrap_or(i32::MAX))
        .bind(computation.computed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
