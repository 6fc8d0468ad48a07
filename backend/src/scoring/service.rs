// Scoring Service - Loads a tenant's rules, scores a record, persists changes

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use leadflow_shared::{QualityTier, Rule, ScoreComputation};

use super::engine::ScoringEngine;
use crate::workflows::fields::{Record, SchemaRegistry};
use crate::workflows::store::StoreResult;

#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Active system rules plus the active rules owned by `company_id`
    async fn rules_for(&self, company_id: Uuid) -> StoreResult<Vec<Rule>>;

    async fn insert_rule(&self, rule: &Rule) -> StoreResult<()>;

    /// Stored score of `record_id` within `company_id`
    async fn current_score(&self, company_id: Uuid, record_id: Uuid) -> StoreResult<Option<(i32, QualityTier)>>;

    async fn save_score(&self, computation: &ScoreComputation) -> StoreResult<()>;
}

pub struct ScoringService {
    store: Arc<dyn ScoreStore>,
    schema: Arc<SchemaRegistry>,
}

impl ScoringService {
    pub fn new(store: Arc<dyn ScoreStore>, schema: Arc<SchemaRegistry>) -> Self {
        Self { store, schema }
    }

    pub async fn create_rule(&self, rule: &Rule) -> StoreResult<()> {
        self.store.insert_rule(rule).await?;
        info!("Created scoring rule '{}' ({})", rule.name, rule.id);
        Ok(())
    }

    /// Score a record with its tenant's rules. The result is persisted only
    /// when the score or tier differs from what is stored.
    pub async fn rescore(
        &self,
        company_id: Uuid,
        table: &str,
        record_id: Uuid,
        record: &Record,
        now: DateTime<Utc>,
    ) -> StoreResult<ScoreComputation> {
        let mut rules: Vec<Rule> = self
            .store
            .rules_for(company_id)
            .await?
            .into_iter()
            .filter(|r| r.is_active && (r.is_system_rule || r.owner_id == Some(company_id)))
            .collect();
        rules.sort_by(|a, b| b.is_system_rule.cmp(&a.is_system_rule).then_with(|| a.name.cmp(&b.name)));

        let result = ScoringEngine::new(self.schema.for_table(table), now).evaluate(&rules, record);
        let previous = self.store.current_score(company_id, record_id).await?;

        let computation = ScoreComputation {
            record_id,
            company_id,
            score: result.score,
            previous_score: previous.map(|(score, _)| score),
            quality_tier: result.quality_tier,
            applied_rules: result.applied_rules,
            rules_considered_count: result.rules_considered,
            computed_at: now,
        };

        if computation.changed_from(previous) {
            self.store.save_score(&computation).await?;
            info!(
                "Record {} (company {}) scored {} ({})",
                record_id, company_id, computation.score, computation.quality_tier
            );
        } else {
            debug!("Record {} score unchanged at {}", record_id, computation.score);
        }

        Ok(computation)
    }
}
