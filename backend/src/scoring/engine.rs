// Scoring Engine - Applies weighted rules to a record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use leadflow_shared::{AppliedRule, QualityTier, Rule};

use crate::workflows::conditions::{CompiledCondition, ConditionEvaluator};
use crate::workflows::fields::{FieldRegistry, Record};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: i32,
    pub quality_tier: QualityTier,
    pub applied_rules: Vec<AppliedRule>,
    pub rules_considered: usize,
}

pub struct ScoringEngine<'a> {
    evaluator: ConditionEvaluator<'a>,
}

impl<'a> ScoringEngine<'a> {
    pub fn new(registry: &'a FieldRegistry, now: DateTime<Utc>) -> Self {
        Self {
            evaluator: ConditionEvaluator::new(registry, now),
        }
    }

    /// Score `record` against the active rules in `rules`, in order.
    ///
    /// Each matching rule contributes its points, never less than zero, so
    /// the total is never negative. A rule with a malformed condition counts
    /// as considered but never matches.
    pub fn evaluate(&self, rules: &[Rule], record: &Record) -> ScoreResult {
        let mut total: i64 = 0;
        let mut applied_rules = Vec::new();
        let mut rules_considered = 0;

        for rule in rules.iter().filter(|r| r.is_active) {
            rules_considered += 1;

            let condition = match CompiledCondition::compile(
                &rule.condition_field,
                &rule.condition_operator,
                &serde_json::Value::String(rule.condition_value.clone()),
            ) {
                Ok(condition) => condition,
                Err(e) => {
                    warn!("Scoring rule '{}' ({}) is invalid and was skipped: {}", rule.name, rule.id, e);
                    continue;
                }
            };

            if self.evaluator.evaluate(&condition, record) {
                let points = rule.score_points.max(0);
                total = total.saturating_add(i64::from(points));
                applied_rules.push(AppliedRule {
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    score_points: points,
                });
            }
        }

        let score = i32::try_from(total.max(0)).unwrap_or(i32::MAX);

        ScoreResult {
            score,
            quality_tier: QualityTier::from_score(score),
            applied_rules,
            rules_considered,
        }
    }
}
