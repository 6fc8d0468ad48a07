// Scoring Rules - Authoring payload and validation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use leadflow_shared::Rule;

use crate::error::{AppError, ValidationBuilder};
use crate::workflows::conditions::ConditionOperator;

/// A scoring rule as submitted by a tenant or an administrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub rule_name: String,
    #[serde(default = "default_category", alias = "rule_category")]
    pub category: String,
    pub condition_field: String,
    pub condition_operator: String,
    #[serde(default)]
    pub condition_value: String,
    pub score_points: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub is_system_rule: bool,
    /// Owning tenant; must be absent for system rules
    #[serde(default)]
    pub company_id: Option<Uuid>,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_active() -> bool {
    true
}

impl RuleDefinition {
    pub fn validate(&self) -> Result<(), AppError> {
        let mut builder = ValidationBuilder::new();

        if self.rule_name.trim().is_empty() {
            builder = builder.error("rule_name", "Rule name is required");
        }
        if self.condition_field.trim().is_empty() {
            builder = builder.error("condition_field", "Condition field is required");
        }
        if self.condition_operator.parse::<ConditionOperator>().is_err() {
            builder = builder.error(
                "condition_operator",
                &format!("Unknown operator '{}'", self.condition_operator),
            );
        }
        if self.score_points < 0 {
            builder = builder.error("score_points", "Score points must not be negative");
        }
        match (self.is_system_rule, self.company_id) {
            (true, Some(_)) => {
                builder = builder.error("company_id", "System rules cannot belong to a company");
            }
            (false, None) => {
                builder = builder.error("company_id", "Tenant rules require a company");
            }
            _ => {}
        }

        match builder.build() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn into_rule(self, now: DateTime<Utc>) -> Result<Rule, AppError> {
        self.validate()?;
        Ok(Rule {
            id: Uuid::new_v4(),
            name: self.rule_name.trim().to_string(),
            category: self.category,
            condition_field: self.condition_field.trim().to_string(),
            condition_operator: self.condition_operator,
            condition_value: self.condition_value,
            score_points: self.score_points,
            is_active: self.is_active,
            is_system_rule: self.is_system_rule,
            owner_id: self.company_id,
            created_at: now,
        })
    }
}
