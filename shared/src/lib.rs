use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error returned when a stored enum column holds an unknown value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

// ============================================
// Scoring
// ============================================

/// A weighted scoring rule. Tenant rules carry the owning company in
/// `owner_id`; system rules apply to every tenant and have no owner.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub condition_field: String,
    pub condition_operator: String,
    pub condition_value: String,
    pub score_points: i32,
    pub is_active: bool,
    pub is_system_rule: bool,
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Unqualified,
    MarketingQualified,
    SalesQualified,
    Opportunity,
}

string_enum!(QualityTier, "quality tier", {
    Unqualified => "unqualified",
    MarketingQualified => "marketing_qualified",
    SalesQualified => "sales_qualified",
    Opportunity => "opportunity",
});

impl QualityTier {
    /// Fixed-threshold buckets: <40, 40-59, 60-79, >=80.
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s >= 80 => Self::Opportunity,
            s if s >= 60 => Self::SalesQualified,
            s if s >= 40 => Self::MarketingQualified,
            _ => Self::Unqualified,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppliedRule {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub score_points: i32,
}

/// Outcome of scoring one record, as reported to callers and persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreComputation {
    pub record_id: Uuid,
    pub company_id: Uuid,
    pub score: i32,
    pub previous_score: Option<i32>,
    pub quality_tier: QualityTier,
    pub applied_rules: Vec<AppliedRule>,
    pub rules_considered_count: usize,
    pub computed_at: DateTime<Utc>,
}

impl ScoreComputation {
    pub fn changed_from(&self, previous: Option<(i32, QualityTier)>) -> bool {
        match previous {
            Some((score, tier)) => score != self.score || tier != self.quality_tier,
            None => true,
        }
    }
}

// ============================================
// Workflow runs
// ============================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    WaitingDelay,
    Completed,
    Failed,
    Cancelled,
}

string_enum!(RunStatus, "run status", {
    Pending => "pending",
    Running => "running",
    WaitingDelay => "waiting_delay",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Action,
    Condition,
    Delay,
}

string_enum!(StepType, "step type", {
    Action => "action",
    Condition => "condition",
    Delay => "delay",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Matched,
    Skipped,
    Dispatched,
    Failed,
    Delayed,
}

string_enum!(StepOutcome, "step outcome", {
    Matched => "matched",
    Skipped => "skipped",
    Dispatched => "dispatched",
    Failed => "failed",
    Delayed => "delayed",
});

/// Append-only audit entry for one executed step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub position: i32,
    pub step_type: StepType,
    pub outcome: StepOutcome,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// One durable execution of a workflow against a record snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub company_id: Uuid,
    pub record_id: Option<Uuid>,
    pub record_snapshot: serde_json::Value,
    /// Position of the next step to execute. Never decreases.
    pub current_position: i32,
    pub status: RunStatus,
    pub resume_at: Option<DateTime<Utc>>,
    pub step_results: Vec<StepResult>,
    /// Optimistic concurrency counter, bumped by every successful save.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(
        workflow_id: Uuid,
        company_id: Uuid,
        record_id: Option<Uuid>,
        record_snapshot: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            company_id,
            record_id,
            record_snapshot,
            current_position: 0,
            status: RunStatus::Pending,
            resume_at: None,
            step_results: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a tick at `now` may pick this run up.
    pub fn is_runnable_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            RunStatus::Pending => true,
            RunStatus::WaitingDelay => self.resume_at.is_some_and(|at| at <= now),
            _ => false,
        }
    }

    pub fn dispatched_count(&self) -> usize {
        self.step_results
            .iter()
            .filter(|r| r.outcome == StepOutcome::Dispatched)
            .count()
    }
}

// ============================================
// Events
// ============================================

/// A record-change notification delivered with a tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEvent {
    pub company_id: Uuid,
    pub table: String,
    pub record_id: Uuid,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub old_value: Option<serde_json::Value>,
    #[serde(default)]
    pub new_value: Option<serde_json::Value>,
}

impl RecordEvent {
    pub fn created(company_id: Uuid, table: &str, record_id: Uuid) -> Self {
        Self {
            company_id,
            table: table.to_string(),
            record_id,
            field: None,
            old_value: None,
            new_value: None,
        }
    }

    pub fn field_updated(
        company_id: Uuid,
        table: &str,
        record_id: Uuid,
        field: &str,
        old_value: Option<serde_json::Value>,
        new_value: serde_json::Value,
    ) -> Self {
        Self {
            company_id,
            table: table.to_string(),
            record_id,
            field: Some(field.to_string()),
            old_value,
            new_value: Some(new_value),
        }
    }

    /// A creation event carries no field-level change information.
    pub fn is_creation(&self) -> bool {
        self.field.is_none() && self.old_value.is_none() && self.new_value.is_none()
    }
}
