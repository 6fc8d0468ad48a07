// Workflow Triggers - Record-change and schedule triggers, and their matching

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use leadflow_shared::RecordEvent;

use super::error::ValidationError;
use super::fields::stringify;

/// What starts a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    RecordCreated {
        table: String,
    },
    FieldUpdated {
        table: String,
        field: String,
        /// When set, only updates to exactly this value match
        #[serde(default)]
        value: Option<serde_json::Value>,
    },
    Schedule {
        cadence: Cadence,
        /// Time of day (UTC) for daily schedules; midnight when absent
        #[serde(default, deserialize_with = "deserialize_time")]
        time: Option<NaiveTime>,
        /// Table whose records get one run each when the schedule fires
        #[serde(default = "default_schedule_table")]
        table: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Hourly,
    Daily,
}

fn default_schedule_table() -> String {
    "leads".to_string()
}

fn deserialize_time<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) => NaiveTime::parse_from_str(&s, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

impl TriggerSpec {
    pub fn record_created(table: &str) -> Self {
        Self::RecordCreated {
            table: table.to_string(),
        }
    }

    pub fn field_updated(table: &str, field: &str, value: Option<serde_json::Value>) -> Self {
        Self::FieldUpdated {
            table: table.to_string(),
            field: field.to_string(),
            value,
        }
    }

    pub fn daily_at(time: NaiveTime, table: &str) -> Self {
        Self::Schedule {
            cadence: Cadence::Daily,
            time: Some(time),
            table: table.to_string(),
        }
    }

    pub fn hourly(table: &str) -> Self {
        Self::Schedule {
            cadence: Cadence::Hourly,
            time: None,
            table: table.to_string(),
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Self::RecordCreated { table }
            | Self::FieldUpdated { table, .. }
            | Self::Schedule { table, .. } => table,
        }
    }

    pub fn is_schedule(&self) -> bool {
        matches!(self, Self::Schedule { .. })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.table().trim().is_empty() {
            return Err(ValidationError::InvalidTrigger("table must not be empty".to_string()));
        }
        if let Self::FieldUpdated { field, .. } = self {
            if field.trim().is_empty() {
                return Err(ValidationError::InvalidTrigger("field must not be empty".to_string()));
            }
        }
        Ok(())
    }
}

/// One invocation of the engine: the current time, plus a record change
/// when the tick was caused by one.
#[derive(Debug, Clone)]
pub struct Tick {
    pub now: DateTime<Utc>,
    pub event: Option<RecordEvent>,
}

impl Tick {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now, event: None }
    }

    pub fn with_event(now: DateTime<Utc>, event: RecordEvent) -> Self {
        Self {
            now,
            event: Some(event),
        }
    }
}

/// Decides whether a trigger fires for an event or a time tick
pub struct TriggerMatcher;

impl TriggerMatcher {
    pub fn matches_event(trigger: &TriggerSpec, event: &RecordEvent) -> bool {
        match trigger {
            TriggerSpec::RecordCreated { table } => *table == event.table && event.is_creation(),
            TriggerSpec::FieldUpdated { table, field, value } => {
                if *table != event.table || event.field.as_deref() != Some(field.as_str()) {
                    return false;
                }
                match value {
                    Some(expected) => event
                        .new_value
                        .as_ref()
                        .is_some_and(|actual| values_match(expected, actual)),
                    None => true,
                }
            }
            TriggerSpec::Schedule { .. } => false,
        }
    }

    /// Most recent cadence boundary at or before `now`
    pub fn latest_boundary(cadence: Cadence, time: Option<NaiveTime>, now: DateTime<Utc>) -> DateTime<Utc> {
        match cadence {
            Cadence::Hourly => {
                let top = now.time().with_minute(0).and_then(|t| t.with_second(0)).and_then(|t| t.with_nanosecond(0));
                match top {
                    Some(t) => now.date_naive().and_time(t).and_utc(),
                    None => now,
                }
            }
            Cadence::Daily => {
                let at = time.unwrap_or(NaiveTime::MIN);
                let today = now.date_naive().and_time(at).and_utc();
                if today <= now { today } else { today - Duration::days(1) }
            }
        }
    }

    /// A schedule fires when a cadence boundary was crossed since it was last
    /// evaluated. The first evaluation only establishes the cursor.
    pub fn schedule_due(
        trigger: &TriggerSpec,
        last_evaluated: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        let TriggerSpec::Schedule { cadence, time, .. } = trigger else {
            return false;
        };
        let Some(last) = last_evaluated else {
            return false;
        };
        let boundary = Self::latest_boundary(*cadence, *time, now);
        boundary > last && boundary <= now
    }
}

fn values_match(expected: &serde_json::Value, actual: &serde_json::Value) -> bool {
    expected == actual || stringify(expected) == stringify(actual)
}
