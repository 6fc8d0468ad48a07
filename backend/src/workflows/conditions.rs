// Workflow Conditions - Field conditions, AND/OR groups and their evaluator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

use super::error::{EvaluationError, ValidationError};
use super::fields::{parse_datetime_str, parse_number_str, FieldRegistry, FieldValue, Record};
use super::templates::Template;

/// A single condition as authored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    /// Field name to evaluate (supports dot notation for nested fields)
    pub field: String,
    /// Operator for comparison
    pub operator: String,
    /// Value to compare against; strings may contain placeholders
    #[serde(default)]
    pub value: serde_json::Value,
}

/// How the members of a group are combined
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum LogicOperator {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

impl FromStr for LogicOperator {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(Self::And),
            "OR" => Ok(Self::Or),
            _ => Err(ValidationError::UnknownLogic(s.to_string())),
        }
    }
}

/// Group of conditions with AND/OR logic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionGroup {
    #[serde(default, alias = "logic")]
    pub logic_operator: LogicOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Nested groups, combined with the same operator as the conditions
    #[serde(default)]
    pub groups: Vec<ConditionGroup>,
}

/// Condition operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    Exists,
    InRange,
}

impl FromStr for ConditionOperator {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equals" | "eq" | "==" => Ok(Self::Equals),
            "not_equals" | "ne" | "!=" => Ok(Self::NotEquals),
            "greater_than" | "gt" | ">" => Ok(Self::GreaterThan),
            "less_than" | "lt" | "<" => Ok(Self::LessThan),
            "contains" => Ok(Self::Contains),
            "exists" | "not_empty" | "is_not_empty" => Ok(Self::Exists),
            "in_range" | "between" => Ok(Self::InRange),
            _ => Err(ValidationError::UnknownOperator(s.to_string())),
        }
    }
}

impl Condition {
    pub fn new(field: &str, operator: &str, value: serde_json::Value) -> Self {
        Self {
            field: field.to_string(),
            operator: operator.to_string(),
            value,
        }
    }

    pub fn equals(field: &str, value: serde_json::Value) -> Self {
        Self::new(field, "equals", value)
    }

    pub fn not_equals(field: &str, value: serde_json::Value) -> Self {
        Self::new(field, "not_equals", value)
    }

    pub fn greater_than(field: &str, value: serde_json::Value) -> Self {
        Self::new(field, "greater_than", value)
    }

    pub fn less_than(field: &str, value: serde_json::Value) -> Self {
        Self::new(field, "less_than", value)
    }

    pub fn contains(field: &str, value: &str) -> Self {
        Self::new(field, "contains", serde_json::Value::String(value.to_string()))
    }

    pub fn exists(field: &str) -> Self {
        Self::new(field, "exists", serde_json::Value::Null)
    }

    pub fn in_range(field: &str, min: f64, max: f64) -> Self {
        Self::new(field, "in_range", serde_json::Value::String(format!("{},{}", min, max)))
    }
}

impl ConditionGroup {
    pub fn and(conditions: Vec<Condition>) -> Self {
        Self {
            logic_operator: LogicOperator::And,
            conditions,
            groups: Vec::new(),
        }
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Self {
            logic_operator: LogicOperator::Or,
            conditions,
            groups: Vec::new(),
        }
    }

    pub fn with_nested_group(mut self, group: ConditionGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn add_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

/// A condition whose operator and value have been validated and parsed
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Template,
}

impl CompiledCondition {
    pub fn compile(
        field: &str,
        operator: &str,
        value: &serde_json::Value,
    ) -> Result<Self, ValidationError> {
        if field.trim().is_empty() {
            return Err(ValidationError::EmptyField);
        }
        let operator = operator.parse::<ConditionOperator>()?;
        let value = match value {
            serde_json::Value::String(s) => Template::parse(s),
            serde_json::Value::Null => Template::literal(""),
            other => Template::literal(&other.to_string()),
        };

        Ok(Self {
            field: field.trim().to_string(),
            operator,
            value,
        })
    }
}

impl TryFrom<&Condition> for CompiledCondition {
    type Error = ValidationError;

    fn try_from(condition: &Condition) -> Result<Self, Self::Error> {
        Self::compile(&condition.field, &condition.operator, &condition.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledGroup {
    pub logic_operator: LogicOperator,
    pub conditions: Vec<CompiledCondition>,
    pub groups: Vec<CompiledGroup>,
}

impl CompiledGroup {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.groups.is_empty()
    }
}

impl TryFrom<&ConditionGroup> for CompiledGroup {
    type Error = ValidationError;

    fn try_from(group: &ConditionGroup) -> Result<Self, Self::Error> {
        Ok(Self {
            logic_operator: group.logic_operator,
            conditions: group
                .conditions
                .iter()
                .map(CompiledCondition::try_from)
                .collect::<Result<_, _>>()?,
            groups: group
                .groups
                .iter()
                .map(CompiledGroup::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Evaluates conditions against a record at a fixed point in time.
///
/// Evaluation never fails: a missing field, a type mismatch or an
/// unparseable operand make the condition not match.
pub struct ConditionEvaluator<'a> {
    registry: &'a FieldRegistry,
    now: DateTime<Utc>,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(registry: &'a FieldRegistry, now: DateTime<Utc>) -> Self {
        Self { registry, now }
    }

    /// Empty groups are vacuously true.
    pub fn evaluate_group(&self, group: &CompiledGroup, record: &Record) -> bool {
        if group.is_empty() {
            return true;
        }

        let mut results = group
            .conditions
            .iter()
            .map(|c| self.evaluate(c, record))
            .chain(group.groups.iter().map(|g| self.evaluate_group(g, record)));

        match group.logic_operator {
            LogicOperator::And => results.all(|r| r),
            LogicOperator::Or => results.any(|r| r),
        }
    }

    pub fn evaluate(&self, condition: &CompiledCondition, record: &Record) -> bool {
        match self.try_evaluate(condition, record) {
            Ok(matched) => matched,
            Err(e) => {
                debug!("Condition on '{}' does not match: {}", condition.field, e);
                false
            }
        }
    }

    pub fn try_evaluate(
        &self,
        condition: &CompiledCondition,
        record: &Record,
    ) -> Result<bool, EvaluationError> {
        let expected = condition.value.render(record, self.now);

        match condition.operator {
            ConditionOperator::Equals => self.equals(&condition.field, &expected, record),
            ConditionOperator::NotEquals => self.equals(&condition.field, &expected, record).map(|m| !m),
            ConditionOperator::GreaterThan => self
                .compare(&condition.field, &expected, record)
                .map(|ord| ord == std::cmp::Ordering::Greater),
            ConditionOperator::LessThan => self
                .compare(&condition.field, &expected, record)
                .map(|ord| ord == std::cmp::Ordering::Less),
            ConditionOperator::Contains => {
                let raw = record
                    .get(&condition.field)
                    .ok_or_else(|| EvaluationError::MissingField(condition.field.clone()))?;
                let text = raw.as_str().ok_or_else(|| EvaluationError::TypeMismatch {
                    field: condition.field.clone(),
                    expected: "string",
                })?;
                Ok(text.to_lowercase().contains(&expected.to_lowercase()))
            }
            ConditionOperator::Exists => Ok(match record.get(&condition.field) {
                Some(serde_json::Value::String(s)) => !s.is_empty(),
                Some(_) => true,
                None => false,
            }),
            ConditionOperator::InRange => {
                let (min, max) = parse_range(&expected)?;
                let value = self.number(&condition.field, record)?;
                Ok(min <= value && value <= max)
            }
        }
    }

    fn equals(&self, field: &str, expected: &str, record: &Record) -> Result<bool, EvaluationError> {
        let actual = self.registry.read(record, field)?;

        if expected.eq_ignore_ascii_case("true") || expected.eq_ignore_ascii_case("false") {
            let want = expected.eq_ignore_ascii_case("true");
            let have = actual.as_bool().ok_or_else(|| EvaluationError::TypeMismatch {
                field: field.to_string(),
                expected: "boolean",
            })?;
            return Ok(have == want);
        }

        if let (Some(have), Some(want)) = (actual.as_number(), parse_number_str(expected)) {
            return Ok(have == want);
        }

        if let FieldValue::DateTime(have) = actual {
            if let Some(want) = parse_datetime_str(expected) {
                return Ok(have == want);
            }
        }

        Ok(actual.to_text() == expected)
    }

    fn compare(
        &self,
        field: &str,
        expected: &str,
        record: &Record,
    ) -> Result<std::cmp::Ordering, EvaluationError> {
        let actual = self.registry.read(record, field)?;
        let unparseable = || EvaluationError::UnparseableOperand(expected.to_string());

        if let FieldValue::DateTime(have) = actual {
            let want = parse_datetime_str(expected).ok_or_else(unparseable)?;
            return Ok(have.cmp(&want));
        }

        match (actual.as_number(), parse_number_str(expected)) {
            (Some(have), Some(want)) => have.partial_cmp(&want).ok_or_else(unparseable),
            (None, _) => match (actual.as_datetime(), parse_datetime_str(expected)) {
                (Some(have), Some(want)) => Ok(have.cmp(&want)),
                _ => Err(EvaluationError::TypeMismatch {
                    field: field.to_string(),
                    expected: "number",
                }),
            },
            (Some(_), None) => Err(unparseable()),
        }
    }

    fn number(&self, field: &str, record: &Record) -> Result<f64, EvaluationError> {
        self.registry
            .read(record, field)?
            .as_number()
            .ok_or_else(|| EvaluationError::TypeMismatch {
                field: field.to_string(),
                expected: "number",
            })
    }
}

fn parse_range(expected: &str) -> Result<(f64, f64), EvaluationError> {
    let unparseable = || EvaluationError::UnparseableOperand(expected.to_string());
    let (min, max) = expected.split_once(',').ok_or_else(unparseable)?;
    let min = parse_number_str(min).ok_or_else(unparseable)?;
    let max = parse_number_str(max).ok_or_else(unparseable)?;
    Ok((min, max))
}
