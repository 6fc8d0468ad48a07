// Workflow Fields - Typed access to untyped record snapshots

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::error::EvaluationError;

/// Semantic type of a record field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    DateTime,
}

impl FieldType {
    fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::DateTime => "datetime",
        }
    }
}

/// A field value after coercion to its semantic type
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => parse_number_str(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            Self::Text(s) => parse_datetime_str(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            Self::Number(n) => Some(*n != 0.0),
            Self::Text(s) => parse_bool_str(s),
            Self::DateTime(_) => None,
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => format_number(*n),
            Self::Boolean(b) => b.to_string(),
            Self::DateTime(dt) => format_timestamp(*dt),
        }
    }
}

/// The business entity under evaluation. Field access is by key, with dot
/// notation reaching into nested objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    data: serde_json::Value,
}

impl Record {
    pub fn new(data: serde_json::Value) -> Self {
        Self { data }
    }

    /// Raw field lookup. Null values are reported as absent.
    pub fn get(&self, path: &str) -> Option<&serde_json::Value> {
        if let Some(value) = self.data.get(path) {
            return non_null(value);
        }

        let mut current = &self.data;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        non_null(current)
    }

    pub fn insert(&mut self, field: &str, value: serde_json::Value) {
        if !self.data.is_object() {
            self.data = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.data.as_object_mut() {
            map.insert(field.to_string(), value);
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.data
    }

    pub fn into_value(self) -> serde_json::Value {
        self.data
    }
}

impl From<serde_json::Value> for Record {
    fn from(data: serde_json::Value) -> Self {
        Self::new(data)
    }
}

fn non_null(value: &serde_json::Value) -> Option<&serde_json::Value> {
    if value.is_null() { None } else { Some(value) }
}

/// Field name to semantic type for one entity
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: HashMap<String, FieldType>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: &str, field_type: FieldType) -> Self {
        self.fields.insert(name.to_string(), field_type);
        self
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields.get(name).copied()
    }

    /// Read a field, coerced to its registered type. Unregistered fields are
    /// typed from their JSON shape.
    pub fn read(&self, record: &Record, field: &str) -> Result<FieldValue, EvaluationError> {
        let raw = record
            .get(field)
            .ok_or_else(|| EvaluationError::MissingField(field.to_string()))?;

        let mismatch = |expected: FieldType| EvaluationError::TypeMismatch {
            field: field.to_string(),
            expected: expected.name(),
        };

        match self.field_type(field) {
            Some(FieldType::Number) => parse_number(raw)
                .map(FieldValue::Number)
                .ok_or_else(|| mismatch(FieldType::Number)),
            Some(FieldType::Boolean) => match raw {
                serde_json::Value::Bool(b) => Ok(FieldValue::Boolean(*b)),
                serde_json::Value::String(s) => parse_bool_str(s)
                    .map(FieldValue::Boolean)
                    .ok_or_else(|| mismatch(FieldType::Boolean)),
                _ => Err(mismatch(FieldType::Boolean)),
            },
            Some(FieldType::DateTime) => raw
                .as_str()
                .and_then(parse_datetime_str)
                .map(FieldValue::DateTime)
                .ok_or_else(|| mismatch(FieldType::DateTime)),
            Some(FieldType::String) => Ok(FieldValue::Text(stringify(raw))),
            None => Ok(match raw {
                serde_json::Value::Bool(b) => FieldValue::Boolean(*b),
                serde_json::Value::Number(n) => match n.as_f64() {
                    Some(f) => FieldValue::Number(f),
                    None => FieldValue::Text(n.to_string()),
                },
                other => FieldValue::Text(stringify(other)),
            }),
        }
    }
}

/// Registries for every entity the engine evaluates, keyed by table name
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: HashMap<String, FieldRegistry>,
    fallback: FieldRegistry,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &str, registry: FieldRegistry) -> Self {
        self.tables.insert(table.to_string(), registry);
        self
    }

    pub fn for_table(&self, table: &str) -> &FieldRegistry {
        self.tables.get(table).unwrap_or(&self.fallback)
    }

    /// Field types for the CRM entities automations run against
    pub fn crm() -> Self {
        let leads = FieldRegistry::new()
            .with_field("email", FieldType::String)
            .with_field("phone", FieldType::String)
            .with_field("status", FieldType::String)
            .with_field("source", FieldType::String)
            .with_field("company_name", FieldType::String)
            .with_field("estimated_budget", FieldType::Number)
            .with_field("employee_count", FieldType::Number)
            .with_field("lead_score", FieldType::Number)
            .with_field("quality_tier", FieldType::String)
            .with_field("email_opt_in", FieldType::Boolean)
            .with_field("created_at", FieldType::DateTime)
            .with_field("last_activity_at", FieldType::DateTime)
            .with_field("last_contacted_at", FieldType::DateTime);

        let deals = FieldRegistry::new()
            .with_field("stage", FieldType::String)
            .with_field("amount", FieldType::Number)
            .with_field("probability", FieldType::Number)
            .with_field("expected_close_date", FieldType::DateTime)
            .with_field("updated_at", FieldType::DateTime);

        let contacts = FieldRegistry::new()
            .with_field("email", FieldType::String)
            .with_field("phone", FieldType::String)
            .with_field("email_opt_in", FieldType::Boolean)
            .with_field("last_activity_at", FieldType::DateTime);

        Self::new()
            .with_table("leads", leads)
            .with_table("deals", deals)
            .with_table("contacts", contacts)
    }
}

// ===== Parsing helpers shared by conditions and templates =====

pub(crate) fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn parse_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_number_str(s),
        _ => None,
    }
}

pub(crate) fn parse_number_str(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

pub(crate) fn parse_bool_str(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_datetime_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Timestamps are rendered the same way datetime comparisons parse them.
pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
