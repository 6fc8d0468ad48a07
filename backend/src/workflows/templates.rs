// Workflow Templates - Placeholder expressions resolved against record snapshots
//
// Templates are parsed once when a workflow definition is loaded and rendered
// on every evaluation. Rendering never fails: unresolved fields become empty
// strings and malformed tokens are passed through untouched.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::LazyLock;

use super::fields::{format_number, format_timestamp, parse_number, stringify, Record};

static RELATIVE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^now\s*([+-])\s*(\d+)\s*(minute|minutes|hour|hours|day|days|week|weeks)$")
        .expect("relative time pattern")
});

static ARITHMETIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_.]*)\s*([+-])\s*(\d+(?:\.\d+)?)$").expect("arithmetic pattern")
});

static FIELD_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("field pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl TimeUnit {
    fn parse(unit: &str) -> Option<Self> {
        match unit.to_ascii_lowercase().trim_end_matches('s') {
            "minute" => Some(Self::Minutes),
            "hour" => Some(Self::Hours),
            "day" => Some(Self::Days),
            "week" => Some(Self::Weeks),
            _ => None,
        }
    }

    fn duration(&self, amount: i64) -> Option<Duration> {
        match self {
            Self::Minutes => Duration::try_minutes(amount),
            Self::Hours => Duration::try_hours(amount),
            Self::Days => Duration::try_days(amount),
            Self::Weeks => Duration::try_weeks(amount),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
}

/// One segment of a parsed template
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(String),
    FieldRef(String),
    Now,
    /// Signed offset from the evaluation time
    RelativeTime { amount: i64, unit: TimeUnit },
    Arithmetic { field: String, op: ArithmeticOp, operand: f64 },
    /// Unrecognised token, kept verbatim including its braces
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    parts: Vec<Expr>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut parts = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("{{") {
            push_literal(&mut parts, &rest[..start]);
            let token = &rest[start..];
            let inner = &token[2..];

            match inner.find("}}") {
                Some(end) => {
                    parts.push(parse_token(&inner[..end], &token[..end + 4]));
                    rest = &inner[end + 2..];
                }
                None => {
                    push_literal(&mut parts, token);
                    rest = "";
                }
            }
        }
        push_literal(&mut parts, rest);

        Self { parts }
    }

    pub fn literal(text: &str) -> Self {
        let mut parts = Vec::new();
        push_literal(&mut parts, text);
        Self { parts }
    }

    pub fn parts(&self) -> &[Expr] {
        &self.parts
    }

    pub fn is_static(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Expr::Literal(_) | Expr::Malformed(_)))
    }

    pub fn render(&self, record: &Record, now: DateTime<Utc>) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Expr::Literal(text) | Expr::Malformed(text) => out.push_str(text),
                Expr::FieldRef(path) => {
                    if let Some(value) = record.get(path) {
                        out.push_str(&stringify(value));
                    }
                }
                Expr::Now => out.push_str(&format_timestamp(now)),
                Expr::RelativeTime { amount, unit } => {
                    if let Some(at) = unit.duration(*amount).and_then(|d| now.checked_add_signed(d)) {
                        out.push_str(&format_timestamp(at));
                    }
                }
                Expr::Arithmetic { field, op, operand } => {
                    if let Some(n) = arithmetic(record, field, *op, *operand) {
                        out.push_str(&format_number(n));
                    }
                }
            }
        }
        out
    }

    /// Numeric result when the template is exactly one arithmetic token
    fn render_number(&self, record: &Record) -> Option<f64> {
        match self.parts.as_slice() {
            [Expr::Arithmetic { field, op, operand }] => arithmetic(record, field, *op, *operand),
            _ => None,
        }
    }
}

fn push_literal(parts: &mut Vec<Expr>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Expr::Literal(prev)) = parts.last_mut() {
        prev.push_str(text);
    } else {
        parts.push(Expr::Literal(text.to_string()));
    }
}

fn parse_token(inner: &str, raw: &str) -> Expr {
    let token = inner.trim();
    let malformed = || Expr::Malformed(raw.to_string());

    if token.eq_ignore_ascii_case("now") {
        return Expr::Now;
    }

    if let Some(caps) = RELATIVE_TIME.captures(token) {
        let Ok(amount) = caps[2].parse::<i64>() else {
            return malformed();
        };
        let Some(unit) = TimeUnit::parse(&caps[3]) else {
            return malformed();
        };
        let amount = if &caps[1] == "-" { -amount } else { amount };
        return Expr::RelativeTime { amount, unit };
    }

    if let Some(caps) = ARITHMETIC.captures(token) {
        let Ok(operand) = caps[3].parse::<f64>() else {
            return malformed();
        };
        let op = if &caps[2] == "-" { ArithmeticOp::Subtract } else { ArithmeticOp::Add };
        return Expr::Arithmetic { field: caps[1].to_string(), op, operand };
    }

    if FIELD_REF.is_match(token) {
        return Expr::FieldRef(token.to_string());
    }

    malformed()
}

/// A missing field counts as zero; a present non-numeric field has no result.
fn arithmetic(record: &Record, field: &str, op: ArithmeticOp, operand: f64) -> Option<f64> {
    let base = match record.get(field) {
        Some(value) => parse_number(value)?,
        None => 0.0,
    };
    let result = match op {
        ArithmeticOp::Add => base + operand,
        ArithmeticOp::Subtract => base - operand,
    };
    result.is_finite().then_some(result)
}

/// A JSON value whose strings have been parsed as templates
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Text(Template),
    Array(Vec<TemplateValue>),
    Object(Vec<(String, TemplateValue)>),
    Plain(serde_json::Value),
}

impl TemplateValue {
    pub fn compile(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self::Text(Template::parse(s)),
            serde_json::Value::Array(items) => Self::Array(items.iter().map(Self::compile).collect()),
            serde_json::Value::Object(map) => Self::Object(
                map.iter().map(|(k, v)| (k.clone(), Self::compile(v))).collect(),
            ),
            other => Self::Plain(other.clone()),
        }
    }

    pub fn render(&self, record: &Record, now: DateTime<Utc>) -> serde_json::Value {
        match self {
            Self::Text(template) => match template.render_number(record) {
                Some(n) if n.fract() == 0.0 && n.abs() < 1e15 => serde_json::json!(n as i64),
                Some(n) => serde_json::json!(n),
                None => serde_json::Value::String(template.render(record, now)),
            },
            Self::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.render(record, now)).collect())
            }
            Self::Object(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.render(record, now)))
                    .collect(),
            ),
            Self::Plain(value) => value.clone(),
        }
    }
}

/// Resolves placeholders against one record snapshot at one point in time
pub struct TemplateInterpolator<'a> {
    record: &'a Record,
    now: DateTime<Utc>,
}

impl<'a> TemplateInterpolator<'a> {
    pub fn new(record: &'a Record, now: DateTime<Utc>) -> Self {
        Self { record, now }
    }

    pub fn interpolate(&self, template: &Template) -> String {
        template.render(self.record, self.now)
    }

    pub fn interpolate_str(&self, source: &str) -> String {
        self.interpolate(&Template::parse(source))
    }

    pub fn interpolate_value(&self, value: &TemplateValue) -> serde_json::Value {
        value.render(self.record, self.now)
    }
}
