//! Value coercion for raw parameter values.
//!
//! Query strings carry everything as text, so the coercer infers a type from
//! the value's shape: `"true"`/`"false"` become booleans, fully numeric text
//! becomes an integer (or a float when a decimal point is present), and
//! date-like fields parse calendar dates. Anything else stays a string.
//!
//! Date-ness is inferred from the field name (`...Date`, `...At`, or a
//! declared date field). Callers that need exact types can register them per
//! field with [`CoercionPolicy::with_field_type`]; registered fields bypass
//! the naming heuristic.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::types::FilterValue;

/// Declared type for a field in the optional type registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
}

/// Rules for turning raw values into [`FilterValue`]s.
#[derive(Debug, Clone, Default)]
pub struct CoercionPolicy {
    date_fields: HashSet<String>,
    field_types: HashMap<String, FieldType>,
}

impl CoercionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare fields that hold dates regardless of their name.
    pub fn with_date_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.date_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Register an explicit type for a field.
    pub fn with_field_type(mut self, field: impl Into<String>, field_type: FieldType) -> Self {
        self.field_types.insert(field.into(), field_type);
        self
    }

    /// Whether the field is treated as holding dates.
    pub fn is_date_like(&self, field: &str) -> bool {
        match self.field_types.get(field) {
            Some(field_type) => *field_type == FieldType::Date,
            None => {
                self.date_fields.contains(field) || field.ends_with("Date") || field.ends_with("At")
            }
        }
    }

    /// Coerce a raw JSON value for `field`. Never fails.
    pub fn coerce(&self, field: &str, raw: &Value) -> FilterValue {
        match raw {
            Value::Null => FilterValue::Null,
            Value::Bool(b) => FilterValue::Boolean(*b),
            Value::Number(n) => n
                .as_i64()
                .map(FilterValue::Integer)
                .or_else(|| n.as_f64().map(FilterValue::Float))
                .unwrap_or_else(|| FilterValue::String(n.to_string())),
            Value::String(s) => self.coerce_str(field, s),
            Value::Array(items) => {
                FilterValue::List(items.iter().map(|v| self.coerce(field, v)).collect())
            }
            Value::Object(_) => FilterValue::String(raw.to_string()),
        }
    }

    /// Coerce a raw string value for `field`. Never fails.
    pub fn coerce_str(&self, field: &str, raw: &str) -> FilterValue {
        if let Some(field_type) = self.field_types.get(field) {
            return coerce_declared(*field_type, raw);
        }

        if let Some(b) = parse_bool(raw) {
            return FilterValue::Boolean(b);
        }
        if let Some(number) = parse_number(raw) {
            return number;
        }
        if self.is_date_like(field)
            && let Some(date) = parse_date(raw)
        {
            return FilterValue::Date(date);
        }

        FilterValue::String(raw.to_string())
    }
}

/// Coerce against a registered type, degrading to the raw string.
fn coerce_declared(field_type: FieldType, raw: &str) -> FilterValue {
    let coerced = match field_type {
        FieldType::String => None,
        FieldType::Integer => raw.trim().parse().ok().map(FilterValue::Integer),
        FieldType::Float => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(FilterValue::Float),
        FieldType::Boolean => parse_bool(raw).map(FilterValue::Boolean),
        FieldType::Date => parse_date(raw).map(FilterValue::Date),
    };
    coerced.unwrap_or_else(|| FilterValue::String(raw.to_string()))
}

fn parse_bool(raw: &str) -> Option<bool> {
    if raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Full-string numeric parse; a decimal point selects float.
fn parse_number(raw: &str) -> Option<FilterValue> {
    if raw.contains('.') {
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(FilterValue::Float)
    } else {
        raw.parse::<i64>().ok().map(FilterValue::Integer)
    }
}

/// Parse RFC 3339, `YYYY-MM-DDTHH:MM:SS` (UTC) or `YYYY-MM-DD` (midnight UTC).
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
