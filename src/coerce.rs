//! Raw cell to typed value coercion.
//!
//! Coercion never fails. Every cell produces a best-effort [`Value`] plus
//! zero or more row-indexed diagnostics:
//!
//! | kind | empty | invalid |
//! |---|---|---|
//! | boolean | `false` | `false` (only truthy tokens are true) |
//! | integer / float | `0` | `0` + diagnostic |
//! | datetime | absent | absent + diagnostic |
//! | string | `""` | n/a |
//! | foreign-key (by id) | absent | absent + diagnostic |
//!
//! Integers outside the `i64` range are reported and saturated to the
//! nearest bound.

use chrono::{NaiveDate, NaiveDateTime};

use crate::{
    data::Value,
    schema::{FieldKind, FieldSpec},
};

pub const TRUTHY_TOKENS: &[&str] = &["1", "Y", "Yes", "yes", "True", "true", "T", "t"];

pub const DEFAULT_DATE_INPUT_FORMATS: &[&str] = &["%d/%m/%Y", "%Y/%m/%d"];

const FALLBACK_DATE_FORMATS: &[&str] = &["%d-%m-%Y", "%Y-%m-%d"];

const NATIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// 2^63, the first float above `i64::MAX`.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Coerced {
    pub value: Value,
    pub diagnostics: Vec<String>,
}

impl Coerced {
    fn clean(value: Value) -> Self {
        Self {
            value,
            diagnostics: Vec::new(),
        }
    }
}

pub fn is_truthy(raw: &str) -> bool {
    TRUTHY_TOKENS.contains(&raw.trim())
}

#[derive(Debug, Clone)]
pub struct Coercer {
    date_formats: Vec<String>,
}

impl Default for Coercer {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_INPUT_FORMATS.iter().map(|f| f.to_string()))
    }
}

impl Coercer {
    /// Builds a coercer trying `date_formats` before the fixed fallbacks.
    pub fn new<I, S>(date_formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            date_formats: date_formats.into_iter().map(Into::into).collect(),
        }
    }

    pub fn date_formats(&self) -> impl Iterator<Item = &str> {
        self.date_formats
            .iter()
            .map(String::as_str)
            .chain(FALLBACK_DATE_FORMATS.iter().copied())
    }

    pub fn coerce(&self, field: &FieldSpec, raw: &str, row: usize) -> Coerced {
        let value = raw.trim();
        match field.kind {
            FieldKind::Boolean => Coerced::clean(Value::Boolean(is_truthy(value))),
            FieldKind::Integer | FieldKind::Float => coerce_number(field, value, row),
            FieldKind::Datetime => {
                if value.is_empty() {
                    return Coerced::clean(Value::Null);
                }
                match self.parse_datetime(value) {
                    Some(parsed) => Coerced::clean(Value::DateTime(parsed)),
                    None => Coerced {
                        value: Value::Null,
                        diagnostics: vec![format!(
                            "row {row}: Column {} = {value} is not a date so is left unset",
                            field.name
                        )],
                    },
                }
            }
            FieldKind::String => Coerced::clean(Value::String(value.to_string())),
            FieldKind::ForeignKey => coerce_key(field, value, row),
        }
    }

    pub fn parse_datetime(&self, value: &str) -> Option<NaiveDateTime> {
        for fmt in NATIVE_DATETIME_FORMATS {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
                return Some(parsed);
            }
        }
        self.date_formats().find_map(|fmt| {
            NaiveDateTime::parse_from_str(value, fmt).ok().or_else(|| {
                NaiveDate::parse_from_str(value, fmt)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
        })
    }
}

fn zero(kind: FieldKind) -> Value {
    match kind {
        FieldKind::Float => Value::Float(0.0),
        _ => Value::Integer(0),
    }
}

fn coerce_number(field: &FieldSpec, value: &str, row: usize) -> Coerced {
    let mut diagnostics = Vec::new();
    if value.is_empty() {
        return Coerced::clean(zero(field.kind));
    }
    if field.kind == FieldKind::Integer
        && let Ok(exact) = value.parse::<i64>()
    {
        return finish_integer(field, value, exact, row, diagnostics);
    }
    let parsed = match value.parse::<f64>() {
        Ok(parsed) => parsed,
        Err(_) => {
            diagnostics.push(format!(
                "row {row}: Column {} = {value} is not a number so is set to 0",
                field.name
            ));
            return Coerced {
                value: zero(field.kind),
                diagnostics,
            };
        }
    };
    if field.kind == FieldKind::Float {
        if !parsed.is_finite() {
            diagnostics.push(format!(
                "row {row}: Column {} = {value} is not a number so is set to 0",
                field.name
            ));
            return Coerced {
                value: zero(field.kind),
                diagnostics,
            };
        }
        return Coerced {
            value: Value::Float(parsed),
            diagnostics,
        };
    }
    if !parsed.is_finite() {
        diagnostics.push(format!(
            "row {row}: Column {} = {value} is not an integer so is set to 0",
            field.name
        ));
        return Coerced {
            value: Value::Integer(0),
            diagnostics,
        };
    }
    if parsed >= I64_LIMIT || parsed < -I64_LIMIT {
        diagnostics.push(format!(
            "row {row}: Column {} = {value} more than the max integer {}",
            field.name,
            i64::MAX
        ));
    }
    // `as` saturates at the i64 bounds.
    let truncated = parsed.trunc() as i64;
    finish_integer(field, value, truncated, row, diagnostics)
}

fn finish_integer(
    field: &FieldSpec,
    value: &str,
    integer: i64,
    row: usize,
    mut diagnostics: Vec<String>,
) -> Coerced {
    if integer < 0 && field.non_negative {
        diagnostics.push(format!(
            "row {row}: Column {} = {value}, less than zero so set to 0",
            field.name
        ));
        return Coerced {
            value: Value::Integer(0),
            diagnostics,
        };
    }
    Coerced {
        value: Value::Integer(integer),
        diagnostics,
    }
}

fn coerce_key(field: &FieldSpec, value: &str, row: usize) -> Coerced {
    if value.is_empty() {
        return Coerced::clean(Value::Null);
    }
    match value.parse::<i64>() {
        Ok(id) if id > 0 => Coerced::clean(Value::Integer(id)),
        _ => Coerced {
            value: Value::Null,
            diagnostics: vec![format!(
                "row {row}: Column {} = {value} is not a valid key so is left unset",
                field.name
            )],
        },
    }
}
