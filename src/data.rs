use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Reference to a persisted record, used as the value of a relation field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordRef {
    pub entity: String,
    pub id: u64,
}

impl RecordRef {
    pub fn new(entity: impl Into<String>, id: u64) -> Self {
        Self {
            entity: entity.into(),
            id,
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    DateTime(NaiveDateTime),
    String(String),
    Reference(RecordRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_reference(&self) -> Option<&RecordRef> {
        match self {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::Null => "None".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::String(s) => s.clone(),
            Value::Reference(r) => r.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<RecordRef> for Value {
    fn from(value: RecordRef) -> Self {
        Value::Reference(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn as_display_renders_each_variant() {
        assert_eq!(Value::Null.as_display(), "None");
        assert_eq!(Value::Integer(-4).as_display(), "-4");
        assert_eq!(Value::Float(2.0).as_display(), "2.0");
        assert_eq!(Value::Float(2.5).as_display(), "2.5");
        let dt = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        assert_eq!(Value::DateTime(dt).as_display(), "2024-05-06 14:30:00");
        assert_eq!(
            Value::Reference(RecordRef::new("crm.Organisation", 7)).as_display(),
            "crm.Organisation#7"
        );
    }

    #[test]
    fn value_round_trips_through_json() {
        let value = Value::Reference(RecordRef::new("crm.Organisation", 3));
        let json = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
