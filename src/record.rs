use thiserror::Error;

use crate::{
    data::Value,
    schema::{EntitySchema, FieldKind},
    store::FieldValues,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Column {field} = {value} couldnt be set for row")]
pub struct AssignError {
    pub field: String,
    pub value: String,
}

/// Field values collected for one row before it is persisted.
#[derive(Debug, Clone)]
pub struct CandidateRecord<'a> {
    entity: &'a EntitySchema,
    values: FieldValues,
}

impl<'a> CandidateRecord<'a> {
    pub fn new(entity: &'a EntitySchema) -> Self {
        Self {
            entity,
            values: FieldValues::new(),
        }
    }

    pub fn entity(&self) -> &EntitySchema {
        self.entity
    }

    /// Assigns `value` to `key` (a field name or relation `_id` alias) when
    /// the value's type fits the field's kind. Integers widen into floats.
    pub fn assign(&mut self, key: &str, value: Value) -> Result<(), AssignError> {
        let rejected = |value: &Value| AssignError {
            field: key.to_string(),
            value: value.as_display(),
        };
        let Some(lookup) = self.entity.lookup(key) else {
            return Err(rejected(&value));
        };
        let value = match (lookup.spec.kind, value) {
            (_, Value::Null) => Value::Null,
            (FieldKind::Boolean, v @ Value::Boolean(_)) => v,
            (FieldKind::Integer, v @ Value::Integer(_)) => v,
            (FieldKind::Float, v @ Value::Float(_)) => v,
            (FieldKind::Float, Value::Integer(i)) => Value::Float(i as f64),
            (FieldKind::Datetime, v @ Value::DateTime(_)) => v,
            (FieldKind::String, v @ Value::String(_)) => v,
            (FieldKind::ForeignKey, v @ Value::Reference(_)) => v,
            (_, other) => return Err(rejected(&other)),
        };
        self.values.insert(lookup.spec.name.clone(), value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        let lookup = self.entity.lookup(key)?;
        self.values.get(&lookup.spec.name)
    }

    /// Whether the field holds a non-null value.
    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some_and(|value| !value.is_null())
    }

    pub fn values(&self) -> &FieldValues {
        &self.values
    }
}
