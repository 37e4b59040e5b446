//! Record store contract and the in-memory reference store.
//!
//! The import core only talks to [`RecordStore`]: exact-match lookups, immediate
//! creation of related records, and saving candidate rows with a typed failure.
//! [`MemoryStore`] implements it over ordered maps, enforces the catalog's
//! unique fields and reference integrity, and persists to JSON so repeated CLI
//! runs see each other's records.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    data::{RecordRef, Value},
    error::StoreError,
    schema::Catalog,
};

pub type FieldValues = BTreeMap<String, Value>;

/// Error code for a reference to a record that does not exist.
pub const MISSING_REFERENCE_CODE: u32 = 1452;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub entity: String,
    pub id: u64,
    pub fields: FieldValues,
}

impl Record {
    pub fn reference(&self) -> RecordRef {
        RecordRef::new(self.entity.as_str(), self.id)
    }

    pub fn get(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&Value::Null)
    }
}

/// Conjunction of exact-equality conditions. Missing fields compare as null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    conditions: Vec<(String, Value)>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exact(mut self, field: impl Into<String>, value: Value) -> Self {
        self.push(field, value);
        self
    }

    pub fn push(&mut self, field: impl Into<String>, value: Value) {
        self.conditions.push((field.into(), value));
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn matches(&self, fields: &FieldValues) -> bool {
        self.conditions
            .iter()
            .all(|(field, value)| fields.get(field).unwrap_or(&Value::Null) == value)
    }
}

pub trait RecordStore {
    /// First record of `entity` matching every condition of `predicate`.
    fn find_one(&self, entity: &str, predicate: &Predicate) -> Result<Option<Record>, StoreError>;

    /// Creates and immediately persists a record.
    fn create(&mut self, entity: &str, fields: FieldValues) -> Result<Record, StoreError>;

    /// Persists a candidate row.
    fn save(&mut self, entity: &str, fields: FieldValues) -> Result<RecordRef, StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    #[serde(default)]
    records: BTreeMap<String, Vec<Record>>,
    #[serde(default)]
    unique: BTreeMap<String, BTreeSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store enforcing every `unique` field declared in the catalog.
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let mut store = Self::new();
        store.apply_catalog(catalog);
        store
    }

    pub fn apply_catalog(&mut self, catalog: &Catalog) {
        for entity in &catalog.entities {
            for field in entity.fields.iter().filter(|f| f.unique) {
                self.add_unique(&entity.qualified_name(), &field.name);
            }
        }
    }

    pub fn add_unique(&mut self, entity: &str, field: &str) {
        self.unique
            .entry(entity.to_string())
            .or_default()
            .insert(field.to_string());
    }

    pub fn records(&self, entity: &str) -> &[Record] {
        self.records.get(entity).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn count(&self, entity: &str) -> usize {
        self.records(entity).len()
    }

    pub fn get(&self, reference: &RecordRef) -> Option<&Record> {
        self.records(&reference.entity)
            .iter()
            .find(|r| r.id == reference.id)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening store file {path:?}"))?;
        let store = serde_json::from_reader(BufReader::new(file)).context("Parsing store JSON")?;
        Ok(store)
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("Store {path:?} does not exist yet; starting empty");
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating store file {path:?}"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self).context("Writing store JSON")
    }

    fn check_references(&self, fields: &FieldValues) -> Result<(), StoreError> {
        for (field, value) in fields {
            if let Some(reference) = value.as_reference()
                && self.get(reference).is_none()
            {
                return Err(StoreError::other(
                    MISSING_REFERENCE_CODE,
                    format!(
                        "Cannot add or update a child row: {field} references missing {reference}"
                    ),
                ));
            }
        }
        Ok(())
    }

    fn check_unique(&self, entity: &str, fields: &FieldValues) -> Result<(), StoreError> {
        let Some(unique) = self.unique.get(entity) else {
            return Ok(());
        };
        for field in unique {
            let value = match fields.get(field) {
                Some(value) if !value.is_null() => value,
                _ => continue,
            };
            if self.records(entity).iter().any(|r| r.get(field) == value) {
                return Err(StoreError::DuplicateKey {
                    entity: entity.to_string(),
                    field: field.clone(),
                    value: value.as_display(),
                });
            }
        }
        Ok(())
    }

    fn insert(&mut self, entity: &str, fields: FieldValues) -> Result<Record, StoreError> {
        self.check_references(&fields)?;
        self.check_unique(entity, &fields)?;
        let rows = self.records.entry(entity.to_string()).or_default();
        let id = rows.last().map_or(1, |r| r.id + 1);
        let record = Record {
            entity: entity.to_string(),
            id,
            fields,
        };
        rows.push(record.clone());
        Ok(record)
    }
}

impl RecordStore for MemoryStore {
    fn find_one(&self, entity: &str, predicate: &Predicate) -> Result<Option<Record>, StoreError> {
        Ok(self
            .records(entity)
            .iter()
            .find(|r| predicate.matches(&r.fields))
            .cloned())
    }

    fn create(&mut self, entity: &str, fields: FieldValues) -> Result<Record, StoreError> {
        self.insert(entity, fields)
    }

    fn save(&mut self, entity: &str, fields: FieldValues) -> Result<RecordRef, StoreError> {
        self.insert(entity, fields).map(|record| record.reference())
    }
}
