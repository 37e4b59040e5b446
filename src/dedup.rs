//! Duplicate detection over mapped fields.
//!
//! The duplicate key is the conjunction of every mapped field's current
//! candidate value. Fields only populated by defaults are not part of it.

use crate::{
    data::Value,
    error::StoreError,
    mapping::ColumnMapping,
    record::CandidateRecord,
    store::{Predicate, RecordStore},
};

pub fn duplicate_predicate(
    candidate: &CandidateRecord<'_>,
    mappings: &[ColumnMapping],
) -> Predicate {
    let mut predicate = Predicate::new();
    let mut seen: Vec<&str> = Vec::new();
    for mapping in mappings {
        let Some(lookup) = candidate.entity().lookup(&mapping.field) else {
            continue;
        };
        let name = lookup.spec.name.as_str();
        if seen.contains(&name) {
            continue;
        }
        seen.push(name);
        let value = candidate.get(name).cloned().unwrap_or(Value::Null);
        predicate.push(name, value);
    }
    predicate
}

pub fn is_duplicate(
    candidate: &CandidateRecord<'_>,
    mappings: &[ColumnMapping],
    store: &dyn RecordStore,
) -> Result<bool, StoreError> {
    let predicate = duplicate_predicate(candidate, mappings);
    if predicate.is_empty() {
        return Ok(false);
    }
    let entity = candidate.entity().qualified_name();
    Ok(store.find_one(&entity, &predicate)?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::RecordRef,
        mapping::Locator,
        schema::{EntitySchema, FieldKind, FieldSpec},
        store::{FieldValues, MemoryStore},
    };

    fn person() -> EntitySchema {
        EntitySchema::new(
            "crm",
            "Person",
            vec![
                FieldSpec::new("name", FieldKind::String),
                FieldSpec::new("age", FieldKind::Integer),
                FieldSpec::new("source", FieldKind::String),
                FieldSpec::relation("owner", "Organisation"),
            ],
        )
    }

    fn mappings() -> Vec<ColumnMapping> {
        vec![
            ColumnMapping::new(Locator::Index(1), "name"),
            ColumnMapping::new(Locator::Index(2), "age"),
            ColumnMapping::new(Locator::Index(3), "owner_id"),
        ]
    }

    fn stored(store: &mut MemoryStore) {
        let mut org = FieldValues::new();
        org.insert("title".into(), "Acme".into());
        store.create("crm.Organisation", org).unwrap();
        let mut fields = FieldValues::new();
        fields.insert("name".into(), "Alice".into());
        fields.insert("age".into(), Value::Integer(30));
        fields.insert("source".into(), "old".into());
        fields.insert("owner".into(), RecordRef::new("crm.Organisation", 1).into());
        store.save("crm.Person", fields).unwrap();
    }

    fn candidate<'a>(entity: &'a EntitySchema, age: i64) -> CandidateRecord<'a> {
        let mut record = CandidateRecord::new(entity);
        record.assign("name", "Alice".into()).unwrap();
        record.assign("age", Value::Integer(age)).unwrap();
        record
            .assign("owner_id", RecordRef::new("crm.Organisation", 1).into())
            .unwrap();
        record
    }

    #[test]
    fn exact_match_on_all_mapped_fields_is_duplicate() {
        let mut store = MemoryStore::new();
        stored(&mut store);
        let entity = person();
        assert!(is_duplicate(&candidate(&entity, 30), &mappings(), &store).unwrap());
    }

    #[test]
    fn changing_one_mapped_field_is_not_duplicate() {
        let mut store = MemoryStore::new();
        stored(&mut store);
        let entity = person();
        assert!(!is_duplicate(&candidate(&entity, 31), &mappings(), &store).unwrap());
    }

    #[test]
    fn default_only_fields_are_outside_the_key() {
        let mut store = MemoryStore::new();
        stored(&mut store);
        let entity = person();
        let mut record = candidate(&entity, 30);
        record.assign("source", "new".into()).unwrap();
        assert!(is_duplicate(&record, &mappings(), &store).unwrap());
        let predicate = duplicate_predicate(&record, &mappings());
        let fields: Vec<&str> = predicate.conditions().iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(fields, vec!["name", "age", "owner"]);
    }
}
