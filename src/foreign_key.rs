//! Find-or-create resolution of related records.
//!
//! A raw cell destined for a relation field names a related record by one of
//! its fields. The resolver types the cell against that field, looks for an
//! exact match and creates the record only when none exists, so resolving the
//! same `(entity, field, value)` twice yields the same record.

use log::debug;

use crate::{
    coerce::Coercer,
    data::{RecordRef, Value},
    error::StoreError,
    mapping::ForeignKeySpec,
    schema::{FieldKind, FieldSpec, SchemaProvider},
    store::{FieldValues, Predicate, RecordStore},
};

pub struct ForeignKeyResolver<'a> {
    provider: &'a dyn SchemaProvider,
    coercer: &'a Coercer,
    default_context: String,
}

impl<'a> ForeignKeyResolver<'a> {
    pub fn new(
        provider: &'a dyn SchemaProvider,
        coercer: &'a Coercer,
        default_context: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            coercer,
            default_context: default_context.into(),
        }
    }

    /// Store key of the related entity: the context that already owns an
    /// entity of that name, else the run's default context.
    pub fn related_entity(&self, name: &str) -> String {
        match self.provider.entity(name) {
            Some(entity) => entity.qualified_name(),
            None => {
                let context = self
                    .provider
                    .context_of(name)
                    .unwrap_or(&self.default_context);
                format!("{context}.{name}")
            }
        }
    }

    fn match_value(
        &self,
        spec: &ForeignKeySpec,
        raw: &str,
        row: usize,
        diagnostics: &mut Vec<String>,
    ) -> Value {
        let field = self
            .provider
            .entity(&spec.related_entity)
            .and_then(|entity| entity.field(&spec.match_field))
            .filter(|field| !field.is_relation())
            .cloned()
            .unwrap_or_else(|| FieldSpec::new(spec.match_field.as_str(), FieldKind::String));
        let coerced = self.coercer.coerce(&field, raw, row);
        diagnostics.extend(coerced.diagnostics);
        coerced.value
    }

    /// Returns a reference to the related record matching `raw`, creating it
    /// first when absent. An empty cell resolves to no reference.
    pub fn resolve(
        &self,
        store: &mut dyn RecordStore,
        spec: &ForeignKeySpec,
        raw: &str,
        row: usize,
        diagnostics: &mut Vec<String>,
    ) -> Result<Option<RecordRef>, StoreError> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let entity = self.related_entity(&spec.related_entity);
        let value = self.match_value(spec, raw, row, diagnostics);
        let predicate = Predicate::new().exact(spec.match_field.as_str(), value.clone());
        if let Some(existing) = store.find_one(&entity, &predicate)? {
            return Ok(Some(existing.reference()));
        }
        let mut fields = FieldValues::new();
        fields.insert(spec.match_field.clone(), value);
        let created = store.create(&entity, fields)?;
        debug!(
            "Created {} with {} = {:?}",
            created.reference(),
            spec.match_field,
            raw.trim()
        );
        Ok(Some(created.reference()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Catalog, EntitySchema};
    use crate::store::MemoryStore;

    fn catalog() -> Catalog {
        Catalog::new(vec![
            EntitySchema::new(
                "crm",
                "Organisation",
                vec![
                    FieldSpec::new("title", FieldKind::String),
                    FieldSpec::new("size", FieldKind::Integer),
                ],
            ),
            EntitySchema::new("crm", "Person", vec![FieldSpec::relation("owner", "Organisation")]),
        ])
    }

    #[test]
    fn resolving_twice_creates_one_record() {
        let catalog = catalog();
        let coercer = Coercer::default();
        let resolver = ForeignKeyResolver::new(&catalog, &coercer, "imports");
        let mut store = MemoryStore::new();
        let spec = ForeignKeySpec::new("Organisation", "title");
        let mut diagnostics = Vec::new();

        let first = resolver
            .resolve(&mut store, &spec, "Acme", 0, &mut diagnostics)
            .unwrap()
            .unwrap();
        let second = resolver
            .resolve(&mut store, &spec, " Acme ", 1, &mut diagnostics)
            .unwrap()
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first, RecordRef::new("crm.Organisation", 1));
        assert_eq!(store.count("crm.Organisation"), 1);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn existing_records_are_reused() {
        let catalog = catalog();
        let coercer = Coercer::default();
        let resolver = ForeignKeyResolver::new(&catalog, &coercer, "imports");
        let mut store = MemoryStore::new();
        let mut fields = FieldValues::new();
        fields.insert("title".into(), Value::String("Globex".into()));
        let existing = store.create("crm.Organisation", fields).unwrap();

        let found = resolver
            .resolve(
                &mut store,
                &ForeignKeySpec::new("organisation", "title"),
                "Globex",
                0,
                &mut Vec::new(),
            )
            .unwrap();
        assert_eq!(found, Some(existing.reference()));
        assert_eq!(store.count("crm.Organisation"), 1);
    }

    #[test]
    fn match_value_is_typed_by_related_field() {
        let catalog = catalog();
        let coercer = Coercer::default();
        let resolver = ForeignKeyResolver::new(&catalog, &coercer, "imports");
        let mut store = MemoryStore::new();
        let reference = resolver
            .resolve(
                &mut store,
                &ForeignKeySpec::new("Organisation", "size"),
                "250",
                0,
                &mut Vec::new(),
            )
            .unwrap()
            .unwrap();
        let record = store.get(&reference).unwrap();
        assert_eq!(record.get("size"), &Value::Integer(250));
    }

    #[test]
    fn unknown_entities_fall_back_to_default_context() {
        let catalog = catalog();
        let coercer = Coercer::default();
        let resolver = ForeignKeyResolver::new(&catalog, &coercer, "imports");
        let mut store = MemoryStore::new();
        let reference = resolver
            .resolve(
                &mut store,
                &ForeignKeySpec::new("Region", "code"),
                "EU",
                0,
                &mut Vec::new(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(reference.entity, "imports.Region");
        assert_eq!(resolver.related_entity("Organisation"), "crm.Organisation");
    }

    #[test]
    fn empty_cells_resolve_to_nothing() {
        let catalog = catalog();
        let coercer = Coercer::default();
        let resolver = ForeignKeyResolver::new(&catalog, &coercer, "imports");
        let mut store = MemoryStore::new();
        let resolved = resolver
            .resolve(
                &mut store,
                &ForeignKeySpec::new("Organisation", "title"),
                "  ",
                0,
                &mut Vec::new(),
            )
            .unwrap();
        assert!(resolved.is_none());
        assert_eq!(store.count("crm.Organisation"), 0);
    }
}
