//! Target schema model and the [`SchemaProvider`] seam.
//!
//! A [`Catalog`] is the YAML-backed provider used by the CLI: a list of
//! entities, each owned by a context (the namespace an entity lives in) and
//! carrying an ordered list of [`FieldSpec`]s. Every entity also has an
//! implicit store-assigned primary key `id` that is not declared in the
//! catalog, so the first declared field is the entity's second field.
//!
//! Relation fields are addressable under their own name (find-or-create by a
//! match field) and under a `<name>_id` alias (assign by primary key).

use std::{fmt, fs::File, io::BufReader, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

pub const RELATION_ID_SUFFIX: &str = "_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    Boolean,
    Integer,
    Float,
    #[serde(alias = "date", alias = "time", alias = "timestamp")]
    Datetime,
    String,
    #[serde(alias = "foreignkey", alias = "relation")]
    ForeignKey,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Boolean => "boolean",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Datetime => "datetime",
            FieldKind::String => "string",
            FieldKind::ForeignKey => "foreign-key",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "boolean",
            "integer",
            "float",
            "datetime",
            "string",
            "foreign-key",
        ]
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "boolean" | "bool" => Ok(FieldKind::Boolean),
            "integer" | "int" => Ok(FieldKind::Integer),
            "float" | "decimal" | "double" => Ok(FieldKind::Float),
            "datetime" | "date-time" | "date" | "time" | "timestamp" => Ok(FieldKind::Datetime),
            "string" | "text" => Ok(FieldKind::String),
            "foreign-key" | "foreignkey" | "relation" => Ok(FieldKind::ForeignKey),
            _ => Err(anyhow!(
                "Unknown field kind '{value}'. Supported kinds: {}",
                FieldKind::variants().join(", ")
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Entity referenced by a `foreign-key` field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub non_negative: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            related: None,
            non_negative: false,
            unique: false,
        }
    }

    pub fn relation(name: impl Into<String>, related: impl Into<String>) -> Self {
        Self {
            related: Some(related.into()),
            ..Self::new(name, FieldKind::ForeignKey)
        }
    }

    pub fn non_negative(mut self) -> Self {
        self.non_negative = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn is_relation(&self) -> bool {
        self.kind == FieldKind::ForeignKey
    }
}

/// A field looked up by key: either the field itself or its `_id` alias.
#[derive(Debug, Clone, Copy)]
pub struct FieldLookup<'a> {
    pub spec: &'a FieldSpec,
    pub by_id: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntitySchema {
    pub name: String,
    #[serde(default = "EntitySchema::default_context")]
    pub context: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl EntitySchema {
    pub fn default_context() -> String {
        "default".to_string()
    }

    pub fn new(
        context: impl Into<String>,
        name: impl Into<String>,
        fields: Vec<FieldSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            context: context.into(),
            fields,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.context, self.name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Resolves a mapping key against the field table, including `_id` aliases.
    pub fn lookup(&self, key: &str) -> Option<FieldLookup<'_>> {
        if let Some(spec) = self.field(key) {
            return Some(FieldLookup { spec, by_id: false });
        }
        let base = key.strip_suffix(RELATION_ID_SUFFIX)?;
        self.field(base)
            .filter(|spec| spec.is_relation())
            .map(|spec| FieldLookup { spec, by_id: true })
    }

    /// Every key a header may match: field names plus relation `_id` aliases.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            keys.push(field.name.clone());
            if field.is_relation() {
                keys.push(format!("{}{RELATION_ID_SUFFIX}", field.name));
            }
        }
        keys
    }

    /// Field used to match/create related records when none is given explicitly.
    pub fn default_match_field(&self) -> Option<&str> {
        self.fields.first().map(|f| f.name.as_str())
    }
}

/// Source of target schemas for a run.
pub trait SchemaProvider {
    /// Looks up an entity by `context.Name` or bare `Name`.
    fn entity(&self, identifier: &str) -> Option<&EntitySchema>;

    /// Context that already owns an entity of this name, if any.
    fn context_of(&self, entity_name: &str) -> Option<&str> {
        self.entity(entity_name).map(|e| e.context.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Catalog {
    #[serde(default)]
    pub entities: Vec<EntitySchema>,
}

impl Catalog {
    pub fn new(entities: Vec<EntitySchema>) -> Self {
        Self { entities }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening catalog file {path:?}"))?;
        let reader = BufReader::new(file);
        let catalog: Catalog =
            serde_yaml::from_reader(reader).context("Parsing catalog YAML")?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let catalog: Catalog = serde_yaml::from_str(input).context("Parsing catalog YAML")?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<()> {
        for entity in &self.entities {
            ensure!(
                !entity.name.trim().is_empty(),
                "Entity in context '{}' has no name",
                entity.context
            );
            for field in &entity.fields {
                ensure!(
                    !field.name.ends_with(RELATION_ID_SUFFIX) || !field.is_relation(),
                    "Relation field '{}.{}' must not end with '{RELATION_ID_SUFFIX}'",
                    entity.name,
                    field.name
                );
                if field.is_relation() {
                    let related = field.related.as_deref().ok_or_else(|| {
                        anyhow!(
                            "Relation field '{}.{}' does not name a related entity",
                            entity.name,
                            field.name
                        )
                    })?;
                    ensure!(
                        self.entity(related).is_some(),
                        "Relation field '{}.{}' references unknown entity '{related}'",
                        entity.name,
                        field.name
                    );
                } else {
                    ensure!(
                        field.related.is_none(),
                        "Field '{}.{}' names a related entity but is of kind {}",
                        entity.name,
                        field.name,
                        field.kind
                    );
                }
            }
        }
        Ok(())
    }
}

impl SchemaProvider for Catalog {
    fn entity(&self, identifier: &str) -> Option<&EntitySchema> {
        let identifier = identifier.trim();
        match identifier.split_once('.') {
            Some((context, name)) => self.entities.iter().find(|e| {
                e.context.eq_ignore_ascii_case(context) && e.name.eq_ignore_ascii_case(name)
            }),
            None => self
                .entities
                .iter()
                .find(|e| e.name.eq_ignore_ascii_case(identifier)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
entities:
  - name: Organisation
    context: crm
    fields:
      - { name: title, kind: string, unique: true }
      - { name: country, kind: string }
  - name: Person
    context: crm
    fields:
      - { name: name, kind: string }
      - { name: age, kind: integer, non_negative: true }
      - { name: joined, kind: date }
      - { name: owner, kind: foreign-key, related: Organisation }
"#;

    #[test]
    fn catalog_parses_kinds_and_flags() {
        let catalog = Catalog::from_yaml_str(CATALOG).expect("catalog");
        let person = catalog.entity("crm.Person").expect("person");
        assert_eq!(person.qualified_name(), "crm.Person");
        let age = person.field("age").unwrap();
        assert_eq!(age.kind, FieldKind::Integer);
        assert!(age.non_negative);
        assert_eq!(person.field("joined").unwrap().kind, FieldKind::Datetime);
        assert!(person.field("owner").unwrap().is_relation());
        assert!(catalog.entity("Organisation").unwrap().fields[0].unique);
    }

    #[test]
    fn entity_lookup_accepts_bare_and_qualified_names() {
        let catalog = Catalog::from_yaml_str(CATALOG).unwrap();
        assert!(catalog.entity("person").is_some());
        assert!(catalog.entity("CRM.Person").is_some());
        assert!(catalog.entity("sales.Person").is_none());
        assert_eq!(catalog.context_of("Organisation"), Some("crm"));
        assert_eq!(catalog.context_of("Invoice"), None);
    }

    #[test]
    fn lookup_resolves_relation_id_alias() {
        let catalog = Catalog::from_yaml_str(CATALOG).unwrap();
        let person = catalog.entity("Person").unwrap();
        let direct = person.lookup("owner").unwrap();
        assert!(!direct.by_id);
        let alias = person.lookup("owner_id").unwrap();
        assert!(alias.by_id);
        assert_eq!(alias.spec.name, "owner");
        assert!(person.lookup("name_id").is_none());
        assert_eq!(
            person.keys(),
            vec!["name", "age", "joined", "owner", "owner_id"]
        );
    }

    #[test]
    fn default_match_field_is_first_declared_field() {
        let catalog = Catalog::from_yaml_str(CATALOG).unwrap();
        let org = catalog.entity("Organisation").unwrap();
        assert_eq!(org.default_match_field(), Some("title"));
    }

    #[test]
    fn validate_rejects_dangling_relation() {
        let err = Catalog::from_yaml_str(
            r#"
entities:
  - name: Person
    fields:
      - { name: owner, kind: foreign-key, related: Nowhere }
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown entity 'Nowhere'"));
    }

    #[test]
    fn field_kind_from_str_accepts_aliases() {
        assert_eq!(FieldKind::from_str("INT").unwrap(), FieldKind::Integer);
        assert_eq!(
            FieldKind::from_str("relation").unwrap(),
            FieldKind::ForeignKey
        );
        assert!(FieldKind::from_str("blob").is_err());
    }

    #[test]
    fn load_rejects_nonexistent_file() {
        let err = Catalog::load(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(err.to_string().contains("Opening catalog file"));
    }
}
