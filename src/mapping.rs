//! Column-to-field mapping resolution.
//!
//! Mapping strings use the grammar `locator=field(RelatedEntity|matchField)`
//! with the parenthesised foreign-key suffix optional, e.g.
//! `column1=name,column2=owner(Organisation|title)`. Entries may be separated
//! by commas, whitespace or both; a `column` prefix on the locator is
//! case-insensitive and optional. Defaults use the same grammar with a
//! constant in place of the field.
//!
//! Without an explicit mapping the header row is matched against the target
//! entity's fields after replacing every run of non-alphanumeric characters
//! with `_`.

use std::{fmt, sync::OnceLock};

use itertools::Itertools;
use regex::Regex;

use crate::schema::{EntitySchema, RELATION_ID_SUFFIX, SchemaProvider};

const COLUMN_PREFIX: &str = "column";
const NO_NAMES: &str = "none";

fn entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\w+)\s*=\s*([^\s,=()]+)\s*(?:\(\s*(\w+)\s*\|\s*(\w+)\s*\))?")
            .expect("mapping entry pattern is valid")
    })
}

fn non_alphanumeric() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("[^0-9a-zA-Z]+").expect("header pattern is valid"))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// 1-based column position.
    Index(usize),
    /// Header label, resolved against the index-label or header row.
    Name(String),
}

impl Locator {
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        let digits = match token.get(..COLUMN_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(COLUMN_PREFIX) => {
                &token[COLUMN_PREFIX.len()..]
            }
            _ => token,
        };
        match digits.parse::<usize>() {
            Ok(index) if index > 0 => Locator::Index(index),
            _ => Locator::Name(token.to_string()),
        }
    }

    /// Zero-based cell position, or `None` when the locator cannot be resolved.
    pub fn resolve(&self, labels: Option<&[String]>) -> Option<usize> {
        match self {
            Locator::Index(index) => index.checked_sub(1),
            Locator::Name(name) => labels?
                .iter()
                .position(|label| label == name || normalize_header(label) == *name),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Index(index) => write!(f, "{COLUMN_PREFIX}{index}"),
            Locator::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKeySpec {
    pub related_entity: String,
    pub match_field: String,
}

impl ForeignKeySpec {
    pub fn new(related_entity: impl Into<String>, match_field: impl Into<String>) -> Self {
        Self {
            related_entity: related_entity.into(),
            match_field: match_field.into(),
        }
    }
}

impl fmt::Display for ForeignKeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}|{})", self.related_entity, self.match_field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub locator: Locator,
    pub field: String,
    pub foreign_key: Option<ForeignKeySpec>,
}

impl ColumnMapping {
    pub fn new(locator: Locator, field: impl Into<String>) -> Self {
        Self {
            locator,
            field: field.into(),
            foreign_key: None,
        }
    }

    pub fn with_foreign_key(mut self, spec: ForeignKeySpec) -> Self {
        self.foreign_key = Some(spec);
        self
    }
}

impl fmt::Display for ColumnMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.locator, self.field)?;
        if let Some(fk) = &self.foreign_key {
            write!(f, "{fk}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultSpec {
    pub field: String,
    pub raw_value: String,
    pub foreign_key: Option<ForeignKeySpec>,
}

impl fmt::Display for DefaultSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.field, self.raw_value)?;
        if let Some(fk) = &self.foreign_key {
            write!(f, "{fk}")?;
        }
        Ok(())
    }
}

type Entry = (String, String, Option<ForeignKeySpec>);

fn parse_entries(spec: &str) -> impl Iterator<Item = Entry> + '_ {
    entry_pattern().captures_iter(spec).map(|caps| {
        let foreign_key = match (caps.get(3), caps.get(4)) {
            (Some(entity), Some(field)) => {
                Some(ForeignKeySpec::new(entity.as_str(), field.as_str()))
            }
            _ => None,
        };
        (caps[1].to_string(), caps[2].to_string(), foreign_key)
    })
}

pub fn parse_mappings(spec: &str) -> Vec<ColumnMapping> {
    parse_entries(spec)
        .map(|(locator, field, foreign_key)| ColumnMapping {
            locator: Locator::parse(&locator),
            field,
            foreign_key,
        })
        .collect()
}

pub fn parse_defaults(spec: &str) -> Vec<DefaultSpec> {
    parse_entries(spec)
        .map(|(field, raw_value, foreign_key)| DefaultSpec {
            field,
            raw_value,
            foreign_key,
        })
        .collect()
}

pub fn format_mappings(mappings: &[ColumnMapping]) -> String {
    mappings.iter().join(",")
}

pub fn format_defaults(defaults: &[DefaultSpec]) -> String {
    defaults.iter().join(",")
}

pub fn normalize_header(cell: &str) -> String {
    non_alphanumeric().replace_all(cell, "_").into_owned()
}

pub fn positional_names(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("col_{i}")).collect()
}

/// Foreign-key spec inferred for a relation field from the catalog.
fn inferred_foreign_key(
    key: &str,
    entity: &EntitySchema,
    provider: &dyn SchemaProvider,
) -> Option<ForeignKeySpec> {
    if key.ends_with(RELATION_ID_SUFFIX) {
        return None;
    }
    let field = entity.field(key).filter(|f| f.is_relation())?;
    let related_name = field.related.as_deref()?;
    let related = provider.entity(related_name)?;
    let match_field = related.default_match_field()?;
    Some(ForeignKeySpec::new(related.name.as_str(), match_field))
}

/// Matches header cells against the entity's field keys.
pub fn infer_from_header(
    header: &[String],
    entity: &EntitySchema,
    provider: &dyn SchemaProvider,
) -> (Vec<ColumnMapping>, String) {
    let headings = header.iter().map(|h| normalize_header(h)).collect::<Vec<_>>();
    let columns = format!(
        "Columns = {}",
        headings.iter().map(|h| format!("'{h}'")).join(", ")
    );
    let keys = entity.keys();
    let mut mappings = Vec::new();
    for (idx, heading) in headings.iter().enumerate() {
        let matched = keys
            .iter()
            .find(|key| *key == heading)
            .or_else(|| keys.iter().find(|key| key.eq_ignore_ascii_case(heading)));
        if let Some(key) = matched {
            let mut mapping = ColumnMapping::new(Locator::Index(idx + 1), key.as_str());
            mapping.foreign_key = inferred_foreign_key(key, entity, provider);
            mappings.push(mapping);
        }
    }
    (mappings, columns)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingSource {
    /// Supplied by the caller; the first row of the file is data.
    Explicit,
    /// Inferred from the header row; the first row is not data.
    Header,
}

#[derive(Debug, Clone)]
pub struct MappingResolution {
    pub mappings: Vec<ColumnMapping>,
    pub source: MappingSource,
    pub log: Vec<String>,
}

impl MappingResolution {
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// Resolves the run's mapping once, from an explicit spec or the header row.
pub fn resolve(
    explicit: Option<&str>,
    header: Option<&[String]>,
    entity: &EntitySchema,
    provider: &dyn SchemaProvider,
) -> MappingResolution {
    let mut log = Vec::new();
    let explicit = explicit.map(str::trim).filter(|s| !s.is_empty());
    let (mappings, source) = match explicit {
        Some(spec) if spec.eq_ignore_ascii_case(NO_NAMES) => {
            let width = header.map_or(0, <[String]>::len);
            let (mappings, columns) = infer_from_header(&positional_names(width), entity, provider);
            log.push(columns);
            (mappings, MappingSource::Explicit)
        }
        Some(spec) if !spec.contains('=') => {
            let names = spec.split(',').map(|s| s.trim().to_string()).collect::<Vec<_>>();
            let (mappings, columns) = infer_from_header(&names, entity, provider);
            log.push(columns);
            (mappings, MappingSource::Explicit)
        }
        Some(spec) => (parse_mappings(spec), MappingSource::Explicit),
        None => match header {
            Some(row) => {
                let (mappings, columns) = infer_from_header(row, entity, provider);
                log.push(columns);
                (mappings, MappingSource::Header)
            }
            None => (Vec::new(), MappingSource::Header),
        },
    };
    let mappings = mappings
        .into_iter()
        .filter(|mapping| {
            let known = entity.lookup(&mapping.field).is_some();
            if !known {
                log.push(format!(
                    "Column {} is not a field of {}, ignored",
                    mapping.field,
                    entity.qualified_name()
                ));
            }
            known
        })
        .collect();
    MappingResolution {
        mappings,
        source,
        log,
    }
}
