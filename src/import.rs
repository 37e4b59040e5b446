//! Import orchestration.
//!
//! One run loads and decodes the input, resolves the column mapping once, then
//! walks the data rows in file order: map and coerce every column, resolve
//! relations, fill unset defaults, optionally skip duplicates and persist.
//! Data problems never abort the run; they are collected in the returned
//! [`RunLog`], which always holds at least one line.

use std::path::Path;

use log::{debug, info, warn};

use crate::{
    audit::{AuditRecord, AuditSink, RunLog},
    coerce::Coercer,
    config::Settings,
    data::{RecordRef, Value},
    dedup,
    encoding::{self, LoadedFile, RawRow},
    error::ImportError,
    foreign_key::ForeignKeyResolver,
    mapping::{self, ColumnMapping, DefaultSpec, ForeignKeySpec, MappingSource},
    record::CandidateRecord,
    schema::{EntitySchema, SchemaProvider},
    store::RecordStore,
};

pub const MANUAL_MAPPING_BANNER: &str = "Using manually entered (or default) mapping list";
pub const HEADER_MAPPING_BANNER: &str = "Using mapping from first row of CSV file";

/// Parameters of a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Explicit mapping, a comma-separated header name list, or `none`.
    pub mappings: Option<String>,
    pub defaults: Option<String>,
    pub target_entity: String,
    /// Forced charset label; detected when absent.
    pub charset: Option<String>,
    /// Consume the first row as index labels for name locators.
    pub use_header_as_index: bool,
    pub deduplicate: bool,
    /// Trace every assignment into the run log.
    pub verbose: bool,
}

impl ImportOptions {
    pub fn new(target_entity: impl Into<String>) -> Self {
        Self {
            target_entity: target_entity.into(),
            ..Self::default()
        }
    }
}

/// Callbacks around each save. `row` pairs every cell with its header label.
pub trait ImportHooks {
    fn importing(&mut self, _candidate: &CandidateRecord<'_>, _row: &[(&str, &str)]) {}

    fn imported(
        &mut self,
        _reference: &RecordRef,
        _candidate: &CandidateRecord<'_>,
        _row: &[(&str, &str)],
    ) {
    }
}

pub struct NoHooks;

impl ImportHooks for NoHooks {}

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub entity: String,
    pub log: RunLog,
    pub imported: usize,
    pub duplicates: usize,
    pub files: Vec<LoadedFile>,
    pub charset: String,
}

impl ImportOutcome {
    fn new(entity: &EntitySchema, log: RunLog) -> Self {
        Self {
            entity: entity.qualified_name(),
            log,
            imported: 0,
            duplicates: 0,
            files: Vec::new(),
            charset: String::new(),
        }
    }
}

pub struct Importer<'a> {
    provider: &'a dyn SchemaProvider,
    coercer: Coercer,
    extension: String,
    default_context: Option<String>,
    import_user: String,
    upload_method: String,
}

impl<'a> Importer<'a> {
    pub fn new(provider: &'a dyn SchemaProvider, settings: &Settings) -> Self {
        Self {
            provider,
            coercer: settings.coercer(),
            extension: settings.extension().to_string(),
            default_context: settings.default_context.clone(),
            import_user: settings.import_user.clone(),
            upload_method: settings.upload_method.clone(),
        }
    }

    pub fn entity(&self, identifier: &str) -> Result<&'a EntitySchema, ImportError> {
        self.provider
            .entity(identifier)
            .ok_or_else(|| ImportError::UnknownEntity {
                name: identifier.to_string(),
            })
    }

    /// Imports a file or a directory of files and hands the run's audit
    /// record to `sink`.
    pub fn run(
        &self,
        input: &Path,
        options: &ImportOptions,
        store: &mut dyn RecordStore,
        hooks: &mut dyn ImportHooks,
        sink: &mut dyn AuditSink,
    ) -> Result<ImportOutcome, ImportError> {
        let loaded = encoding::load_input(input, options.charset.as_deref(), &self.extension)?;
        let charset = loaded.charset_names();
        info!(
            "Importing {} row(s) from {} file(s) into {}",
            loaded.rows.len(),
            loaded.files.len(),
            options.target_entity
        );
        let labelled = options.use_header_as_index
            || options.mappings.as_deref().is_none_or(|m| m.trim().is_empty());
        let rows = if labelled {
            drop_repeated_headers(loaded.rows, &loaded.files)
        } else {
            loaded.rows
        };
        let mut outcome = self.process(rows, loaded.diagnostics, options, store, hooks)?;
        outcome.files = loaded.files;
        outcome.charset = charset;

        let record = AuditRecord::from_log(
            input,
            &self.import_user,
            &self.upload_method,
            &outcome.charset,
            &outcome.log,
        );
        if let Err(err) = sink.emit(&record, &outcome.log) {
            warn!("Failed to emit audit record for {input:?}: {err:#}");
        }
        Ok(outcome)
    }

    /// Imports already decoded rows.
    pub fn import_rows(
        &self,
        rows: Vec<RawRow>,
        options: &ImportOptions,
        store: &mut dyn RecordStore,
        hooks: &mut dyn ImportHooks,
    ) -> Result<ImportOutcome, ImportError> {
        self.process(rows, Vec::new(), options, store, hooks)
    }

    fn process(
        &self,
        mut rows: Vec<RawRow>,
        decode_diagnostics: Vec<String>,
        options: &ImportOptions,
        store: &mut dyn RecordStore,
        hooks: &mut dyn ImportHooks,
    ) -> Result<ImportOutcome, ImportError> {
        let entity = self.entity(&options.target_entity)?;
        let mut log = RunLog::new();
        for line in decode_diagnostics {
            log.info(line);
        }

        let labels = if options.use_header_as_index && !rows.is_empty() {
            Some(rows.remove(0))
        } else {
            None
        };
        let header = labels.as_deref().or_else(|| rows.first().map(Vec::as_slice));
        let resolution =
            mapping::resolve(options.mappings.as_deref(), header, entity, self.provider);
        log.info(match resolution.source {
            MappingSource::Explicit => MANUAL_MAPPING_BANNER,
            MappingSource::Header => HEADER_MAPPING_BANNER,
        });
        for line in &resolution.log {
            log.info(line.as_str());
        }
        if resolution.is_empty() {
            log.info(format!(
                "No fields in the CSV file match {} - you must add a header field name row \
                 to the CSV file or supply a mapping list",
                entity.qualified_name()
            ));
            return Ok(ImportOutcome::new(entity, log));
        }
        debug!("Mapping: {}", mapping::format_mappings(&resolution.mappings));

        let defaults = self.known_defaults(entity, options, &mut log);
        let start = match (resolution.source, labels.is_some()) {
            (MappingSource::Header, false) => 1,
            _ => 0,
        };
        let header_row = match header {
            Some(cells) if labels.is_some() || start == 1 => cells.to_vec(),
            _ => mapping::positional_names(rows.first().map_or(0, Vec::len)),
        };

        let default_context = self
            .default_context
            .clone()
            .unwrap_or_else(|| entity.context.clone());
        let mapper = RowMapper {
            entity,
            coercer: &self.coercer,
            resolver: ForeignKeyResolver::new(self.provider, &self.coercer, default_context),
            verbose: options.verbose,
        };

        let mut outcome = ImportOutcome::new(entity, RunLog::new());
        for (index, row) in rows.iter().enumerate().skip(start) {
            let mut row_log = RowLog::new(index - start);
            let mut candidate = CandidateRecord::new(entity);
            mapper.map_columns(
                store,
                &mut candidate,
                &resolution.mappings,
                labels.as_deref(),
                row,
                &mut row_log,
            );
            mapper.apply_defaults(store, &mut candidate, &defaults, &mut row_log);

            if options.deduplicate {
                match dedup::is_duplicate(&candidate, &resolution.mappings, store) {
                    Ok(true) => {
                        debug!("Row {} already stored; skipping", row_log.index);
                        outcome.duplicates += 1;
                        log.row(row_log.index, row_log.lines);
                        continue;
                    }
                    Ok(false) => {}
                    Err(err) => row_log.push(format!(
                        "row {}: Duplicate check failed: {err}",
                        row_log.index
                    )),
                }
            }

            let labelled = header_row
                .iter()
                .map(String::as_str)
                .zip(row.iter().map(String::as_str))
                .collect::<Vec<_>>();
            hooks.importing(&candidate, &labelled);
            match store.save(&outcome.entity, candidate.values().clone()) {
                Ok(reference) => {
                    outcome.imported += 1;
                    hooks.imported(&reference, &candidate, &labelled);
                }
                Err(err) if err.is_duplicate_key() => {
                    debug!("Row {} not saved: {err}", row_log.index);
                }
                Err(err) => row_log.push(format!(
                    "row {}: Database Error: {err}, Number: {}",
                    row_log.index,
                    err.code()
                )),
            }
            log.row(row_log.index, row_log.lines);
        }

        let summary = format!("Imported {} rows to {}", outcome.imported, entity.name);
        info!("{summary}");
        log.summarize(summary);
        outcome.log = log;
        Ok(outcome)
    }

    fn known_defaults(
        &self,
        entity: &EntitySchema,
        options: &ImportOptions,
        log: &mut RunLog,
    ) -> Vec<DefaultSpec> {
        let Some(spec) = options.defaults.as_deref() else {
            return Vec::new();
        };
        mapping::parse_defaults(spec)
            .into_iter()
            .filter(|default| {
                let known = entity.lookup(&default.field).is_some();
                if !known {
                    log.info(format!(
                        "Default {} is not a field of {}, ignored",
                        default.field,
                        entity.qualified_name()
                    ));
                }
                known
            })
            .collect()
    }
}

/// Drops a later file's first row when it repeats the first file's header.
fn drop_repeated_headers(rows: Vec<RawRow>, files: &[LoadedFile]) -> Vec<RawRow> {
    let Some(header) = rows.first().cloned() else {
        return rows;
    };
    let starts = files
        .iter()
        .scan(0, |offset, file| {
            let start = *offset;
            *offset += file.rows;
            Some(start)
        })
        .skip(1)
        .collect::<Vec<_>>();
    rows.into_iter()
        .enumerate()
        .filter(|(idx, row)| {
            let repeated = starts.contains(idx) && *row == header;
            if repeated {
                debug!("Skipping repeated header at row {idx}");
            }
            !repeated
        })
        .map(|(_, row)| row)
        .collect()
}

struct RowLog {
    index: usize,
    lines: Vec<String>,
}

impl RowLog {
    fn new(index: usize) -> Self {
        Self {
            index,
            lines: Vec::new(),
        }
    }

    fn push(&mut self, line: String) {
        self.lines.push(line);
    }
}

struct RowMapper<'r> {
    entity: &'r EntitySchema,
    coercer: &'r Coercer,
    resolver: ForeignKeyResolver<'r>,
    verbose: bool,
}

impl RowMapper<'_> {
    fn map_columns(
        &self,
        store: &mut dyn RecordStore,
        candidate: &mut CandidateRecord<'_>,
        mappings: &[ColumnMapping],
        labels: Option<&[String]>,
        row: &[String],
        row_log: &mut RowLog,
    ) {
        for column in mappings {
            let Some(position) = column.locator.resolve(labels) else {
                continue;
            };
            let Some(raw) = row.get(position) else {
                row_log.push(format!(
                    "row {}: Column {} has no {} so is left unset",
                    row_log.index, column.field, column.locator
                ));
                continue;
            };
            self.set_field(
                store,
                candidate,
                &column.field,
                column.foreign_key.as_ref(),
                raw,
                row_log,
            );
        }
    }

    fn apply_defaults(
        &self,
        store: &mut dyn RecordStore,
        candidate: &mut CandidateRecord<'_>,
        defaults: &[DefaultSpec],
        row_log: &mut RowLog,
    ) {
        for default in defaults {
            if candidate.is_set(&default.field) {
                continue;
            }
            self.set_field(
                store,
                candidate,
                &default.field,
                default.foreign_key.as_ref(),
                &default.raw_value,
                row_log,
            );
        }
    }

    fn set_field(
        &self,
        store: &mut dyn RecordStore,
        candidate: &mut CandidateRecord<'_>,
        key: &str,
        foreign_key: Option<&ForeignKeySpec>,
        raw: &str,
        row_log: &mut RowLog,
    ) {
        let Some(lookup) = self.entity.lookup(key) else {
            return;
        };
        if self.verbose {
            row_log.push(format!("{}.{key} = \"{raw}\"", self.entity.name));
        }
        let value = match foreign_key {
            Some(spec) if !lookup.by_id => {
                match self
                    .resolver
                    .resolve(store, spec, raw, row_log.index, &mut row_log.lines)
                {
                    Ok(Some(reference)) => Value::Reference(reference),
                    Ok(None) => Value::Null,
                    Err(err) => {
                        row_log.push(format!(
                            "row {}: Column {key} = {raw} could not be resolved, {err}",
                            row_log.index
                        ));
                        return;
                    }
                }
            }
            _ => {
                let coerced = self.coercer.coerce(lookup.spec, raw, row_log.index);
                row_log.lines.extend(coerced.diagnostics);
                match (lookup.spec.related.as_deref(), coerced.value) {
                    (Some(related), Value::Integer(id)) if lookup.spec.is_relation() => {
                        Value::Reference(RecordRef::new(
                            self.resolver.related_entity(related),
                            id.unsigned_abs(),
                        ))
                    }
                    (_, value) => value,
                }
            }
        };
        if let Err(err) = candidate.assign(key, value) {
            row_log.push(format!("row {}: {err}", row_log.index));
        }
    }
}
