pub mod audit;
pub mod cli;
pub mod coerce;
pub mod config;
pub mod data;
pub mod dedup;
pub mod encoding;
pub mod error;
pub mod foreign_key;
pub mod import;
pub mod mapping;
pub mod record;
pub mod schema;
pub mod store;
pub mod table;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    audit::{AuditSink, JsonLinesSink},
    cli::{Cli, Commands},
    config::Settings,
    import::{ImportOptions, Importer, NoHooks},
    schema::{Catalog, EntitySchema, SchemaProvider},
    store::MemoryStore,
    table::Table,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_import", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Import(args) => handle_import(&args),
        Commands::Fields(args) => handle_fields(&args),
        Commands::Mapping(args) => handle_mapping(&args),
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => {
            Settings::load(path).with_context(|| format!("Loading settings from {path:?}"))
        }
        None => Ok(Settings::default()),
    }
}

fn load_catalog(path: &Path) -> Result<Catalog> {
    Catalog::load(path).with_context(|| format!("Loading catalog from {path:?}"))
}

fn find_entity<'a>(catalog: &'a Catalog, model: &str) -> Result<&'a EntitySchema> {
    catalog.entity(model).ok_or_else(|| {
        error::ImportError::UnknownEntity {
            name: model.to_string(),
        }
        .into()
    })
}

fn handle_import(args: &cli::ImportArgs) -> Result<()> {
    let settings = load_settings(args.settings.as_deref())?;
    let catalog = load_catalog(&args.target.catalog)?;
    let mut store = match &args.store {
        Some(path) => MemoryStore::load_or_default(path)
            .with_context(|| format!("Loading record store from {path:?}"))?,
        None => MemoryStore::new(),
    };
    store.apply_catalog(&catalog);

    let options = ImportOptions {
        mappings: args.mappings.clone(),
        defaults: args.defaults.clone(),
        target_entity: args.target.model.clone(),
        charset: args.charset.clone(),
        use_header_as_index: args.use_header_as_index,
        deduplicate: args.deduplicate,
        verbose: args.verbose,
    };
    debug!("Import options: {options:?}");
    let mut sink: Box<dyn AuditSink> = match &args.audit_log {
        Some(path) => Box::new(JsonLinesSink::new(path)),
        None => settings.sink(),
    };
    let importer = Importer::new(&catalog, &settings);
    let outcome = importer
        .run(&args.input, &options, &mut store, &mut NoHooks, sink.as_mut())
        .with_context(|| format!("Importing {:?}", args.input))?;

    if let Some(path) = &args.store {
        store
            .save_to(path)
            .with_context(|| format!("Writing record store to {path:?}"))?;
    }
    info!(
        "Imported {} row(s) into {} ({} duplicate(s) skipped)",
        outcome.imported, outcome.entity, outcome.duplicates
    );
    Ok(())
}

fn handle_fields(args: &cli::FieldsArgs) -> Result<()> {
    let catalog = load_catalog(&args.target.catalog)?;
    let entity = find_entity(&catalog, &args.target.model)?;
    let mut table = Table::new(["field", "kind", "related", "flags"]);
    for field in &entity.fields {
        let mut flags = Vec::new();
        if field.non_negative {
            flags.push("non-negative");
        }
        if field.unique {
            flags.push("unique");
        }
        table.push_row([
            field.name.clone(),
            field.kind.to_string(),
            field.related.clone().unwrap_or_default(),
            flags.join(","),
        ]);
    }
    println!("{}", entity.qualified_name());
    print!("{table}");
    Ok(())
}

fn handle_mapping(args: &cli::MappingArgs) -> Result<()> {
    let catalog = load_catalog(&args.target.catalog)?;
    let entity = find_entity(&catalog, &args.target.model)?;
    let (decoded, _) = encoding::read_file(&args.input, args.charset.as_deref())
        .with_context(|| format!("Reading {:?}", args.input))?;
    let header = decoded.rows.first().map(Vec::as_slice);
    let labels = header.filter(|_| args.use_header_as_index);
    let resolution = mapping::resolve(args.mappings.as_deref(), header, entity, &catalog);

    println!("Assumed charset = {}", decoded.charset.name());
    for line in &resolution.log {
        println!("{line}");
    }
    let mut table = Table::new(["column", "position", "field", "foreign key"]);
    for column in &resolution.mappings {
        let position = column
            .locator
            .resolve(labels)
            .map(|idx| (idx + 1).to_string())
            .unwrap_or_else(|| "-".to_string());
        let foreign_key = column
            .foreign_key
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        table.push_row([
            column.locator.to_string(),
            position,
            column.field.clone(),
            foreign_key,
        ]);
    }
    if table.is_empty() {
        println!("No fields in the CSV file match {}", entity.qualified_name());
    } else {
        print!("{table}");
    }
    Ok(())
}
