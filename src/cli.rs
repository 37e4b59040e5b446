use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Import CSV files into typed records", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import a CSV file, or every CSV file in a directory, into an entity
    Import(ImportArgs),
    /// List the fields of a catalog entity
    Fields(FieldsArgs),
    /// Show the column mapping an import would use, without importing
    Mapping(MappingArgs),
}

#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Schema catalog (YAML) describing the target entities
    #[arg(long)]
    pub catalog: PathBuf,
    /// Target entity as `context.Entity` or a bare entity name
    #[arg(short, long = "model")]
    pub model: String,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Input CSV file or directory
    #[arg(short, long)]
    pub input: PathBuf,
    #[command(flatten)]
    pub target: TargetArgs,
    /// Column mapping such as `column1=name,column2=owner(Organisation|title)`, a header
    /// name list, or `none` for positional names
    #[arg(long)]
    pub mappings: Option<String>,
    /// Default values for unset fields, e.g. `source=cron,owner=Acme(Organisation|title)`
    #[arg(long)]
    pub defaults: Option<String>,
    /// Force the input charset instead of detecting it
    #[arg(long)]
    pub charset: Option<String>,
    /// Use the first row as column labels for named locators
    #[arg(long = "use-header-as-index")]
    pub use_header_as_index: bool,
    /// Skip rows whose mapped fields already exist in the store
    #[arg(long)]
    pub deduplicate: bool,
    /// JSON record store; loaded if present and written back after the run
    #[arg(long)]
    pub store: Option<PathBuf>,
    /// Settings file (YAML) for date formats, log mode and audit metadata
    #[arg(long)]
    pub settings: Option<PathBuf>,
    /// Append the audit record to this JSON-lines file instead of the configured log mode
    #[arg(long = "audit-log")]
    pub audit_log: Option<PathBuf>,
    /// Trace every field assignment into the run log
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Args)]
pub struct FieldsArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Debug, Args)]
pub struct MappingArgs {
    /// Input CSV file
    #[arg(short, long)]
    pub input: PathBuf,
    #[command(flatten)]
    pub target: TargetArgs,
    /// Column mapping to resolve instead of the header row
    #[arg(long)]
    pub mappings: Option<String>,
    /// Force the input charset instead of detecting it
    #[arg(long)]
    pub charset: Option<String>,
    /// Use the first row as column labels for named locators
    #[arg(long = "use-header-as-index")]
    pub use_header_as_index: bool,
}
