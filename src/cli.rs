use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load spreadsheets into SQL tables and query them in plain language",
    long_about = None
)]
pub struct Cli {
    /// Optional YAML settings file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Database file (overrides settings and SHEET_SQL_DATABASE)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ingest a CSV or XLSX file into a new table and record it in the ledger
    Upload(UploadArgs),
    /// List recorded uploads, newest first
    Uploads(UploadsArgs),
    /// Show one upload record
    Show(ShowArgs),
    /// Regenerate an uploaded file from its stored sample
    Download(DownloadArgs),
    /// Ask a question about a table in plain language
    Query(QueryArgs),
    /// Create or list report definitions
    #[command(subcommand)]
    Report(ReportCommands),
    /// List synthesized tables with their schema and sample
    Tables,
    /// Drop a synthesized table together with its sample and reports
    DropTable(DropTableArgs),
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// File to ingest (.csv or .xlsx)
    pub file: PathBuf,
    /// Optional title stored with the upload
    #[arg(long)]
    pub title: Option<String>,
    /// Optional description stored with the upload
    #[arg(long)]
    pub description: Option<String>,
    /// Character encoding of a CSV file (detected when omitted)
    #[arg(long)]
    pub encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct UploadsArgs {
    /// Only show uploads of this original filename
    #[arg(long)]
    pub filename: Option<String>,
    /// Case-insensitive search over filename, table, title and description
    #[arg(long)]
    pub search: Option<String>,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Report id of the upload
    pub report_id: String,
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Report id of the upload
    pub report_id: String,
    /// Output path (defaults to the original filename)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Name of the synthesized table
    pub table: String,
    /// Question to answer
    pub question: String,
    /// How to print the result
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Debug, Subcommand)]
pub enum ReportCommands {
    /// Define a report over an existing table
    Create(ReportCreateArgs),
    /// List report definitions with a sample of their table
    List,
}

#[derive(Debug, Args)]
pub struct ReportCreateArgs {
    #[arg(long)]
    pub title: String,
    #[arg(long)]
    pub description: String,
    /// Backing table name
    #[arg(long)]
    pub table: String,
}

#[derive(Debug, Args)]
pub struct DropTableArgs {
    /// Name of the synthesized table
    pub name: String,
}
