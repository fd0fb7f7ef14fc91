pub mod cli;
pub mod config;
pub mod data;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod ledger;
pub mod reports;
pub mod sample;
pub mod service;
pub mod store;
pub mod synth;
pub mod table;
pub mod translate;

use std::{env, fs, path::PathBuf, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};
use serde::Serialize;

pub use crate::error::{Error, ErrorKind};

use crate::{
    cli::{Cli, Commands, OutputFormat, ReportCommands},
    config::Settings,
    service::{Service, UploadFilter, UploadedFile},
    translate::HuggingFaceModel,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sheet_sql", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let mut settings = Settings::resolve(cli.config.as_deref())
        .with_context(|| format!("Loading settings from {:?}", cli.config))?;
    if let Some(database) = cli.database {
        settings.database = database;
    }
    debug!("Using database {:?}", settings.database);
    let mut service = Service::open(&settings)
        .with_context(|| format!("Opening database {:?}", settings.database))?;

    match cli.command {
        Commands::Upload(args) => handle_upload(&mut service, &args),
        Commands::Uploads(args) => {
            let filter = UploadFilter {
                file_name: args.filename,
                search: args.search,
            };
            print_json(&service.list_uploads(&filter).context("Listing uploads")?)
        }
        Commands::Show(args) => print_json(
            &service
                .get_upload(&args.report_id)
                .with_context(|| format!("Looking up report {}", args.report_id))?,
        ),
        Commands::Download(args) => handle_download(&service, &args),
        Commands::Query(args) => handle_query(&service, &settings, &args),
        Commands::Report(ReportCommands::Create(args)) => print_json(
            &service
                .create_report(&args.title, &args.description, &args.table)
                .context("Creating report")?,
        ),
        Commands::Report(ReportCommands::List) => {
            print_json(&service.list_reports().context("Listing reports")?)
        }
        Commands::Tables => print_json(&service.list_tables().context("Listing tables")?),
        Commands::DropTable(args) => {
            service
                .drop_table(&args.name)
                .with_context(|| format!("Dropping table {}", args.name))?;
            println!("Dropped {}", args.name);
            Ok(())
        }
    }
}

fn handle_upload(service: &mut Service, args: &cli::UploadArgs) -> Result<()> {
    let bytes = fs::read(&args.file).with_context(|| format!("Reading {:?}", args.file))?;
    let file_name = args
        .file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = UploadedFile { file_name, bytes };
    let outcome = service
        .upload_detailed(
            Some(&file),
            args.title.as_deref(),
            args.description.as_deref(),
            args.encoding.as_deref(),
        )
        .with_context(|| format!("Uploading {:?}", args.file))?;
    if let Some(encoding) = &outcome.encoding {
        debug!("Decoded {} as {encoding}", file.file_name);
    }
    print_json(&outcome.record)
}

fn handle_download(service: &Service, args: &cli::DownloadArgs) -> Result<()> {
    let file = service
        .download_file(&args.report_id)
        .with_context(|| format!("Downloading report {}", args.report_id))?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&file.file_name));
    fs::write(&output, &file.bytes).with_context(|| format!("Writing {output:?}"))?;
    info!(
        "Wrote {} byte(s) of {} to {output:?}",
        file.bytes.len(),
        file.content_type
    );
    Ok(())
}

fn handle_query(service: &Service, settings: &Settings, args: &cli::QueryArgs) -> Result<()> {
    let model = HuggingFaceModel::new(&settings.model).context("Building model client")?;
    debug!("Model endpoint {}", model.url());
    let response = service
        .query(model, &args.table, &args.question)
        .with_context(|| format!("Answering question on {}", args.table))?;
    match args.format {
        OutputFormat::Json => print_json(&response),
        OutputFormat::Table => {
            println!("{}", response.generated_sql);
            let result = executor::QueryResult {
                rows: response
                    .rows
                    .iter()
                    .map(|record| {
                        response
                            .columns
                            .iter()
                            .map(|column| record.get(column).cloned().unwrap_or_default())
                            .collect()
                    })
                    .collect(),
                columns: response.columns,
            };
            print!("{}", table::render_query(&result));
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Serializing output")?;
    println!("{rendered}");
    Ok(())
}
