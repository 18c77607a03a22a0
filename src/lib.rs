pub mod batch;
pub mod catalog;
pub mod cli;
pub mod coerce;
pub mod columns;
pub mod config;
pub mod data;
pub mod error;
pub mod fetch;
pub mod import;
pub mod io_utils;
pub mod load;
pub mod normalize;
pub mod pipeline;
pub mod schema;
pub mod table;

use std::{env, fs::File, io, sync::OnceLock};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{LevelFilter, info, warn};

use crate::{
    batch::RawBatch,
    catalog::Catalog,
    cli::{Cli, Commands, NormalizeArgs},
    coerce::DEFAULT_MALFORMED_TOLERANCE,
    fetch::Dataset,
    import::ImportRequest,
    pipeline::prepare_table,
    schema::TableSchema,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("nfl_import", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Plays(args) => import::execute(&ImportRequest::yearly(
            Dataset::PlayByPlay,
            &args.years.0,
            &args.tables,
            &args.load,
        )),
        Commands::Players(args) => {
            import::execute(&ImportRequest::snapshot(Dataset::Players, &args.load))
        }
        Commands::WeeklyStats(args) => import::execute(&ImportRequest::yearly(
            Dataset::PlayerStats,
            &args.years.0,
            &[],
            &args.load,
        )),
        Commands::Schema(args) => columns::execute(&args),
        Commands::Normalize(args) => handle_normalize(&args),
    }
}

fn handle_normalize(args: &NormalizeArgs) -> Result<()> {
    let catalog = Catalog::builtin();
    let schema = match &args.schema {
        Some(path) => {
            let schema = TableSchema::load(path)
                .with_context(|| format!("Loading schema from {path:?}"))?;
            schema.validate(catalog.declarations())?;
            schema
        }
        None => catalog.require(&args.table)?.clone(),
    };
    if schema.name != args.table {
        warn!(
            "Schema file describes {} but --table names {}",
            schema.name, args.table
        );
    }

    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    let origin = args.input.display().to_string();
    info!(
        "Normalizing '{origin}' as {} with delimiter '{}'",
        schema.name,
        printable_delimiter(delimiter)
    );
    let raw = if io_utils::is_dash(&args.input) {
        RawBatch::from_reader(io::stdin().lock(), "stdin", delimiter, encoding)?
    } else {
        let file = File::open(&args.input)
            .with_context(|| format!("Opening input file {:?}", args.input))?;
        RawBatch::from_reader(file, &origin, delimiter, encoding)?
    };

    let tolerance = args
        .malformed_tolerance
        .unwrap_or(DEFAULT_MALFORMED_TOLERANCE);
    let prepared = prepare_table(&raw, &schema, Utc::now().naive_utc(), tolerance)?;

    let output_delimiter = args
        .output_delimiter
        .unwrap_or(io_utils::DEFAULT_CSV_DELIMITER);
    let mut writer = io_utils::open_csv_writer(args.output.as_deref(), output_delimiter)?;
    writer
        .write_record(&prepared.batch.fields)
        .context("Writing output headers")?;
    for row in &prepared.batch.rows {
        writer
            .write_record(
                row.iter()
                    .map(|cell| cell.as_ref().map(|v| v.as_display()).unwrap_or_default()),
            )
            .context("Writing output row")?;
    }
    writer.flush().context("Flushing output")?;

    info!(
        "{}: {} row(s) written, {} dropped, {} duplicate(s), {} malformed value(s)",
        schema.name,
        prepared.batch.len(),
        prepared.dropped + prepared.missing_key,
        prepared.duplicates,
        prepared.coercion.malformed_total()
    );
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
