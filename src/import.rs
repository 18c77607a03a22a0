//! Import commands: `plays`, `players` and `weekly-stats`.

use anyhow::{Context, Result, bail};
use log::{info, warn};

use crate::{
    catalog::Catalog,
    cli::LoadOptions,
    config::{RunConfig, SourceConfig},
    fetch::{Dataset, DirectorySource, HttpSource, Partition, Source},
    load::{MemorySink, PgSink, Sink},
    pipeline::{Pipeline, RunSummary},
    schema::TableSchema,
    table::TextTable,
};

/// One import request after the command-line arguments were resolved.
#[derive(Debug, Clone)]
pub struct ImportRequest<'a> {
    pub dataset: Dataset,
    pub partitions: Vec<Partition>,
    pub tables: &'a [String],
    pub load: &'a LoadOptions,
}

impl<'a> ImportRequest<'a> {
    pub fn yearly(dataset: Dataset, years: &[u16], tables: &'a [String], load: &'a LoadOptions) -> Self {
        ImportRequest {
            dataset,
            partitions: years.iter().copied().map(Partition::Year).collect(),
            tables,
            load,
        }
    }

    pub fn snapshot(dataset: Dataset, load: &'a LoadOptions) -> Self {
        ImportRequest {
            dataset,
            partitions: vec![Partition::Snapshot],
            tables: &[],
            load,
        }
    }
}

/// Builds the catalog with every configured schema file applied.
pub fn load_catalog(config: &RunConfig) -> Result<Catalog> {
    let mut catalog = Catalog::builtin();
    for path in &config.schema_overrides {
        let schema = TableSchema::load(path)
            .with_context(|| format!("Loading schema override {path:?}"))?;
        info!("Using schema for {} from {path:?}", schema.name);
        catalog
            .override_with(schema)
            .with_context(|| format!("Applying schema override {path:?}"))?;
    }
    catalog.validate().context("Validating table catalog")?;
    Ok(catalog)
}

pub fn build_source(config: &RunConfig) -> Result<Box<dyn Source>> {
    Ok(match &config.source {
        SourceConfig::Directory { root } => {
            info!("Reading release files from {root:?}");
            Box::new(DirectorySource::new(root).with_encoding(config.encoding))
        }
        SourceConfig::Http { base_url } => {
            info!("Downloading release files from {base_url}");
            Box::new(HttpSource::new(base_url)?)
        }
    })
}

pub fn execute(request: &ImportRequest<'_>) -> Result<()> {
    let config = RunConfig::resolve(request.load)?;
    let source = build_source(&config)?;

    let summary = if config.dry_run {
        let mut sink = MemorySink::new();
        let summary = import_with(source.as_ref(), &mut sink, &config, request)?;
        for (table, rows) in sink.row_counts() {
            info!("Dry run: {table} holds {rows} row(s)");
        }
        summary
    } else {
        let url = config
            .database_url
            .as_deref()
            .context("No database URL configured")?;
        let mut sink = PgSink::connect(url)?;
        import_with(source.as_ref(), &mut sink, &config, request)?
    };

    summary_table(&summary).print();
    if let Some(path) = &config.summary_json {
        summary.write_json(path)?;
        info!("Run summary written to {path:?}");
    }
    finish(&summary)
}

fn finish(summary: &RunSummary) -> Result<()> {
    let failed = summary.failed_partitions();
    if failed == 0 {
        info!("All {} partition(s) loaded", summary.partitions.len());
        return Ok(());
    }
    for partition in summary.partitions.iter().filter(|p| p.status.is_failure()) {
        warn!(
            "{} {} failed: {}",
            partition.dataset,
            partition.partition,
            partition.error.as_deref().unwrap_or("unknown error")
        );
    }
    bail!(
        "{failed} of {} partition(s) failed{}",
        summary.partitions.len(),
        if summary.halted { "; run halted early" } else { "" }
    )
}

pub fn summary_table(summary: &RunSummary) -> TextTable {
    let mut table = TextTable::new([
        "partition", "table", "rows", "dropped", "duplicates", "malformed", "merged", "status",
    ])
    .right_align(&[2, 3, 4, 5, 6]);
    for partition in &summary.partitions {
        let status = partition.status.as_str().to_string();
        if partition.tables.is_empty() {
            table.push_row(vec![
                partition.partition.to_string(),
                "-".into(),
                partition.rows_fetched.to_string(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                status,
            ]);
            continue;
        }
        for entry in &partition.tables {
            table.push_row(vec![
                partition.partition.to_string(),
                entry.table.clone(),
                entry.rows.to_string(),
                entry.dropped.to_string(),
                entry.duplicates.to_string(),
                entry.malformed.to_string(),
                entry
                    .load
                    .as_ref()
                    .map(|l| l.merged.to_string())
                    .unwrap_or_default(),
                if entry.error.is_some() { "failed".into() } else { status.clone() },
            ]);
        }
    }
    table
}

/// Runs an import against a caller-supplied source and sink.
pub fn import_with(
    source: &dyn Source,
    sink: &mut dyn Sink,
    config: &RunConfig,
    request: &ImportRequest<'_>,
) -> Result<RunSummary> {
    let catalog = load_catalog(config)?;
    let tables = catalog.select(request.dataset, request.tables)?;
    let pipeline = Pipeline::new(source, config.pipeline)?;
    info!(
        "Importing {} {} partition(s) into {} table(s) with {} worker(s)",
        request.partitions.len(),
        request.dataset,
        tables.len(),
        config.pipeline.workers
    );
    Ok(pipeline.run(sink, request.dataset, &request.partitions, &tables))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use std::fs;

    #[test]
    fn dry_run_imports_players_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("players.csv"),
            "gsis_id,first_name,last_name,position\n00-0033873,Patrick,Mahomes,QB\n00-0033873,Patrick,Mahomes,QB\n",
        )
        .unwrap();
        let load = LoadOptions {
            source_dir: Some(dir.path().to_path_buf()),
            dry_run: true,
            workers: Some(1),
            ..LoadOptions::default()
        };
        let config = RunConfig::merge(Settings::default(), &load).unwrap();
        let source = build_source(&config).unwrap();
        let mut sink = MemorySink::new();
        let request = ImportRequest::snapshot(Dataset::Players, &load);
        let summary = import_with(source.as_ref(), &mut sink, &config, &request).unwrap();

        assert!(!summary.has_failures());
        assert_eq!(sink.table("Player").unwrap().len(), 1);
        let rendered = summary_table(&summary).render();
        assert!(rendered.contains("Player"), "{rendered}");
        assert!(rendered.contains("loaded"), "{rendered}");
    }

    #[test]
    fn failed_partitions_turn_into_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let load = LoadOptions {
            source_dir: Some(dir.path().to_path_buf()),
            dry_run: true,
            workers: Some(1),
            ..LoadOptions::default()
        };
        let config = RunConfig::merge(Settings::default(), &load).unwrap();
        let source = build_source(&config).unwrap();
        let mut sink = MemorySink::new();
        let tables = Vec::new();
        let request = ImportRequest::yearly(Dataset::PlayerStats, &[2023], &tables, &load);
        let summary = import_with(source.as_ref(), &mut sink, &config, &request).unwrap();
        assert_eq!(summary.failed_partitions(), 1);
        let err = finish(&summary).unwrap_err();
        assert!(err.to_string().contains("1 of 1 partition(s) failed"));
    }
}
