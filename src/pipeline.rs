//! Partition orchestration: fetch, prepare every table, load in order.
//!
//! Partitions run one after another. Within a partition the per-table
//! normalize + coerce + dedup work reads the shared raw batch on a bounded
//! rayon pool; the prepared batches are then loaded sequentially, in catalog
//! order, through a single [`Sink`].

use std::{fs::File, io::BufWriter, path::Path, thread::available_parallelism, time::Instant};

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use log::{error, info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};
use serde::Serialize;

use crate::{
    batch::{RawBatch, TypedBatch},
    coerce::{Coercer, CoercionReport, DEFAULT_MALFORMED_TOLERANCE},
    error::NormalizeError,
    fetch::{Dataset, Partition, Source},
    load::{LoadReport, Sink},
    normalize::normalize,
    schema::TableSchema,
};

pub fn default_workers() -> usize {
    available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(1)
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub workers: usize,
    pub malformed_tolerance: f64,
    pub keep_going: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            workers: default_workers(),
            malformed_tolerance: DEFAULT_MALFORMED_TOLERANCE,
            keep_going: false,
        }
    }
}

/// One table's batch, ready to load.
#[derive(Debug, Clone)]
pub struct PreparedTable {
    pub batch: TypedBatch,
    pub coercion: CoercionReport,
    pub dropped: usize,
    pub duplicates: usize,
    pub missing_key: usize,
}

/// Runs normalize, coerce and keep-first dedup for one table.
pub fn prepare_table(
    raw: &RawBatch,
    schema: &TableSchema,
    load_time: NaiveDateTime,
    tolerance: f64,
) -> Result<PreparedTable, NormalizeError> {
    let normalized = normalize(raw, schema)?;
    let dropped = normalized.dropped;
    let (mut batch, coercion) = Coercer::new(schema, load_time)
        .with_tolerance(tolerance)
        .coerce(normalized)?;
    let outcome = batch.dedup_keep_first(&schema.conflict_fields());
    if outcome.duplicates > 0 || outcome.missing_key > 0 {
        info!(
            "{}: removed {} duplicate key(s) and {} row(s) with a null conflict key",
            schema.name, outcome.duplicates, outcome.missing_key
        );
    }
    Ok(PreparedTable {
        batch,
        coercion,
        dropped,
        duplicates: outcome.duplicates,
        missing_key: outcome.missing_key,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    Loaded,
    FetchFailed,
    NormalizeFailed,
    LoadFailed,
}

impl PartitionStatus {
    pub fn is_failure(&self) -> bool {
        !matches!(self, PartitionStatus::Loaded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionStatus::Loaded => "loaded",
            PartitionStatus::FetchFailed => "fetch_failed",
            PartitionStatus::NormalizeFailed => "normalize_failed",
            PartitionStatus::LoadFailed => "load_failed",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TableSummary {
    pub table: String,
    pub rows: usize,
    pub dropped: usize,
    pub duplicates: usize,
    pub malformed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionSummary {
    pub dataset: Dataset,
    pub partition: Partition,
    pub status: PartitionStatus,
    pub rows_fetched: usize,
    pub tables: Vec<TableSummary>,
    pub elapsed_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: NaiveDateTime,
    pub partitions: Vec<PartitionSummary>,
    /// Set when a failure stopped the run before every partition was tried.
    pub halted: bool,
}

impl RunSummary {
    pub fn failed_partitions(&self) -> usize {
        self.partitions
            .iter()
            .filter(|p| p.status.is_failure())
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed_partitions() > 0
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating summary file {path:?}"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Writing run summary to {path:?}"))
    }
}

pub struct Pipeline<'a> {
    source: &'a dyn Source,
    options: PipelineOptions,
    pool: Option<ThreadPool>,
}

impl<'a> Pipeline<'a> {
    pub fn new(source: &'a dyn Source, options: PipelineOptions) -> Result<Self> {
        let pool = if options.workers > 1 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(options.workers)
                .thread_name(|idx| format!("nfl-import-{idx}"))
                .build()
                .context("Building the table worker pool")?;
            Some(pool)
        } else {
            None
        };
        Ok(Pipeline {
            source,
            options,
            pool,
        })
    }

    pub fn run(
        &self,
        sink: &mut dyn Sink,
        dataset: Dataset,
        partitions: &[Partition],
        tables: &[&TableSchema],
    ) -> RunSummary {
        let mut summary = RunSummary {
            started_at: Utc::now().naive_utc(),
            partitions: Vec::with_capacity(partitions.len()),
            halted: false,
        };
        for (idx, partition) in partitions.iter().enumerate() {
            let result = self.run_partition(sink, dataset, *partition, tables);
            let halt = matches!(
                result.status,
                PartitionStatus::NormalizeFailed | PartitionStatus::LoadFailed
            ) && !self.options.keep_going;
            summary.partitions.push(result);
            if halt {
                let remaining = partitions.len() - idx - 1;
                if remaining > 0 {
                    warn!(
                        "Stopping after failed {dataset} {partition}; {remaining} partition(s) not attempted (use --keep-going to continue)"
                    );
                    summary.halted = true;
                }
                break;
            }
        }
        summary
    }

    fn prepare_all(
        &self,
        raw: &RawBatch,
        tables: &[&TableSchema],
        load_time: NaiveDateTime,
    ) -> Vec<Result<PreparedTable, NormalizeError>> {
        let tolerance = self.options.malformed_tolerance;
        match &self.pool {
            Some(pool) => pool.install(|| {
                tables
                    .par_iter()
                    .map(|schema| prepare_table(raw, schema, load_time, tolerance))
                    .collect()
            }),
            None => tables
                .iter()
                .map(|schema| prepare_table(raw, schema, load_time, tolerance))
                .collect(),
        }
    }

    pub fn run_partition(
        &self,
        sink: &mut dyn Sink,
        dataset: Dataset,
        partition: Partition,
        tables: &[&TableSchema],
    ) -> PartitionSummary {
        let started = Instant::now();
        let mut summary = PartitionSummary {
            dataset,
            partition,
            status: PartitionStatus::Loaded,
            rows_fetched: 0,
            tables: Vec::with_capacity(tables.len()),
            elapsed_ms: 0,
            error: None,
        };

        info!("Starting {dataset} {partition}");
        let raw = match self.source.fetch(dataset, partition) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("Skipping {dataset} {partition}: {err}");
                summary.status = PartitionStatus::FetchFailed;
                summary.error = Some(err.to_string());
                summary.elapsed_ms = started.elapsed().as_millis();
                return summary;
            }
        };
        summary.rows_fetched = raw.len();

        let load_time = Utc::now().naive_utc();
        let mut prepared = Vec::with_capacity(tables.len());
        for result in self.prepare_all(&raw, tables, load_time) {
            match result {
                Ok(table) => prepared.push(table),
                Err(err) => {
                    error!("{dataset} {partition}: {err}");
                    summary.status = PartitionStatus::NormalizeFailed;
                    summary.error = Some(err.to_string());
                    summary.elapsed_ms = started.elapsed().as_millis();
                    return summary;
                }
            }
        }
        drop(raw);

        for (schema, table) in tables.iter().zip(prepared) {
            let mut entry = TableSummary {
                table: schema.name.clone(),
                rows: table.batch.len(),
                dropped: table.dropped + table.missing_key,
                duplicates: table.duplicates,
                malformed: table.coercion.malformed_total(),
                load: None,
                error: None,
            };
            match sink.upsert(schema, &table.batch) {
                Ok(report) => entry.load = Some(report),
                Err(err) => {
                    error!(
                        "{dataset} {partition}: load into {} rolled back: {err}",
                        err.table().unwrap_or(&schema.name)
                    );
                    entry.error = Some(err.to_string());
                    summary.tables.push(entry);
                    summary.status = PartitionStatus::LoadFailed;
                    summary.error = Some(err.to_string());
                    break;
                }
            }
            summary.tables.push(entry);
        }

        summary.elapsed_ms = started.elapsed().as_millis();
        if !summary.status.is_failure() {
            info!(
                "Finished {dataset} {partition}: {} table(s) from {} row(s) in {} ms",
                summary.tables.len(),
                summary.rows_fetched,
                summary.elapsed_ms
            );
        }
        summary
    }
}
