//! Run settings: an optional YAML file overlaid by command-line flags.

use std::{fs::File, io::BufReader, path::Path, path::PathBuf};

use anyhow::{Context, Result, anyhow};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::{
    cli::LoadOptions,
    coerce::DEFAULT_MALFORMED_TOLERANCE,
    fetch::DEFAULT_RELEASE_BASE_URL,
    io_utils,
    pipeline::{PipelineOptions, default_workers},
};

/// Contents of a `--config` file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub database_url: Option<String>,
    pub release_base_url: Option<String>,
    pub source_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub malformed_tolerance: Option<f64>,
    pub keep_going: bool,
    /// Table schema files that replace built-in tables of the same name.
    pub schemas: Vec<PathBuf>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening settings file {path:?}"))?;
        serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing settings YAML {path:?}"))
    }
}

#[derive(Debug, Clone)]
pub enum SourceConfig {
    Http { base_url: String },
    Directory { root: PathBuf },
}

/// Effective configuration for one import command.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub database_url: Option<String>,
    pub source: SourceConfig,
    pub encoding: &'static Encoding,
    pub pipeline: PipelineOptions,
    pub dry_run: bool,
    pub schema_overrides: Vec<PathBuf>,
    pub summary_json: Option<PathBuf>,
}

impl RunConfig {
    pub fn resolve(options: &LoadOptions) -> Result<Self> {
        let settings = match &options.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        Self::merge(settings, options)
    }

    /// Flags win over file values.
    pub fn merge(settings: Settings, options: &LoadOptions) -> Result<Self> {
        let source = match options.source_dir.clone().or(settings.source_dir) {
            Some(root) => SourceConfig::Directory { root },
            None => SourceConfig::Http {
                base_url: options
                    .release_base_url
                    .clone()
                    .or(settings.release_base_url)
                    .unwrap_or_else(|| DEFAULT_RELEASE_BASE_URL.to_string()),
            },
        };
        let workers = options
            .workers
            .or(settings.workers)
            .unwrap_or_else(default_workers)
            .max(1);
        let malformed_tolerance = options
            .malformed_tolerance
            .or(settings.malformed_tolerance)
            .unwrap_or(DEFAULT_MALFORMED_TOLERANCE);
        if !(0.0..=1.0).contains(&malformed_tolerance) {
            return Err(anyhow!(
                "malformed_tolerance must be between 0 and 1 (got {malformed_tolerance})"
            ));
        }
        let mut schema_overrides = settings.schemas;
        schema_overrides.extend(options.schema_overrides.iter().cloned());

        let config = RunConfig {
            database_url: options.database_url.clone().or(settings.database_url),
            source,
            encoding: io_utils::resolve_encoding(options.input_encoding.as_deref())?,
            pipeline: PipelineOptions {
                workers,
                malformed_tolerance,
                keep_going: options.keep_going || settings.keep_going,
            },
            dry_run: options.dry_run,
            schema_overrides,
            summary_json: options.summary_json.clone(),
        };
        if !config.dry_run && config.database_url.is_none() {
            return Err(anyhow!(
                "No database configured: pass --database-url, set DATABASE_URL, add database_url to --config, or use --dry-run"
            ));
        }
        Ok(config)
    }
}
