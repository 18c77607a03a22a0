use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Import nflverse statistics into PostgreSQL", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import play-by-play seasons into Game, Play and the per-play tables
    Plays(PlaysArgs),
    /// Import the player roster snapshot
    Players(PlayersArgs),
    /// Import player weekly stats seasons
    WeeklyStats(WeeklyStatsArgs),
    /// List catalog tables and fields, or export a table schema as YAML
    Schema(SchemaArgs),
    /// Normalize and type a local CSV for one table without touching a database
    Normalize(NormalizeArgs),
}

/// Options shared by every command that loads data.
#[derive(Debug, Clone, Default, Args)]
pub struct LoadOptions {
    /// YAML settings file (database_url, source_dir, workers, ...)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,
    /// Base URL of the nflverse release downloads
    #[arg(long = "release-base-url")]
    pub release_base_url: Option<String>,
    /// Read release files from this directory instead of downloading them
    #[arg(long = "source-dir")]
    pub source_dir: Option<PathBuf>,
    /// Character encoding of local source files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Worker threads for per-table preparation (1 disables the pool)
    #[arg(long, value_parser = parse_workers)]
    pub workers: Option<usize>,
    /// Fraction of malformed values per column tolerated before warning
    #[arg(long = "malformed-tolerance", value_parser = parse_tolerance)]
    pub malformed_tolerance: Option<f64>,
    /// Record failed partitions and continue with the next one
    #[arg(long = "keep-going")]
    pub keep_going: bool,
    /// Load into memory only and print per-table counts
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Table schema YAML replacing the built-in table of the same name
    #[arg(long = "schema", action = clap::ArgAction::Append)]
    pub schema_overrides: Vec<PathBuf>,
    /// Write the run summary as JSON to this path
    #[arg(long = "summary-json")]
    pub summary_json: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PlaysArgs {
    /// Seasons to import, e.g. `2024`, `2019-2024` or `2019,2021`
    #[arg(long, value_parser = parse_years, default_value = "1999-2024")]
    pub years: Years,
    /// Restrict the import to these tables (comma-separated)
    #[arg(long = "tables", value_delimiter = ',')]
    pub tables: Vec<String>,
    #[command(flatten)]
    pub load: LoadOptions,
}

#[derive(Debug, Args)]
pub struct PlayersArgs {
    #[command(flatten)]
    pub load: LoadOptions,
}

#[derive(Debug, Args)]
pub struct WeeklyStatsArgs {
    /// Seasons to import, e.g. `2024`, `1999-2024` or `2019,2021`
    #[arg(long, value_parser = parse_years, default_value = "1999-2024")]
    pub years: Years,
    #[command(flatten)]
    pub load: LoadOptions,
}

#[derive(Debug, Args)]
pub struct SchemaArgs {
    /// Show the fields of this table instead of the table list
    #[arg(short, long)]
    pub table: Option<String>,
    /// Write the selected table's schema as YAML to this path
    #[arg(long, requires = "table")]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// Input CSV file (`-` reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Catalog table whose schema drives normalization
    #[arg(long)]
    pub table: String,
    /// Schema YAML used instead of the built-in table definition
    #[arg(long)]
    pub schema: Option<PathBuf>,
    /// Output CSV file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// CSV delimiter character for reading input
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Delimiter to use for output (defaults to comma)
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Fraction of malformed values per column tolerated before warning
    #[arg(long = "malformed-tolerance", value_parser = parse_tolerance)]
    pub malformed_tolerance: Option<f64>,
}

/// Ordered, de-duplicated list of seasons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Years(pub Vec<u16>);

const FIRST_SEASON: u16 = 1999;
const LAST_SEASON: u16 = 2100;

fn parse_season(value: &str) -> Result<u16, String> {
    let year: u16 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a season year"))?;
    if !(FIRST_SEASON..=LAST_SEASON).contains(&year) {
        return Err(format!(
            "season {year} is outside {FIRST_SEASON}-{LAST_SEASON}"
        ));
    }
    Ok(year)
}

pub fn parse_years(value: &str) -> Result<Years, String> {
    let mut years = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse_season(start)?, parse_season(end)?);
                if start > end {
                    return Err(format!("season range '{part}' runs backwards"));
                }
                years.extend(start..=end);
            }
            None => years.push(parse_season(part)?),
        }
    }
    if years.is_empty() {
        return Err("at least one season is required".to_string());
    }
    years.sort_unstable();
    years.dedup();
    Ok(Years(years))
}

pub fn parse_workers(value: &str) -> Result<usize, String> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err("workers must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("'{value}' is not a worker count")),
    }
}

pub fn parse_tolerance(value: &str) -> Result<f64, String> {
    let parsed: f64 = value
        .trim()
        .trim_end_matches('%')
        .parse()
        .map_err(|_| format!("'{value}' is not a fraction"))?;
    let fraction = if value.trim().ends_with('%') {
        parsed / 100.0
    } else {
        parsed
    };
    if !(0.0..=1.0).contains(&fraction) {
        return Err("tolerance must be between 0 and 1 (or 0% and 100%)".to_string());
    }
    Ok(fraction)
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn years_accept_ranges_and_lists() {
        assert_eq!(parse_years("2019-2021").unwrap(), Years(vec![2019, 2020, 2021]));
        assert_eq!(
            parse_years("2024, 2019,2019").unwrap(),
            Years(vec![2019, 2024])
        );
        assert!(parse_years("2021-2019").is_err());
        assert!(parse_years("1998").is_err());
        assert!(parse_years("").is_err());
    }

    #[test]
    fn tolerance_accepts_fraction_or_percent() {
        assert_eq!(parse_tolerance("0.1").unwrap(), 0.1);
        assert_eq!(parse_tolerance("5%").unwrap(), 0.05);
        assert!(parse_tolerance("150%").is_err());
    }

    #[test]
    fn workers_must_be_positive() {
        assert_eq!(parse_workers("4").unwrap(), 4);
        assert!(parse_workers("0").is_err());
    }

    #[test]
    fn plays_command_parses_tables_and_flags() {
        let cli = Cli::try_parse_from([
            "nfl-import",
            "plays",
            "--years",
            "2023-2024",
            "--tables",
            "Game,Play",
            "--dry-run",
            "--workers",
            "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Plays(args) => {
                assert_eq!(args.years, Years(vec![2023, 2024]));
                assert_eq!(args.tables, vec!["Game", "Play"]);
                assert!(args.load.dry_run);
                assert_eq!(args.load.workers, Some(2));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
