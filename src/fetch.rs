//! Source fetch: one CSV release file per partition.
//!
//! [`HttpSource`] downloads from the nflverse release pages; [`DirectorySource`]
//! reads the same file names from a local directory. Both return the whole
//! file as a [`RawBatch`].

use std::{
    fmt,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use encoding_rs::{Encoding, UTF_8};
use log::{debug, info};
use serde::Serialize;

use crate::{batch::RawBatch, error::FetchError, io_utils};

pub const DEFAULT_RELEASE_BASE_URL: &str =
    "https://github.com/nflverse/nflverse-data/releases/download";

const USER_AGENT: &str = concat!("nfl-import/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dataset {
    PlayByPlay,
    Players,
    PlayerStats,
}

impl Dataset {
    /// Release tag the file is published under.
    pub fn release_tag(&self) -> &'static str {
        match self {
            Dataset::PlayByPlay => "pbp",
            Dataset::Players => "players",
            Dataset::PlayerStats => "player_stats",
        }
    }

    pub fn file_name(&self, partition: Partition) -> String {
        match (self, partition) {
            (Dataset::PlayByPlay, Partition::Year(year)) => format!("play_by_play_{year}.csv"),
            (Dataset::PlayerStats, Partition::Year(year)) => format!("player_stats_{year}.csv"),
            (Dataset::PlayByPlay, Partition::Snapshot) => "play_by_play.csv".to_string(),
            (Dataset::PlayerStats, Partition::Snapshot) => "player_stats.csv".to_string(),
            (Dataset::Players, _) => "players.csv".to_string(),
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Dataset::PlayByPlay => "play-by-play",
            Dataset::Players => "players",
            Dataset::PlayerStats => "player-stats",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Year(u16),
    Snapshot,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Year(year) => write!(f, "{year}"),
            Partition::Snapshot => f.write_str("snapshot"),
        }
    }
}

pub trait Source: Send + Sync {
    /// Where `partition` of `dataset` is read from, for logs.
    fn locate(&self, dataset: Dataset, partition: Partition) -> String;

    fn fetch(&self, dataset: Dataset, partition: Partition) -> Result<RawBatch, FetchError>;
}

pub struct HttpSource {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| FetchError::Http {
                url: base_url.to_string(),
                source,
            })?;
        Ok(HttpSource {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl Source for HttpSource {
    fn locate(&self, dataset: Dataset, partition: Partition) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            dataset.release_tag(),
            dataset.file_name(partition)
        )
    }

    fn fetch(&self, dataset: Dataset, partition: Partition) -> Result<RawBatch, FetchError> {
        let url = self.locate(dataset, partition);
        info!("Downloading {dataset} {partition} from {url}");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|source| FetchError::Http {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { url, status });
        }
        let batch = RawBatch::from_reader(response, &url, io_utils::DEFAULT_CSV_DELIMITER, UTF_8)?;
        info!(
            "Downloaded {} row(s) x {} column(s) for {dataset} {partition}",
            batch.len(),
            batch.headers.len()
        );
        Ok(batch)
    }
}

/// Reads release files from `root`, either directly or under a
/// `<release tag>/` subdirectory.
pub struct DirectorySource {
    root: PathBuf,
    encoding: &'static Encoding,
}

impl DirectorySource {
    pub fn new(root: &Path) -> Self {
        DirectorySource {
            root: root.to_path_buf(),
            encoding: UTF_8,
        }
    }

    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    fn path_for(&self, dataset: Dataset, partition: Partition) -> PathBuf {
        let file_name = dataset.file_name(partition);
        let nested = self.root.join(dataset.release_tag()).join(&file_name);
        if nested.is_file() {
            nested
        } else {
            self.root.join(file_name)
        }
    }
}

impl Source for DirectorySource {
    fn locate(&self, dataset: Dataset, partition: Partition) -> String {
        self.path_for(dataset, partition).display().to_string()
    }

    fn fetch(&self, dataset: Dataset, partition: Partition) -> Result<RawBatch, FetchError> {
        let path = self.path_for(dataset, partition);
        let origin = path.display().to_string();
        debug!("Reading {dataset} {partition} from {origin}");
        let file = File::open(&path).map_err(|source| FetchError::Io {
            path: origin.clone(),
            source,
        })?;
        let delimiter = io_utils::resolve_input_delimiter(&path, None);
        let batch = RawBatch::from_reader(BufReader::new(file), &origin, delimiter, self.encoding)?;
        info!(
            "Read {} row(s) x {} column(s) for {dataset} {partition} from {origin}",
            batch.len(),
            batch.headers.len()
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn release_urls_follow_nflverse_layout() {
        let source = HttpSource::new(&format!("{DEFAULT_RELEASE_BASE_URL}/")).unwrap();
        assert_eq!(
            source.locate(Dataset::PlayByPlay, Partition::Year(2024)),
            "https://github.com/nflverse/nflverse-data/releases/download/pbp/play_by_play_2024.csv"
        );
        assert_eq!(
            source.locate(Dataset::Players, Partition::Snapshot),
            "https://github.com/nflverse/nflverse-data/releases/download/players/players.csv"
        );
        assert_eq!(
            source.locate(Dataset::PlayerStats, Partition::Year(2019)),
            "https://github.com/nflverse/nflverse-data/releases/download/player_stats/player_stats_2019.csv"
        );
    }

    #[test]
    fn directory_source_reads_flat_and_nested_layouts() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("players.csv"), "gsis_id,first_name\n00-1,Josh\n").unwrap();
        fs::create_dir(dir.path().join("pbp")).unwrap();
        fs::write(
            dir.path().join("pbp").join("play_by_play_2023.csv"),
            "game_id,play_id\ng,1\ng,2\n",
        )
        .unwrap();

        let source = DirectorySource::new(dir.path());
        let players = source.fetch(Dataset::Players, Partition::Snapshot).unwrap();
        assert_eq!(players.len(), 1);
        let plays = source.fetch(Dataset::PlayByPlay, Partition::Year(2023)).unwrap();
        assert_eq!(plays.len(), 2);
        assert_eq!(plays.headers, vec!["game_id", "play_id"]);
    }

    #[test]
    fn missing_partition_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let source = DirectorySource::new(dir.path());
        let err = source
            .fetch(Dataset::PlayByPlay, Partition::Year(1999))
            .unwrap_err();
        assert!(matches!(err, FetchError::Io { .. }), "{err}");
    }
}
