//! Error taxonomy for the four pipeline stages.
//!
//! Fetch and load errors are recoverable at partition granularity (the caller
//! decides whether to skip or halt). Normalization errors abort the partition.
//! Coercion never errors; malformed cells are counted in a
//! [`crate::coerce::CoercionReport`] instead.

use thiserror::Error;

use crate::schema::FieldType;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("table '{table}' declares field '{field}' more than once")]
    DuplicateField { table: String, field: String },
    #[error("table '{table}' maps source column '{column}' to both '{first}' and '{second}'")]
    DuplicateSource {
        table: String,
        column: String,
        first: String,
        second: String,
    },
    #[error("table '{table}' references unknown field '{field}' as {role}")]
    UnknownField {
        table: String,
        field: String,
        role: &'static str,
    },
    #[error("table '{table}' field '{field}': null policy '{policy}' is not valid for {datatype}")]
    IllegalPolicy {
        table: String,
        field: String,
        policy: String,
        datatype: FieldType,
    },
    #[error("table '{table}' field '{field}': default '{value}' does not parse as {datatype}")]
    InvalidDefault {
        table: String,
        field: String,
        value: String,
        datatype: FieldType,
    },
    #[error("table '{table}' field '{field}' must be {expected} but is declared {actual}")]
    TypeMismatch {
        table: String,
        field: String,
        expected: FieldType,
        actual: FieldType,
    },
    #[error("table '{table}' field '{field}': source column '{column}' may never be Boolean")]
    DeniedBoolean {
        table: String,
        field: String,
        column: String,
    },
    #[error("column '{column}' appears in both the boolean allow-list and deny-list")]
    ConflictingDeclaration { column: String },
    #[error("table '{table}' has an empty key derivation for '{field}'")]
    EmptyKey { table: String, field: String },
    #[error("unknown table '{0}'")]
    UnknownTable(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing CSV from {origin}: {source}")]
    Csv {
        origin: String,
        #[source]
        source: csv::Error,
    },
    #[error("decoding {origin}: {message}")]
    Decode { origin: String, message: String },
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("table '{table}': key column '{column}' is absent from the source batch")]
    MissingKeyColumn { table: String, column: String },
    #[error("table '{table}': batch field '{field}' is not declared in the schema")]
    UnknownField { table: String, field: String },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("connecting to database: {0}")]
    Connect(#[source] postgres::Error),
    #[error("staging {rows} row(s) for '{table}': {source}")]
    Stage {
        table: String,
        rows: usize,
        #[source]
        source: postgres::Error,
    },
    #[error("merging {rows} row(s) into '{table}': {source}")]
    Merge {
        table: String,
        rows: usize,
        #[source]
        source: postgres::Error,
    },
    #[error("committing {rows} row(s) into '{table}': {source}")]
    Commit {
        table: String,
        rows: usize,
        #[source]
        source: postgres::Error,
    },
    #[error("row {row} of {rows} for '{table}' has no value for conflict key field '{field}'")]
    MissingKey {
        table: String,
        rows: usize,
        field: String,
        row: usize,
    },
    #[error("batch of {rows} row(s) for '{table}' contains conflict key '{key}' more than once")]
    DuplicateKey {
        table: String,
        rows: usize,
        key: String,
    },
}

impl LoadError {
    pub fn table(&self) -> Option<&str> {
        match self {
            LoadError::Connect(_) => None,
            LoadError::Stage { table, .. }
            | LoadError::Merge { table, .. }
            | LoadError::Commit { table, .. }
            | LoadError::MissingKey { table, .. }
            | LoadError::DuplicateKey { table, .. } => Some(table),
        }
    }
}
