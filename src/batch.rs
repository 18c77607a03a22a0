//! In-memory batch shapes passed between the pipeline stages.
//!
//! [`RawBatch`] is what the fetcher produces: the source headers and every row
//! as strings. [`NormalizedBatch`] has exactly the target fields (primary key
//! first) with `None` for missing cells. [`TypedBatch`] carries coerced
//! [`Value`]s and is what the loader stages.

use std::{collections::HashSet, io::Read};

use encoding_rs::Encoding;

use crate::{data::Value, error::FetchError, io_utils, schema::FieldType};

#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    pub origin: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawBatch {
    pub fn new(origin: &str, headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        RawBatch {
            origin: origin.to_string(),
            headers,
            rows,
        }
    }

    pub fn from_reader<R: Read>(
        reader: R,
        origin: &str,
        delimiter: u8,
        encoding: &'static Encoding,
    ) -> Result<Self, FetchError> {
        let mut csv_reader = io_utils::open_csv_reader(reader, delimiter);
        let headers = io_utils::reader_headers(&mut csv_reader, encoding).map_err(|err| {
            FetchError::Decode {
                origin: origin.to_string(),
                message: err.to_string(),
            }
        })?;
        let mut rows = Vec::new();
        for (row_idx, record) in csv_reader.byte_records().enumerate() {
            let record = record.map_err(|source| FetchError::Csv {
                origin: origin.to_string(),
                source,
            })?;
            let decoded = io_utils::decode_record(&record, encoding).map_err(|err| {
                FetchError::Decode {
                    origin: origin.to_string(),
                    message: format!("row {}: {err}", row_idx + 2),
                }
            })?;
            rows.push(decoded);
        }
        Ok(RawBatch::new(origin, headers, rows))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub table: String,
    pub fields: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    /// Rows discarded because their key or a required field was missing.
    pub dropped: usize,
}

impl NormalizedBatch {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedBatch {
    pub table: String,
    pub fields: Vec<String>,
    pub types: Vec<FieldType>,
    pub rows: Vec<Vec<Option<Value>>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupOutcome {
    pub duplicates: usize,
    pub missing_key: usize,
}

impl TypedBatch {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    pub fn value(&self, row: usize, field: &str) -> Option<&Value> {
        let idx = self.column_index(field)?;
        self.rows.get(row)?.get(idx)?.as_ref()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drops rows whose key repeats an earlier row, keeping the first
    /// occurrence. Rows with a null key component are dropped too.
    pub fn dedup_keep_first(&mut self, key_fields: &[&str]) -> DedupOutcome {
        let indices: Vec<usize> = key_fields
            .iter()
            .filter_map(|field| self.column_index(field))
            .collect();
        let mut seen = HashSet::with_capacity(self.rows.len());
        let mut outcome = DedupOutcome::default();
        self.rows.retain(|row| {
            let mut key = String::new();
            for (pos, idx) in indices.iter().enumerate() {
                let Some(value) = row.get(*idx).and_then(|v| v.as_ref()) else {
                    outcome.missing_key += 1;
                    return false;
                };
                if pos > 0 {
                    key.push('\u{1f}');
                }
                key.push_str(&value.as_display());
            }
            if seen.insert(key) {
                true
            } else {
                outcome.duplicates += 1;
                false
            }
        });
        outcome
    }
}
