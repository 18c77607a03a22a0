//! Bulk upsert loading.
//!
//! A [`Sink`] receives one typed batch per table and merges it into the
//! target keyed by the table's conflict key. Each call is all-or-nothing.
//! [`PgSink`] stages through a temporary table and binary `COPY`;
//! [`MemorySink`] applies the same merge rules to an in-process table set.

pub mod memory;
pub mod pg;
pub mod sql;

pub use memory::MemorySink;
pub use pg::PgSink;

use serde::Serialize;

use crate::{
    batch::TypedBatch,
    error::LoadError,
    schema::{FieldSource, TableSchema},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub table: String,
    /// Rows written to the staging area.
    pub staged: usize,
    /// Rows inserted or updated by the merge.
    pub merged: u64,
    /// Row count of the target after commit, when the sink reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_rows: Option<u64>,
}

pub trait Sink {
    fn upsert(&mut self, schema: &TableSchema, batch: &TypedBatch) -> Result<LoadReport, LoadError>;
}

/// Every row must carry a value for each conflict key field before anything
/// is staged.
pub fn check_conflict_keys(schema: &TableSchema, batch: &TypedBatch) -> Result<(), LoadError> {
    for field in schema.conflict_fields() {
        let Some(idx) = batch.column_index(field) else {
            return Err(LoadError::MissingKey {
                table: schema.name.clone(),
                rows: batch.len(),
                field: field.to_string(),
                row: 0,
            });
        };
        if let Some(row) = batch
            .rows
            .iter()
            .position(|row| row.get(idx).is_none_or(Option::is_none))
        {
            return Err(LoadError::MissingKey {
                table: schema.name.clone(),
                rows: batch.len(),
                field: field.to_string(),
                row,
            });
        }
    }
    Ok(())
}

/// Columns overwritten when a staged row meets an existing one: everything
/// except the primary key, the conflict key and load-time fields other than
/// the touch field. Those load-time fields (`createdAt`) are insert-only.
pub fn update_columns<'a>(schema: &TableSchema, fields: &'a [String]) -> Vec<&'a str> {
    fields
        .iter()
        .map(String::as_str)
        .filter(|f| *f != schema.primary_key && !schema.is_conflict_field(f))
        .filter(|f| schema.is_touch_field(f) || !is_load_time(schema, f))
        .collect()
}

fn is_load_time(schema: &TableSchema, field: &str) -> bool {
    schema
        .field(field)
        .is_some_and(|spec| matches!(spec.source, FieldSource::LoadTime))
}
