//! In-process sink with the same merge rules as the PostgreSQL path.
//!
//! Backs `--dry-run` and the tests. Each upsert works on a copy of the target
//! table and swaps it in only when the whole batch merged.

use std::collections::{BTreeMap, HashSet};

use chrono::{NaiveDateTime, Utc};
use log::info;

use crate::{batch::TypedBatch, data::Value, error::LoadError, schema::TableSchema};

use super::{LoadReport, Sink, check_conflict_keys, update_columns};

pub type MemoryRow = BTreeMap<String, Option<Value>>;

#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    rows: BTreeMap<String, MemoryRow>,
}

impl MemoryTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &MemoryRow> {
        self.rows.values()
    }

    /// Looks a row up by its conflict key values, in conflict key order.
    pub fn get(&self, key: &[&str]) -> Option<&MemoryRow> {
        self.rows.get(&key.join("\u{1f}"))
    }
}

#[derive(Debug, Clone, Copy)]
enum Clock {
    System,
    Fixed(NaiveDateTime),
}

#[derive(Debug, Clone)]
pub struct MemorySink {
    tables: BTreeMap<String, MemoryTable>,
    clock: Clock,
}

impl Default for MemorySink {
    fn default() -> Self {
        MemorySink::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink {
            tables: BTreeMap::new(),
            clock: Clock::System,
        }
    }

    /// Pins the time used for touch fields.
    pub fn freeze_at(&mut self, now: NaiveDateTime) {
        self.clock = Clock::Fixed(now);
    }

    fn now(&self) -> NaiveDateTime {
        match self.clock {
            Clock::System => Utc::now().naive_utc(),
            Clock::Fixed(now) => now,
        }
    }

    pub fn table(&self, name: &str) -> Option<&MemoryTable> {
        self.tables.get(name)
    }

    pub fn row_counts(&self) -> BTreeMap<String, usize> {
        self.tables
            .iter()
            .map(|(name, table)| (name.clone(), table.len()))
            .collect()
    }
}

fn conflict_key(row: &[Option<Value>], indices: &[usize]) -> String {
    indices
        .iter()
        .map(|idx| {
            row.get(*idx)
                .and_then(Option::as_ref)
                .map(Value::as_display)
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

impl Sink for MemorySink {
    fn upsert(&mut self, schema: &TableSchema, batch: &TypedBatch) -> Result<LoadReport, LoadError> {
        check_conflict_keys(schema, batch)?;
        let now = Some(Value::Timestamp(self.now()));
        let key_indices: Vec<usize> = schema
            .conflict_fields()
            .into_iter()
            .filter_map(|field| batch.column_index(field))
            .collect();
        let updates = update_columns(schema, &batch.fields);

        let mut next = self.tables.get(&schema.name).cloned().unwrap_or_default();
        let mut seen = HashSet::with_capacity(batch.len());
        let mut merged = 0u64;
        for row in &batch.rows {
            let key = conflict_key(row, &key_indices);
            if !seen.insert(key.clone()) {
                return Err(LoadError::DuplicateKey {
                    table: schema.name.clone(),
                    rows: batch.len(),
                    key: key.replace('\u{1f}', ", "),
                });
            }
            let mut record: MemoryRow = batch
                .fields
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect();
            if let Some(touch) = &schema.touch_field
                && record.contains_key(touch)
            {
                record.insert(touch.clone(), now.clone());
            }

            match next.rows.get_mut(&key) {
                Some(existing) => {
                    if updates.is_empty() {
                        continue;
                    }
                    for field in &updates {
                        if let Some(value) = record.remove(*field) {
                            existing.insert(field.to_string(), value);
                        }
                    }
                    merged += 1;
                }
                None => {
                    next.rows.insert(key, record);
                    merged += 1;
                }
            }
        }

        let table_rows = next.len() as u64;
        self.tables.insert(schema.name.clone(), next);
        info!(
            "{}: merged {merged} of {} row(s) in memory; table now holds {table_rows} row(s)",
            schema.name,
            batch.len()
        );
        Ok(LoadReport {
            table: schema.name.clone(),
            staged: batch.len(),
            merged,
            table_rows: Some(table_rows),
        })
    }
}
