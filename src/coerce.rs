//! Type coercion of normalized batches.
//!
//! Each field is coerced according to its declared [`FieldType`]; nothing is
//! inferred from the values themselves. A missing or malformed cell is
//! replaced according to the field's [`NullPolicy`] and counted. Data errors
//! never fail a batch: columns that exceed the malformed tolerance are only
//! logged. A batch whose fields do not belong to the schema is rejected.

use chrono::NaiveDateTime;
use log::warn;
use serde::Serialize;

use crate::{
    batch::{NormalizedBatch, TypedBatch},
    data::{Value, parse_float, parse_indicator, parse_integer, parse_timestamp},
    error::NormalizeError,
    schema::{FieldSource, FieldSpec, FieldType, NullPolicy, TableSchema},
};

pub const DEFAULT_MALFORMED_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Parsed(Value),
    Missing,
    Malformed,
}

/// Parses one normalized cell as `datatype`.
pub fn parse_cell(raw: Option<&str>, datatype: FieldType) -> Cell {
    let Some(raw) = raw else {
        return Cell::Missing;
    };
    let parsed = match datatype {
        FieldType::Integer => parse_integer(raw).map(Value::Integer),
        FieldType::Float => parse_float(raw).map(Value::Float),
        FieldType::Boolean => parse_indicator(raw).map(Value::Boolean),
        FieldType::Timestamp => parse_timestamp(raw).ok().map(Value::Timestamp),
        FieldType::Text => Some(Value::Text(raw.to_string())),
    };
    parsed.map(Cell::Parsed).unwrap_or(Cell::Malformed)
}

/// The value a policy substitutes for a missing or malformed cell.
pub fn fill_value(policy: &NullPolicy, datatype: FieldType) -> Option<Value> {
    match policy {
        NullPolicy::Null => None,
        NullPolicy::Zero => Some(Value::Integer(0)),
        NullPolicy::Empty => Some(Value::Text(String::new())),
        NullPolicy::Default(literal) => match parse_cell(Some(literal), datatype) {
            Cell::Parsed(value) => Some(value),
            _ => None,
        },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnReport {
    pub field: String,
    pub datatype: String,
    pub malformed: usize,
    pub filled: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoercionReport {
    pub table: String,
    pub rows: usize,
    pub columns: Vec<ColumnReport>,
}

impl CoercionReport {
    pub fn malformed_total(&self) -> usize {
        self.columns.iter().map(|c| c.malformed).sum()
    }

    pub fn over_tolerance(&self, tolerance: f64) -> Vec<&ColumnReport> {
        if self.rows == 0 {
            return Vec::new();
        }
        self.columns
            .iter()
            .filter(|c| c.malformed as f64 / self.rows as f64 > tolerance)
            .collect()
    }
}

enum Rule {
    LoadTime,
    Parse {
        datatype: FieldType,
        fill: Option<Value>,
    },
}

impl Rule {
    fn for_field(field: &FieldSpec) -> Self {
        match field.source {
            FieldSource::LoadTime => Rule::LoadTime,
            _ => Rule::Parse {
                datatype: field.datatype,
                fill: fill_value(&field.null_policy, field.datatype),
            },
        }
    }
}

pub struct Coercer<'a> {
    schema: &'a TableSchema,
    load_time: NaiveDateTime,
    tolerance: f64,
}

impl<'a> Coercer<'a> {
    pub fn new(schema: &'a TableSchema, load_time: NaiveDateTime) -> Self {
        Coercer {
            schema,
            load_time,
            tolerance: DEFAULT_MALFORMED_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn coerce(
        &self,
        batch: NormalizedBatch,
    ) -> Result<(TypedBatch, CoercionReport), NormalizeError> {
        let specs: Vec<&FieldSpec> = batch
            .fields
            .iter()
            .map(|name| {
                self.schema
                    .field(name)
                    .ok_or_else(|| NormalizeError::UnknownField {
                        table: self.schema.name.clone(),
                        field: name.clone(),
                    })
            })
            .collect::<Result<_, _>>()?;
        let rules: Vec<Rule> = specs.iter().map(|f| Rule::for_field(f)).collect();
        let mut columns: Vec<ColumnReport> = specs
            .iter()
            .map(|f| ColumnReport {
                field: f.name.clone(),
                datatype: f.datatype.to_string(),
                ..ColumnReport::default()
            })
            .collect();

        let row_count = batch.rows.len();
        let mut rows = Vec::with_capacity(row_count);
        for raw_row in batch.rows {
            let mut typed = Vec::with_capacity(rules.len());
            for (idx, rule) in rules.iter().enumerate() {
                let value = match rule {
                    Rule::LoadTime => Some(Value::Timestamp(self.load_time)),
                    Rule::Parse { datatype, fill } => {
                        let raw = raw_row.get(idx).and_then(|c| c.as_deref());
                        match parse_cell(raw, *datatype) {
                            Cell::Parsed(value) => Some(value),
                            Cell::Missing => {
                                if fill.is_some() {
                                    columns[idx].filled += 1;
                                }
                                fill.clone()
                            }
                            Cell::Malformed => {
                                columns[idx].malformed += 1;
                                if fill.is_some() {
                                    columns[idx].filled += 1;
                                }
                                fill.clone()
                            }
                        }
                    }
                };
                typed.push(value);
            }
            rows.push(typed);
        }

        let report = CoercionReport {
            table: self.schema.name.clone(),
            rows: row_count,
            columns,
        };
        for column in report.over_tolerance(self.tolerance) {
            warn!(
                "{}.{}: {} of {} value(s) could not be read as {} and were replaced",
                report.table, column.field, column.malformed, report.rows, column.datatype
            );
        }

        let typed = TypedBatch {
            table: self.schema.name.clone(),
            fields: specs.iter().map(|f| f.name.clone()).collect(),
            types: specs.iter().map(|f| f.datatype).collect(),
            rows,
        };
        Ok((typed, report))
    }
}
