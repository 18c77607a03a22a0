//! Schema normalization: source headers in, target fields out.
//!
//! Renames mapped columns, derives concatenated key fields, synthesizes
//! fields the source never carried and drops every unmapped source column.
//! The output has one cell per target field for every row; missing values are
//! `None` and are resolved later by the coercer's null policies.

use log::{debug, warn};

use crate::{
    batch::{NormalizedBatch, RawBatch},
    data::{key_component, present},
    error::NormalizeError,
    schema::{FieldSource, KeySpec, TableSchema},
};

enum CellPlan<'a> {
    Column(Option<usize>),
    Concat {
        parts: Vec<Option<usize>>,
        spec: &'a KeySpec,
    },
    Empty,
}

impl CellPlan<'_> {
    fn resolve(&self, row: &[String]) -> Option<String> {
        match self {
            CellPlan::Column(idx) => {
                let raw = row.get((*idx)?)?;
                present(raw).map(str::to_string)
            }
            CellPlan::Concat { parts, spec } => {
                let mut rendered = Vec::with_capacity(parts.len());
                for idx in parts {
                    let raw = row.get((*idx)?)?;
                    rendered.push(key_component(present(raw)?));
                }
                let mut key = rendered.join(&spec.separator);
                if let Some(suffix) = &spec.suffix {
                    key.push_str(&spec.separator);
                    key.push_str(suffix);
                }
                Some(key)
            }
            CellPlan::Empty => None,
        }
    }
}

pub fn normalize(raw: &RawBatch, schema: &TableSchema) -> Result<NormalizedBatch, NormalizeError> {
    for column in schema.key_source_columns() {
        if raw.column_index(column).is_none() {
            return Err(NormalizeError::MissingKeyColumn {
                table: schema.name.clone(),
                column: column.to_string(),
            });
        }
    }

    let ordered = schema.ordered_fields();
    let plans: Vec<CellPlan<'_>> = ordered
        .iter()
        .map(|field| match &field.source {
            FieldSource::Column(column) => CellPlan::Column(raw.column_index(column)),
            FieldSource::Concat(spec) => CellPlan::Concat {
                parts: spec.parts.iter().map(|p| raw.column_index(p)).collect(),
                spec,
            },
            FieldSource::Synthesized | FieldSource::LoadTime => CellPlan::Empty,
        })
        .collect();

    let absent: Vec<&str> = ordered
        .iter()
        .zip(&plans)
        .filter(|(_, plan)| matches!(plan, CellPlan::Column(None)))
        .map(|(field, _)| field.name.as_str())
        .collect();
    if !absent.is_empty() {
        debug!(
            "{}: {} field(s) absent from {} and synthesized as null: {:?}",
            schema.name,
            absent.len(),
            raw.origin,
            absent
        );
    }

    let required: Vec<usize> = ordered
        .iter()
        .enumerate()
        .filter(|(idx, field)| field.required || *idx == 0)
        .map(|(idx, _)| idx)
        .collect();

    let mut rows = Vec::with_capacity(raw.len());
    let mut dropped = 0usize;
    for source_row in &raw.rows {
        let cells: Vec<Option<String>> =
            plans.iter().map(|plan| plan.resolve(source_row)).collect();
        if required.iter().any(|idx| cells[*idx].is_none()) {
            dropped += 1;
            continue;
        }
        rows.push(cells);
    }

    if dropped > 0 {
        warn!(
            "{}: dropped {} of {} row(s) from {} with no key or required value",
            schema.name,
            dropped,
            raw.len(),
            raw.origin
        );
    }

    Ok(NormalizedBatch {
        table: schema.name.clone(),
        fields: ordered.iter().map(|f| f.name.clone()).collect(),
        rows,
        dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSpec, FieldType};

    fn play_schema() -> TableSchema {
        TableSchema::new(
            "Play",
            "id",
            vec![
                FieldSpec::renamed("game_id", "gameId", FieldType::Text),
                FieldSpec::concat("id", KeySpec::new(["game_id", "play_id"])),
                FieldSpec::mapped("yards_gained", FieldType::Integer),
                FieldSpec::mapped("epa", FieldType::Float),
                FieldSpec::synthesized("location", FieldType::Text).empty(),
            ],
        )
    }

    fn raw(headers: &[&str], rows: &[&[&str]]) -> RawBatch {
        RawBatch::new(
            "test",
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn derives_key_first_and_renames_columns() {
        let batch = raw(
            &["play_id", "game_id", "yards_gained", "epa", "desc"],
            &[&["15", "2024_01_BUF_ARI", "7", "", "pass short"]],
        );
        let normalized = normalize(&batch, &play_schema()).unwrap();
        assert_eq!(
            normalized.fields,
            vec!["id", "gameId", "yardsGained", "epa", "location"]
        );
        assert_eq!(
            normalized.rows[0],
            vec![
                Some("2024_01_BUF_ARI_15".to_string()),
                Some("2024_01_BUF_ARI".to_string()),
                Some("7".to_string()),
                None,
                None,
            ]
        );
    }

    #[test]
    fn float_rendered_play_ids_produce_stable_keys() {
        let batch = raw(&["game_id", "play_id"], &[&["2024_01_BUF_ARI", "15.0"]]);
        let normalized = normalize(&batch, &play_schema()).unwrap();
        assert_eq!(normalized.rows[0][0].as_deref(), Some("2024_01_BUF_ARI_15"));
    }

    #[test]
    fn suffix_is_appended_with_separator() {
        let schema = TableSchema::new(
            "PlayDetails",
            "id",
            vec![FieldSpec::concat(
                "id",
                KeySpec::new(["game_id", "play_id"]).with_suffix("details"),
            )],
        );
        let batch = raw(&["game_id", "play_id"], &[&["g", "1"]]);
        let normalized = normalize(&batch, &schema).unwrap();
        assert_eq!(normalized.rows[0][0].as_deref(), Some("g_1_details"));
    }

    #[test]
    fn missing_key_column_is_fatal() {
        let batch = raw(&["game_id", "yards_gained"], &[&["g", "3"]]);
        let err = normalize(&batch, &play_schema()).unwrap_err();
        match err {
            NormalizeError::MissingKeyColumn { table, column } => {
                assert_eq!(table, "Play");
                assert_eq!(column, "play_id");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rows_with_blank_key_component_are_dropped() {
        let batch = raw(
            &["game_id", "play_id"],
            &[&["g", "1"], &["g", "NA"], &["", "3"]],
        );
        let normalized = normalize(&batch, &play_schema()).unwrap();
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized.dropped, 2);
    }

    #[test]
    fn required_fields_drop_rows_without_values() {
        let schema = TableSchema::new(
            "Player",
            "id",
            vec![
                FieldSpec::renamed("gsis_id", "id", FieldType::Text),
                FieldSpec::mapped("last_name", FieldType::Text).required(),
            ],
        );
        let batch = raw(
            &["gsis_id", "last_name"],
            &[&["00-1", "Allen"], &["00-2", ""]],
        );
        let normalized = normalize(&batch, &schema).unwrap();
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized.dropped, 1);
    }

    #[test]
    fn short_rows_yield_missing_cells() {
        let batch = raw(&["game_id", "play_id", "yards_gained"], &[&["g", "1"]]);
        let normalized = normalize(&batch, &play_schema()).unwrap();
        assert_eq!(normalized.rows[0][2], None);
    }
}
