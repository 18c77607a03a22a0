//! `schema` command: catalog listing and schema export.
//!
//! Without `--table` every catalog table is listed with its dataset, key and
//! field count. With `--table` the table's fields are listed with source,
//! type and null policy; `--export` writes the schema as YAML instead.

use anyhow::{Context, Result};
use log::info;

use crate::{
    catalog::Catalog,
    cli::SchemaArgs,
    schema::TableSchema,
    table::TextTable,
};

pub fn execute(args: &SchemaArgs) -> Result<()> {
    let catalog = Catalog::builtin();
    catalog.validate().context("Validating the built-in catalog")?;

    let Some(name) = &args.table else {
        list_tables(&catalog).print();
        return Ok(());
    };
    let schema = catalog.require(name)?;

    if let Some(path) = &args.export {
        schema
            .save(path)
            .with_context(|| format!("Exporting schema for {} to {path:?}", schema.name))?;
        info!(
            "Schema for {} ({} field(s)) written to {path:?}",
            schema.name,
            schema.fields.len()
        );
        return Ok(());
    }

    list_fields(schema).print();
    Ok(())
}

pub fn list_tables(catalog: &Catalog) -> TextTable {
    let mut table = TextTable::new(["#", "table", "dataset", "conflict key", "fields"])
        .right_align(&[0, 4]);
    for (idx, entry) in catalog.entries().iter().enumerate() {
        table.push_row(vec![
            (idx + 1).to_string(),
            entry.schema.name.clone(),
            entry.dataset.to_string(),
            entry.schema.conflict_fields().join(", "),
            entry.schema.fields.len().to_string(),
        ]);
    }
    table
}

pub fn list_fields(schema: &TableSchema) -> TextTable {
    let mut table =
        TextTable::new(["#", "field", "source", "type", "null policy", "role"]).right_align(&[0]);
    for (idx, field) in schema.ordered_fields().into_iter().enumerate() {
        let mut roles = Vec::new();
        if field.name == schema.primary_key {
            roles.push("primary key");
        }
        if schema.is_conflict_field(&field.name) && field.name != schema.primary_key {
            roles.push("conflict key");
        }
        if schema.is_touch_field(&field.name) {
            roles.push("touch");
        }
        if field.required {
            roles.push("required");
        }
        table.push_row(vec![
            (idx + 1).to_string(),
            field.name.clone(),
            field.source.describe(),
            field.datatype.to_string(),
            field.null_policy.to_string(),
            roles.join(", "),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_listing_covers_catalog() {
        let catalog = Catalog::builtin();
        let listing = list_tables(&catalog);
        assert_eq!(listing.len(), 14);
        let rendered = listing.render();
        assert!(rendered.contains("PlayerWeeklyStats"));
        assert!(rendered.contains("playerId, season, week, seasonType"));
    }

    #[test]
    fn field_listing_marks_key_roles() {
        let catalog = Catalog::builtin();
        let rendered = list_fields(catalog.require("Play").unwrap()).render();
        let first_row = rendered.lines().nth(2).unwrap();
        assert!(first_row.contains("id"), "{first_row}");
        assert!(first_row.contains("game_id _ play_id"), "{first_row}");
        assert!(first_row.contains("primary key"), "{first_row}");
        assert!(rendered.contains("default(no_play)"));
    }
}
