//! SQL text for the staging and merge steps.

use heck::ToSnakeCase;
use itertools::Itertools;

use crate::schema::{FieldType, TableSchema};

use super::update_columns;

/// Current transaction time as a UTC `TIMESTAMP`, matching the load time
/// the coercer stamps on insert-only fields.
pub const UTC_NOW: &str = "(now() AT TIME ZONE 'UTC')";

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn staging_table_name(table: &str) -> String {
    format!("staging_{}", table.to_snake_case())
}

pub fn create_staging(staging: &str, fields: &[String], types: &[FieldType]) -> String {
    let columns = fields
        .iter()
        .zip(types)
        .map(|(field, ty)| format!("{} {}", quote_ident(field), ty.sql_type()))
        .join(", ");
    format!(
        "CREATE TEMP TABLE {} ({columns}) ON COMMIT DROP",
        quote_ident(staging)
    )
}

pub fn copy_into_staging(staging: &str, fields: &[String]) -> String {
    format!(
        "COPY {} ({}) FROM STDIN (FORMAT binary)",
        quote_ident(staging),
        fields.iter().map(|f| quote_ident(f)).join(", ")
    )
}

/// `INSERT ... SELECT ... ON CONFLICT` from the staging table into the
/// target. The touch field takes [`UTC_NOW`] on both insert and update.
pub fn merge_from_staging(schema: &TableSchema, staging: &str, fields: &[String]) -> String {
    let target_columns = fields.iter().map(|f| quote_ident(f)).join(", ");
    let select_list = fields
        .iter()
        .map(|f| {
            if schema.is_touch_field(f) {
                UTC_NOW.to_string()
            } else {
                quote_ident(f)
            }
        })
        .join(", ");
    let conflict = schema
        .conflict_fields()
        .into_iter()
        .map(quote_ident)
        .join(", ");
    let updates = update_columns(schema, fields);
    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let assignments = updates
            .into_iter()
            .map(|f| {
                if schema.is_touch_field(f) {
                    format!("{} = {UTC_NOW}", quote_ident(f))
                } else {
                    format!("{0} = EXCLUDED.{0}", quote_ident(f))
                }
            })
            .join(", ");
        format!("DO UPDATE SET {assignments}")
    };
    format!(
        "INSERT INTO {} ({target_columns}) SELECT {select_list} FROM {} ON CONFLICT ({conflict}) {action}",
        quote_ident(&schema.name),
        quote_ident(staging)
    )
}

pub fn count_rows(table: &str) -> String {
    format!("SELECT count(*) FROM {}", quote_ident(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSpec, KeySpec};

    fn game() -> TableSchema {
        TableSchema::new(
            "Game",
            "id",
            vec![
                FieldSpec::renamed("game_id", "id", FieldType::Text),
                FieldSpec::renamed("total_home_score", "homeScore", FieldType::Integer).zero(),
                FieldSpec::load_time("updatedAt"),
            ],
        )
        .with_touch_field("updatedAt")
    }

    #[test]
    fn identifiers_are_quoted_and_escaped() {
        assert_eq!(quote_ident("homeScore"), "\"homeScore\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(staging_table_name("PlayAdvancedStats"), "staging_play_advanced_stats");
    }

    #[test]
    fn staging_ddl_uses_declared_types() {
        let schema = game();
        let ddl = create_staging(
            "staging_game",
            &schema.field_names(),
            &[FieldType::Text, FieldType::Integer, FieldType::Timestamp],
        );
        assert_eq!(
            ddl,
            "CREATE TEMP TABLE \"staging_game\" (\"id\" TEXT, \"homeScore\" BIGINT, \"updatedAt\" TIMESTAMP) ON COMMIT DROP"
        );
    }

    #[test]
    fn copy_statement_is_binary() {
        let sql = copy_into_staging("staging_game", &["id".to_string()]);
        assert_eq!(sql, "COPY \"staging_game\" (\"id\") FROM STDIN (FORMAT binary)");
    }

    #[test]
    fn merge_touches_updated_at_on_insert_and_update() {
        let schema = game();
        let sql = merge_from_staging(&schema, "staging_game", &schema.field_names());
        assert_eq!(
            sql,
            "INSERT INTO \"Game\" (\"id\", \"homeScore\", \"updatedAt\") \
             SELECT \"id\", \"homeScore\", (now() AT TIME ZONE 'UTC') FROM \"staging_game\" \
             ON CONFLICT (\"id\") DO UPDATE SET \"homeScore\" = EXCLUDED.\"homeScore\", \"updatedAt\" = (now() AT TIME ZONE 'UTC')"
        );
    }

    #[test]
    fn created_at_is_inserted_but_never_updated() {
        let schema = TableSchema::new(
            "Player",
            "id",
            vec![
                FieldSpec::concat("id", KeySpec::new(["gsis_id"])),
                FieldSpec::renamed("last_name", "lastName", FieldType::Text),
                FieldSpec::load_time("createdAt"),
                FieldSpec::load_time("updatedAt"),
            ],
        )
        .with_touch_field("updatedAt");
        let sql = merge_from_staging(&schema, "staging_player", &schema.field_names());
        assert!(sql.contains("SELECT \"id\", \"lastName\", \"createdAt\", "), "{sql}");
        assert!(
            sql.ends_with(
                "DO UPDATE SET \"lastName\" = EXCLUDED.\"lastName\", \"updatedAt\" = (now() AT TIME ZONE 'UTC')"
            ),
            "{sql}"
        );
    }

    #[test]
    fn key_only_tables_do_nothing_on_conflict() {
        let schema = TableSchema::new(
            "PlayLink",
            "id",
            vec![FieldSpec::concat("id", KeySpec::new(["game_id", "play_id"]))],
        );
        let sql = merge_from_staging(&schema, "staging_play_link", &schema.field_names());
        assert!(sql.ends_with("ON CONFLICT (\"id\") DO NOTHING"), "{sql}");
    }

    #[test]
    fn natural_key_excludes_surrogate_from_updates() {
        let schema = TableSchema::new(
            "PlayerWeeklyStats",
            "id",
            vec![
                FieldSpec::concat("id", KeySpec::new(["player_id", "season", "week"])),
                FieldSpec::renamed("player_id", "playerId", FieldType::Text),
                FieldSpec::mapped("season", FieldType::Integer),
                FieldSpec::mapped("carries", FieldType::Integer),
            ],
        )
        .with_conflict_key(&["playerId", "season"]);
        let sql = merge_from_staging(&schema, "s", &schema.field_names());
        assert!(sql.contains("ON CONFLICT (\"playerId\", \"season\")"), "{sql}");
        assert!(sql.ends_with("DO UPDATE SET \"carries\" = EXCLUDED.\"carries\""), "{sql}");
    }
}
