//! Runs only when `NFL_IMPORT_TEST_DATABASE_URL` points at a scratch database.

use std::env;

use nfl_import::{
    batch::TypedBatch,
    data::Value,
    load::{PgSink, Sink},
    schema::{FieldSpec, FieldType, TableSchema},
};
use postgres::{Client, NoTls};

fn database_url() -> Option<String> {
    env::var("NFL_IMPORT_TEST_DATABASE_URL").ok()
}

fn schema() -> TableSchema {
    TableSchema::new(
        "ImportProbeGame",
        "id",
        vec![
            FieldSpec::renamed("game_id", "id", FieldType::Text),
            FieldSpec::renamed("total_home_score", "homeScore", FieldType::Integer).zero(),
            FieldSpec::mapped("epa", FieldType::Float),
            FieldSpec::mapped("success", FieldType::Boolean),
            FieldSpec::load_time("updatedAt"),
        ],
    )
    .with_touch_field("updatedAt")
}

fn batch(home_score: i64) -> TypedBatch {
    TypedBatch {
        table: "ImportProbeGame".into(),
        fields: vec![
            "id".into(),
            "homeScore".into(),
            "epa".into(),
            "success".into(),
            "updatedAt".into(),
        ],
        types: vec![
            FieldType::Text,
            FieldType::Integer,
            FieldType::Float,
            FieldType::Boolean,
            FieldType::Timestamp,
        ],
        rows: vec![vec![
            Some(Value::Text("2024_01_ARI_BUF".into())),
            Some(Value::Integer(home_score)),
            None,
            Some(Value::Boolean(true)),
            None,
        ]],
    }
}

#[test]
fn upsert_merges_on_the_primary_key() {
    let Some(url) = database_url() else {
        eprintln!("NFL_IMPORT_TEST_DATABASE_URL not set; skipping");
        return;
    };
    let mut client = Client::connect(&url, NoTls).expect("connect");
    client
        .batch_execute(
            r#"DROP TABLE IF EXISTS "ImportProbeGame";
               CREATE TABLE "ImportProbeGame" (
                   "id" text PRIMARY KEY,
                   "homeScore" integer NOT NULL,
                   "epa" double precision,
                   "success" boolean,
                   "updatedAt" timestamp NOT NULL
               );"#,
        )
        .expect("create table");

    let mut sink = PgSink::connect(&url).expect("sink");
    let schema = schema();
    let first = sink.upsert(&schema, &batch(7)).expect("first load");
    assert_eq!(first.merged, 1);
    let second = sink.upsert(&schema, &batch(14)).expect("second load");
    assert_eq!(second.table_rows, Some(1));

    let row = client
        .query_one(r#"SELECT "homeScore", "epa" FROM "ImportProbeGame""#, &[])
        .expect("select");
    let home: i32 = row.get(0);
    let epa: Option<f64> = row.get(1);
    assert_eq!(home, 14);
    assert_eq!(epa, None);

    client
        .batch_execute(r#"DROP TABLE "ImportProbeGame""#)
        .expect("drop table");
}
