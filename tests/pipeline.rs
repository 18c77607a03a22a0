mod common;

use chrono::{NaiveDate, NaiveDateTime};
use common::{TestWorkspace, fixture_dir};
use nfl_import::{
    batch::TypedBatch,
    catalog::Catalog,
    coerce::{Cell, parse_cell},
    data::Value,
    fetch::{Dataset, DirectorySource, Partition},
    load::MemorySink,
    pipeline::{PartitionStatus, Pipeline, PipelineOptions, RunSummary},
    schema::FieldType,
};
use proptest::prelude::*;

fn options() -> PipelineOptions {
    PipelineOptions {
        workers: 2,
        ..PipelineOptions::default()
    }
}

fn run(
    root: &std::path::Path,
    sink: &mut MemorySink,
    dataset: Dataset,
    partitions: &[Partition],
) -> RunSummary {
    let catalog = Catalog::builtin();
    let tables = catalog.for_dataset(dataset);
    let source = DirectorySource::new(root);
    let pipeline = Pipeline::new(&source, options()).expect("pipeline");
    pipeline.run(sink, dataset, partitions, &tables)
}

fn at(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 9, 8)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn text(value: &str) -> Option<Value> {
    Some(Value::Text(value.to_string()))
}

#[test]
fn play_by_play_season_fills_every_table() {
    let mut sink = MemorySink::new();
    let summary = run(
        &fixture_dir(),
        &mut sink,
        Dataset::PlayByPlay,
        &[Partition::Year(2024)],
    );
    assert!(!summary.has_failures(), "{summary:?}");
    let partition = &summary.partitions[0];
    assert_eq!(partition.rows_fetched, 7);
    assert_eq!(partition.tables.len(), 12);

    let games = sink.table("Game").unwrap();
    assert_eq!(games.len(), 2);
    let game = games.get(&["2024_01_ARI_BUF"]).unwrap();
    assert_eq!(game["homeTeam"], text("BUF"));
    assert_eq!(game["gameType"], text("REG"));
    assert_eq!(game["homeScore"], Some(Value::Integer(0)));

    let plays = sink.table("Play").unwrap();
    assert_eq!(plays.len(), 5);
    let play_summary = partition.tables.iter().find(|t| t.table == "Play").unwrap();
    assert_eq!(play_summary.dropped, 1);
    assert_eq!(play_summary.duplicates, 1);

    let kickoff = plays.get(&["2024_01_ARI_BUF_1"]).unwrap();
    assert_eq!(kickoff["possessionTeam"], text("UNK"));
    assert_eq!(kickoff["playType"], text("no_play"));
    assert_eq!(kickoff["down"], Some(Value::Integer(0)));
    assert_eq!(kickoff["epa"], None);

    let pass = plays.get(&["2024_01_ARI_BUF_88"]).unwrap();
    assert_eq!(pass["yardsGained"], None);
    assert_eq!(pass["success"], None);
    assert_eq!(pass["cpoe"], Some(Value::Float(12.5)));

    let details = sink.table("PlayDetails").unwrap();
    let run_play = details.get(&["2024_01_ARI_BUF_40_details"]).unwrap();
    assert_eq!(run_play["playId"], text("2024_01_ARI_BUF_40"));
    assert_eq!(run_play["shotgun"], Some(Value::Boolean(false)));
}

#[test]
fn reloading_a_game_keeps_one_row_and_takes_the_new_score() {
    let header = "game_id,play_id,season,week,season_type,home_team,away_team,total_home_score,total_away_score\n";
    let first = TestWorkspace::new();
    first.write_release(
        "pbp",
        "play_by_play_2023.csv",
        &format!("{header}2023_05_KC_MIN,55,2023,5,REG,MIN,KC,7,3\n"),
    );
    let second = TestWorkspace::new();
    second.write_release(
        "pbp",
        "play_by_play_2023.csv",
        &format!("{header}2023_05_KC_MIN,55,2023,5,REG,MIN,KC,14,3\n"),
    );

    let mut sink = MemorySink::new();
    sink.freeze_at(at(13));
    run(first.path(), &mut sink, Dataset::PlayByPlay, &[Partition::Year(2023)]);
    sink.freeze_at(at(16));
    let summary = run(second.path(), &mut sink, Dataset::PlayByPlay, &[Partition::Year(2023)]);
    assert!(!summary.has_failures());

    let games = sink.table("Game").unwrap();
    assert_eq!(games.len(), 1);
    let game = games.get(&["2023_05_KC_MIN"]).unwrap();
    assert_eq!(game["homeScore"], Some(Value::Integer(14)));
    assert_eq!(game["updatedAt"], Some(Value::Timestamp(at(16))));
    assert_eq!(sink.table("Play").unwrap().len(), 1);
}

#[test]
fn reimporting_a_season_keeps_created_at_and_moves_only_updated_at() {
    let mut sink = MemorySink::new();
    run(&fixture_dir(), &mut sink, Dataset::PlayByPlay, &[Partition::Year(2024)]);
    let first = sink
        .table("Game")
        .unwrap()
        .get(&["2024_01_ARI_BUF"])
        .unwrap()
        .clone();
    let (Some(Value::Timestamp(created)), Some(Value::Timestamp(updated))) =
        (&first["createdAt"], &first["updatedAt"])
    else {
        panic!("Game timestamps missing: {first:?}");
    };
    assert!(created <= updated, "createdAt {created} after updatedAt {updated}");

    std::thread::sleep(std::time::Duration::from_millis(5));
    run(&fixture_dir(), &mut sink, Dataset::PlayByPlay, &[Partition::Year(2024)]);
    let games = sink.table("Game").unwrap();
    assert_eq!(games.len(), 2);
    let second = games.get(&["2024_01_ARI_BUF"]).unwrap();
    assert_eq!(second["createdAt"], first["createdAt"]);
    assert_ne!(second["updatedAt"], first["updatedAt"]);
    for (field, value) in second {
        if field != "updatedAt" {
            assert_eq!(Some(value), first.get(field), "{field} changed on re-import");
        }
    }
}

#[test]
fn player_snapshot_drops_rows_without_required_names() {
    let mut sink = MemorySink::new();
    let summary = run(
        &fixture_dir(),
        &mut sink,
        Dataset::Players,
        &[Partition::Snapshot],
    );
    assert!(!summary.has_failures());
    let players = sink.table("Player").unwrap();
    assert_eq!(players.len(), 2);
    let allen = players.get(&["00-0034857"]).unwrap();
    assert_eq!(allen["gsisId"], text("00-0034857"));
    assert_eq!(allen["weight"], Some(Value::Integer(237)));
    assert_eq!(
        allen["birthDate"],
        Some(Value::Timestamp(
            NaiveDate::from_ymd_opt(1996, 5, 21)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        ))
    );
    let entry = &summary.partitions[0].tables[0];
    assert_eq!(entry.dropped, 2);
    assert_eq!(entry.duplicates, 1);
}

#[test]
fn weekly_stats_key_on_player_season_week_and_type() {
    let mut sink = MemorySink::new();
    let summary = run(
        &fixture_dir(),
        &mut sink,
        Dataset::PlayerStats,
        &[Partition::Year(2024)],
    );
    assert!(!summary.has_failures());
    let stats = sink.table("PlayerWeeklyStats").unwrap();
    assert_eq!(stats.len(), 4);

    let murray = stats.get(&["00-0035228", "2024", "1", "REG"]).unwrap();
    assert_eq!(murray["id"], text("00-0035228_2024_1"));
    assert_eq!(murray["completions"], Some(Value::Integer(17)));
    assert_eq!(murray["fantasyPoints"], None);
    assert_eq!(murray["passingEpa"], Some(Value::Float(-2.1)));

    let playoff = stats.get(&["00-0035228", "2024", "19", "POST"]).unwrap();
    assert_eq!(playoff["completions"], Some(Value::Integer(0)));
    assert_eq!(playoff["passingEpa"], None);
    assert_eq!(playoff["opponentTeam"], text("LA"));
}

#[test]
fn missing_season_file_is_recorded_and_the_run_continues() {
    let mut sink = MemorySink::new();
    let summary = run(
        &fixture_dir(),
        &mut sink,
        Dataset::PlayerStats,
        &[Partition::Year(2001), Partition::Year(2024)],
    );
    assert_eq!(summary.partitions[0].status, PartitionStatus::FetchFailed);
    assert!(summary.partitions[0].error.is_some());
    assert_eq!(summary.partitions[1].status, PartitionStatus::Loaded);
    assert_eq!(summary.failed_partitions(), 1);
    assert_eq!(sink.table("PlayerWeeklyStats").unwrap().len(), 4);
}

proptest! {
    #[test]
    fn boolean_cells_accept_only_zero_and_one(raw in "\\PC{0,6}") {
        match parse_cell(Some(&raw), FieldType::Boolean) {
            Cell::Parsed(Value::Boolean(flag)) => {
                let number: f64 = raw.parse().unwrap();
                prop_assert_eq!(number, if flag { 1.0 } else { 0.0 });
            }
            Cell::Parsed(other) => prop_assert!(false, "unexpected value {:?}", other),
            Cell::Missing | Cell::Malformed => {
                let number = raw.parse::<f64>().ok();
                prop_assert!(number != Some(0.0) && number != Some(1.0));
            }
        }
    }

    #[test]
    fn dedup_keeps_the_first_row_per_key(rows in prop::collection::vec((0u8..6, any::<i64>()), 0..40)) {
        let mut batch = TypedBatch {
            table: "T".into(),
            fields: vec!["id".into(), "value".into()],
            types: vec![FieldType::Text, FieldType::Integer],
            rows: rows
                .iter()
                .map(|(key, value)| vec![Some(Value::Text(key.to_string())), Some(Value::Integer(*value))])
                .collect(),
        };
        let outcome = batch.dedup_keep_first(&["id"]);

        let mut expected: Vec<(u8, i64)> = Vec::new();
        for (key, value) in &rows {
            if !expected.iter().any(|(k, _)| k == key) {
                expected.push((*key, *value));
            }
        }
        prop_assert_eq!(batch.len(), expected.len());
        prop_assert_eq!(outcome.duplicates, rows.len() - expected.len());
        for (idx, (key, value)) in expected.iter().enumerate() {
            prop_assert_eq!(batch.value(idx, "id"), Some(&Value::Text(key.to_string())));
            prop_assert_eq!(batch.value(idx, "value"), Some(&Value::Integer(*value)));
        }
    }
}
