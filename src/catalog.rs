//! The bundled table catalog.
//!
//! Every target table the importer knows about is described here once, as an
//! explicit value built by [`Catalog::builtin`] and handed to each stage. The
//! play-by-play release feeds twelve tables; the roster snapshot and the weekly
//! player stats feed one table each.

use crate::{
    error::SchemaError,
    fetch::Dataset,
    schema::{FieldSpec, FieldType, KeySpec, TableSchema, TypeDeclarations},
};

use crate::schema::FieldType::{Boolean, Float, Integer, Text, Timestamp};

/// Source columns that always hold 0/1 indicators.
pub const BOOLEAN_ALLOW: &[&str] = &[
    "touchdown",
    "pass_touchdown",
    "rush_touchdown",
    "return_touchdown",
    "first_down_rush",
    "first_down_pass",
    "first_down_penalty",
    "third_down_converted",
    "third_down_failed",
    "fourth_down_converted",
    "fourth_down_failed",
    "incomplete_pass",
    "interception",
    "punt_blocked",
    "punt_in_endzone",
    "punt_out_of_bounds",
    "punt_downed",
    "punt_fair_catch",
    "kickoff_in_endzone",
    "kickoff_out_of_bounds",
    "kickoff_downed",
    "kickoff_fair_catch",
    "fumble_forced",
    "fumble_not_forced",
    "fumble_out_of_bounds",
    "solo_tackle",
    "safety",
    "penalty",
    "tackled_for_loss",
    "fumble_lost",
    "own_kickoff_recovery",
    "own_kickoff_recovery_td",
    "qb_hit",
    "rush_attempt",
    "pass_attempt",
    "sack",
    "extra_point_attempt",
    "two_point_attempt",
    "field_goal_attempt",
    "kickoff_attempt",
    "punt_attempt",
    "fumble",
    "complete_pass",
    "assist_tackle",
    "lateral_reception",
    "lateral_rush",
    "lateral_return",
    "lateral_recovery",
    "tackle_with_assist",
    "defensive_two_point_attempt",
    "defensive_two_point_conv",
    "defensive_extra_point_attempt",
    "defensive_extra_point_conv",
    "drive_ended_with_score",
    "success",
    "first_down",
    "qb_dropback",
    "qb_kneel",
    "qb_spike",
    "qb_scramble",
    "shotgun",
    "no_huddle",
    "goal_to_go",
    "touchback",
    "aborted_play",
    "out_of_bounds",
    "home_opening_kickoff",
    "replay_or_challenge",
    "div_game",
];

/// Numeric source columns that look like indicators in some seasons but must
/// never be typed Boolean.
pub const BOOLEAN_DENY: &[&str] = &[
    "score_differential",
    "score_differential_post",
    "yardline_100",
    "yards_gained",
    "air_yards",
    "yards_after_catch",
    "kick_distance",
    "passing_yards",
    "receiving_yards",
    "rushing_yards",
    "return_yards",
    "penalty_yards",
    "fumble_recovery_1_yards",
    "fumble_recovery_2_yards",
    "lateral_receiving_yards",
    "lateral_rushing_yards",
    "drive_play_count",
    "drive_first_downs",
    "drive_quarter_start",
    "drive_quarter_end",
    "drive_yards_penalized",
    "epa",
    "cpoe",
    "ep",
    "wp",
    "wpa",
    "total_home_epa",
    "total_away_epa",
    "air_epa",
    "yac_epa",
    "comp_air_epa",
    "comp_yac_epa",
    "total_home_rush_epa",
    "total_away_rush_epa",
    "total_home_pass_epa",
    "total_away_pass_epa",
    "vegas_wpa",
    "vegas_home_wpa",
    "home_wp_post",
    "away_wp_post",
    "vegas_wp",
    "vegas_home_wp",
    "air_wpa",
    "yac_wpa",
    "no_score_prob",
    "opp_fg_prob",
    "opp_safety_prob",
    "opp_td_prob",
    "fg_prob",
    "safety_prob",
    "td_prob",
    "extra_point_prob",
    "two_point_conversion_prob",
    "def_wp",
    "home_wp",
    "away_wp",
    "spread_line",
    "total_line",
    "surface",
    "temp",
    "wind",
    "jersey_number",
    "qb_epa",
    "xyac_epa",
    "xyac_mean_yardage",
    "xyac_median_yardage",
    "xyac_success",
    "xyac_fd",
    "xpass",
    "pass_oe",
    "cp",
];

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub dataset: Dataset,
    pub schema: TableSchema,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    declarations: TypeDeclarations,
}

impl Catalog {
    pub fn new(declarations: TypeDeclarations) -> Self {
        Catalog {
            entries: Vec::new(),
            declarations,
        }
    }

    pub fn with_table(mut self, dataset: Dataset, schema: TableSchema) -> Self {
        self.entries.push(CatalogEntry { dataset, schema });
        self
    }

    /// Tables are listed in load order: `Game` before `Play`, `Play` before
    /// the tables keyed off it.
    pub fn builtin() -> Self {
        Catalog::new(TypeDeclarations::new(
            BOOLEAN_ALLOW.iter().copied(),
            BOOLEAN_DENY.iter().copied(),
        ))
        .with_table(Dataset::PlayByPlay, game())
        .with_table(Dataset::PlayByPlay, play())
        .with_table(Dataset::PlayByPlay, play_details())
        .with_table(Dataset::PlayByPlay, play_participants())
        .with_table(Dataset::PlayByPlay, play_advanced_stats())
        .with_table(Dataset::PlayByPlay, play_special_teams())
        .with_table(Dataset::PlayByPlay, play_game_info())
        .with_table(Dataset::PlayByPlay, drive_info())
        .with_table(Dataset::PlayByPlay, play_timeouts())
        .with_table(Dataset::PlayByPlay, fumble_info())
        .with_table(Dataset::PlayByPlay, interception_info())
        .with_table(Dataset::PlayByPlay, sack_players())
        .with_table(Dataset::Players, player())
        .with_table(Dataset::PlayerStats, player_weekly_stats())
    }

    pub fn declarations(&self) -> &TypeDeclarations {
        &self.declarations
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.entries.iter().map(|entry| &entry.schema)
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables()
            .find(|schema| schema.name == name)
            .or_else(|| self.tables().find(|s| s.name.eq_ignore_ascii_case(name)))
    }

    pub fn require(&self, name: &str) -> Result<&TableSchema, SchemaError> {
        self.get(name)
            .ok_or_else(|| SchemaError::UnknownTable(name.to_string()))
    }

    pub fn dataset_of(&self, name: &str) -> Option<Dataset> {
        self.entries
            .iter()
            .find(|entry| entry.schema.name == name)
            .map(|entry| entry.dataset)
    }

    pub fn for_dataset(&self, dataset: Dataset) -> Vec<&TableSchema> {
        self.entries
            .iter()
            .filter(|entry| entry.dataset == dataset)
            .map(|entry| &entry.schema)
            .collect()
    }

    /// Restricts `dataset`'s tables to `names`, keeping catalog order. An
    /// empty selection means every table of the dataset.
    pub fn select(&self, dataset: Dataset, names: &[String]) -> Result<Vec<&TableSchema>, SchemaError> {
        if names.is_empty() {
            return Ok(self.for_dataset(dataset));
        }
        for name in names {
            let schema = self.require(name)?;
            if self.dataset_of(&schema.name) != Some(dataset) {
                return Err(SchemaError::UnknownTable(format!(
                    "{name} (not part of the {dataset} dataset)"
                )));
            }
        }
        Ok(self
            .for_dataset(dataset)
            .into_iter()
            .filter(|schema| names.iter().any(|n| schema.name.eq_ignore_ascii_case(n)))
            .collect())
    }

    /// Replaces the built-in table of the same name after validating the
    /// replacement against the catalog's declarations.
    pub fn override_with(&mut self, schema: TableSchema) -> Result<(), SchemaError> {
        schema.validate(&self.declarations)?;
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.schema.name == schema.name)
            .ok_or_else(|| SchemaError::UnknownTable(schema.name.clone()))?;
        entry.schema = schema;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        self.declarations.validate()?;
        for schema in self.tables() {
            schema.validate(&self.declarations)?;
        }
        Ok(())
    }
}

fn play_key() -> KeySpec {
    KeySpec::new(["game_id", "play_id"])
}

fn play_child_key(suffix: &str) -> FieldSpec {
    FieldSpec::concat("id", play_key().with_suffix(suffix))
}

fn play_ref() -> FieldSpec {
    FieldSpec::concat("playId", play_key())
}

fn text(source: &str, name: &str) -> FieldSpec {
    FieldSpec::renamed(source, name, Text).empty()
}

fn counter(source: &str, name: &str) -> FieldSpec {
    FieldSpec::renamed(source, name, Integer).zero()
}

fn flag(source: &str, name: &str) -> FieldSpec {
    FieldSpec::renamed(source, name, Boolean)
}

fn game() -> TableSchema {
    TableSchema::new(
        "Game",
        "id",
        vec![
            FieldSpec::renamed("game_id", "id", Text),
            FieldSpec::mapped("season", Integer).zero(),
            FieldSpec::mapped("week", Integer).zero(),
            FieldSpec::renamed("season_type", "gameType", Text).default_to("REG"),
            FieldSpec::renamed("home_team", "homeTeam", Text).default_to("UNK"),
            FieldSpec::renamed("away_team", "awayTeam", Text).default_to("UNK"),
            counter("total_home_score", "homeScore"),
            counter("total_away_score", "awayScore"),
            FieldSpec::load_time("createdAt"),
            FieldSpec::load_time("updatedAt"),
        ],
    )
    .with_touch_field("updatedAt")
}

fn play() -> TableSchema {
    TableSchema::new(
        "Play",
        "id",
        vec![
            FieldSpec::concat("id", play_key()),
            FieldSpec::renamed("game_id", "gameId", Text),
            FieldSpec::renamed("qtr", "quarter", Integer).default_to("1"),
            FieldSpec::mapped("down", Integer).zero(),
            counter("ydstogo", "yardsToGo"),
            FieldSpec::renamed("yards_gained", "yardsGained", Integer),
            FieldSpec::renamed("play_type", "playType", Text).default_to("no_play"),
            FieldSpec::renamed("posteam", "possessionTeam", Text).default_to("UNK"),
            FieldSpec::renamed("defteam", "defensiveTeam", Text).default_to("UNK"),
            text("desc", "playDescription"),
            FieldSpec::mapped("epa", Float),
            FieldSpec::mapped("cpoe", Float),
            flag("success", "success"),
        ],
    )
}

fn play_details() -> TableSchema {
    TableSchema::new(
        "PlayDetails",
        "id",
        vec![
            play_child_key("details"),
            play_ref(),
            counter("yardline_100", "yardline100"),
            counter("quarter_seconds_remaining", "quarterSecsRemaining"),
            counter("half_seconds_remaining", "halfSecsRemaining"),
            counter("game_seconds_remaining", "gameSecsRemaining"),
            flag("goal_to_go", "goalToGo"),
            flag("shotgun", "shotgun"),
            flag("no_huddle", "noHuddle"),
            flag("qb_dropback", "qbDropback"),
            flag("qb_kneel", "qbKneel"),
            flag("qb_spike", "qbSpike"),
            flag("qb_scramble", "qbScramble"),
            text("pass_length", "passLength"),
            text("pass_location", "passLocation"),
            text("run_location", "runLocation"),
            text("run_gap", "runGap"),
            text("field_goal_result", "fieldGoalResult"),
            counter("kick_distance", "kickDistance"),
        ],
    )
}

fn play_participants() -> TableSchema {
    TableSchema::new(
        "PlayParticipants",
        "id",
        vec![
            play_child_key("participants"),
            play_ref(),
            text("passer_player_id", "passerId"),
            text("passer_player_name", "passerName"),
            text("receiver_player_id", "receiverId"),
            text("receiver_player_name", "receiverName"),
            text("rusher_player_id", "rusherId"),
            text("rusher_player_name", "rusherName"),
            counter("passing_yards", "passingYards"),
            counter("receiving_yards", "receivingYards"),
            counter("rushing_yards", "rushingYards"),
        ],
    )
}

fn play_advanced_stats() -> TableSchema {
    let mut fields = vec![
        play_child_key("stats"),
        play_ref(),
        counter("air_yards", "airYards"),
        counter("yards_after_catch", "yardsAfterCatch"),
        FieldSpec::renamed("ep", "expectedPoints", Float),
        FieldSpec::renamed("wp", "winProbability", Float),
        FieldSpec::synthesized("expectedYards", Float),
        flag("success", "success"),
        FieldSpec::synthesized("successProbability", Float),
    ];
    fields.extend(
        [
            "total_home_epa",
            "total_away_epa",
            "total_home_rush_epa",
            "total_away_rush_epa",
            "total_home_pass_epa",
            "total_away_pass_epa",
            "air_epa",
            "yac_epa",
            "xyac_epa",
            "xyac_mean_yardage",
            "xyac_median_yardage",
            "xyac_success",
            "xyac_fd",
            "xpass",
            "pass_oe",
        ]
        .into_iter()
        .map(|column| FieldSpec::mapped(column, Float)),
    );
    TableSchema::new("PlayAdvancedStats", "id", fields)
}

fn play_special_teams() -> TableSchema {
    TableSchema::new(
        "PlaySpecialTeams",
        "id",
        vec![
            play_child_key("special_teams"),
            play_ref(),
            flag("punt_blocked", "puntBlocked"),
            flag("punt_inside_twenty", "puntInsideTwenty"),
            flag("punt_in_endzone", "puntInEndzone"),
            flag("punt_out_of_bounds", "puntOutOfBounds"),
            flag("punt_downed", "puntDowned"),
            flag("punt_fair_catch", "puntFairCatch"),
            flag("kickoff_inside_twenty", "kickoffInsideTwenty"),
            flag("kickoff_in_endzone", "kickoffInEndzone"),
            flag("kickoff_out_of_bounds", "kickoffOutOfBounds"),
            flag("kickoff_downed", "kickoffDowned"),
            flag("kickoff_fair_catch", "kickoffFairCatch"),
            text("return_team", "returnTeam"),
            counter("return_yards", "returnYards"),
            text("punter_player_id", "punterPlayerId"),
            text("punter_player_name", "punterPlayerName"),
            text("kicker_player_id", "kickerPlayerId"),
            text("kicker_player_name", "kickerPlayerName"),
            FieldSpec::synthesized("returnerPlayerId", Text).empty(),
            FieldSpec::synthesized("returnerPlayerName", Text).empty(),
        ],
    )
}

fn play_game_info() -> TableSchema {
    TableSchema::new(
        "PlayGameInfo",
        "id",
        vec![
            play_child_key("game_info"),
            play_ref(),
            counter("total_home_score", "homeScore"),
            counter("total_away_score", "awayScore"),
            FieldSpec::synthesized("location", Text).empty(),
            text("stadium", "stadium"),
            text("weather", "weather"),
            text("surface", "surface"),
            text("roof", "roof"),
            counter("temp", "temperature"),
            counter("wind", "windSpeed"),
            text("home_coach", "homeCoach"),
            text("away_coach", "awayCoach"),
        ],
    )
}

fn drive_info() -> TableSchema {
    TableSchema::new(
        "DriveInfo",
        "id",
        vec![
            play_child_key("drive"),
            FieldSpec::concat("playDetailsId", play_key().with_suffix("details")),
            counter("drive_play_count", "drivePlayCount"),
            text("drive_time_of_possession", "driveTimeOfPossession"),
            counter("drive_first_downs", "driveFirstDowns"),
            flag("drive_inside20", "driveInside20"),
            flag("drive_ended_with_score", "driveEndedWithScore"),
            counter("drive_quarter_start", "driveQuarterStart"),
            counter("drive_quarter_end", "driveQuarterEnd"),
            counter("drive_yards_penalized", "driveYardsPenalized"),
            text("drive_start_transition", "driveStartTransition"),
            text("drive_end_transition", "driveEndTransition"),
            text("drive_start_yard_line", "driveStartYardLine"),
            text("drive_end_yard_line", "driveEndYardLine"),
        ],
    )
}

fn play_timeouts() -> TableSchema {
    TableSchema::new(
        "PlayTimeouts",
        "id",
        vec![
            play_child_key("timeout"),
            FieldSpec::concat("playDetailsId", play_key().with_suffix("details")),
            counter("home_timeouts_remaining", "homeRemaining"),
            counter("away_timeouts_remaining", "awayRemaining"),
            text("timeout_team", "timeoutTeam"),
        ],
    )
}

fn participants_ref() -> FieldSpec {
    FieldSpec::concat("playParticipantsId", play_key().with_suffix("participants"))
}

fn fumble_info() -> TableSchema {
    TableSchema::new(
        "FumbleInfo",
        "id",
        vec![
            play_child_key("fumble"),
            participants_ref(),
            text("fumbled_1_team", "fumbledTeam"),
            text("fumbled_1_player_id", "fumbledPlayerId"),
            text("fumbled_1_player_name", "fumbledPlayerName"),
            text("fumble_recovery_1_team", "recoveryTeam"),
            counter("fumble_recovery_1_yards", "recoveryYards"),
            text("fumble_recovery_1_player_id", "recoveryPlayerId"),
            text("fumble_recovery_1_player_name", "recoveryPlayerName"),
            flag("fumble_forced", "forced"),
            flag("fumble_lost", "lost"),
            flag("fumble_out_of_bounds", "outOfBounds"),
        ],
    )
}

fn interception_info() -> TableSchema {
    TableSchema::new(
        "InterceptionInfo",
        "id",
        vec![
            play_child_key("int"),
            participants_ref(),
            text("interception_player_id", "interceptionPlayerId"),
            text("interception_player_name", "interceptionPlayerName"),
        ],
    )
}

fn sack_players() -> TableSchema {
    TableSchema::new(
        "SackPlayers",
        "id",
        vec![
            play_child_key("sack"),
            participants_ref(),
            text("sack_player_id", "sackPlayerId"),
            text("sack_player_name", "sackPlayerName"),
            text("half_sack_1_player_id", "halfSack1PlayerId"),
            text("half_sack_1_player_name", "halfSack1PlayerName"),
            text("half_sack_2_player_id", "halfSack2PlayerId"),
            text("half_sack_2_player_name", "halfSack2PlayerName"),
        ],
    )
}

fn player() -> TableSchema {
    let optional_text = [
        ("display_name", "displayName"),
        ("common_first_name", "commonFirstName"),
        ("short_name", "shortName"),
        ("football_name", "footballName"),
        ("suffix", "suffix"),
        ("esb_id", "esbId"),
        ("nfl_id", "nflId"),
        ("pfr_id", "pfrId"),
        ("pff_id", "pffId"),
        ("otc_id", "otcId"),
        ("espn_id", "espnId"),
        ("smart_id", "smartId"),
        ("position_group", "positionGroup"),
        ("position", "position"),
        ("ngs_position_group", "ngsPositionGroup"),
        ("ngs_position", "ngsPosition"),
        ("height", "height"),
        ("headshot", "headshot"),
        ("college_name", "collegeName"),
        ("college_conference", "collegeConference"),
        ("jersey_number", "jerseyNumber"),
        ("latest_team", "latestTeam"),
        ("status", "status"),
        ("ngs_status", "ngsStatus"),
        ("ngs_status_short_description", "ngsStatusDescription"),
        ("pff_position", "pffPosition"),
        ("pff_status", "pffStatus"),
        ("draft_team", "draftTeam"),
    ];
    let optional_int = [
        ("weight", "weight"),
        ("rookie_season", "rookieSeason"),
        ("last_season", "lastSeason"),
        ("years_of_experience", "yearsOfExperience"),
        ("draft_year", "draftYear"),
        ("draft_round", "draftRound"),
        ("draft_pick", "draftPick"),
    ];

    let mut fields = vec![
        FieldSpec::concat("id", KeySpec::new(["gsis_id"])),
        FieldSpec::renamed("gsis_id", "gsisId", Text).required(),
        FieldSpec::renamed("first_name", "firstName", Text).required(),
        FieldSpec::renamed("last_name", "lastName", Text).required(),
        FieldSpec::renamed("birth_date", "birthDate", Timestamp),
    ];
    fields.extend(
        optional_text
            .into_iter()
            .map(|(source, name)| FieldSpec::renamed(source, name, Text)),
    );
    fields.extend(
        optional_int
            .into_iter()
            .map(|(source, name)| FieldSpec::renamed(source, name, Integer)),
    );
    fields.push(FieldSpec::load_time("createdAt"));
    fields.push(FieldSpec::load_time("updatedAt"));
    TableSchema::new("Player", "id", fields).with_touch_field("updatedAt")
}

fn player_weekly_stats() -> TableSchema {
    let text_columns = [
        ("player_name", "playerName"),
        ("player_display_name", "playerDisplayName"),
        ("position", "position"),
        ("position_group", "positionGroup"),
        ("headshot_url", "headshotUrl"),
        ("recent_team", "recentTeam"),
        ("opponent_team", "opponentTeam"),
    ];
    let count_columns = [
        ("completions", "completions"),
        ("attempts", "attempts"),
        ("passing_yards", "passingYards"),
        ("passing_tds", "passingTds"),
        ("interceptions", "interceptions"),
        ("sacks", "sacks"),
        ("sack_yards", "sackYards"),
        ("sack_fumbles", "sackFumbles"),
        ("sack_fumbles_lost", "sackFumblesLost"),
        ("passing_air_yards", "passingAirYards"),
        ("passing_yards_after_catch", "passingYardsAfterCatch"),
        ("passing_first_downs", "passingFirstDowns"),
        ("passing_2pt_conversions", "passing2PtConversions"),
        ("carries", "carries"),
        ("rushing_yards", "rushingYards"),
        ("rushing_tds", "rushingTds"),
        ("rushing_fumbles", "rushingFumbles"),
        ("rushing_fumbles_lost", "rushingFumblesLost"),
        ("rushing_first_downs", "rushingFirstDowns"),
        ("rushing_2pt_conversions", "rushing2PtConversions"),
        ("receptions", "receptions"),
        ("targets", "targets"),
        ("receiving_yards", "receivingYards"),
        ("receiving_tds", "receivingTds"),
        ("receiving_fumbles", "receivingFumbles"),
        ("receiving_fumbles_lost", "receivingFumblesLost"),
        ("receiving_air_yards", "receivingAirYards"),
        ("receiving_yards_after_catch", "receivingYardsAfterCatch"),
        ("receiving_first_downs", "receivingFirstDowns"),
        ("receiving_2pt_conversions", "receiving2PtConversions"),
        ("special_teams_tds", "specialTeamsTds"),
    ];
    let rate_columns = [
        ("passing_epa", "passingEpa"),
        ("pacr", "pacr"),
        ("dakota", "dakota"),
        ("rushing_epa", "rushingEpa"),
        ("receiving_epa", "receivingEpa"),
        ("racr", "racr"),
        ("target_share", "targetShare"),
        ("air_yards_share", "airYardsShare"),
        ("wopr", "wopr"),
        ("fantasy_points", "fantasyPoints"),
        ("fantasy_points_ppr", "fantasyPointsPpr"),
    ];

    let mut fields = vec![
        FieldSpec::concat("id", KeySpec::new(["player_id", "season", "week"])),
        FieldSpec::renamed("player_id", "playerId", Text).required(),
        FieldSpec::mapped("season", Integer).zero(),
        FieldSpec::mapped("week", Integer).zero(),
        text("season_type", "seasonType"),
    ];
    fields.extend(text_columns.into_iter().map(|(s, n)| text(s, n)));
    fields.extend(count_columns.into_iter().map(|(s, n)| counter(s, n)));
    fields.extend(
        rate_columns
            .into_iter()
            .map(|(s, n)| FieldSpec::renamed(s, n, Float)),
    );
    TableSchema::new("PlayerWeeklyStats", "id", fields).with_conflict_key(&[
        "playerId",
        "season",
        "week",
        "seasonType",
    ])
}
