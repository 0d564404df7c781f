//! End-to-end tally runs against temporary stores.

use sports_tally::cache::namespace_hashes;
use sports_tally::output::render_board;
use sports_tally::scoring::Rank;
use sports_tally::store::Store;
use sports_tally::tally::{tally, RunContext, RunOptions};
use sports_tally::Error;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

const RACE_SCORING: &str = "\
scoring:
  race:
    method: minus_place
    sort_by: lowest
    sort_key: finish_time
    method_value: 10
    method_decrement: 1
";

/// A junior league (under 15), a house cup, four athletes and one race.
/// ath1 and ath2 finish, ath3 starts but does not finish, ath4 is an adult
/// whose faster time must not affect junior placings.
fn sports_day() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    write(root, "athletes/ath1.yaml", "name: One\ndob: 2010-06-15\ngender: female\nteam: red\n");
    write(root, "athletes/ath2.yaml", "name: Two\ndob: 2011-01-20\ngender: male\nteam: blue\n");
    write(root, "athletes/ath3.yaml", "name: Three\ndob: 2010-11-02\ngender: female\nteam: red\n");
    write(root, "athletes/ath4.yaml", "name: Four\ndob: 2000-03-03\ngender: male\nteam: blue\n");

    write(
        root,
        "leagues/junior.yaml",
        &format!(
            "name: Junior League\nleague_type: individual\neligibility:\n  - athlete_age < 15\n{RACE_SCORING}flags:\n  - name: Regular\n    expression: races_count_in_league >= 1\n"
        ),
    );
    write(
        root,
        "leagues/houses.yaml",
        &format!(
            "name: House Cup\nleague_type: team\npermit_teams: true\n{RACE_SCORING}  bonus_points:\n    method: bonus_points\n"
        ),
    );

    write(
        root,
        "results/race1.yaml",
        "name: Sprint\ntype: race\ndate: 2024-03-01\nresults:\n  ath1:\n    finish_time: 10000\n  ath2:\n    finish_time: 12000\n  ath3:\n    DNF: true\n  ath4:\n    finish_time: 9000\n",
    );

    dir
}

fn run(root: &Path, opts: &RunOptions) -> sports_tally::Result<sports_tally::tally::TallyBoard> {
    let store = Store::open(root)?;
    let ctx = RunContext::new(&store, None);
    tally(&ctx, opts)
}

#[test]
fn test_junior_league_standings() {
    let dir = sports_day();
    let board = run(dir.path(), &RunOptions::default()).unwrap();
    let junior = &board["junior.yaml"];

    assert_eq!(junior["ath1"].total, 10.0);
    assert_eq!(junior["ath2"].total, 9.0);
    assert_eq!(junior["ath3"].total, 0.0);
    // The adult never enters the junior board or its comparison pool.
    assert!(!junior.contains_key("ath4"));

    let entries = &junior["ath1"].per_event["race1.yaml"];
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].rank, Rank::Place(0));
    assert_eq!(junior["ath3"].per_event["race1.yaml"][0].rank, Rank::Dnf);
}

#[test]
fn test_team_league_attributes_contributions() {
    let dir = sports_day();
    let board = run(dir.path(), &RunOptions::default()).unwrap();
    let houses = &board["houses.yaml"];

    // House pool is everyone (no eligibility rules): ath4 9000 first, ath1
    // second, ath2 third, ath3 DNF.
    assert_eq!(houses["red"].total, 9.0); // ath1 9 + ath3 0
    assert_eq!(houses["blue"].total, 18.0); // ath4 10 + ath2 8

    let red_entries = &houses["red"].per_event["race1.yaml"];
    assert_eq!(red_entries.len(), 2);
    let athletes: Vec<_> = red_entries
        .iter()
        .filter_map(|entry| entry.athlete.as_deref())
        .collect();
    assert!(athletes.contains(&"ath1"));
    assert!(athletes.contains(&"ath3"));
}

#[test]
fn test_flags_derived_for_eligible_starters() {
    let dir = sports_day();
    let board = run(dir.path(), &RunOptions::default()).unwrap();
    let junior = &board["junior.yaml"];

    assert_eq!(junior["ath1"].flags, vec!["Regular"]);
    // A DNF still started; only DNS is excluded from the in-league count.
    assert_eq!(junior["ath3"].flags, vec!["Regular"]);
}

#[test]
fn test_dns_excluded_from_in_league_count() {
    let dir = sports_day();
    write(
        dir.path(),
        "results/race2.yaml",
        "name: Relay Trial\ntype: race\ndate: 2024-03-08\nresults:\n  ath1:\n    DNS: true\n  ath2:\n    finish_time: 11000\n",
    );
    write(
        dir.path(),
        "leagues/junior.yaml",
        &format!(
            "name: Junior League\nleague_type: individual\neligibility:\n  - athlete_age < 15\n{RACE_SCORING}flags:\n  - name: Regular\n    expression: races_count_in_league >= 2\n"
        ),
    );
    let board = run(dir.path(), &RunOptions::default()).unwrap();
    let junior = &board["junior.yaml"];

    assert_eq!(board["junior.yaml"]["ath2"].flags, vec!["Regular"]);
    // ath1 appears in both events but the DNS does not count.
    assert_eq!(junior["ath1"].per_event.len(), 2);
    assert!(junior["ath1"].flags.is_empty());
}

#[test]
fn test_runs_are_idempotent() {
    let dir = sports_day();
    let first = run(dir.path(), &RunOptions::default()).unwrap();
    // Second run resolves entirely from cache and renders identically.
    let second = run(dir.path(), &RunOptions::default()).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        render_board(&first).unwrap(),
        render_board(&second).unwrap()
    );
}

#[test]
fn test_athlete_edit_changes_namespace_hash() {
    let dir = sports_day();
    let store = Store::open(dir.path()).unwrap();
    let before = namespace_hashes(&store).unwrap();

    write(dir.path(), "athletes/ath1.yaml", "name: One Edited\ndob: 2010-06-15\ngender: female\nteam: red\n");
    let after = namespace_hashes(&store).unwrap();
    assert_ne!(before.athletes, after.athletes);
    assert_eq!(before.leagues, after.leagues);
    assert_eq!(before.engine, after.engine);

    // A fresh run under the new hash still produces a correct board.
    let board = run(dir.path(), &RunOptions::default()).unwrap();
    assert_eq!(board["junior.yaml"]["ath1"].total, 10.0);
}

#[test]
fn test_edited_results_template_invalidates_event_cache() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root, "athletes/ath1.yaml", "name: One\ndob: 2010-06-15\ngender: female\n");
    write(root, "athletes/ath2.yaml", "name: Two\ndob: 2011-01-20\ngender: male\n");
    write(
        root,
        "leagues/junior.yaml",
        &format!("name: Junior League\nleague_type: individual\n{RACE_SCORING}"),
    );
    write(
        root,
        "results/_heat_base.yaml",
        "_template_only: true\nname: Heat\ntype: race\ndate: 2024-03-01\nresults:\n  ath1:\n    finish_time: 10000\n",
    );
    write(
        root,
        "results/heat1.yaml",
        "_include: _heat_base.yaml\nresults:\n  ath2:\n    finish_time: 12000\n",
    );

    let board = run(root, &RunOptions::default()).unwrap();
    assert_eq!(board["junior.yaml"]["ath1"].total, 10.0);
    assert_eq!(board["junior.yaml"]["ath2"].total, 9.0);

    // Only the included template changes; the event file on disk does not.
    // ath2's inherited opponent is now slower, so ath2 must win the rerun.
    write(
        root,
        "results/_heat_base.yaml",
        "_template_only: true\nname: Heat\ntype: race\ndate: 2024-03-01\nresults:\n  ath1:\n    finish_time: 13000\n",
    );
    let board = run(root, &RunOptions::default()).unwrap();
    assert_eq!(board["junior.yaml"]["ath2"].total, 10.0);
    assert_eq!(board["junior.yaml"]["ath1"].total, 9.0);
}

#[test]
fn test_two_leagues_of_same_type_is_fatal() {
    let dir = sports_day();
    write(
        dir.path(),
        "leagues/senior.yaml",
        &format!("name: Everyone\nleague_type: individual\n{RACE_SCORING}"),
    );
    // ath1 matches both junior and the unconditional league.
    let err = run(dir.path(), &RunOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::MultipleEligibleLeaguesOfSameType { .. }
    ));
}

#[test]
fn test_high_jump_event() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root, "athletes/j1.yaml", "name: J One\ndob: 2010-01-01\ngender: female\n");
    write(root, "athletes/j2.yaml", "name: J Two\ndob: 2010-02-01\ngender: male\n");
    write(root, "athletes/j3.yaml", "name: J Three\ndob: 2010-03-01\ngender: female\n");
    write(
        root,
        "leagues/open.yaml",
        "name: Open\nleague_type: individual\nscoring:\n  high_jump:\n    method: minus_place\n    sort_by: high_jump\n    method_value: 10\n",
    );
    write(
        root,
        "results/jump.yaml",
        "name: High Jump\ntype: high_jump\ndate: 2024-03-01\nresults:\n  j1:\n    heights:\n      \"1.10\": [true]\n      \"1.15\": [false, true]\n  j2:\n    heights:\n      \"1.10\": [true]\n      \"1.15\": [true]\n  j3:\n    heights:\n      \"1.10\": [false, false, false]\n",
    );

    let board = run(root, &RunOptions::default()).unwrap();
    let open = &board["open.yaml"];
    // j2 cleared 1.15 first try; j1 needed two; j3 never cleared a bar.
    assert_eq!(open["j2"].total, 10.0);
    assert_eq!(open["j1"].total, 9.0);
    assert_eq!(open["j3"].total, 0.0);
    assert_eq!(open["j3"].per_event["jump.yaml"][0].rank, Rank::Dnf);
}

#[test]
fn test_team_event_scores_permitting_leagues_only() {
    let dir = sports_day();
    write(
        dir.path(),
        "results/spirit.yaml",
        "name: Spirit Awards\ntype: bonus_points\ndate: 2024-03-02\ncompetitor_type: team\nresults:\n  red:\n    awards:\n      - name: Spirit\n        points: 6\n",
    );
    let board = run(dir.path(), &RunOptions::default()).unwrap();

    // Race points plus the award; the individual league never sees teams.
    assert_eq!(board["houses.yaml"]["red"].total, 15.0);
    assert!(!board["junior.yaml"].contains_key("red"));
    let entry = &board["houses.yaml"]["red"].per_event["spirit.yaml"][0];
    assert_eq!(entry.points, 6.0);
    assert_eq!(entry.rank, Rank::Unranked);
}

#[test]
fn test_keep_going_skips_bad_event() {
    let dir = sports_day();
    write(
        dir.path(),
        "results/broken.yaml",
        "name: Broken\ntype: race\ndate: 2024-03-05\nresults:\n  ath1:\n    splits: [1, 2]\n",
    );
    let strict = run(dir.path(), &RunOptions::default());
    assert!(strict.is_err());

    let opts = RunOptions {
        keep_going: true,
        ..RunOptions::default()
    };
    let board = run(dir.path(), &opts).unwrap();
    assert_eq!(board["junior.yaml"]["ath1"].total, 10.0);
}

#[test]
fn test_athlete_template_include() {
    let dir = sports_day();
    write(
        dir.path(),
        "athletes/_junior.yaml",
        "_template_only: true\ngender: female\nteam: red\n",
    );
    write(
        dir.path(),
        "athletes/ath5.yaml",
        "_include: _junior.yaml\nname: Five\ndob: 2012-09-09\n",
    );
    write(
        dir.path(),
        "results/race3.yaml",
        "name: Dash\ntype: race\ndate: 2024-03-09\nresults:\n  ath5:\n    finish_time: 8000\n",
    );
    let board = run(dir.path(), &RunOptions::default()).unwrap();
    assert_eq!(board["junior.yaml"]["ath5"].total, 10.0);
    // Inherited team routes the contribution to the house league.
    let entry = &board["houses.yaml"]["red"].per_event["race3.yaml"][0];
    assert_eq!(entry.athlete.as_deref(), Some("ath5"));
}

#[test]
fn test_missing_athlete_is_fatal() {
    let dir = sports_day();
    write(
        dir.path(),
        "results/race4.yaml",
        "name: Ghost Race\ntype: race\ndate: 2024-03-10\nresults:\n  nobody:\n    finish_time: 5000\n",
    );
    let err = run(dir.path(), &RunOptions::default()).unwrap_err();
    assert!(matches!(err, Error::AthleteNotFound { .. }));
}

#[test]
fn test_unconfigured_event_type_is_fatal() {
    let dir = sports_day();
    write(
        dir.path(),
        "results/swim.yaml",
        "name: Swim\ntype: swimming\ndate: 2024-03-11\nresults:\n  ath1:\n    finish_time: 60000\n",
    );
    let err = run(dir.path(), &RunOptions::default()).unwrap_err();
    assert!(matches!(err, Error::ScoringNotConfigured { .. }));
}
