//! The tally run: enumerate events, score every result into its leagues, and
//! fold the per-event payloads into a board.
//!
//! Per-event payloads are plain JSON values so they can round-trip through the
//! cache and fold with `deep_add`; the typed `TallyBoard` is decoded once at
//! the end. Flags are derived in a second pass over the finished board and are
//! never cached.

use crate::cache::CacheManager;
use crate::eligibility;
use crate::error::{Error, Result};
use crate::model::{
    self, parse_iso_date, AthleteProfile, CompetitorType, EventResult, League, LeagueType,
    ResultRecord,
};
use crate::rules::{self, Facts};
use crate::scoring::{self, PoolEntry, Rank};
use crate::store::{DocMode, Store, StoreLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::rc::Rc;

/// An athlete document resolved through the store.
#[derive(Debug)]
pub struct AthleteDoc {
    pub id: String,
    pub path: PathBuf,
    pub profile: AthleteProfile,
}

/// An event document plus its board identity (path relative to `results/`)
/// and the canonical resolved content the cache keys on. Keying on resolved
/// content means an edit to an included template invalidates every event
/// built from it.
#[derive(Debug)]
pub struct EventDoc {
    pub path: PathBuf,
    pub id: String,
    pub canonical: String,
    pub event: EventResult,
}

/// Run settings from the CLI.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Skip events that fail to tally instead of aborting (lock loss still
    /// aborts).
    pub keep_going: bool,
    /// Report `_debug_points` mismatches on stderr. Only checked while an
    /// event is actually computed, so pair with `use_cache: false` for a full
    /// report.
    pub debug_points: bool,
    pub verbose: bool,
    pub use_cache: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            keep_going: false,
            debug_points: false,
            verbose: false,
            use_cache: true,
        }
    }
}

/// One scored contribution to an entity's tally for one event. Team entries
/// name the athlete the points came from.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventEntry {
    pub points: f64,
    pub rank: Rank,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub athlete: Option<String>,
}

/// One entity's standing in one league.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EntityTally {
    pub total: f64,
    #[serde(default)]
    pub per_event: BTreeMap<String, Vec<EventEntry>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

/// league id -> entity id -> standing. BTreeMaps keep output deterministic.
pub type TallyBoard = BTreeMap<String, BTreeMap<String, EntityTally>>;

/// All per-run state: the store handle, the lock to re-validate, and every
/// memoization the run needs. Single-threaded by design; threading this by
/// parameter keeps the engine free of global mutable state.
pub struct RunContext<'a> {
    store: &'a Store,
    lock: Option<&'a StoreLock>,
    leagues: RefCell<Option<Rc<Vec<League>>>>,
    events: RefCell<Option<Rc<Vec<Rc<EventDoc>>>>>,
    athletes: RefCell<HashMap<String, Option<Rc<AthleteDoc>>>>,
    eligibility: RefCell<HashMap<(String, String), Rc<Vec<League>>>>,
    days: RefCell<HashMap<String, Rc<Value>>>,
}

impl<'a> RunContext<'a> {
    pub fn new(store: &'a Store, lock: Option<&'a StoreLock>) -> Self {
        RunContext {
            store,
            lock,
            leagues: RefCell::new(None),
            events: RefCell::new(None),
            athletes: RefCell::new(HashMap::new()),
            eligibility: RefCell::new(HashMap::new()),
            days: RefCell::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Store {
        self.store
    }

    /// Re-validate the advisory lock; `StoreLock::check` throttles the actual
    /// file read.
    pub fn check_lock(&self) -> Result<()> {
        if let Some(lock) = self.lock {
            lock.check(true)?;
        }
        Ok(())
    }

    /// Every league definition in the store, loaded once per run. Template
    /// documents are skipped; they only exist to be included.
    pub fn leagues(&self) -> Result<Rc<Vec<League>>> {
        if let Some(leagues) = self.leagues.borrow().as_ref() {
            return Ok(Rc::clone(leagues));
        }
        let dir = self.store.leagues_dir();
        let mut leagues = Vec::new();
        for path in self.store.list_documents(&dir)? {
            let doc = match self.store.load(&path, DocMode::Data) {
                Ok(doc) => doc,
                Err(Error::TemplateUsedAsData { .. }) => continue,
                Err(e) => return Err(e),
            };
            let def = model::decode(&doc)?;
            let id = path
                .strip_prefix(&dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            leagues.push(League { id, path, def });
        }
        let leagues = Rc::new(leagues);
        *self.leagues.borrow_mut() = Some(Rc::clone(&leagues));
        Ok(leagues)
    }

    /// Every event document under `results/`, sorted by path.
    pub fn events(&self) -> Result<Rc<Vec<Rc<EventDoc>>>> {
        if let Some(events) = self.events.borrow().as_ref() {
            return Ok(Rc::clone(events));
        }
        let dir = self.store.results_dir();
        let mut events = Vec::new();
        for path in self.store.list_documents(&dir)? {
            let doc = match self.store.load(&path, DocMode::Data) {
                Ok(doc) => doc,
                Err(Error::TemplateUsedAsData { .. }) => continue,
                Err(e) => return Err(e),
            };
            let canonical = serde_json::to_string(&doc.value)
                .map_err(|e| Error::data(&path, format!("serialize failed: {e}")))?;
            let event = model::decode(&doc)?;
            let id = path
                .strip_prefix(&dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            events.push(Rc::new(EventDoc {
                path,
                id,
                canonical,
                event,
            }));
        }
        let events = Rc::new(events);
        *self.events.borrow_mut() = Some(Rc::clone(&events));
        Ok(events)
    }

    /// Resolve an athlete id to its document, memoized. `None` means the id
    /// resolved to a template document and should be skipped.
    pub fn athlete(&self, id: &str) -> Result<Option<Rc<AthleteDoc>>> {
        if let Some(cached) = self.athletes.borrow().get(id) {
            return Ok(cached.clone());
        }
        let path = self.store.lookup_athlete_path(id)?;
        let resolved = match self.store.load(&path, DocMode::Data) {
            Ok(doc) => {
                let profile = model::decode(&doc)?;
                Some(Rc::new(AthleteDoc {
                    id: id.to_string(),
                    path,
                    profile,
                }))
            }
            Err(Error::TemplateUsedAsData { .. }) => None,
            Err(e) => return Err(e),
        };
        self.athletes
            .borrow_mut()
            .insert(id.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Summaries of every event sharing a date, for eligibility facts.
    pub fn days_events(&self, date: &str) -> Result<Rc<Value>> {
        if let Some(cached) = self.days.borrow().get(date) {
            return Ok(Rc::clone(cached));
        }
        let target = parse_iso_date(date);
        let mut summaries = Vec::new();
        for event in self.events()?.iter() {
            let same_day = match (target, event.event.date()) {
                (Some(a), Some(b)) => a == b,
                _ => event.event.date == date,
            };
            if !same_day {
                continue;
            }
            let mut summary = Map::new();
            summary.insert("name".to_string(), Value::from(event.event.name.clone()));
            summary.insert(
                "type".to_string(),
                Value::from(event.event.event_type.clone()),
            );
            summary.insert(
                "distance".to_string(),
                event.event.distance.clone().unwrap_or(Value::Null),
            );
            summary.insert(
                "competitors".to_string(),
                Value::Array(
                    event
                        .event
                        .results
                        .keys()
                        .map(|id| Value::from(id.clone()))
                        .collect(),
                ),
            );
            summaries.push(Value::Object(summary));
        }
        let value = Rc::new(Value::Array(summaries));
        self.days
            .borrow_mut()
            .insert(date.to_string(), Rc::clone(&value));
        Ok(value)
    }

    pub(crate) fn cached_eligibility(&self, key: &(String, String)) -> Option<Rc<Vec<League>>> {
        self.eligibility.borrow().get(key).map(Rc::clone)
    }

    pub(crate) fn remember_eligibility(&self, key: (String, String), leagues: Rc<Vec<League>>) {
        self.eligibility.borrow_mut().insert(key, leagues);
    }
}

/// Tally every event in the store into a board.
pub fn tally(ctx: &RunContext<'_>, opts: &RunOptions) -> Result<TallyBoard> {
    let cache = CacheManager::new(ctx.store(), opts.use_cache)?;
    let mut folded = Value::Object(Map::new());

    for event in ctx.events()?.iter() {
        ctx.check_lock()?;
        if opts.verbose {
            eprintln!("tallying {}", event.id);
        }
        if event.event.results.is_empty() {
            eprintln!("warning: event {} has no results", event.id);
        }
        let payload = cache.get_or_compute(&event.path, &event.canonical, || {
            compute_event_payload(ctx, event, opts)
        });
        match payload {
            Ok(payload) => folded = crate::store::deep_add(&folded, &payload),
            Err(err @ Error::LockLost { .. }) => return Err(err),
            Err(err) if opts.keep_going => {
                eprintln!("warning: skipping event {}: {err}", event.id);
            }
            Err(err) => return Err(err),
        }
    }

    let mut board: TallyBoard = serde_json::from_value(folded)
        .map_err(|e| Error::data(ctx.store().root(), format!("malformed tally fold: {e}")))?;
    apply_flags(ctx, &mut board)?;
    Ok(board)
}

/// Score one event into a `{league -> entity -> {total, per_event}}` payload.
fn compute_event_payload(
    ctx: &RunContext<'_>,
    event: &EventDoc,
    opts: &RunOptions,
) -> Result<Value> {
    match event.event.competitor_type {
        CompetitorType::Individual => compute_individual_event(ctx, event, opts),
        CompetitorType::Team => compute_team_event(ctx, event, opts),
    }
}

fn compute_individual_event(
    ctx: &RunContext<'_>,
    event: &EventDoc,
    opts: &RunOptions,
) -> Result<Value> {
    // Resolve eligibility for the whole field first; the comparison pool for
    // each league is everyone in the event eligible for that league.
    let mut field: Vec<(&str, &ResultRecord, Rc<AthleteDoc>, Rc<Vec<League>>)> = Vec::new();
    for (athlete_id, record) in &event.event.results {
        let Some(athlete) = ctx.athlete(athlete_id)? else {
            continue;
        };
        let leagues = eligibility::eligible_leagues(ctx, &athlete, event)?;
        field.push((athlete_id.as_str(), record, athlete, leagues));
    }

    let mut payload = Value::Object(Map::new());
    for (athlete_id, record, athlete, leagues) in &field {
        for league in leagues.iter() {
            let config = scoring_config(league, event)?;
            let pool: Vec<PoolEntry<'_>> = field
                .iter()
                .filter(|(_, _, _, other_leagues)| {
                    other_leagues.iter().any(|other| other.id == league.id)
                })
                .map(|(id, record, _, _)| PoolEntry { id, record })
                .collect();
            let (points, rank) = scoring::score(
                athlete_id,
                record,
                &pool,
                config,
                &league.id,
                event.event.scoring_key(),
            )?;
            report_debug_points(opts, event, athlete_id, record, points);

            let (entity, attributed) = match league.def.league_type {
                LeagueType::Individual => (athlete_id.to_string(), None),
                LeagueType::Team => {
                    let team = athlete.profile.team.clone().ok_or_else(|| {
                        Error::data(&athlete.path, "athlete has no team but scores a team league")
                    })?;
                    (team, Some(athlete_id.to_string()))
                }
            };
            let entry = EventEntry {
                points,
                rank,
                athlete: attributed,
            };
            let contribution = contribution(&league.id, &entity, &event.id, &entry)?;
            payload = crate::store::deep_add(&payload, &contribution);
        }
    }
    Ok(payload)
}

fn compute_team_event(
    ctx: &RunContext<'_>,
    event: &EventDoc,
    opts: &RunOptions,
) -> Result<Value> {
    let pool: Vec<PoolEntry<'_>> = event
        .event
        .results
        .iter()
        .map(|(id, record)| PoolEntry { id, record })
        .collect();

    let mut payload = Value::Object(Map::new());
    for (team_id, record) in &event.event.results {
        for league in eligibility::eligible_team_leagues(ctx, team_id)? {
            let config = scoring_config(&league, event)?;
            let (points, rank) = scoring::score(
                team_id,
                record,
                &pool,
                config,
                &league.id,
                event.event.scoring_key(),
            )?;
            report_debug_points(opts, event, team_id, record, points);

            let entry = EventEntry {
                points,
                rank,
                athlete: None,
            };
            let contribution = contribution(&league.id, team_id, &event.id, &entry)?;
            payload = crate::store::deep_add(&payload, &contribution);
        }
    }
    Ok(payload)
}

fn scoring_config<'l>(
    league: &'l League,
    event: &EventDoc,
) -> Result<&'l scoring::ScoringConfig> {
    let key = event.event.scoring_key();
    league
        .def
        .scoring
        .get(key)
        .ok_or_else(|| Error::ScoringNotConfigured {
            league: league.id.clone(),
            event_type: key.to_string(),
        })
}

fn report_debug_points(
    opts: &RunOptions,
    event: &EventDoc,
    competitor: &str,
    record: &ResultRecord,
    points: f64,
) {
    if !opts.debug_points {
        return;
    }
    if let Some(expected) = record.debug_points() {
        if (expected - points).abs() > 1e-9 {
            eprintln!(
                "debug points mismatch in {} for {competitor}: expected {expected}, computed {points}",
                event.id
            );
        }
    }
}

/// One scored entry as a foldable payload fragment.
fn contribution(league_id: &str, entity: &str, event_id: &str, entry: &EventEntry) -> Result<Value> {
    let entry_value = serde_json::to_value(entry)
        .map_err(|e| Error::data(event_id, format!("serialize entry failed: {e}")))?;
    let mut per_event = Map::new();
    per_event.insert(event_id.to_string(), Value::Array(vec![entry_value]));
    let mut standing = Map::new();
    standing.insert("total".to_string(), Value::from(entry.points));
    standing.insert("per_event".to_string(), Value::Object(per_event));
    let mut entities = Map::new();
    entities.insert(entity.to_string(), Value::Object(standing));
    let mut board = Map::new();
    board.insert(league_id.to_string(), Value::Object(entities));
    Ok(Value::Object(board))
}

/// Second pass: evaluate league flag rules against the finished board. Team
/// entities are flagged per contributing athlete.
fn apply_flags(ctx: &RunContext<'_>, board: &mut TallyBoard) -> Result<()> {
    let leagues = ctx.leagues()?;
    for (league_id, entities) in board.iter_mut() {
        let Some(league) = leagues.iter().find(|league| &league.id == league_id) else {
            continue;
        };
        if league.def.flags.is_empty() {
            continue;
        }
        for (entity_id, standing) in entities.iter_mut() {
            let athletes: Vec<String> = match league.def.league_type {
                LeagueType::Individual => vec![entity_id.clone()],
                LeagueType::Team => {
                    let mut contributors: Vec<String> = standing
                        .per_event
                        .values()
                        .flatten()
                        .filter_map(|entry| entry.athlete.clone())
                        .collect();
                    contributors.sort();
                    contributors.dedup();
                    contributors
                }
            };
            for athlete_id in athletes {
                let Some(facts) = flag_facts(ctx, &athlete_id, league)? else {
                    continue;
                };
                for flag in &league.def.flags {
                    let rule = rules::compile(&flag.expression)?;
                    let value = rules::execute(&rule, &facts)?;
                    if rules::truthy(&value) {
                        let label = match league.def.league_type {
                            LeagueType::Individual => flag.name.clone(),
                            LeagueType::Team => format!("{} for {athlete_id}", flag.name),
                        };
                        standing.flags.push(label);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Facts for flag rules: how many events the athlete appears in, and in how
/// many they were eligible for this league and actually started.
fn flag_facts(
    ctx: &RunContext<'_>,
    athlete_id: &str,
    league: &League,
) -> Result<Option<Facts>> {
    let Some(athlete) = ctx.athlete(athlete_id)? else {
        return Ok(None);
    };
    let mut races_count = 0i64;
    let mut races_count_in_league = 0i64;
    for event in ctx.events()?.iter() {
        if event.event.competitor_type != CompetitorType::Individual {
            continue;
        }
        let Some(record) = event.event.results.get(athlete_id) else {
            continue;
        };
        races_count += 1;
        if record.is_dns() {
            continue;
        }
        let eligible = eligibility::eligible_leagues(ctx, &athlete, event)?;
        if eligible.iter().any(|other| other.id == league.id) {
            races_count_in_league += 1;
        }
    }
    let mut facts = Facts::new();
    facts.insert("races_count".to_string(), Value::from(races_count));
    facts.insert(
        "races_count_in_league".to_string(),
        Value::from(races_count_in_league),
    );
    Ok(Some(facts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_contribution_shape() {
        let entry = EventEntry {
            points: 9.0,
            rank: Rank::Place(1),
            athlete: None,
        };
        let value = contribution("junior.yaml", "ath2", "race1.yaml", &entry).unwrap();
        assert_eq!(
            value,
            json!({
                "junior.yaml": {
                    "ath2": {
                        "total": 9.0,
                        "per_event": {"race1.yaml": [{"points": 9.0, "rank": 1}]}
                    }
                }
            })
        );
    }

    #[test]
    fn test_contributions_fold_additively() {
        let a = contribution(
            "houses.yaml",
            "red",
            "race1.yaml",
            &EventEntry {
                points: 10.0,
                rank: Rank::Place(0),
                athlete: Some("ath1".to_string()),
            },
        )
        .unwrap();
        let b = contribution(
            "houses.yaml",
            "red",
            "race1.yaml",
            &EventEntry {
                points: 8.0,
                rank: Rank::Place(2),
                athlete: Some("ath3".to_string()),
            },
        )
        .unwrap();
        let folded = crate::store::deep_add(&a, &b);
        let board: TallyBoard = serde_json::from_value(folded).unwrap();
        let standing = &board["houses.yaml"]["red"];
        assert_eq!(standing.total, 18.0);
        assert_eq!(standing.per_event["race1.yaml"].len(), 2);
        assert_eq!(
            standing.per_event["race1.yaml"][1].athlete.as_deref(),
            Some("ath3")
        );
    }

    #[test]
    fn test_event_entry_omits_absent_athlete() {
        let entry = EventEntry {
            points: 0.0,
            rank: Rank::Dnf,
            athlete: None,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value, json!({"points": 0.0, "rank": "DNF"}));
    }
}
