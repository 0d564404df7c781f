//! League eligibility: which leagues accept a competitor for an event.

use crate::error::{Error, Result};
use crate::model::{age_in_years, League, LeagueType};
use crate::rules::{self, Facts};
use crate::tally::{AthleteDoc, EventDoc, RunContext};
use serde_json::Value;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Leagues accepting an individual athlete for an event. Every eligibility
/// expression of a league must evaluate truthy; an empty list means always
/// eligible. Results are memoized per (athlete, event) for the run.
pub fn eligible_leagues(
    ctx: &RunContext<'_>,
    athlete: &AthleteDoc,
    event: &EventDoc,
) -> Result<Rc<Vec<League>>> {
    let key = (athlete.id.clone(), event.id.clone());
    if let Some(cached) = ctx.cached_eligibility(&key) {
        return Ok(cached);
    }

    let facts = facts_for(ctx, athlete, event)?;
    let mut eligible = Vec::new();
    for league in ctx.leagues()?.iter() {
        let mut accepted = true;
        for expression in &league.def.eligibility {
            let rule = rules::compile(expression)?;
            let value = rules::execute(&rule, &facts)?;
            if !rules::truthy(&value) {
                accepted = false;
                break;
            }
        }
        if accepted {
            eligible.push(league.clone());
        }
    }

    enforce_one_per_type(&athlete.id, &eligible)?;
    let eligible = Rc::new(eligible);
    ctx.remember_eligibility(key, Rc::clone(&eligible));
    Ok(eligible)
}

/// Leagues a team record can score in: team-type leagues that permit teams.
pub fn eligible_team_leagues(ctx: &RunContext<'_>, team_id: &str) -> Result<Vec<League>> {
    let eligible: Vec<League> = ctx
        .leagues()?
        .iter()
        .filter(|league| league.def.league_type == LeagueType::Team && league.def.permit_teams)
        .cloned()
        .collect();
    enforce_one_per_type(team_id, &eligible)?;
    Ok(eligible)
}

/// Fact record for eligibility expressions: event attributes, athlete
/// attributes derived at the event date, and summaries of the day's events.
fn facts_for(ctx: &RunContext<'_>, athlete: &AthleteDoc, event: &EventDoc) -> Result<Facts> {
    let dob = athlete.profile.dob().ok_or_else(|| {
        Error::data(
            &athlete.path,
            format!("unparseable dob {:?}", athlete.profile.dob),
        )
    })?;
    let date = event
        .event
        .date()
        .ok_or_else(|| Error::data(&event.path, format!("unparseable date {:?}", event.event.date)))?;

    let mut facts = Facts::new();
    facts.insert(
        "event_distance".to_string(),
        event.event.distance.clone().unwrap_or(Value::Null),
    );
    facts.insert(
        "athlete_age".to_string(),
        Value::from(age_in_years(dob, date)),
    );
    facts.insert(
        "athlete_gender".to_string(),
        Value::from(athlete.profile.gender.clone()),
    );
    facts.insert(
        "athlete_ystart".to_string(),
        athlete.profile.ystart.clone().unwrap_or(Value::Null),
    );
    facts.insert(
        "days_events".to_string(),
        ctx.days_events(&event.event.date)?.as_ref().clone(),
    );
    Ok(facts)
}

/// A competitor eligible for two leagues of the same type is an authoring
/// error in the league set, not a scoring decision to make silently.
fn enforce_one_per_type(competitor: &str, eligible: &[League]) -> Result<()> {
    let mut by_type: BTreeMap<&str, Vec<&League>> = BTreeMap::new();
    for league in eligible {
        let key = match league.def.league_type {
            LeagueType::Individual => "individual",
            LeagueType::Team => "team",
        };
        by_type.entry(key).or_default().push(league);
    }
    for (league_type, group) in by_type {
        if group.len() > 1 {
            return Err(Error::MultipleEligibleLeaguesOfSameType {
                competitor: competitor.to_string(),
                league_type: league_type.to_string(),
                leagues: group.iter().map(|league| league.id.clone()).collect(),
            });
        }
    }
    Ok(())
}
