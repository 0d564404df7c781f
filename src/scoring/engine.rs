use super::config::ScoringConfig;
use super::high_jump;
use crate::error::{Error, Result};
use crate::model::{ResultRecord, Terminal};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// One member of a comparison pool: a competitor id and their result in the
/// event. Pools include the competitor being scored; place counting is
/// strictly-better so self-inclusion is harmless.
#[derive(Debug, Clone, Copy)]
pub struct PoolEntry<'a> {
    pub id: &'a str,
    pub record: &'a ResultRecord,
}

/// A computed rank: a 0-indexed place, a terminal status, or nothing at all
/// for methods that do not place (bonus_points).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rank {
    Place(usize),
    Dnf,
    Dq,
    Dns,
    Unranked,
}

impl From<Terminal> for Rank {
    fn from(terminal: Terminal) -> Self {
        match terminal {
            Terminal::Dnf => Rank::Dnf,
            Terminal::Dq => Rank::Dq,
            Terminal::Dns => Rank::Dns,
        }
    }
}

impl Serialize for Rank {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Rank::Place(place) => serializer.serialize_u64(*place as u64),
            Rank::Dnf => serializer.serialize_str("DNF"),
            Rank::Dq => serializer.serialize_str("DQ"),
            Rank::Dns => serializer.serialize_str("DNS"),
            Rank::Unranked => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for Rank {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(Rank::Unranked),
            Value::Number(n) => n
                .as_u64()
                .map(|p| Rank::Place(p as usize))
                .ok_or_else(|| D::Error::custom("rank must be a non-negative integer")),
            Value::String(s) => match s.as_str() {
                "DNF" => Ok(Rank::Dnf),
                "DQ" => Ok(Rank::Dq),
                "DNS" => Ok(Rank::Dns),
                other => Err(D::Error::custom(format!("unknown rank status {other:?}"))),
            },
            _ => Err(D::Error::custom("rank must be a place, a status or null")),
        }
    }
}

/// Score one result against its comparison pool under a league's policy.
///
/// Place/tie computation runs for every competitor first so that ranks stay
/// consistent across the pool; the competitor's own terminal status is applied
/// last and overrides whatever was computed.
pub fn score(
    athlete_id: &str,
    record: &ResultRecord,
    pool: &[PoolEntry<'_>],
    config: &ScoringConfig,
    league_id: &str,
    event_type: &str,
) -> Result<(f64, Rank)> {
    let (mut points, mut rank) = match config.method.as_str() {
        "minus_place" => {
            let sort_by = config.sort_by.as_deref().ok_or_else(|| Error::ScoringConfig {
                league: league_id.to_string(),
                event_type: event_type.to_string(),
                message: "sort_by is required for minus_place".to_string(),
            })?;
            let place = match sort_by {
                "lowest" | "highest" => Some(place_by_value(
                    athlete_id,
                    record,
                    pool,
                    config,
                    sort_by == "lowest",
                    league_id,
                    event_type,
                )?),
                "high_jump" => high_jump::place(athlete_id, record, pool)?,
                other => {
                    return Err(Error::UnknownSortBy {
                        league: league_id.to_string(),
                        event_type: event_type.to_string(),
                        sort_by: other.to_string(),
                    })
                }
            };
            let method_value = config.method_value.ok_or_else(|| Error::ScoringConfig {
                league: league_id.to_string(),
                event_type: event_type.to_string(),
                message: "method_value is required for minus_place".to_string(),
            })?;
            match place {
                Some(place) => {
                    let points =
                        (method_value - place as f64 * config.method_decrement).max(0.0);
                    (points, Rank::Place(place))
                }
                // No cleared height: an implicit DNF.
                None => (0.0, Rank::Dnf),
            }
        }
        "bonus_points" => {
            let points = record.awards_total().ok_or_else(|| Error::InvalidResult {
                competitor: athlete_id.to_string(),
                message: "missing awards list for bonus_points".to_string(),
            })?;
            (points, Rank::Unranked)
        }
        other => {
            return Err(Error::UnknownScoringMethod {
                league: league_id.to_string(),
                event_type: event_type.to_string(),
                method: other.to_string(),
            })
        }
    };

    if let Some(terminal) = record.terminal() {
        points = 0.0;
        rank = terminal.into();
    }

    Ok((points, rank))
}

fn place_by_value(
    athlete_id: &str,
    record: &ResultRecord,
    pool: &[PoolEntry<'_>],
    config: &ScoringConfig,
    lowest: bool,
    league_id: &str,
    event_type: &str,
) -> Result<usize> {
    let sort_key = config.sort_key.as_deref().ok_or_else(|| Error::ScoringConfig {
        league: league_id.to_string(),
        event_type: event_type.to_string(),
        message: "sort_key is required for lowest/highest".to_string(),
    })?;
    let combine_max = match config.combine_method.as_deref() {
        None => false,
        Some("max") => true,
        Some(other) => {
            return Err(Error::ScoringConfig {
                league: league_id.to_string(),
                event_type: event_type.to_string(),
                message: format!("unknown combine_method {other:?}"),
            })
        }
    };

    let mine = member_value(athlete_id, record, sort_key, combine_max, lowest)?;
    let mut place = 0;
    for entry in pool {
        let theirs = member_value(entry.id, entry.record, sort_key, combine_max, lowest)?;
        if (lowest && theirs < mine) || (!lowest && theirs > mine) {
            place += 1;
        }
    }
    Ok(place)
}

/// The value a pool member sorts by. Terminal members (and empty list-valued
/// keys under `combine_method: max`) take a sentinel that can never beat a
/// finisher.
fn member_value(
    competitor_id: &str,
    record: &ResultRecord,
    sort_key: &str,
    combine_max: bool,
    lowest: bool,
) -> Result<f64> {
    let sentinel = if lowest {
        f64::INFINITY
    } else {
        f64::NEG_INFINITY
    };
    if record.is_terminal() {
        return Ok(sentinel);
    }
    match record.get(sort_key) {
        Some(Value::Array(items)) if combine_max => {
            if items.is_empty() {
                return Ok(sentinel);
            }
            let mut best = f64::NEG_INFINITY;
            for item in items {
                let value = item.as_f64().ok_or_else(|| Error::InvalidResult {
                    competitor: competitor_id.to_string(),
                    message: format!("non-numeric entry in {sort_key:?}"),
                })?;
                best = best.max(value);
            }
            Ok(best)
        }
        Some(value) => value.as_f64().ok_or_else(|| Error::InvalidResult {
            competitor: competitor_id.to_string(),
            message: format!("sort key {sort_key:?} is not a number"),
        }),
        None => Err(Error::InvalidResult {
            competitor: competitor_id.to_string(),
            message: format!("missing sort key {sort_key:?}"),
        }),
    }
}
