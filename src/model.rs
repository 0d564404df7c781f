//! Typed views over store documents.
//!
//! Documents stay generic (`serde_json::Value`) through the store layer so
//! template merging and the cache payload fold work uniformly; the engine
//! decodes them into these structs at the point of use.

use crate::error::{Error, Result};
use crate::rules;
use crate::scoring::ScoringConfig;
use crate::store::Document;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Decode a loaded document into a typed model, keeping the document path in
/// the error when the shape is wrong.
pub fn decode<T: DeserializeOwned>(doc: &Document) -> Result<T> {
    serde_json::from_value(doc.value.clone())
        .map_err(|e| Error::data(&doc.path, e.to_string()))
}

/// Parse an ISO date, accepting a full datetime and truncating it.
pub fn parse_iso_date(text: &str) -> Option<NaiveDate> {
    if let Ok(date) = text.parse::<NaiveDate>() {
        return Some(date);
    }
    if let Ok(datetime) = text.parse::<NaiveDateTime>() {
        return Some(datetime.date());
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Some(datetime.date_naive());
    }
    None
}

/// Age in whole years at `on`: floor of elapsed days over 365.
pub fn age_in_years(dob: NaiveDate, on: NaiveDate) -> i64 {
    (on - dob).num_days().div_euclid(365)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitorType {
    Individual,
    Team,
}

impl Default for CompetitorType {
    fn default() -> Self {
        CompetitorType::Individual
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeagueType {
    Individual,
    Team,
}

/// A competitor document. Extra attributes are carried through untouched so
/// rule sets can grow without schema changes here.
#[derive(Debug, Clone, Deserialize)]
pub struct AthleteProfile {
    #[serde(default)]
    pub name: Option<String>,
    pub dob: String,
    pub gender: String,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub ystart: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AthleteProfile {
    pub fn dob(&self) -> Option<NaiveDate> {
        parse_iso_date(&self.dob)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventResult {
    pub name: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub competitor_type: CompetitorType,
    #[serde(default)]
    pub scoring_type: Option<String>,
    #[serde(default)]
    pub distance: Option<Value>,
    pub date: String,
    #[serde(default)]
    pub results: BTreeMap<String, ResultRecord>,
}

impl EventResult {
    /// Key into a league's scoring map: the explicit override, else the
    /// event type.
    pub fn scoring_key(&self) -> &str {
        self.scoring_type.as_deref().unwrap_or(&self.event_type)
    }

    pub fn date(&self) -> Option<NaiveDate> {
        parse_iso_date(&self.date)
    }
}

/// Terminal statuses, in reporting precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Dnf,
    Dq,
    Dns,
}

/// One competitor's outcome in one event. The payload shape depends on the
/// event type (a finish time, a heights map, an awards list), so this stays a
/// dynamic mapping with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ResultRecord(pub Map<String, Value>);

impl ResultRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    fn flag(&self, key: &str) -> bool {
        self.0.get(key).map(rules::truthy).unwrap_or(false)
    }

    pub fn is_dnf(&self) -> bool {
        self.flag("DNF")
    }

    pub fn is_dns(&self) -> bool {
        self.flag("DNS")
    }

    pub fn is_dq(&self) -> bool {
        self.flag("DQ")
    }

    pub fn terminal(&self) -> Option<Terminal> {
        if self.is_dnf() {
            Some(Terminal::Dnf)
        } else if self.is_dq() {
            Some(Terminal::Dq)
        } else if self.is_dns() {
            Some(Terminal::Dns)
        } else {
            None
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal().is_some()
    }

    /// High-jump attempts: height (as written in the document) to the list of
    /// attempt outcomes at that height.
    pub fn heights(&self) -> Option<BTreeMap<String, Vec<bool>>> {
        let Value::Object(heights) = self.0.get("heights")? else {
            return None;
        };
        let mut out = BTreeMap::new();
        for (height, attempts) in heights {
            let attempts = match attempts {
                Value::Array(items) => items
                    .iter()
                    .map(|item| item.as_bool().unwrap_or(false))
                    .collect(),
                _ => Vec::new(),
            };
            out.insert(height.clone(), attempts);
        }
        Some(out)
    }

    /// Sum of award point values for bonus_points scoring.
    pub fn awards_total(&self) -> Option<f64> {
        let Value::Array(awards) = self.0.get("awards")? else {
            return None;
        };
        let mut total = 0.0;
        for award in awards {
            total += award.get("points").and_then(Value::as_f64).unwrap_or(0.0);
        }
        Some(total)
    }

    /// Expected points recorded by an importer, for validation output only.
    pub fn debug_points(&self) -> Option<f64> {
        self.0.get("_debug_points").and_then(Value::as_f64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagRule {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeagueDefinition {
    #[serde(default)]
    pub name: Option<String>,
    pub league_type: LeagueType,
    #[serde(default)]
    pub eligibility: Vec<String>,
    #[serde(default)]
    pub permit_teams: bool,
    #[serde(default)]
    pub scoring: BTreeMap<String, ScoringConfig>,
    #[serde(default)]
    pub flags: Vec<FlagRule>,
}

/// A league definition plus its store identity (path relative to `leagues/`,
/// used as the board key).
#[derive(Debug, Clone)]
pub struct League {
    pub id: String,
    pub path: PathBuf,
    pub def: LeagueDefinition,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> ResultRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_age_in_years_floors() {
        let dob = NaiveDate::from_ymd_opt(2010, 6, 15).unwrap();
        let on = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        // 13 years and ~360 days; floor(days / 365) = 13.
        assert_eq!(age_in_years(dob, on), 13);
        let later = NaiveDate::from_ymd_opt(2024, 6, 20).unwrap();
        assert_eq!(age_in_years(dob, later), 14);
    }

    #[test]
    fn test_parse_iso_date_variants() {
        assert!(parse_iso_date("2023-05-01").is_some());
        assert!(parse_iso_date("2023-05-01T09:30:00").is_some());
        assert!(parse_iso_date("not a date").is_none());
    }

    #[test]
    fn test_terminal_precedence() {
        assert_eq!(record(json!({"DNF": true})).terminal(), Some(Terminal::Dnf));
        assert_eq!(record(json!({"DQ": true})).terminal(), Some(Terminal::Dq));
        assert_eq!(record(json!({"DNS": true})).terminal(), Some(Terminal::Dns));
        assert_eq!(record(json!({"finish_time": 100})).terminal(), None);
        assert!(!record(json!({"DNF": false})).is_terminal());
    }

    #[test]
    fn test_awards_total() {
        let r = record(json!({
            "awards": [
                {"name": "ST Import", "points": 1044},
                {"name": "Spirit", "points": 6},
            ]
        }));
        assert_eq!(r.awards_total(), Some(1050.0));
        assert_eq!(record(json!({})).awards_total(), None);
    }

    #[test]
    fn test_heights_accessor() {
        let r = record(json!({
            "heights": {"1.10": [true], "1.15": [false, true], "1.20": [false, false, false]}
        }));
        let heights = r.heights().unwrap();
        assert_eq!(heights["1.15"], vec![false, true]);
        assert_eq!(heights.len(), 3);
    }

    #[test]
    fn test_scoring_key_override() {
        let event: EventResult = serde_json::from_value(json!({
            "name": "Vault",
            "type": "pole_vault",
            "scoring_type": "high_jump",
            "date": "2024-03-01",
        }))
        .unwrap();
        assert_eq!(event.scoring_key(), "high_jump");
    }

    #[test]
    fn test_competitor_type_default_and_unknown() {
        let event: EventResult = serde_json::from_value(json!({
            "name": "Sprint", "type": "race", "date": "2024-03-01",
        }))
        .unwrap();
        assert_eq!(event.competitor_type, CompetitorType::Individual);

        let bad: std::result::Result<EventResult, _> = serde_json::from_value(json!({
            "name": "Sprint", "type": "race", "date": "2024-03-01",
            "competitor_type": "herd",
        }));
        assert!(bad.is_err());
    }
}
