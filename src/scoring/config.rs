use serde::{Deserialize, Serialize};

/// One league's scoring policy for one event type.
///
/// Example YAML (inside a league document):
/// ```yaml
/// scoring:
///   race:
///     method: minus_place
///     sort_by: lowest
///     sort_key: finish_time
///     method_value: 10
///     method_decrement: 1
///   high_jump:
///     method: minus_place
///     sort_by: high_jump
///     method_value: 10
///   bonus_points:
///     method: bonus_points
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScoringConfig {
    /// Points method: `minus_place` or `bonus_points`.
    pub method: String,

    /// Place ordering for `minus_place`: `lowest`, `highest` or `high_jump`.
    #[serde(default)]
    pub sort_by: Option<String>,

    /// Result key holding the value to place by (e.g. `finish_time`).
    /// Not used by `high_jump`, which reads the `heights` map.
    #[serde(default)]
    pub sort_key: Option<String>,

    /// `max` takes the best of a list-valued sort key (e.g. several throws).
    #[serde(default)]
    pub combine_method: Option<String>,

    /// Points for first place under `minus_place`.
    #[serde(default)]
    pub method_value: Option<f64>,

    /// Points lost per place under `minus_place`.
    #[serde(default = "default_decrement")]
    pub method_decrement: f64,
}

fn default_decrement() -> f64 {
    1.0
}

/// Validate one scoring config, returning every problem at once.
pub fn validate_scoring(config: &ScoringConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    match config.method.as_str() {
        "minus_place" => {
            if config.method_value.is_none() {
                errors.push("method_value: required for minus_place".to_string());
            }
            match config.sort_by.as_deref() {
                None => errors.push("sort_by: required for minus_place".to_string()),
                Some("lowest") | Some("highest") => {
                    if config.sort_key.is_none() {
                        errors.push("sort_key: required for lowest/highest".to_string());
                    }
                }
                Some("high_jump") => {}
                Some(other) => errors.push(format!("sort_by: unknown value {other:?}")),
            }
        }
        "bonus_points" => {}
        other => errors.push(format!("method: unknown value {other:?}")),
    }

    if let Some(combine) = config.combine_method.as_deref() {
        if combine != "max" {
            errors.push(format!("combine_method: unknown value {combine:?}"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
