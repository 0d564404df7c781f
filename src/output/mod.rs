//! Presentation helpers: rank formatting and board serialization.

use crate::error::{Error, Result};
use crate::tally::TallyBoard;

/// Format a 0-indexed place for display: `0` becomes `1st`, `12` becomes
/// `13th`. Shared places are prefixed with `=`.
pub fn rank_display(place: usize, unique_place: bool) -> String {
    let ordinal = place + 1;
    let suffix = match ordinal % 100 {
        11..=13 => "th",
        _ => match ordinal % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    };
    if unique_place {
        format!("{ordinal}{suffix}")
    } else {
        format!("={ordinal}{suffix}")
    }
}

/// Serialize a board to YAML for stdout.
pub fn render_board(board: &TallyBoard) -> Result<String> {
    serde_saphyr::to_string(board)
        .map_err(|e| Error::data("tally board", format!("serialize failed: {e}")))
}
