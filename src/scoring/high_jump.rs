//! High-jump placement: best cleared height, then failures at that height,
//! then a countback over the heights both jumpers attempted.

use super::engine::PoolEntry;
use crate::error::{Error, Result};
use crate::model::ResultRecord;

/// One jumper's attempt sheet, keyed by numeric height.
struct AttemptCard {
    /// (height, attempts) sorted ascending by height.
    heights: Vec<(f64, Vec<bool>)>,
}

impl AttemptCard {
    fn parse(competitor_id: &str, record: &ResultRecord) -> Result<Option<Self>> {
        let Some(raw) = record.heights() else {
            return Ok(None);
        };
        let mut heights = Vec::with_capacity(raw.len());
        for (height, attempts) in raw {
            let height: f64 = height.parse().map_err(|_| Error::InvalidResult {
                competitor: competitor_id.to_string(),
                message: format!("height {height:?} is not a number"),
            })?;
            heights.push((height, attempts));
        }
        heights.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Some(AttemptCard { heights }))
    }

    /// Highest height with at least one successful attempt.
    fn best(&self) -> Option<f64> {
        self.heights
            .iter()
            .rev()
            .find(|(_, attempts)| attempts.iter().any(|ok| *ok))
            .map(|(height, _)| *height)
    }

    /// Failed attempts at a height; zero if the height was never attempted.
    fn failures_at(&self, height: f64) -> usize {
        self.heights
            .iter()
            .find(|(h, _)| *h == height)
            .map(|(_, attempts)| attempts.iter().filter(|ok| !**ok).count())
            .unwrap_or(0)
    }
}

/// Place a jumper against the pool, 0-indexed. `None` means no height was
/// cleared at all (scored as a DNF by the caller).
pub(crate) fn place(
    athlete_id: &str,
    record: &ResultRecord,
    pool: &[PoolEntry<'_>],
) -> Result<Option<usize>> {
    let Some(card) = AttemptCard::parse(athlete_id, record)? else {
        return Err(Error::InvalidResult {
            competitor: athlete_id.to_string(),
            message: "missing heights map for high_jump".to_string(),
        });
    };
    if card.best().is_none() {
        return Ok(None);
    }

    let mut place = 0;
    for entry in pool {
        if entry.id == athlete_id || entry.record.is_terminal() {
            continue;
        }
        let Some(other) = AttemptCard::parse(entry.id, entry.record)? else {
            continue;
        };
        if other.best().is_none() {
            continue;
        }
        if beats(&other, entry.id, &card, athlete_id)? {
            place += 1;
        }
    }
    Ok(Some(place))
}

/// Does `left` outrank `right`? Best height, then failures at the other's
/// best, then first difference counting back over the heights both attempted.
fn beats(left: &AttemptCard, left_id: &str, right: &AttemptCard, right_id: &str) -> Result<bool> {
    // Both callers guarantee a cleared height.
    let left_best = left.best().unwrap_or(f64::NEG_INFINITY);
    let right_best = right.best().unwrap_or(f64::NEG_INFINITY);
    if left_best != right_best {
        return Ok(left_best > right_best);
    }

    let left_failures = left.failures_at(left_best);
    let right_failures = right.failures_at(right_best);
    if left_failures != right_failures {
        return Ok(left_failures < right_failures);
    }

    // Countback: walk the shared heights from highest down and compare total
    // failures at each.
    let mut shared: Vec<f64> = left
        .heights
        .iter()
        .map(|(h, _)| *h)
        .filter(|h| *h < left_best && right.heights.iter().any(|(rh, _)| rh == h))
        .collect();
    shared.sort_by(|a, b| b.total_cmp(a));
    for height in shared {
        let left_failures = left.failures_at(height);
        let right_failures = right.failures_at(height);
        if left_failures != right_failures {
            return Ok(left_failures < right_failures);
        }
    }

    Err(Error::UnresolvedTie {
        left: left_id.to_string(),
        right: right_id.to_string(),
    })
}
