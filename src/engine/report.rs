//! Statistics Reporter
//!
//! Reduces a [`BacktestResult`] to the numbers the task-promotion loop acts
//! on. Skips are excluded from the denominator.

use super::types::{BacktestResult, Rank};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    /// `hit / (hit + miss)`, or 0.0 when nothing was evaluated.
    pub hit_rate: f64,
    pub effective_total: u64,
    pub total_issues: u64,
    /// Ranks in `1..=max_rank_length` that never held the drawn digit.
    pub unhit_ranks: Vec<Rank>,
}

pub fn summarize(result: &BacktestResult) -> BacktestSummary {
    let effective_total = result.hit_count + result.miss_count;
    let hit_rate = if effective_total > 0 {
        result.hit_count as f64 / effective_total as f64
    } else {
        0.0
    };

    let unhit_ranks = (1..=result.max_rank_length)
        .filter(|rank| !result.open_rank_counter.contains_key(rank))
        .collect();

    BacktestSummary {
        hit_rate,
        effective_total,
        total_issues: result.total_issues(),
        unhit_ranks,
    }
}

/// Round a rate to `places` decimals (persisted rates use 4).
pub fn round_rate(rate: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (rate * scale).round() / scale
}
