//! Read-only query interfaces the engine consumes.
//!
//! Implementations must be safe to query from several backtest runs at once;
//! the engine never caches between runs.

use super::types::{Digit, DrawResult, ExpertPrediction, Issue};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};

pub trait PredictionSource {
    /// All votes for one issue and play-type, in any order.
    fn predictions(&self, issue: &Issue, play_type: &str) -> Result<Vec<ExpertPrediction>>;

    /// Every issue with predictions for the play-type, ascending.
    fn issue_universe(&self, play_type: &str) -> Result<Vec<Issue>>;
}

pub trait DrawResultSource {
    /// Drawn digit at `position`, or `None` if no result is recorded.
    fn draw_result(&self, issue: &Issue, position: usize) -> Result<Option<Digit>>;
}

/// In-memory snapshot implementing both sources.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    predictions: BTreeMap<(String, Issue), Vec<ExpertPrediction>>,
    results: BTreeMap<(Issue, usize), Digit>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_prediction(&mut self, prediction: ExpertPrediction) {
        self.predictions
            .entry((prediction.play_type.clone(), prediction.issue.clone()))
            .or_default()
            .push(prediction);
    }

    /// Convenience for tests and fixtures: one vote per `(expert, digit)`.
    pub fn add_votes(&mut self, issue: &str, play_type: &str, votes: &[(&str, Digit)]) {
        for &(expert, digit) in votes {
            self.add_prediction(ExpertPrediction {
                issue: Issue::from(issue),
                play_type: play_type.to_string(),
                expert_id: expert.to_string(),
                digit,
            });
        }
    }

    pub fn add_result(&mut self, result: DrawResult) {
        self.results.insert((result.issue, result.position), result.digit);
    }

    /// Record a full draw, one digit per position.
    pub fn add_draw(&mut self, issue: &str, digits: &[Digit]) {
        for (position, &digit) in digits.iter().enumerate() {
            self.add_result(DrawResult {
                issue: Issue::from(issue),
                position,
                digit,
            });
        }
    }
}

impl PredictionSource for MemorySource {
    fn predictions(&self, issue: &Issue, play_type: &str) -> Result<Vec<ExpertPrediction>> {
        Ok(self
            .predictions
            .get(&(play_type.to_string(), issue.clone()))
            .cloned()
            .unwrap_or_default())
    }

    fn issue_universe(&self, play_type: &str) -> Result<Vec<Issue>> {
        let issues: BTreeSet<Issue> = self
            .predictions
            .keys()
            .filter(|(pt, _)| pt == play_type)
            .map(|(_, issue)| issue.clone())
            .collect();
        Ok(issues.into_iter().collect())
    }
}

impl DrawResultSource for MemorySource {
    fn draw_result(&self, issue: &Issue, position: usize) -> Result<Option<Digit>> {
        Ok(self.results.get(&(issue.clone(), position)).copied())
    }
}
