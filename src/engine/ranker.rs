//! Candidate Ranker
//!
//! Turns the expert votes for one issue into a full-domain ordering: most
//! votes first, ties resolved by digit value according to the tie-break
//! policy. Sparse or empty input is valid and yields an all-zero ranking.

use super::strategy::{StrategyConfig, TieBreakMode};
use super::types::{Candidate, Digit, DigitDomain, ExpertPrediction, RankedCandidateList};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateRanker {
    domain: DigitDomain,
    tie_break_mode: TieBreakMode,
    reverse_on_tie: bool,
}

impl CandidateRanker {
    pub fn new(domain: DigitDomain, tie_break_mode: TieBreakMode, reverse_on_tie: bool) -> Self {
        Self {
            domain,
            tie_break_mode,
            reverse_on_tie,
        }
    }

    pub fn for_strategy(domain: DigitDomain, strategy: &StrategyConfig) -> Self {
        Self::new(domain, strategy.tie_break_mode(), strategy.reverse_on_tie())
    }

    pub fn domain(&self) -> DigitDomain {
        self.domain
    }

    /// Rank the domain by votes.
    ///
    /// A repeated (expert, digit) pair counts once. Digits outside the domain
    /// are dropped.
    pub fn rank(&self, predictions: &[ExpertPrediction]) -> RankedCandidateList {
        let mut votes = vec![0u32; self.domain.size()];

        let unique: BTreeSet<(&str, Digit)> = predictions
            .iter()
            .map(|p| (p.expert_id.as_str(), p.digit))
            .collect();

        for (expert, digit) in unique {
            if self.domain.contains(digit) {
                votes[digit as usize] += 1;
            } else {
                trace!(expert, digit, "dropping out-of-domain vote");
            }
        }

        let mut candidates: Vec<Candidate> = self
            .domain
            .digits()
            .map(|digit| Candidate {
                digit,
                votes: votes[digit as usize],
            })
            .collect();

        candidates.sort_by(|a, b| b.votes.cmp(&a.votes).then_with(|| self.tie_order(a.digit, b.digit)));

        RankedCandidateList::from_ordered(candidates)
    }

    fn tie_order(&self, a: Digit, b: Digit) -> Ordering {
        match self.tie_break_mode {
            TieBreakMode::None => a.cmp(&b),
            TieBreakMode::PushNext if self.reverse_on_tie => b.cmp(&a),
            TieBreakMode::PushNext => a.cmp(&b),
        }
    }
}
