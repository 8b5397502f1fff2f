//! Strategy Evaluator
//!
//! Decides HIT / MISS / SKIP for one issue. The drawn digit's rank is always
//! reported, including on SKIP, so the caller can build the open-rank
//! histogram independently of the verdict.

use super::strategy::{EvaluationMode, StrategyConfig};
use super::types::{Digit, Issue, IssueVerdict, RankedCandidateList, Verdict};

pub struct StrategyEvaluator<'a> {
    strategy: &'a StrategyConfig,
}

impl<'a> StrategyEvaluator<'a> {
    pub fn new(strategy: &'a StrategyConfig) -> Self {
        Self { strategy }
    }

    /// Evaluate one issue.
    ///
    /// Returns `None` only when `actual_digit` is not part of `ranked` (a
    /// drawn digit outside the play-type's domain). Active ranks beyond the
    /// list length are simply never matched.
    pub fn evaluate(
        &self,
        issue: &Issue,
        ranked: &RankedCandidateList,
        actual_digit: Digit,
        expert_count: usize,
    ) -> Option<IssueVerdict> {
        let actual_rank = ranked.rank_of(actual_digit)?;

        let verdict = if self.should_skip(expert_count) {
            Verdict::Skip
        } else {
            match self.strategy.mode() {
                EvaluationMode::Rank => {
                    let in_active = self.strategy.is_active(actual_rank);
                    if in_active == self.strategy.hit_semantics().hit_if_rank_in_active_set() {
                        Verdict::Hit
                    } else {
                        Verdict::Miss
                    }
                }
                EvaluationMode::Opaque(_) => Verdict::Skip,
            }
        };

        Some(IssueVerdict {
            issue: issue.clone(),
            verdict,
            actual_rank,
            expert_count,
        })
    }

    fn should_skip(&self, expert_count: usize) -> bool {
        self.strategy.skip_if_few() && expert_count < self.strategy.min_experts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ranker::CandidateRanker;
    use crate::engine::strategy::{HitSemantics, TieBreakMode};
    use crate::engine::types::DigitDomain;

    /// Ranking 0,1,2,...,9 (no votes, ascending tie order).
    fn flat_ranking() -> RankedCandidateList {
        CandidateRanker::new(DigitDomain::default(), TieBreakMode::None, false).rank(&[])
    }

    fn strategy(ranks: &[i64], semantics: HitSemantics) -> StrategyConfig {
        StrategyConfig::builder(0)
            .active_ranks(ranks.iter().copied())
            .hit_semantics(semantics)
            .build()
            .unwrap()
    }

    fn issue() -> Issue {
        Issue::from("2024100")
    }

    #[test]
    fn test_eliminate_miss_when_actual_in_active() {
        let s = strategy(&[1], HitSemantics::Eliminate);
        // digit 0 sits at rank 1
        let v = StrategyEvaluator::new(&s).evaluate(&issue(), &flat_ranking(), 0, 10).unwrap();
        assert_eq!(v.actual_rank, 1);
        assert_eq!(v.verdict, Verdict::Miss);
    }

    #[test]
    fn test_eliminate_hit_when_actual_elsewhere() {
        let s = strategy(&[1], HitSemantics::Eliminate);
        let v = StrategyEvaluator::new(&s).evaluate(&issue(), &flat_ranking(), 1, 10).unwrap();
        assert_eq!(v.actual_rank, 2);
        assert_eq!(v.verdict, Verdict::Hit);
    }

    #[test]
    fn test_pick_semantics_inverted() {
        let s = strategy(&[1, 2, 3], HitSemantics::Pick);
        let eval = StrategyEvaluator::new(&s);
        assert_eq!(eval.evaluate(&issue(), &flat_ranking(), 2, 10).unwrap().verdict, Verdict::Hit);
        assert_eq!(eval.evaluate(&issue(), &flat_ranking(), 3, 10).unwrap().verdict, Verdict::Miss);
    }

    #[test]
    fn test_skip_if_few_still_reports_rank() {
        let s = StrategyConfig::builder(0)
            .active_ranks([1])
            .skip_if_few(true)
            .min_experts(5)
            .build()
            .unwrap();
        let v = StrategyEvaluator::new(&s).evaluate(&issue(), &flat_ranking(), 6, 2).unwrap();
        assert_eq!(v.verdict, Verdict::Skip);
        assert_eq!(v.actual_rank, 7);
        assert_eq!(v.expert_count, 2);
    }

    #[test]
    fn test_expert_floor_is_inclusive() {
        let s = StrategyConfig::builder(0)
            .active_ranks([1])
            .skip_if_few(true)
            .min_experts(5)
            .build()
            .unwrap();
        let v = StrategyEvaluator::new(&s).evaluate(&issue(), &flat_ranking(), 6, 5).unwrap();
        assert_eq!(v.verdict, Verdict::Hit);
    }

    #[test]
    fn test_floor_ignored_without_skip_flag() {
        let s = strategy(&[1], HitSemantics::Eliminate);
        let v = StrategyEvaluator::new(&s).evaluate(&issue(), &flat_ranking(), 6, 0).unwrap();
        assert_eq!(v.verdict, Verdict::Hit);
    }

    #[test]
    fn test_active_rank_beyond_domain_never_matches() {
        let eliminate = strategy(&[11], HitSemantics::Eliminate);
        let pick = strategy(&[11], HitSemantics::Pick);
        for digit in 0..10 {
            let v = StrategyEvaluator::new(&eliminate).evaluate(&issue(), &flat_ranking(), digit, 10).unwrap();
            assert_eq!(v.verdict, Verdict::Hit);
            let v = StrategyEvaluator::new(&pick).evaluate(&issue(), &flat_ranking(), digit, 10).unwrap();
            assert_eq!(v.verdict, Verdict::Miss);
        }
    }

    #[test]
    fn test_opaque_mode_skips() {
        let s = StrategyConfig::builder(0)
            .active_ranks([1])
            .mode(EvaluationMode::Opaque("matrix".into()))
            .build()
            .unwrap();
        let v = StrategyEvaluator::new(&s).evaluate(&issue(), &flat_ranking(), 4, 10).unwrap();
        assert_eq!(v.verdict, Verdict::Skip);
        assert_eq!(v.actual_rank, 5);
    }

    #[test]
    fn test_digit_outside_ranking_is_none() {
        let s = strategy(&[1], HitSemantics::Eliminate);
        assert!(StrategyEvaluator::new(&s).evaluate(&issue(), &flat_ranking(), 12, 10).is_none());
    }
}
