//! Task generation.
//!
//! Two sources of work:
//!
//! - **Base grid**: every `lookback_n` from the universe length down to 1,
//!   crossed with every single rank in the digit domain. Plain ranking, no
//!   expert floor.
//! - **Expansion**: for each recorded run, every unhit rank except 1 is
//!   retried alone with the expert floor on and reversed push-next ties.

use crate::config::{LotteryProfile, PlaytypeSpec};
use crate::engine::{PredictionSource, StrategyConfig, TieBreakMode};
use crate::store::{BestRankRow, NewTask, TaskStore};
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    pub base_inserted: usize,
    pub expansion_inserted: usize,
}

impl GenerationReport {
    pub fn total(&self) -> usize {
        self.base_inserted + self.expansion_inserted
    }

    /// Nothing new was queued.
    pub fn converged(&self) -> bool {
        self.total() == 0
    }
}

pub struct TaskGenerator<'a> {
    profile: &'a LotteryProfile,
    min_experts: usize,
}

impl<'a> TaskGenerator<'a> {
    pub fn new(profile: &'a LotteryProfile, min_experts: usize) -> Self {
        Self { profile, min_experts }
    }

    /// Base grid for one play-type over a universe of `universe_len` issues.
    pub fn base_tasks(&self, playtype: &PlaytypeSpec, universe_len: usize) -> Result<Vec<NewTask>> {
        let domain = self.profile.digit_domain.size();
        let mut out = Vec::with_capacity(universe_len * domain);
        for lookback_n in (1..=universe_len).rev() {
            for rank in 1..=domain {
                let strategy = StrategyConfig::builder(playtype.position)
                    .active_ranks([rank as i64])
                    .hit_semantics(playtype.hit_semantics)
                    .min_experts(self.min_experts)
                    .build()?;
                out.push(NewTask {
                    playtype: playtype.code.clone(),
                    lookback_n: Some(lookback_n),
                    lookback_offset: 0,
                    strategy,
                });
            }
        }
        Ok(out)
    }

    /// Expansion tasks from recorded open-rank history.
    pub fn expansion_tasks(&self, history: &[BestRankRow]) -> Result<Vec<NewTask>> {
        let mut out = Vec::new();
        for row in history {
            for &rank in row.unhit_ranks.iter().filter(|&&r| r != 1) {
                let strategy = StrategyConfig::builder(row.strategy.position())
                    .active_ranks([rank as i64])
                    .hit_semantics(row.strategy.hit_semantics())
                    .skip_if_few(true)
                    .min_experts(self.min_experts)
                    .tie_break(TieBreakMode::PushNext, true)
                    .build()?;
                out.push(NewTask {
                    playtype: row.playtype.clone(),
                    lookback_n: row.lookback_n,
                    lookback_offset: row.lookback_offset,
                    strategy,
                });
            }
        }
        Ok(out)
    }

    /// Queue base and expansion tasks for one play-type.
    pub fn generate<S: PredictionSource>(
        &self,
        source: &S,
        store: &TaskStore,
        playtype: &PlaytypeSpec,
    ) -> Result<GenerationReport> {
        let universe = source
            .issue_universe(&playtype.code)
            .with_context(|| format!("Failed to list issues for {}", playtype.code))?;

        let base = self.base_tasks(playtype, universe.len())?;
        let base_inserted = store.insert_tasks(&base)?;

        let history = store.best_ranks(Some(&playtype.code))?;
        let expansion = self.expansion_tasks(&history)?;
        let expansion_inserted = store.insert_tasks(&expansion)?;

        let report = GenerationReport {
            base_inserted,
            expansion_inserted,
        };
        info!(
            lottery = %self.profile.code,
            playtype = %playtype.code,
            universe = universe.len(),
            base = base_inserted,
            expansion = expansion_inserted,
            "task generation finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{summarize, BacktestResult, HitSemantics};
    use crate::tasks::fixtures::seeded_db;
    use std::collections::BTreeMap;

    #[test]
    fn test_base_grid_shape() {
        let profile = LotteryProfile::p5();
        let playtype = profile.playtype("gewei_ding3").unwrap();
        let generator = TaskGenerator::new(&profile, 5);

        let tasks = generator.base_tasks(playtype, 3).unwrap();
        assert_eq!(tasks.len(), 30);
        assert_eq!(tasks[0].lookback_n, Some(3));
        assert_eq!(tasks[29].lookback_n, Some(1));
        assert_eq!(tasks[9].strategy.active_ranks().iter().copied().collect::<Vec<_>>(), vec![10]);
        assert!(tasks.iter().all(|t| t.strategy.position() == 4));
        assert!(tasks.iter().all(|t| t.strategy.hit_semantics() == HitSemantics::Pick));
        assert!(tasks.iter().all(|t| !t.strategy.skip_if_few()));
        assert!(tasks.iter().all(|t| t.strategy.tie_break_mode() == TieBreakMode::None));

        assert!(generator.base_tasks(playtype, 0).unwrap().is_empty());
    }

    #[test]
    fn test_expansion_skips_rank_one() {
        let profile = LotteryProfile::p5();
        let generator = TaskGenerator::new(&profile, 7);
        let row = BestRankRow {
            id: 1,
            task_id: Some(1),
            playtype: "gewei_sha1".into(),
            lookback_n: Some(20),
            lookback_offset: 1,
            strategy: StrategyConfig::builder(4).active_ranks([1]).build().unwrap(),
            total_issues: 20,
            open_rank_counter: BTreeMap::new(),
            unhit_ranks: vec![1, 6, 9],
            fingerprint: String::new(),
        };

        let tasks = generator.expansion_tasks(&[row]).unwrap();
        let ranks: Vec<usize> = tasks
            .iter()
            .flat_map(|t| t.strategy.active_ranks().iter().copied())
            .collect();
        assert_eq!(ranks, vec![6, 9]);
        for t in &tasks {
            assert!(t.strategy.skip_if_few());
            assert_eq!(t.strategy.min_experts(), 7);
            assert_eq!(t.strategy.tie_break_mode(), TieBreakMode::PushNext);
            assert!(t.strategy.reverse_on_tie());
            assert_eq!(t.lookback_n, Some(20));
            assert_eq!(t.lookback_offset, 1);
        }
    }

    #[test]
    fn test_generate_is_idempotent() {
        let (db, profile) = seeded_db();
        let playtype = profile.playtype("gewei_sha1").unwrap();
        let generator = TaskGenerator::new(&profile, 5);
        let predictions = db.predictions("p5");
        let tasks = db.tasks("p5");

        let first = generator.generate(&predictions, &tasks, playtype).unwrap();
        assert_eq!(first.base_inserted, 100);
        assert_eq!(first.expansion_inserted, 0);

        let second = generator.generate(&predictions, &tasks, playtype).unwrap();
        assert!(second.converged());
    }

    #[test]
    fn test_generate_expands_recorded_history() {
        let (db, profile) = seeded_db();
        let playtype = profile.playtype("gewei_sha1").unwrap();
        let generator = TaskGenerator::new(&profile, 5);
        let predictions = db.predictions("p5");
        let tasks = db.tasks("p5");
        generator.generate(&predictions, &tasks, playtype).unwrap();

        let task = tasks.pending_tasks(Some(1)).unwrap().remove(0);
        let result = BacktestResult {
            hit_count: 1,
            open_rank_counter: BTreeMap::from([(1, 1)]),
            max_rank_length: 10,
            ..Default::default()
        };
        tasks.insert_best_rank(&task, &result, &summarize(&result)).unwrap();

        let report = generator.generate(&predictions, &tasks, playtype).unwrap();
        assert_eq!(report.base_inserted, 0);
        assert_eq!(report.expansion_inserted, 9);
        assert!(generator.generate(&predictions, &tasks, playtype).unwrap().converged());
    }
}
