//! Re-analysis of promoted strategies over a chosen issue set.
//!
//! Only best tasks promoted at or above the pass threshold are considered,
//! and tasks that already carry a review are left alone unless the scope is
//! forced. A candidate is re-run over the selected issues (its own lookback
//! window is not applied; issues still awaiting a draw at the newest end are
//! skipped). Strategies below the prune threshold are deleted; the rest are
//! marked pass or fail against the pass threshold. Passing eliminate
//! strategies also report the digits they would eliminate on the newest
//! issue in the store.
//!
//! ```text
//! best_tasks ──► filter (rate >= pass, unreviewed) ──► run all ──► prune / review
//!                                                         │
//!                                                   any error: nothing written
//! ```

use crate::config::{LotteryProfile, PromotionThresholds};
use crate::engine::{
    active_digits, round_rate, summarize, BacktestRequest, BacktestRunner, BacktestSummary, Digit,
    DrawResultSource, HitSemantics, Issue, IssueSelection, PredictionSource,
};
use crate::store::tasks::HIT_RATE_PLACES;
use crate::store::{BestTaskRow, TaskStore};
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

/// Which best tasks a re-analysis pass touches and over which issues.
#[derive(Debug, Clone)]
pub struct ReanalysisScope {
    pub selection: IssueSelection,
    pub position: Option<usize>,
    /// Re-run tasks that already have a review.
    pub force: bool,
}

impl ReanalysisScope {
    pub fn new(selection: IssueSelection) -> Self {
        Self {
            selection,
            position: None,
            force: false,
        }
    }

    pub fn at_position(mut self, position: Option<usize>) -> Self {
        self.position = position;
        self
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReanalysisOutcome {
    pub best_task_id: i64,
    pub playtype: String,
    pub position: usize,
    pub hit_rate: f64,
    pub effective_total: u64,
    pub passed: bool,
    pub pruned: bool,
    /// Newest issue and the digits the strategy eliminates there.
    pub next_issue: Option<Issue>,
    pub eliminated_digits: Vec<Digit>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReanalysisReport {
    pub outcomes: Vec<ReanalysisOutcome>,
    /// Candidates left alone because they were already reviewed.
    pub skipped: usize,
}

impl ReanalysisReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    pub fn pruned(&self) -> usize {
        self.outcomes.iter().filter(|o| o.pruned).count()
    }
}

/// Re-run the candidate best tasks in `scope`. Every re-run finishes before
/// anything is pruned or reviewed, so any failure leaves the store untouched.
pub fn reanalyze_best<S>(
    source: &S,
    store: &TaskStore,
    profile: &LotteryProfile,
    thresholds: &PromotionThresholds,
    scope: &ReanalysisScope,
) -> Result<ReanalysisReport>
where
    S: PredictionSource + DrawResultSource,
{
    let runner = BacktestRunner::new(source, profile.digit_domain);
    let mut report = ReanalysisReport::default();
    let mut reviewed: Vec<(ReanalysisOutcome, BacktestSummary)> = Vec::new();

    for best in store.best_tasks(scope.position)? {
        if best.hit_rate < thresholds.pass_hit_rate {
            debug!(best_task = best.id, hit_rate = best.hit_rate, "below pass rate; not re-analysed");
            continue;
        }
        if !scope.force && store.last_review(best.id)?.is_some() {
            report.skipped += 1;
            continue;
        }
        let reviewed_one = review(&runner, &best, &scope.selection, thresholds)
            .with_context(|| format!("re-analysis of best task {}", best.id))?;
        reviewed.push(reviewed_one);
    }

    for (outcome, summary) in reviewed {
        if outcome.pruned {
            store.delete_best_task(outcome.best_task_id)?;
            debug!(best_task = outcome.best_task_id, hit_rate = outcome.hit_rate, "best task pruned");
        } else {
            store.record_review(outcome.best_task_id, &summary, outcome.passed)?;
        }
        report.outcomes.push(outcome);
    }

    info!(
        lottery = %profile.code,
        reviewed = report.outcomes.len(),
        skipped = report.skipped,
        passed = report.passed(),
        pruned = report.pruned(),
        "re-analysis finished"
    );
    Ok(report)
}

fn review<S>(
    runner: &BacktestRunner<'_, S>,
    best: &BestTaskRow,
    selection: &IssueSelection,
    thresholds: &PromotionThresholds,
) -> Result<(ReanalysisOutcome, BacktestSummary)>
where
    S: PredictionSource + DrawResultSource,
{
    let mut request = best.to_request(selection.clone());
    request.lookback_n = None;
    request.lookback_offset = 0;
    let request = runner.settled(&request)?;

    let result = runner.run(&request)?;
    let summary = summarize(&result);
    let pruned = summary.hit_rate < thresholds.prune_hit_rate;
    let passed = summary.hit_rate >= thresholds.pass_hit_rate;

    let (next_issue, eliminated_digits) =
        if passed && best.strategy.hit_semantics() == HitSemantics::Eliminate {
            let latest = BacktestRequest {
                selection: IssueSelection::All,
                lookback_n: None,
                lookback_offset: 0,
                ..request
            };
            match runner.latest_ranking(&latest)? {
                Some((issue, ranking)) => (Some(issue), active_digits(&best.strategy, &ranking)),
                None => (None, Vec::new()),
            }
        } else {
            (None, Vec::new())
        };

    let outcome = ReanalysisOutcome {
        best_task_id: best.id,
        playtype: best.playtype.clone(),
        position: best.strategy.position(),
        hit_rate: round_rate(summary.hit_rate, HIT_RATE_PLACES),
        effective_total: summary.effective_total,
        passed,
        pruned,
        next_issue,
        eliminated_digits,
    };
    Ok((outcome, summary))
}
