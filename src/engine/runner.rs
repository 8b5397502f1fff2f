//! Backtest Runner
//!
//! Replays one strategy over a materialized, ascending issue window:
//!
//! ```text
//! for issue in window:
//!     predictions  = source.predictions(issue, play_type)
//!     ranked       = ranker.rank(predictions)
//!     actual_digit = source.draw_result(issue, position)   // missing => abort
//!     verdict      = evaluator.evaluate(ranked, actual_digit, expert_count)
//!     accumulator.record(verdict, ranked.len())
//! ```
//!
//! The accumulator is owned by a single run. Independent strategies can be run
//! in parallel with [`BacktestRunner::run_many`]; each gets its own
//! accumulator and nothing is shared except the read-only source.

use super::evaluator::StrategyEvaluator;
use super::ranker::CandidateRanker;
use super::source::{DrawResultSource, PredictionSource};
use super::strategy::StrategyConfig;
use super::types::{
    distinct_experts, BacktestResult, Digit, DigitDomain, Issue, IssueVerdict, Rank, Verdict,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, trace};

// =============================================================================
// ISSUE SELECTION
// =============================================================================

/// Which issues a backtest considers before windowing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSelection {
    /// Every issue in the prediction store for the play-type.
    All,
    Single(Issue),
    /// Sorted ascending and de-duplicated before use.
    List(Vec<Issue>),
}

impl FromStr for IssueSelection {
    type Err = std::convert::Infallible;

    /// `"All"` (any case), a single issue, or a comma-separated list.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        let parts: Vec<Issue> = s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(Issue::from)
            .collect();
        Ok(match parts.len() {
            1 => Self::Single(parts[0].clone()),
            _ => Self::List(parts),
        })
    }
}

/// Keep the trailing `lookback_n` issues after dropping the `lookback_offset`
/// most recent ones. `issues` must already be ascending.
///
/// `lookback_n = None` keeps everything except the offset.
pub fn select_window(issues: &[Issue], lookback_n: Option<usize>, lookback_offset: usize) -> Vec<Issue> {
    let end = issues.len().saturating_sub(lookback_offset);
    let start = match lookback_n {
        Some(n) => end.saturating_sub(n),
        None => 0,
    };
    issues[start..end].to_vec()
}

// =============================================================================
// REQUEST / ERRORS
// =============================================================================

/// Everything one backtest needs besides the data sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacktestRequest {
    pub selection: IssueSelection,
    pub play_type: String,
    pub strategy: StrategyConfig,
    pub lookback_n: Option<usize>,
    #[serde(default)]
    pub lookback_offset: usize,
}

#[derive(Debug)]
pub enum BacktestError {
    /// Ground truth missing for an issue inside the window.
    MissingDrawResult { issue: Issue, position: usize },
    /// Drawn digit is not part of the play-type's digit domain.
    DrawOutOfDomain { issue: Issue, position: usize, digit: Digit },
    /// Underlying store failed.
    Source(anyhow::Error),
}

impl BacktestError {
    pub fn is_data_integrity(&self) -> bool {
        matches!(self, Self::MissingDrawResult { .. } | Self::DrawOutOfDomain { .. })
    }
}

impl fmt::Display for BacktestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDrawResult { issue, position } => {
                write!(f, "data integrity: no draw result for issue {} position {}", issue, position)
            }
            Self::DrawOutOfDomain { issue, position, digit } => write!(
                f,
                "data integrity: issue {} position {} drew {} which is outside the digit domain",
                issue, position, digit
            ),
            Self::Source(e) => write!(f, "source error: {:#}", e),
        }
    }
}

impl std::error::Error for BacktestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Source(e) => Some(&**e),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for BacktestError {
    fn from(e: anyhow::Error) -> Self {
        Self::Source(e)
    }
}

// =============================================================================
// ACCUMULATOR
// =============================================================================

/// Single-writer aggregate for one run.
#[derive(Debug, Default)]
pub struct BacktestAccumulator {
    result: BacktestResult,
}

impl BacktestAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the verdict and always bump the histogram at its actual rank.
    pub fn record(&mut self, verdict: &IssueVerdict, rank_length: usize) {
        match verdict.verdict {
            Verdict::Hit => self.result.hit_count += 1,
            Verdict::Miss => self.result.miss_count += 1,
            Verdict::Skip => self.result.skip_count += 1,
        }
        *self.result.open_rank_counter.entry(verdict.actual_rank).or_insert(0) += 1;
        self.result.max_rank_length = self.result.max_rank_length.max(rank_length);
    }

    pub fn finish(self) -> BacktestResult {
        self.result
    }
}

// =============================================================================
// RUNNER
// =============================================================================

pub struct BacktestRunner<'a, S> {
    source: &'a S,
    domain: DigitDomain,
}

impl<'a, S> BacktestRunner<'a, S>
where
    S: PredictionSource + DrawResultSource,
{
    pub fn new(source: &'a S, domain: DigitDomain) -> Self {
        Self { source, domain }
    }

    /// Resolve the selection against the store, sort, then apply the window.
    pub fn resolve_window(&self, request: &BacktestRequest) -> Result<Vec<Issue>, BacktestError> {
        let issues = self.selected_issues(request)?;
        Ok(select_window(&issues, request.lookback_n, request.lookback_offset))
    }

    /// The selection, ascending and de-duplicated, before any windowing.
    fn selected_issues(&self, request: &BacktestRequest) -> Result<Vec<Issue>, BacktestError> {
        let mut issues = match &request.selection {
            IssueSelection::All => self.source.issue_universe(&request.play_type)?,
            IssueSelection::Single(issue) => vec![issue.clone()],
            IssueSelection::List(list) => list.clone(),
        };
        issues.sort();
        issues.dedup();
        Ok(issues)
    }

    /// How many of the newest selected issues have no draw result yet at the
    /// strategy's position. Gaps further back are not counted.
    pub fn undrawn_tail(&self, request: &BacktestRequest) -> Result<usize, BacktestError> {
        let position = request.strategy.position();
        let mut count = 0;
        for issue in self.selected_issues(request)?.iter().rev() {
            if self.source.draw_result(issue, position)?.is_some() {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Copy of `request` whose offset also skips the undrawn tail, so the
    /// window ends at the newest settled issue.
    pub fn settled(&self, request: &BacktestRequest) -> Result<BacktestRequest, BacktestError> {
        let tail = self.undrawn_tail(request)?;
        if tail > 0 {
            debug!(play_type = %request.play_type, undrawn = tail, "skipping undrawn issues");
        }
        Ok(BacktestRequest {
            lookback_offset: request.lookback_offset + tail,
            ..request.clone()
        })
    }

    pub fn run(&self, request: &BacktestRequest) -> Result<BacktestResult, BacktestError> {
        self.run_detailed(request).map(|(result, _)| result)
    }

    /// Like [`run`](Self::run) but also returns every per-issue verdict in
    /// window order.
    pub fn run_detailed(
        &self,
        request: &BacktestRequest,
    ) -> Result<(BacktestResult, Vec<IssueVerdict>), BacktestError> {
        let window = self.resolve_window(request)?;
        let strategy = &request.strategy;
        let position = strategy.position();

        info!(
            play_type = %request.play_type,
            position,
            issues = window.len(),
            lookback_n = ?request.lookback_n,
            lookback_offset = request.lookback_offset,
            active_ranks = ?strategy.active_ranks(),
            "starting backtest"
        );

        let ranker = CandidateRanker::for_strategy(self.domain, strategy);
        let evaluator = StrategyEvaluator::new(strategy);
        let mut accumulator = BacktestAccumulator::new();
        let mut verdicts = Vec::with_capacity(window.len());

        for issue in &window {
            let predictions = self.source.predictions(issue, &request.play_type)?;
            let expert_count = distinct_experts(&predictions);
            let ranked = ranker.rank(&predictions);

            let actual_digit = self
                .source
                .draw_result(issue, position)?
                .ok_or_else(|| BacktestError::MissingDrawResult {
                    issue: issue.clone(),
                    position,
                })?;

            let verdict = evaluator
                .evaluate(issue, &ranked, actual_digit, expert_count)
                .ok_or_else(|| BacktestError::DrawOutOfDomain {
                    issue: issue.clone(),
                    position,
                    digit: actual_digit,
                })?;

            trace!(
                issue = %issue,
                digit = actual_digit,
                rank = verdict.actual_rank,
                experts = expert_count,
                verdict = %verdict.verdict,
                "issue evaluated"
            );

            accumulator.record(&verdict, ranked.len());
            verdicts.push(verdict);
        }

        let result = accumulator.finish();
        debug!(
            hit = result.hit_count,
            miss = result.miss_count,
            skip = result.skip_count,
            "backtest complete"
        );
        Ok((result, verdicts))
    }

    /// Most recent ranking for the play-type: the ranking of the last issue in
    /// the request's window, or `None` when the window is empty.
    pub fn latest_ranking(
        &self,
        request: &BacktestRequest,
    ) -> Result<Option<(Issue, Vec<Digit>)>, BacktestError> {
        let window = self.resolve_window(request)?;
        let Some(issue) = window.last() else {
            return Ok(None);
        };
        let predictions = self.source.predictions(issue, &request.play_type)?;
        let ranked = CandidateRanker::for_strategy(self.domain, &request.strategy).rank(&predictions);
        Ok(Some((issue.clone(), ranked.digits())))
    }
}

impl<'a, S> BacktestRunner<'a, S>
where
    S: PredictionSource + DrawResultSource + Sync,
{
    /// Run independent strategies in parallel. Output order matches input.
    pub fn run_many(&self, requests: &[BacktestRequest]) -> Vec<Result<BacktestResult, BacktestError>> {
        requests.par_iter().map(|req| self.run(req)).collect()
    }
}

/// Digits a strategy acts on, given a ranking in rank order.
pub fn active_digits(strategy: &StrategyConfig, ranking: &[Digit]) -> Vec<Digit> {
    strategy
        .active_ranks()
        .iter()
        .filter_map(|&rank: &Rank| rank.checked_sub(1).and_then(|idx| ranking.get(idx)).copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issues(ids: &[&str]) -> Vec<Issue> {
        ids.iter().map(|s| Issue::from(*s)).collect()
    }

    #[test]
    fn test_window_trailing_three() {
        let all = issues(&["1", "2", "3", "4", "5"]);
        assert_eq!(select_window(&all, Some(3), 0), issues(&["3", "4", "5"]));
    }

    #[test]
    fn test_window_with_offset() {
        let all = issues(&["1", "2", "3", "4", "5"]);
        assert_eq!(select_window(&all, Some(3), 1), issues(&["2", "3", "4"]));
    }

    #[test]
    fn test_window_larger_than_universe() {
        let all = issues(&["1", "2"]);
        assert_eq!(select_window(&all, Some(10), 0), all);
        assert!(select_window(&all, Some(10), 5).is_empty());
        assert!(select_window(&all, Some(0), 0).is_empty());
    }

    #[test]
    fn test_window_without_lookback() {
        let all = issues(&["1", "2", "3"]);
        assert_eq!(select_window(&all, None, 0), all);
        assert_eq!(select_window(&all, None, 1), issues(&["1", "2"]));
    }

    #[test]
    fn test_selection_parse() {
        assert_eq!("All".parse::<IssueSelection>().unwrap(), IssueSelection::All);
        assert_eq!(
            "2024001".parse::<IssueSelection>().unwrap(),
            IssueSelection::Single(Issue::from("2024001"))
        );
        assert_eq!(
            "2024002, 2024001".parse::<IssueSelection>().unwrap(),
            IssueSelection::List(issues(&["2024002", "2024001"]))
        );
    }

    #[test]
    fn test_active_digits() {
        let s = StrategyConfig::builder(0).active_ranks([1, 3, 12]).build().unwrap();
        assert_eq!(active_digits(&s, &[7, 2, 9, 0]), vec![7, 9]);
    }
}
