//! Engine value types.
//!
//! Everything here is a plain value: constructed inside one backtest
//! invocation and dropped when it returns. Nothing is shared across runs.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A single drawn or predicted digit.
pub type Digit = u8;

/// 1-based rank inside a [`RankedCandidateList`].
pub type Rank = usize;

/// Default digit domain for positional games (0-9).
pub const DEFAULT_DOMAIN_SIZE: u8 = 10;

// =============================================================================
// ISSUE
// =============================================================================

/// Opaque, totally ordered draw identifier (e.g. `"2024153"`).
///
/// All-digit ids order numerically (`"999" < "1000"`) and sort before any
/// other id; everything else orders lexically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Issue(String);

impl Issue {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric_digits(&self) -> Option<&str> {
        let s = self.0.as_str();
        (!s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())).then(|| s.trim_start_matches('0'))
    }
}

impl Ord for Issue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric_digits(), other.numeric_digits()) {
            (Some(a), Some(b)) => a
                .len()
                .cmp(&b.len())
                .then_with(|| a.cmp(b))
                .then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Issue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Issue {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Issue {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// DIGIT DOMAIN
// =============================================================================

/// The set of digits a play-type can produce: `0..size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DigitDomain {
    size: u8,
}

impl DigitDomain {
    /// Returns `None` for an empty domain.
    pub fn new(size: u8) -> Option<Self> {
        (size > 0).then_some(Self { size })
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    pub fn contains(&self, digit: Digit) -> bool {
        digit < self.size
    }

    pub fn digits(&self) -> impl DoubleEndedIterator<Item = Digit> {
        0..self.size
    }
}

impl Default for DigitDomain {
    fn default() -> Self {
        Self {
            size: DEFAULT_DOMAIN_SIZE,
        }
    }
}

// =============================================================================
// INPUT RECORDS
// =============================================================================

/// One expert's vote for one digit on one issue/play-type.
///
/// An expert voting for several digits (multi-digit play-types) appears once
/// per digit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertPrediction {
    pub issue: Issue,
    pub play_type: String,
    pub expert_id: String,
    pub digit: Digit,
}

/// Authoritative drawn digit for one issue and position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawResult {
    pub issue: Issue,
    pub position: usize,
    pub digit: Digit,
}

/// Number of distinct experts in a prediction set.
pub fn distinct_experts(predictions: &[ExpertPrediction]) -> usize {
    let mut ids: Vec<&str> = predictions.iter().map(|p| p.expert_id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    ids.len()
}

// =============================================================================
// RANKED CANDIDATES
// =============================================================================

/// A digit and how many experts voted for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub digit: Digit,
    pub votes: u32,
}

/// Full-domain candidate ordering for one issue, most-voted first.
///
/// Every digit of the domain appears exactly once, so the length is the
/// domain size regardless of how many experts voted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedCandidateList {
    candidates: Vec<Candidate>,
}

impl RankedCandidateList {
    pub(crate) fn from_ordered(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Digits in rank order.
    pub fn digits(&self) -> Vec<Digit> {
        self.candidates.iter().map(|c| c.digit).collect()
    }

    /// 1-based rank of `digit`, or `None` if it is outside the domain.
    pub fn rank_of(&self, digit: Digit) -> Option<Rank> {
        self.candidates
            .iter()
            .position(|c| c.digit == digit)
            .map(|idx| idx + 1)
    }

    /// Digit sitting at a 1-based rank.
    pub fn digit_at(&self, rank: Rank) -> Option<Digit> {
        rank.checked_sub(1)
            .and_then(|idx| self.candidates.get(idx))
            .map(|c| c.digit)
    }
}

// =============================================================================
// VERDICTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Hit,
    Miss,
    Skip,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit => write!(f, "HIT"),
            Self::Miss => write!(f, "MISS"),
            Self::Skip => write!(f, "SKIP"),
        }
    }
}

/// Outcome of one strategy on one issue.
///
/// `actual_rank` is always populated, including for skipped issues, because
/// the open-rank histogram is independent of the strategy outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueVerdict {
    pub issue: Issue,
    pub verdict: Verdict,
    pub actual_rank: Rank,
    pub expert_count: usize,
}

// =============================================================================
// AGGREGATE
// =============================================================================

/// Aggregate of one strategy over one issue window.
///
/// `open_rank_counter` is a `BTreeMap` so iteration and serialization order
/// are fixed, which keeps repeated runs byte-identical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub hit_count: u64,
    pub miss_count: u64,
    pub skip_count: u64,
    pub open_rank_counter: BTreeMap<Rank, u64>,
    pub max_rank_length: usize,
}

impl BacktestResult {
    /// Number of issues that contributed a verdict.
    pub fn total_issues(&self) -> u64 {
        self.hit_count + self.miss_count + self.skip_count
    }
}
