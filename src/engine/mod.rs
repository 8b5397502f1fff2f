//! Rank-based hit/miss backtesting engine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────────┐
//! │ PredictionSource │   │ DrawResultSource │   (read-only, injected)
//! └────────┬─────────┘   └────────┬─────────┘
//!          │ votes                │ drawn digit
//!          ▼                      │
//! ┌──────────────────┐            │
//! │ CandidateRanker  │            │
//! │ (votes → ranks)  │            │
//! └────────┬─────────┘            │
//!          ▼                      ▼
//! ┌─────────────────────────────────────────┐
//! │ StrategyEvaluator (HIT / MISS / SKIP)   │
//! └────────────────────┬────────────────────┘
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │ BacktestRunner (window loop, accumulator)│
//! └────────────────────┬────────────────────┘
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │ report::summarize (hit rate, unhit ranks)│
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Determinism Guarantees
//!
//! - Windows are materialized and sorted before the loop starts.
//! - Vote ties are broken by digit value, never by input order.
//! - The open-rank histogram is a `BTreeMap`.
//! - No clock, no RNG, no cross-run cache.

pub mod evaluator;
pub mod fingerprint;
pub mod ranker;
pub mod report;
pub mod runner;
pub mod source;
pub mod strategy;
pub mod types;


pub use evaluator::StrategyEvaluator;
pub use fingerprint::strategy_key;
pub use ranker::CandidateRanker;
pub use report::{round_rate, summarize, BacktestSummary};
pub use runner::{
    active_digits, select_window, BacktestAccumulator, BacktestError, BacktestRequest,
    BacktestRunner, IssueSelection,
};
pub use source::{DrawResultSource, MemorySource, PredictionSource};
pub use strategy::{
    EvaluationMode, HitSemantics, StrategyConfig, StrategyConfigBuilder, StrategyConfigError,
    StrategyRecord, TieBreakMode, DEFAULT_MIN_EXPERTS,
};
pub use types::{
    distinct_experts, BacktestResult, Candidate, Digit, DigitDomain, DrawResult,
    ExpertPrediction, Issue, IssueVerdict, Rank, RankedCandidateList, Verdict,
    DEFAULT_DOMAIN_SIZE,
};
