//! Strategy configuration.
//!
//! A [`StrategyConfig`] is built once per backtest (through
//! [`StrategyConfigBuilder`] or from a [`StrategyRecord`]) and is never
//! mutated during the run. Structurally impossible values are rejected here so
//! the evaluator never has to.

use super::types::Rank;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Default expert floor used when `skip_if_few` is enabled.
pub const DEFAULT_MIN_EXPERTS: usize = 5;

// =============================================================================
// ENUMS
// =============================================================================

/// Whether landing inside the active ranks is a hit or a miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSemantics {
    /// Active ranks are eliminated; a hit means the drawn digit was elsewhere.
    Eliminate,
    /// Active ranks are picked; a hit means the drawn digit was among them.
    Pick,
}

impl HitSemantics {
    pub fn hit_if_rank_in_active_set(self) -> bool {
        matches!(self, Self::Pick)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eliminate => "eliminate",
            Self::Pick => "pick",
        }
    }
}

impl FromStr for HitSemantics {
    type Err = StrategyConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eliminate" | "sha" => Ok(Self::Eliminate),
            "pick" | "ding" => Ok(Self::Pick),
            other => Err(StrategyConfigError::UnknownHitSemantics(other.to_string())),
        }
    }
}

/// How digits with equal vote counts are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakMode {
    /// Ascending digit order; `reverse_on_tie` is ignored.
    #[default]
    None,
    /// Each tied digit takes its own rank slot, ordered by digit value in the
    /// direction chosen by `reverse_on_tie`.
    PushNext,
}

impl TieBreakMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::PushNext => "push_next",
        }
    }
}

impl FromStr for TieBreakMode {
    type Err = StrategyConfigError;

    /// Accepts the legacy task-table spellings `"False"` and `"Next"` too.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "false" => Ok(Self::None),
            "push_next" | "next" => Ok(Self::PushNext),
            other => Err(StrategyConfigError::UnknownTieBreakMode(other.to_string())),
        }
    }
}

/// Evaluation mode. Only `rank` has engine semantics; anything else is
/// carried through untouched for collaborators and evaluates to SKIP.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EvaluationMode {
    #[default]
    Rank,
    Opaque(String),
}

impl From<String> for EvaluationMode {
    fn from(s: String) -> Self {
        if s.eq_ignore_ascii_case("rank") {
            Self::Rank
        } else {
            Self::Opaque(s)
        }
    }
}

impl From<EvaluationMode> for String {
    fn from(mode: EvaluationMode) -> Self {
        match mode {
            EvaluationMode::Rank => "rank".to_string(),
            EvaluationMode::Opaque(s) => s,
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyConfigError {
    EmptyActiveRanks,
    /// Ranks are 1-based; zero and negative values can never match.
    InvalidRank(i64),
    NegativePosition(i64),
    UnknownHitSemantics(String),
    UnknownTieBreakMode(String),
}

impl fmt::Display for StrategyConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyActiveRanks => write!(f, "active_ranks must not be empty"),
            Self::InvalidRank(r) => write!(f, "invalid active rank {} (ranks start at 1)", r),
            Self::NegativePosition(p) => write!(f, "invalid position {}", p),
            Self::UnknownHitSemantics(s) => {
                write!(f, "unknown hit semantics '{}' (expected eliminate|pick)", s)
            }
            Self::UnknownTieBreakMode(s) => {
                write!(f, "unknown tie-break mode '{}' (expected none|push_next)", s)
            }
        }
    }
}

impl std::error::Error for StrategyConfigError {}

// =============================================================================
// STRATEGY CONFIG
// =============================================================================

/// Immutable strategy parameters for one backtest run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StrategyRecord", into = "StrategyRecord")]
pub struct StrategyConfig {
    position: usize,
    active_ranks: BTreeSet<Rank>,
    mode: EvaluationMode,
    hit_semantics: HitSemantics,
    skip_if_few: bool,
    min_experts: usize,
    tie_break_mode: TieBreakMode,
    reverse_on_tie: bool,
}

impl StrategyConfig {
    pub fn builder(position: usize) -> StrategyConfigBuilder {
        StrategyConfigBuilder::new(position)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn active_ranks(&self) -> &BTreeSet<Rank> {
        &self.active_ranks
    }

    pub fn mode(&self) -> &EvaluationMode {
        &self.mode
    }

    pub fn hit_semantics(&self) -> HitSemantics {
        self.hit_semantics
    }

    pub fn skip_if_few(&self) -> bool {
        self.skip_if_few
    }

    pub fn min_experts(&self) -> usize {
        self.min_experts
    }

    pub fn tie_break_mode(&self) -> TieBreakMode {
        self.tie_break_mode
    }

    pub fn reverse_on_tie(&self) -> bool {
        self.reverse_on_tie
    }

    pub fn is_active(&self, rank: Rank) -> bool {
        self.active_ranks.contains(&rank)
    }

    /// Plain record form, as stored by the task queue.
    pub fn to_record(&self) -> StrategyRecord {
        StrategyRecord::from(self.clone())
    }
}

/// Builder for [`StrategyConfig`]. Defaults: rank mode, eliminate semantics,
/// no skip, `min_experts = 5`, tie-break `none`, no reversal.
#[derive(Debug, Clone)]
pub struct StrategyConfigBuilder {
    position: usize,
    active_ranks: Vec<i64>,
    mode: EvaluationMode,
    hit_semantics: HitSemantics,
    skip_if_few: bool,
    min_experts: usize,
    tie_break_mode: TieBreakMode,
    reverse_on_tie: bool,
}

impl StrategyConfigBuilder {
    pub fn new(position: usize) -> Self {
        Self {
            position,
            active_ranks: Vec::new(),
            mode: EvaluationMode::Rank,
            hit_semantics: HitSemantics::Eliminate,
            skip_if_few: false,
            min_experts: DEFAULT_MIN_EXPERTS,
            tie_break_mode: TieBreakMode::None,
            reverse_on_tie: false,
        }
    }

    pub fn active_ranks<I>(mut self, ranks: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        self.active_ranks = ranks.into_iter().collect();
        self
    }

    pub fn mode(mut self, mode: EvaluationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn hit_semantics(mut self, semantics: HitSemantics) -> Self {
        self.hit_semantics = semantics;
        self
    }

    pub fn skip_if_few(mut self, enabled: bool) -> Self {
        self.skip_if_few = enabled;
        self
    }

    pub fn min_experts(mut self, floor: usize) -> Self {
        self.min_experts = floor;
        self
    }

    pub fn tie_break(mut self, mode: TieBreakMode, reverse_on_tie: bool) -> Self {
        self.tie_break_mode = mode;
        self.reverse_on_tie = reverse_on_tie;
        self
    }

    pub fn build(self) -> Result<StrategyConfig, StrategyConfigError> {
        if self.active_ranks.is_empty() {
            return Err(StrategyConfigError::EmptyActiveRanks);
        }
        let mut active_ranks = BTreeSet::new();
        for rank in self.active_ranks {
            if rank < 1 {
                return Err(StrategyConfigError::InvalidRank(rank));
            }
            active_ranks.insert(rank as Rank);
        }

        Ok(StrategyConfig {
            position: self.position,
            active_ranks,
            mode: self.mode,
            hit_semantics: self.hit_semantics,
            skip_if_few: self.skip_if_few,
            min_experts: self.min_experts,
            tie_break_mode: self.tie_break_mode,
            reverse_on_tie: self.reverse_on_tie,
        })
    }
}

// =============================================================================
// RECORD FORM
// =============================================================================

/// The externally supplied strategy record.
///
/// Ranks and position are signed here; out-of-range values are rejected by
/// [`StrategyConfig::try_from`] with a [`StrategyConfigError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub position: i64,
    pub active_ranks: Vec<i64>,
    #[serde(default = "default_mode")]
    pub mode: String,
    pub hit_semantics: String,
    #[serde(default)]
    pub skip_if_few: bool,
    #[serde(default = "default_min_experts")]
    pub min_experts: usize,
    #[serde(default = "default_tie_break_mode")]
    pub tie_break_mode: String,
    #[serde(default)]
    pub reverse_on_tie: bool,
}

fn default_mode() -> String {
    "rank".to_string()
}

fn default_min_experts() -> usize {
    DEFAULT_MIN_EXPERTS
}

fn default_tie_break_mode() -> String {
    "none".to_string()
}

impl TryFrom<StrategyRecord> for StrategyConfig {
    type Error = StrategyConfigError;

    fn try_from(record: StrategyRecord) -> Result<Self, Self::Error> {
        if record.position < 0 {
            return Err(StrategyConfigError::NegativePosition(record.position));
        }
        let hit_semantics: HitSemantics = record.hit_semantics.parse()?;
        let tie_break_mode: TieBreakMode = record.tie_break_mode.parse()?;

        StrategyConfig::builder(record.position as usize)
            .active_ranks(record.active_ranks)
            .mode(EvaluationMode::from(record.mode))
            .hit_semantics(hit_semantics)
            .skip_if_few(record.skip_if_few)
            .min_experts(record.min_experts)
            .tie_break(tie_break_mode, record.reverse_on_tie)
            .build()
    }
}

impl From<StrategyConfig> for StrategyRecord {
    fn from(config: StrategyConfig) -> Self {
        Self {
            position: config.position as i64,
            active_ranks: config.active_ranks.iter().map(|&r| r as i64).collect(),
            mode: config.mode.into(),
            hit_semantics: config.hit_semantics.as_str().to_string(),
            skip_if_few: config.skip_if_few,
            min_experts: config.min_experts,
            tie_break_mode: config.tie_break_mode.as_str().to_string(),
            reverse_on_tie: config.reverse_on_tie,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let cfg = StrategyConfig::builder(2).active_ranks([1]).build().unwrap();
        assert_eq!(cfg.position(), 2);
        assert_eq!(cfg.mode(), &EvaluationMode::Rank);
        assert_eq!(cfg.hit_semantics(), HitSemantics::Eliminate);
        assert!(!cfg.skip_if_few());
        assert_eq!(cfg.min_experts(), DEFAULT_MIN_EXPERTS);
        assert_eq!(cfg.tie_break_mode(), TieBreakMode::None);
        assert!(!cfg.reverse_on_tie());
    }

    #[test]
    fn test_builder_rejects_empty_ranks() {
        let err = StrategyConfig::builder(0).build().unwrap_err();
        assert_eq!(err, StrategyConfigError::EmptyActiveRanks);
    }

    #[test]
    fn test_builder_rejects_zero_and_negative_ranks() {
        assert_eq!(
            StrategyConfig::builder(0).active_ranks([1, 0]).build().unwrap_err(),
            StrategyConfigError::InvalidRank(0)
        );
        assert_eq!(
            StrategyConfig::builder(0).active_ranks([-3]).build().unwrap_err(),
            StrategyConfigError::InvalidRank(-3)
        );
    }

    #[test]
    fn test_ranks_beyond_domain_are_accepted() {
        let cfg = StrategyConfig::builder(0).active_ranks([42]).build().unwrap();
        assert!(cfg.is_active(42));
    }

    #[test]
    fn test_duplicate_ranks_collapse() {
        let cfg = StrategyConfig::builder(0).active_ranks([3, 1, 3]).build().unwrap();
        assert_eq!(cfg.active_ranks().iter().copied().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_legacy_tie_break_spellings() {
        assert_eq!("False".parse::<TieBreakMode>().unwrap(), TieBreakMode::None);
        assert_eq!("Next".parse::<TieBreakMode>().unwrap(), TieBreakMode::PushNext);
        assert!("sideways".parse::<TieBreakMode>().is_err());
    }

    #[test]
    fn test_hit_semantics_flag() {
        assert!(!HitSemantics::Eliminate.hit_if_rank_in_active_set());
        assert!(HitSemantics::Pick.hit_if_rank_in_active_set());
    }

    #[test]
    fn test_record_json_roundtrip_and_validation() {
        let json = r#"{
            "position": 1,
            "active_ranks": [2, 3],
            "hit_semantics": "pick",
            "skip_if_few": true,
            "min_experts": 8,
            "tie_break_mode": "push_next",
            "reverse_on_tie": true
        }"#;
        let cfg: StrategyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.hit_semantics(), HitSemantics::Pick);
        assert_eq!(cfg.min_experts(), 8);
        assert_eq!(cfg.tie_break_mode(), TieBreakMode::PushNext);

        let back: StrategyConfig = serde_json::from_str(&serde_json::to_string(&cfg).unwrap()).unwrap();
        assert_eq!(back, cfg);

        let bad = r#"{"position": 1, "active_ranks": [-1], "hit_semantics": "eliminate"}"#;
        assert!(serde_json::from_str::<StrategyConfig>(bad).is_err());
    }

    #[test]
    fn test_opaque_mode_passthrough() {
        let mode = EvaluationMode::from("kill_matrix".to_string());
        assert_eq!(mode, EvaluationMode::Opaque("kill_matrix".into()));
        assert_eq!(String::from(mode), "kill_matrix");
    }
}
