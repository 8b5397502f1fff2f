//! Deterministic fingerprints.
//!
//! ```text
//! ResultFingerprint   = SHA256("HMRES_V1" || hit || miss || skip || max_rank || (rank, count)*)
//! StrategyFingerprint = SHA256("HMSTRAT_V2" || play_type || lookback_n || offset || strategy fields)
//! ```
//!
//! Integers are little-endian u64 and strings are length-prefixed. The
//! histogram and the active ranks are hashed in ascending order, so equal
//! inputs always hash equal.

use super::strategy::{EvaluationMode, StrategyConfig};
use super::types::BacktestResult;
use sha2::{Digest, Sha256};

pub const RESULT_FINGERPRINT_VERSION: &str = "HMRES_V1";
pub const STRATEGY_FINGERPRINT_VERSION: &str = "HMSTRAT_V2";

impl BacktestResult {
    /// Hex SHA256 over the canonical encoding of every aggregate field.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(RESULT_FINGERPRINT_VERSION.as_bytes());
        hasher.update(self.hit_count.to_le_bytes());
        hasher.update(self.miss_count.to_le_bytes());
        hasher.update(self.skip_count.to_le_bytes());
        hasher.update((self.max_rank_length as u64).to_le_bytes());
        for (&rank, &count) in &self.open_rank_counter {
            hasher.update((rank as u64).to_le_bytes());
            hasher.update(count.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Stable identity for a (play-type, window, strategy) combination.
///
/// The task queue uses this as its uniqueness key.
pub fn strategy_key(
    play_type: &str,
    lookback_n: Option<usize>,
    lookback_offset: usize,
    strategy: &StrategyConfig,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(STRATEGY_FINGERPRINT_VERSION.as_bytes());
    hash_str(&mut hasher, play_type);
    hasher.update(lookback_n.map(|n| n as u64).unwrap_or(u64::MAX).to_le_bytes());
    hasher.update((lookback_offset as u64).to_le_bytes());

    hasher.update((strategy.position() as u64).to_le_bytes());
    hasher.update((strategy.active_ranks().len() as u64).to_le_bytes());
    for &rank in strategy.active_ranks() {
        hasher.update((rank as u64).to_le_bytes());
    }
    match strategy.mode() {
        EvaluationMode::Rank => hash_str(&mut hasher, "rank"),
        EvaluationMode::Opaque(name) => {
            hash_str(&mut hasher, "opaque");
            hash_str(&mut hasher, name);
        }
    }
    hash_str(&mut hasher, strategy.hit_semantics().as_str());
    hasher.update([strategy.skip_if_few() as u8]);
    hasher.update((strategy.min_experts() as u64).to_le_bytes());
    hash_str(&mut hasher, strategy.tie_break_mode().as_str());
    hasher.update([strategy.reverse_on_tie() as u8]);
    format!("{:x}", hasher.finalize())
}

fn hash_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::strategy::{HitSemantics, TieBreakMode};
    use std::collections::BTreeMap;

    #[test]
    fn test_result_fingerprint_stable_and_sensitive() {
        let a = BacktestResult {
            hit_count: 7,
            miss_count: 2,
            skip_count: 1,
            open_rank_counter: BTreeMap::from([(1, 2), (4, 8)]),
            max_rank_length: 10,
        };
        let b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let mut c = a.clone();
        c.open_rank_counter.insert(5, 1);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_strategy_key_distinguishes_fields() {
        let base = StrategyConfig::builder(1).active_ranks([2]).build().unwrap();
        let k1 = strategy_key("qianwei_sha1", Some(30), 0, &base);
        assert_eq!(k1, strategy_key("qianwei_sha1", Some(30), 0, &base));
        assert_ne!(k1, strategy_key("qianwei_sha1", Some(31), 0, &base));
        assert_ne!(k1, strategy_key("qianwei_sha1", Some(30), 1, &base));
        assert_ne!(k1, strategy_key("qianwei_sha3", Some(30), 0, &base));

        let reversed = StrategyConfig::builder(1)
            .active_ranks([2])
            .tie_break(TieBreakMode::PushNext, true)
            .build()
            .unwrap();
        assert_ne!(k1, strategy_key("qianwei_sha1", Some(30), 0, &reversed));

        let pick = StrategyConfig::builder(1)
            .active_ranks([2])
            .hit_semantics(HitSemantics::Pick)
            .build()
            .unwrap();
        assert_ne!(k1, strategy_key("qianwei_sha1", Some(30), 0, &pick));
    }

    #[test]
    fn test_strategy_key_covers_mode_and_floor() {
        let base = StrategyConfig::builder(1).active_ranks([2]).build().unwrap();
        let k = |s: &StrategyConfig| strategy_key("qianwei_sha1", None, 0, s);

        let opaque_a = StrategyConfig::builder(1)
            .active_ranks([2])
            .mode(EvaluationMode::Opaque("matrix_a".into()))
            .build()
            .unwrap();
        let opaque_b = StrategyConfig::builder(1)
            .active_ranks([2])
            .mode(EvaluationMode::Opaque("matrix_b".into()))
            .build()
            .unwrap();
        assert_ne!(k(&base), k(&opaque_a));
        assert_ne!(k(&opaque_a), k(&opaque_b));

        let floor = StrategyConfig::builder(1).active_ranks([2]).min_experts(9).build().unwrap();
        assert_ne!(k(&base), k(&floor));

        let two_ranks = StrategyConfig::builder(1).active_ranks([2, 3]).build().unwrap();
        assert_ne!(k(&base), k(&two_ranks));
        assert_eq!(k(&two_ranks), k(&StrategyConfig::builder(1).active_ranks([3, 2]).build().unwrap()));
    }
}
