//! HitMatrix Configuration
//!
//! Lottery profiles (play-type lookup, digit domains) and the promotion
//! thresholds used by the task loop. Loaded from TOML; every field has a
//! default so a partial file is fine.
//!
//! The play-type table is the only place that maps a play-type to its position
//! and eliminate/pick semantics. Nothing parses play-type names.

use crate::engine::{DigitDomain, HitSemantics};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitMatrixConfig {
    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Expert floor applied to generated skip-if-few strategies
    #[serde(default = "default_min_experts")]
    pub min_experts: usize,

    /// Rayon worker threads for batch backtests (0 = rayon default)
    #[serde(default)]
    pub worker_threads: usize,

    #[serde(default)]
    pub thresholds: PromotionThresholds,

    #[serde(default = "default_lotteries")]
    pub lotteries: Vec<LotteryProfile>,
}

fn default_db_path() -> String {
    "hitmatrix.db".to_string()
}

fn default_min_experts() -> usize {
    crate::engine::DEFAULT_MIN_EXPERTS
}

fn default_lotteries() -> Vec<LotteryProfile> {
    vec![LotteryProfile::p5(), LotteryProfile::fc3d()]
}

impl Default for HitMatrixConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            min_experts: default_min_experts(),
            worker_threads: 0,
            thresholds: PromotionThresholds::default(),
            lotteries: default_lotteries(),
        }
    }
}

impl HitMatrixConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `HITMATRIX_CONFIG_PATH` (default `hitmatrix.toml`), falling
    /// back to built-in defaults when the file is absent.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("HITMATRIX_CONFIG_PATH")
            .unwrap_or_else(|_| "hitmatrix.toml".to_string());

        if !Path::new(&path).exists() {
            tracing::debug!("Using default hitmatrix config ({} not found)", path);
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        for (name, v) in [
            ("promote_hit_rate", t.promote_hit_rate),
            ("prune_hit_rate", t.prune_hit_rate),
            ("pass_hit_rate", t.pass_hit_rate),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(anyhow!("threshold {} = {} is outside [0, 1]", name, v));
            }
        }
        for lottery in &self.lotteries {
            lottery.validate()?;
        }
        Ok(())
    }

    pub fn lottery(&self, code: &str) -> Result<&LotteryProfile> {
        self.lotteries
            .iter()
            .find(|l| l.code.eq_ignore_ascii_case(code))
            .ok_or_else(|| anyhow!("unknown lottery '{}'", code))
    }
}

/// Hit-rate thresholds driving the generate → backtest → promote loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionThresholds {
    /// Pending task is copied to best_tasks at or above this rate
    #[serde(default = "default_promote")]
    pub promote_hit_rate: f64,

    /// Best task is deleted when re-analysis falls below this rate
    #[serde(default = "default_prune")]
    pub prune_hit_rate: f64,

    /// Re-analysis pass mark
    #[serde(default = "default_pass")]
    pub pass_hit_rate: f64,
}

fn default_promote() -> f64 {
    0.8
}

fn default_prune() -> f64 {
    0.7
}

fn default_pass() -> f64 {
    0.9
}

impl Default for PromotionThresholds {
    fn default() -> Self {
        Self {
            promote_hit_rate: default_promote(),
            prune_hit_rate: default_prune(),
            pass_hit_rate: default_pass(),
        }
    }
}

/// One lottery game: how many positions it draws, its digit domain, and the
/// play-types experts predict for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotteryProfile {
    pub code: String,
    pub name: String,
    pub positions: usize,
    #[serde(default)]
    pub digit_domain: DigitDomain,
    pub playtypes: Vec<PlaytypeSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaytypeSpec {
    /// Code used in the prediction store (e.g. `qianwei_sha1`)
    pub code: String,
    /// Display name
    pub name: String,
    pub position: usize,
    pub hit_semantics: HitSemantics,
}

impl LotteryProfile {
    pub fn playtype(&self, code: &str) -> Result<&PlaytypeSpec> {
        self.playtypes
            .iter()
            .find(|p| p.code == code || p.name == code)
            .ok_or_else(|| anyhow!("play-type '{}' is not configured for {}", code, self.code))
    }

    fn validate(&self) -> Result<()> {
        if self.digit_domain.size() == 0 {
            return Err(anyhow!("{}: digit_domain must be at least 1", self.code));
        }
        for p in &self.playtypes {
            if p.position >= self.positions {
                return Err(anyhow!(
                    "{}: play-type {} has position {} but the game draws {} digits",
                    self.code,
                    p.code,
                    p.position,
                    self.positions
                ));
            }
        }
        Ok(())
    }

    /// Pick 5: five positions, positional kill/fix play-types.
    pub fn p5() -> Self {
        const POSITIONS: [(&str, &str); 5] = [
            ("wanwei", "万位"),
            ("qianwei", "千位"),
            ("baiwei", "百位"),
            ("shiwei", "十位"),
            ("gewei", "个位"),
        ];
        Self {
            code: "p5".into(),
            name: "排列5".into(),
            positions: 5,
            digit_domain: DigitDomain::default(),
            playtypes: positional_playtypes(&POSITIONS, &[1, 3], &[1, 3, 5]),
        }
    }

    /// Fucai 3D: three positions, positional play-types only.
    pub fn fc3d() -> Self {
        const POSITIONS: [(&str, &str); 3] = [("baiwei", "百位"), ("shiwei", "十位"), ("gewei", "个位")];
        Self {
            code: "3d".into(),
            name: "福彩3D".into(),
            positions: 3,
            digit_domain: DigitDomain::default(),
            playtypes: positional_playtypes(&POSITIONS, &[], &[1, 3]),
        }
    }
}

fn positional_playtypes(positions: &[(&str, &str)], sha: &[u8], ding: &[u8]) -> Vec<PlaytypeSpec> {
    let mut out = Vec::new();
    for (position, (code, label)) in positions.iter().enumerate() {
        for n in sha {
            out.push(PlaytypeSpec {
                code: format!("{}_sha{}", code, n),
                name: format!("{}杀{}", label, n),
                position,
                hit_semantics: HitSemantics::Eliminate,
            });
        }
        for n in ding {
            out.push(PlaytypeSpec {
                code: format!("{}_ding{}", code, n),
                name: format!("{}定{}", label, n),
                position,
                hit_semantics: HitSemantics::Pick,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profiles() {
        let config = HitMatrixConfig::default();
        config.validate().unwrap();

        let p5 = config.lottery("P5").unwrap();
        assert_eq!(p5.playtypes.len(), 25);
        let q = p5.playtype("qianwei_sha1").unwrap();
        assert_eq!(q.position, 1);
        assert_eq!(q.hit_semantics, HitSemantics::Eliminate);
        let g = p5.playtype("个位定3").unwrap();
        assert_eq!(g.position, 4);
        assert_eq!(g.hit_semantics, HitSemantics::Pick);

        let d3 = config.lottery("3d").unwrap();
        assert_eq!(d3.playtypes.len(), 6);
        assert!(config.lottery("ssq").is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = HitMatrixConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: HitMatrixConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.lotteries.len(), config.lotteries.len());
        assert_eq!(parsed.thresholds.promote_hit_rate, 0.8);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: HitMatrixConfig = toml::from_str(
            r#"
            db_path = "/tmp/x.db"
            [thresholds]
            promote_hit_rate = 0.85
            "#,
        )
        .unwrap();
        assert_eq!(parsed.db_path, "/tmp/x.db");
        assert_eq!(parsed.thresholds.promote_hit_rate, 0.85);
        assert_eq!(parsed.thresholds.prune_hit_rate, 0.7);
        assert_eq!(parsed.lotteries.len(), 2);
    }

    #[test]
    fn test_custom_profile_with_small_domain() {
        let parsed: HitMatrixConfig = toml::from_str(
            r#"
            [[lotteries]]
            code = "mini"
            name = "Mini"
            positions = 2
            digit_domain = 4

            [[lotteries.playtypes]]
            code = "first_sha1"
            name = "First kill 1"
            position = 0
            hit_semantics = "eliminate"
            "#,
        )
        .unwrap();
        parsed.validate().unwrap();
        let mini = parsed.lottery("mini").unwrap();
        assert_eq!(mini.digit_domain.size(), 4);
    }

    #[test]
    fn test_position_out_of_range_rejected() {
        let mut config = HitMatrixConfig::default();
        config.lotteries[1].playtypes[0].position = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hitmatrix.toml");
        let mut config = HitMatrixConfig::default();
        config.db_path = "data/hm.db".into();
        config.save(&path).unwrap();
        let loaded = HitMatrixConfig::load(&path).unwrap();
        assert_eq!(loaded.db_path, "data/hm.db");
    }
}
