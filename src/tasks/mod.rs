//! Strategy search loop.
//!
//! ```text
//! generate ──► tasks (pending) ──► execute ──► best_tasks / best_ranks
//!    ▲                                               │
//!    └──────────── unhit ranks (expansion) ──────────┘
//!
//! reanalyze: best_tasks (rate >= pass) ──► re-run over chosen issues ──► prune / pass
//! ```
//!
//! Generation stops producing work once every unhit rank has been expanded;
//! `generate` then reports zero new tasks.

pub mod executor;
pub mod generator;
pub mod reanalyze;

pub use executor::{ExecutionReport, TaskExecutor};
pub use generator::{GenerationReport, TaskGenerator};
pub use reanalyze::{reanalyze_best, ReanalysisOutcome, ReanalysisReport, ReanalysisScope};

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::config::LotteryProfile;
    use crate::store::{Database, PredictionRecord, ResultRecord};

    /// Ten issues on `gewei_sha1`. Experts always vote 0 > 1 > 2, so the
    /// drawn digit sits at rank 1 on issues 1-2, rank 2 on 3-5 and rank 4
    /// (digit 3) on the rest.
    pub fn seeded_db() -> (Database, LotteryProfile) {
        let db = Database::open_in_memory().unwrap();
        let store = db.predictions("p5");
        for i in 1..=10u32 {
            let issue = format!("2024{:03}", i);
            let votes: [(&str, u8); 6] = [("a", 0), ("b", 0), ("c", 0), ("d", 1), ("e", 1), ("f", 2)];
            for (expert, digit) in votes {
                store
                    .upsert_prediction(&PredictionRecord {
                        issue: issue.clone(),
                        playtype: "gewei_sha1".into(),
                        expert_id: expert.into(),
                        numbers: vec![digit],
                    })
                    .unwrap();
            }
            let drawn = match i {
                1 | 2 => 0,
                3..=5 => 1,
                _ => 3,
            };
            store
                .upsert_result(&ResultRecord {
                    issue,
                    open_code: format!("9,9,9,9,{}", drawn),
                })
                .unwrap();
        }
        (db, LotteryProfile::p5())
    }
}
