//! Task queue persistence.
//!
//! ```text
//! tasks ──(execute)──► done ──(hit_rate >= promote)──► best_tasks
//!                        │
//!                        └──────────────────────────► best_ranks (always)
//! ```
//!
//! Every strategy row is keyed by [`strategy_key`], so re-generating the same
//! combination is a no-op.

use crate::engine::{
    round_rate, strategy_key, BacktestRequest, BacktestResult, BacktestSummary, IssueSelection,
    Rank, StrategyConfig,
};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::now_rfc3339;

/// Persisted hit rates keep this many decimals.
pub(crate) const HIT_RATE_PLACES: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
        }
    }
}

/// A strategy waiting to be queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub playtype: String,
    pub lookback_n: Option<usize>,
    pub lookback_offset: usize,
    pub strategy: StrategyConfig,
}

impl NewTask {
    pub fn strategy_key(&self) -> String {
        strategy_key(&self.playtype, self.lookback_n, self.lookback_offset, &self.strategy)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub id: i64,
    pub strategy_key: String,
    pub playtype: String,
    pub lookback_n: Option<usize>,
    pub lookback_offset: usize,
    pub strategy: StrategyConfig,
    pub status: TaskStatus,
    pub hit_rate: Option<f64>,
}

impl TaskRow {
    /// Backtest over the full issue universe, windowed by the task's lookback.
    pub fn to_request(&self) -> BacktestRequest {
        BacktestRequest {
            selection: IssueSelection::All,
            play_type: self.playtype.clone(),
            strategy: self.strategy.clone(),
            lookback_n: self.lookback_n,
            lookback_offset: self.lookback_offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BestTaskRow {
    pub id: i64,
    pub strategy_key: String,
    pub origin_task_id: Option<i64>,
    pub playtype: String,
    pub lookback_n: Option<usize>,
    pub lookback_offset: usize,
    pub strategy: StrategyConfig,
    pub hit_rate: f64,
}

impl BestTaskRow {
    pub fn to_request(&self, selection: IssueSelection) -> BacktestRequest {
        BacktestRequest {
            selection,
            play_type: self.playtype.clone(),
            strategy: self.strategy.clone(),
            lookback_n: self.lookback_n,
            lookback_offset: self.lookback_offset,
        }
    }
}

/// Open-rank history of one executed task.
#[derive(Debug, Clone, PartialEq)]
pub struct BestRankRow {
    pub id: i64,
    pub task_id: Option<i64>,
    pub playtype: String,
    pub lookback_n: Option<usize>,
    pub lookback_offset: usize,
    pub strategy: StrategyConfig,
    pub total_issues: u64,
    pub open_rank_counter: BTreeMap<Rank, u64>,
    pub unhit_ranks: Vec<Rank>,
    pub fingerprint: String,
}

// =============================================================================
// ROW DECODING
// =============================================================================

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_usize(v: Option<i64>) -> Option<usize> {
    v.map(|n| n.max(0) as usize)
}

fn task_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<TaskStatus> {
    let s: String = row.get(idx)?;
    Ok(if s == "done" {
        TaskStatus::Done
    } else {
        TaskStatus::Pending
    })
}

const TASK_COLUMNS: &str =
    "id, strategy_key, playtype, lookback_n, lookback_offset, strategy_json, status, hit_rate";

fn task_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        strategy_key: row.get(1)?,
        playtype: row.get(2)?,
        lookback_n: opt_usize(row.get(3)?),
        lookback_offset: row.get::<_, i64>(4)?.max(0) as usize,
        strategy: json_column(row, 5)?,
        status: task_status(row, 6)?,
        hit_rate: row.get(7)?,
    })
}

const BEST_TASK_COLUMNS: &str =
    "id, strategy_key, origin_task_id, playtype, lookback_n, lookback_offset, strategy_json, hit_rate";

fn best_task_row(row: &Row<'_>) -> rusqlite::Result<BestTaskRow> {
    Ok(BestTaskRow {
        id: row.get(0)?,
        strategy_key: row.get(1)?,
        origin_task_id: row.get(2)?,
        playtype: row.get(3)?,
        lookback_n: opt_usize(row.get(4)?),
        lookback_offset: row.get::<_, i64>(5)?.max(0) as usize,
        strategy: json_column(row, 6)?,
        hit_rate: row.get(7)?,
    })
}

fn best_rank_row(row: &Row<'_>) -> rusqlite::Result<BestRankRow> {
    Ok(BestRankRow {
        id: row.get(0)?,
        task_id: row.get(1)?,
        playtype: row.get(2)?,
        lookback_n: opt_usize(row.get(3)?),
        lookback_offset: row.get::<_, i64>(4)?.max(0) as usize,
        strategy: json_column(row, 5)?,
        total_issues: row.get::<_, i64>(6)?.max(0) as u64,
        open_rank_counter: json_column(row, 7)?,
        unhit_ranks: json_column(row, 8)?,
        fingerprint: row.get(9)?,
    })
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Clone)]
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
    lottery: String,
}

impl TaskStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>, lottery: &str) -> Self {
        Self {
            conn,
            lottery: lottery.to_string(),
        }
    }

    /// Queue one task. Returns `false` when the strategy key already exists.
    pub fn insert_task(&self, task: &NewTask) -> Result<bool> {
        Ok(self.insert_tasks(std::slice::from_ref(task))? == 1)
    }

    /// Queue tasks in one transaction; returns how many were new.
    pub fn insert_tasks(&self, tasks: &[NewTask]) -> Result<usize> {
        let now = now_rfc3339();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO tasks
                    (lottery, strategy_key, playtype, position, lookback_n, lookback_offset,
                     strategy_json, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)",
            )?;
            for task in tasks {
                let strategy_json = serde_json::to_string(&task.strategy)?;
                inserted += stmt.execute(params![
                    &self.lottery,
                    task.strategy_key(),
                    &task.playtype,
                    task.strategy.position() as i64,
                    task.lookback_n.map(|n| n as i64),
                    task.lookback_offset as i64,
                    strategy_json,
                    &now
                ])?;
            }
        }
        tx.commit()?;
        debug!(lottery = %self.lottery, offered = tasks.len(), inserted, "queued tasks");
        Ok(inserted)
    }

    /// Pending tasks in insertion order.
    pub fn pending_tasks(&self, limit: Option<usize>) -> Result<Vec<TaskRow>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM tasks WHERE lottery = ?1 AND status = 'pending' ORDER BY id LIMIT ?2",
            TASK_COLUMNS
        );
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![&self.lottery, limit], task_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read pending tasks")?;
        Ok(rows)
    }

    pub fn task(&self, id: i64) -> Result<Option<TaskRow>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM tasks WHERE lottery = ?1 AND id = ?2", TASK_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![&self.lottery, id], task_row)?;
        Ok(rows.next().transpose()?)
    }

    /// `(pending, done)` task counts.
    pub fn status_counts(&self) -> Result<(u64, u64)> {
        let conn = self.conn.lock();
        let (pending, done): (i64, i64) = conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'done' THEN 1 ELSE 0 END), 0)
             FROM tasks WHERE lottery = ?1",
            params![&self.lottery],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((pending as u64, done as u64))
    }

    /// Store counters and the rounded hit rate, marking the task done.
    pub fn complete_task(&self, id: i64, result: &BacktestResult, summary: &BacktestSummary) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE tasks
             SET status = 'done', total_issues = ?3, hit_count = ?4, miss_count = ?5,
                 skip_count = ?6, hit_rate = ?7, updated_at = ?8
             WHERE lottery = ?1 AND id = ?2",
            params![
                &self.lottery,
                id,
                summary.total_issues as i64,
                result.hit_count as i64,
                result.miss_count as i64,
                result.skip_count as i64,
                round_rate(summary.hit_rate, HIT_RATE_PLACES),
                now_rfc3339()
            ],
        )
        .with_context(|| format!("Failed to complete task {}", id))?;
        Ok(())
    }

    /// Copy a task into `best_tasks`. Returns `false` if it was already there.
    pub fn promote(&self, task: &TaskRow, hit_rate: f64) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "INSERT OR IGNORE INTO best_tasks
                (lottery, strategy_key, origin_task_id, playtype, position, lookback_n,
                 lookback_offset, strategy_json, hit_rate, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                &self.lottery,
                &task.strategy_key,
                task.id,
                &task.playtype,
                task.strategy.position() as i64,
                task.lookback_n.map(|n| n as i64),
                task.lookback_offset as i64,
                serde_json::to_string(&task.strategy)?,
                round_rate(hit_rate, HIT_RATE_PLACES),
                now_rfc3339()
            ],
        )?;
        Ok(n == 1)
    }

    pub fn insert_best_rank(&self, task: &TaskRow, result: &BacktestResult, summary: &BacktestSummary) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO best_ranks
                (lottery, task_id, playtype, position, lookback_n, lookback_offset, strategy_json,
                 total_issues, open_rank_counter, unhit_ranks, fingerprint, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                &self.lottery,
                task.id,
                &task.playtype,
                task.strategy.position() as i64,
                task.lookback_n.map(|n| n as i64),
                task.lookback_offset as i64,
                serde_json::to_string(&task.strategy)?,
                summary.total_issues as i64,
                serde_json::to_string(&result.open_rank_counter)?,
                serde_json::to_string(&summary.unhit_ranks)?,
                result.fingerprint(),
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Open-rank history rows, optionally for one play-type.
    pub fn best_ranks(&self, playtype: Option<&str>) -> Result<Vec<BestRankRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, task_id, playtype, lookback_n, lookback_offset, strategy_json,
                    total_issues, open_rank_counter, unhit_ranks, fingerprint
             FROM best_ranks
             WHERE lottery = ?1 AND (?2 IS NULL OR playtype = ?2)
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![&self.lottery, playtype], best_rank_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read best_ranks")?;
        Ok(rows)
    }

    /// Promoted strategies, optionally restricted to one draw position.
    pub fn best_tasks(&self, position: Option<usize>) -> Result<Vec<BestTaskRow>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM best_tasks
             WHERE lottery = ?1 AND (?2 IS NULL OR position = ?2)
             ORDER BY id",
            BEST_TASK_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![&self.lottery, position.map(|p| p as i64)], best_task_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read best_tasks")?;
        Ok(rows)
    }

    pub fn delete_best_task(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM best_tasks WHERE lottery = ?1 AND id = ?2",
            params![&self.lottery, id],
        )?;
        conn.execute(
            "DELETE FROM best_task_reviews WHERE lottery = ?1 AND best_task_id = ?2",
            params![&self.lottery, id],
        )?;
        Ok(n == 1)
    }

    /// Latest re-analysis outcome for a best task (one row per task).
    pub fn record_review(&self, best_task_id: i64, summary: &BacktestSummary, passed: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO best_task_reviews
                (lottery, best_task_id, hit_rate, effective_total, passed, reviewed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &self.lottery,
                best_task_id,
                round_rate(summary.hit_rate, HIT_RATE_PLACES),
                summary.effective_total as i64,
                passed,
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// `(hit_rate, passed)` of the last review, if any.
    pub fn last_review(&self, best_task_id: i64) -> Result<Option<(f64, bool)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT hit_rate, passed FROM best_task_reviews WHERE lottery = ?1 AND best_task_id = ?2",
        )?;
        let mut rows = stmt.query_map(params![&self.lottery, best_task_id], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        Ok(rows.next().transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{summarize, HitSemantics, TieBreakMode};
    use crate::store::Database;

    fn new_task(rank: i64, lookback_n: usize) -> NewTask {
        NewTask {
            playtype: "gewei_sha1".into(),
            lookback_n: Some(lookback_n),
            lookback_offset: 0,
            strategy: StrategyConfig::builder(4).active_ranks([rank]).build().unwrap(),
        }
    }

    fn sample_result() -> BacktestResult {
        BacktestResult {
            hit_count: 9,
            miss_count: 1,
            skip_count: 0,
            open_rank_counter: BTreeMap::from([(1, 1), (2, 4), (5, 5)]),
            max_rank_length: 10,
        }
    }

    #[test]
    fn test_insert_is_idempotent_per_strategy_key() {
        let db = Database::open_in_memory().unwrap();
        let store = db.tasks("p5");
        assert!(store.insert_task(&new_task(1, 30)).unwrap());
        assert!(!store.insert_task(&new_task(1, 30)).unwrap());
        assert_eq!(
            store.insert_tasks(&[new_task(1, 30), new_task(2, 30), new_task(1, 29)]).unwrap(),
            2
        );
        assert_eq!(store.status_counts().unwrap(), (3, 0));

        // Same strategy under another lottery is a separate queue.
        assert!(db.tasks("3d").insert_task(&new_task(1, 30)).unwrap());
    }

    #[test]
    fn test_pending_roundtrip_and_limit() {
        let db = Database::open_in_memory().unwrap();
        let store = db.tasks("p5");
        let reversed = NewTask {
            strategy: StrategyConfig::builder(4)
                .active_ranks([3])
                .skip_if_few(true)
                .tie_break(TieBreakMode::PushNext, true)
                .build()
                .unwrap(),
            ..new_task(3, 12)
        };
        store.insert_tasks(&[new_task(1, 30), reversed.clone()]).unwrap();

        let pending = store.pending_tasks(None).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].strategy, reversed.strategy);
        assert_eq!(pending[1].strategy_key, reversed.strategy_key());
        assert_eq!(pending[1].lookback_n, Some(12));
        assert_eq!(pending[1].status, TaskStatus::Pending);

        assert_eq!(store.pending_tasks(Some(1)).unwrap().len(), 1);

        let req = pending[0].to_request();
        assert_eq!(req.selection, IssueSelection::All);
        assert_eq!(req.lookback_n, Some(30));
    }

    #[test]
    fn test_complete_promote_and_ranks() {
        let db = Database::open_in_memory().unwrap();
        let store = db.tasks("p5");
        store.insert_task(&new_task(1, 10)).unwrap();
        let task = store.pending_tasks(None).unwrap().remove(0);

        let result = sample_result();
        let summary = summarize(&result);
        store.complete_task(task.id, &result, &summary).unwrap();
        assert!(store.pending_tasks(None).unwrap().is_empty());
        assert_eq!(store.status_counts().unwrap(), (0, 1));
        let done = store.task(task.id).unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(done.hit_rate, Some(0.9));

        assert!(store.promote(&task, summary.hit_rate).unwrap());
        assert!(!store.promote(&task, summary.hit_rate).unwrap());

        store.insert_best_rank(&task, &result, &summary).unwrap();
        let ranks = store.best_ranks(Some("gewei_sha1")).unwrap();
        assert_eq!(ranks.len(), 1);
        assert_eq!(ranks[0].open_rank_counter, result.open_rank_counter);
        assert_eq!(ranks[0].unhit_ranks, vec![3, 4, 6, 7, 8, 9, 10]);
        assert_eq!(ranks[0].fingerprint, result.fingerprint());
        assert!(store.best_ranks(Some("gewei_ding1")).unwrap().is_empty());
    }

    #[test]
    fn test_best_tasks_filter_delete_and_review() {
        let db = Database::open_in_memory().unwrap();
        let store = db.tasks("p5");
        let other_position = NewTask {
            playtype: "wanwei_ding1".into(),
            strategy: StrategyConfig::builder(0)
                .active_ranks([1])
                .hit_semantics(HitSemantics::Pick)
                .build()
                .unwrap(),
            ..new_task(1, 5)
        };
        store.insert_tasks(&[new_task(2, 5), other_position]).unwrap();
        for task in store.pending_tasks(None).unwrap() {
            store.promote(&task, 0.85).unwrap();
        }

        assert_eq!(store.best_tasks(None).unwrap().len(), 2);
        let gewei = store.best_tasks(Some(4)).unwrap();
        assert_eq!(gewei.len(), 1);
        assert_eq!(gewei[0].hit_rate, 0.85);

        let summary = summarize(&sample_result());
        store.record_review(gewei[0].id, &summary, true).unwrap();
        assert_eq!(store.last_review(gewei[0].id).unwrap(), Some((0.9, true)));

        assert!(store.delete_best_task(gewei[0].id).unwrap());
        assert!(store.best_tasks(Some(4)).unwrap().is_empty());
        assert_eq!(store.last_review(gewei[0].id).unwrap(), None);
    }
}
