//! SQLite-backed collaborators.
//!
//! One database file holds every lottery; rows carry a `lottery` column and
//! each store handle is scoped to one lottery code.
//!
//! - [`PredictionStore`]: expert predictions and draw results (engine input)
//! - [`TaskStore`]: task queue, promoted strategies, open-rank history

pub mod predictions;
pub mod tasks;

pub use predictions::{parse_digits, PlaytypeStats, PredictionRecord, PredictionStore, ResultRecord};
pub use tasks::{BestRankRow, BestTaskRow, NewTask, TaskRow, TaskStatus, TaskStore};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::sync::Arc;
use tracing::info;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS expert_predictions (
    lottery TEXT NOT NULL,
    issue TEXT NOT NULL,
    playtype TEXT NOT NULL,
    expert_id TEXT NOT NULL,
    numbers TEXT NOT NULL,
    PRIMARY KEY (lottery, playtype, issue, expert_id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS draw_results (
    lottery TEXT NOT NULL,
    issue TEXT NOT NULL,
    open_code TEXT NOT NULL,
    PRIMARY KEY (lottery, issue)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    lottery TEXT NOT NULL,
    strategy_key TEXT NOT NULL,
    playtype TEXT NOT NULL,
    position INTEGER NOT NULL,
    lookback_n INTEGER,
    lookback_offset INTEGER NOT NULL DEFAULT 0,
    strategy_json TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    total_issues INTEGER,
    hit_count INTEGER,
    miss_count INTEGER,
    skip_count INTEGER,
    hit_rate REAL,
    created_at TEXT NOT NULL,
    updated_at TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_key ON tasks(lottery, strategy_key);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(lottery, status, id);

CREATE TABLE IF NOT EXISTS best_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    lottery TEXT NOT NULL,
    strategy_key TEXT NOT NULL,
    origin_task_id INTEGER,
    playtype TEXT NOT NULL,
    position INTEGER NOT NULL,
    lookback_n INTEGER,
    lookback_offset INTEGER NOT NULL DEFAULT 0,
    strategy_json TEXT NOT NULL,
    hit_rate REAL NOT NULL,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_best_tasks_key ON best_tasks(lottery, strategy_key);

CREATE TABLE IF NOT EXISTS best_ranks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    lottery TEXT NOT NULL,
    task_id INTEGER,
    playtype TEXT NOT NULL,
    position INTEGER NOT NULL,
    lookback_n INTEGER,
    lookback_offset INTEGER NOT NULL DEFAULT 0,
    strategy_json TEXT NOT NULL,
    total_issues INTEGER NOT NULL,
    open_rank_counter TEXT NOT NULL,
    unhit_ranks TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_best_ranks_playtype ON best_ranks(lottery, playtype);

CREATE TABLE IF NOT EXISTS best_task_reviews (
    lottery TEXT NOT NULL,
    best_task_id INTEGER NOT NULL,
    hit_rate REAL NOT NULL,
    effective_total INTEGER NOT NULL,
    passed INTEGER NOT NULL,
    reviewed_at TEXT NOT NULL,
    PRIMARY KEY (lottery, best_task_id)
) WITHOUT ROWID;
"#;

/// Shared SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (creating if needed) and apply the schema.
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // locking is ours

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply hitmatrix schema")?;
        info!("hitmatrix database ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn predictions(&self, lottery: &str) -> PredictionStore {
        PredictionStore::new(self.conn.clone(), lottery)
    }

    pub fn tasks(&self, lottery: &str) -> TaskStore {
        TaskStore::new(self.conn.clone(), lottery)
    }
}

/// Wall-clock timestamp for bookkeeping columns.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
