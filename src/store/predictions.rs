//! Expert prediction and draw result storage.
//!
//! `expert_predictions.numbers` and `draw_results.open_code` hold digit lists
//! separated by commas or whitespace (`"3,7"`, `"1 2 3 4 5"`).

use crate::engine::{Digit, DrawResultSource, ExpertPrediction, Issue, PredictionSource};
use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// One JSON-lines prediction row as accepted by [`PredictionStore::import_predictions`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub issue: String,
    pub playtype: String,
    pub expert_id: String,
    pub numbers: Vec<Digit>,
}

/// One JSON-lines draw row as accepted by [`PredictionStore::import_results`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub issue: String,
    pub open_code: String,
}

/// Per-play-type coverage summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaytypeStats {
    pub playtype: String,
    pub issues: u64,
    pub rows: u64,
    pub max_experts: u64,
    pub latest_issue: Option<String>,
}

/// Parse `"1,2 3"` style digit lists.
pub fn parse_digits(raw: &str) -> Result<Vec<Digit>> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<Digit>()
                .map_err(|e| anyhow!("invalid digit '{}' in '{}': {}", t, raw, e))
        })
        .collect()
}

fn join_digits(digits: &[Digit]) -> String {
    digits
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Clone)]
pub struct PredictionStore {
    conn: Arc<Mutex<Connection>>,
    lottery: String,
}

impl PredictionStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>, lottery: &str) -> Self {
        Self {
            conn,
            lottery: lottery.to_string(),
        }
    }

    pub fn lottery(&self) -> &str {
        &self.lottery
    }

    /// Insert or replace one expert's prediction for an issue/play-type.
    pub fn upsert_prediction(&self, record: &PredictionRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO expert_predictions (lottery, issue, playtype, expert_id, numbers)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &self.lottery,
                &record.issue,
                &record.playtype,
                &record.expert_id,
                join_digits(&record.numbers)
            ],
        )?;
        Ok(())
    }

    pub fn upsert_result(&self, record: &ResultRecord) -> Result<()> {
        parse_digits(&record.open_code)
            .with_context(|| format!("draw result for issue {}", record.issue))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO draw_results (lottery, issue, open_code) VALUES (?1, ?2, ?3)",
            params![&self.lottery, &record.issue, &record.open_code],
        )?;
        Ok(())
    }

    /// Import JSON-lines predictions in one transaction. Returns rows written.
    pub fn import_predictions(&self, path: &Path) -> Result<usize> {
        let records: Vec<PredictionRecord> = read_jsonl(path)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO expert_predictions (lottery, issue, playtype, expert_id, numbers)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for r in &records {
                stmt.execute(params![
                    &self.lottery,
                    &r.issue,
                    &r.playtype,
                    &r.expert_id,
                    join_digits(&r.numbers)
                ])?;
            }
        }
        tx.commit()?;
        info!(lottery = %self.lottery, rows = records.len(), "imported predictions");
        Ok(records.len())
    }

    /// Import JSON-lines draw results in one transaction. Returns rows written.
    pub fn import_results(&self, path: &Path) -> Result<usize> {
        let records: Vec<ResultRecord> = read_jsonl(path)?;
        for r in &records {
            parse_digits(&r.open_code).with_context(|| format!("draw result for issue {}", r.issue))?;
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO draw_results (lottery, issue, open_code) VALUES (?1, ?2, ?3)",
            )?;
            for r in &records {
                stmt.execute(params![&self.lottery, &r.issue, &r.open_code])?;
            }
        }
        tx.commit()?;
        info!(lottery = %self.lottery, rows = records.len(), "imported draw results");
        Ok(records.len())
    }

    /// Issue count, row count and largest per-issue expert count for every
    /// play-type of this lottery.
    pub fn playtype_stats(&self) -> Result<Vec<PlaytypeStats>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT playtype,
                    COUNT(DISTINCT issue),
                    COUNT(*),
                    MAX(issue)
             FROM expert_predictions
             WHERE lottery = ?1
             GROUP BY playtype
             ORDER BY playtype",
        )?;
        let mut stats: Vec<PlaytypeStats> = stmt
            .query_map(params![&self.lottery], |row| {
                Ok(PlaytypeStats {
                    playtype: row.get(0)?,
                    issues: row.get::<_, i64>(1)? as u64,
                    rows: row.get::<_, i64>(2)? as u64,
                    max_experts: 0,
                    latest_issue: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut max_stmt = conn.prepare(
            "SELECT MAX(cnt) FROM (
                 SELECT COUNT(DISTINCT expert_id) AS cnt
                 FROM expert_predictions
                 WHERE lottery = ?1 AND playtype = ?2
                 GROUP BY issue
             )",
        )?;
        for s in &mut stats {
            let max: Option<i64> = max_stmt.query_row(params![&self.lottery, &s.playtype], |row| row.get(0))?;
            s.max_experts = max.unwrap_or(0) as u64;
        }
        Ok(stats)
    }

    pub fn draw_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM draw_results WHERE lottery = ?1",
            params![&self.lottery],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

impl PredictionSource for PredictionStore {
    fn predictions(&self, issue: &Issue, play_type: &str) -> Result<Vec<ExpertPrediction>> {
        let rows: Vec<(String, String)> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(
                "SELECT expert_id, numbers FROM expert_predictions
                 WHERE lottery = ?1 AND playtype = ?2 AND issue = ?3
                 ORDER BY expert_id",
            )?;
            let rows = stmt
                .query_map(params![&self.lottery, play_type, issue.as_str()], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<rusqlite::Result<_>>()?;
            rows
        };

        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(rows.len());
        for (expert_id, numbers) in rows {
            let digits = match parse_digits(&numbers) {
                Ok(d) => d,
                Err(e) => {
                    warn!(issue = %issue, expert = %expert_id, "skipping malformed prediction: {}", e);
                    continue;
                }
            };
            for digit in digits {
                if seen.insert((expert_id.clone(), digit)) {
                    out.push(ExpertPrediction {
                        issue: issue.clone(),
                        play_type: play_type.to_string(),
                        expert_id: expert_id.clone(),
                        digit,
                    });
                }
            }
        }
        Ok(out)
    }

    fn issue_universe(&self, play_type: &str) -> Result<Vec<Issue>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT issue FROM expert_predictions
             WHERE lottery = ?1 AND playtype = ?2
             ORDER BY issue ASC",
        )?;
        let issues = stmt
            .query_map(params![&self.lottery, play_type], |row| row.get::<_, String>(0))?
            .map(|r| r.map(Issue::from))
            .collect::<rusqlite::Result<_>>()?;
        Ok(issues)
    }
}

impl DrawResultSource for PredictionStore {
    fn draw_result(&self, issue: &Issue, position: usize) -> Result<Option<Digit>> {
        let open_code: Option<String> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT open_code FROM draw_results WHERE lottery = ?1 AND issue = ?2",
                params![&self.lottery, issue.as_str()],
                |row| row.get(0),
            )
            .optional()?
        };

        match open_code {
            Some(code) => {
                let digits = parse_digits(&code).with_context(|| format!("draw result for issue {}", issue))?;
                Ok(digits.get(position).copied())
            }
            None => Ok(None),
        }
    }
}

fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut out = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid record", path.display(), lineno + 1))?;
        out.push(record);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use std::io::Write;

    fn record(issue: &str, expert: &str, numbers: &[Digit]) -> PredictionRecord {
        PredictionRecord {
            issue: issue.into(),
            playtype: "gewei_ding3".into(),
            expert_id: expert.into(),
            numbers: numbers.to_vec(),
        }
    }

    #[test]
    fn test_parse_digits() {
        assert_eq!(parse_digits("1,2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_digits(" 4 5  6 ").unwrap(), vec![4, 5, 6]);
        assert!(parse_digits("1,x").is_err());
        assert!(parse_digits("").unwrap().is_empty());
    }

    #[test]
    fn test_predictions_explode_digits_and_dedupe() {
        let db = Database::open_in_memory().unwrap();
        let store = db.predictions("p5");
        store.upsert_prediction(&record("2024001", "u1", &[1, 2, 2])).unwrap();
        store.upsert_prediction(&record("2024001", "u2", &[2])).unwrap();

        let preds = store.predictions(&Issue::from("2024001"), "gewei_ding3").unwrap();
        let pairs: Vec<(&str, Digit)> = preds.iter().map(|p| (p.expert_id.as_str(), p.digit)).collect();
        assert_eq!(pairs, vec![("u1", 1), ("u1", 2), ("u2", 2)]);
    }

    #[test]
    fn test_universe_sorted_and_scoped_to_lottery() {
        let db = Database::open_in_memory().unwrap();
        let p5 = db.predictions("p5");
        let d3 = db.predictions("3d");
        p5.upsert_prediction(&record("2024003", "u1", &[1])).unwrap();
        p5.upsert_prediction(&record("2024001", "u1", &[1])).unwrap();
        d3.upsert_prediction(&record("2024002", "u1", &[1])).unwrap();

        let universe = p5.issue_universe("gewei_ding3").unwrap();
        assert_eq!(universe, vec![Issue::from("2024001"), Issue::from("2024003")]);
        assert!(p5.issue_universe("qianwei_sha1").unwrap().is_empty());
    }

    #[test]
    fn test_draw_result_by_position() {
        let db = Database::open_in_memory().unwrap();
        let store = db.predictions("p5");
        store
            .upsert_result(&ResultRecord {
                issue: "2024001".into(),
                open_code: "3,1,4,1,5".into(),
            })
            .unwrap();

        let issue = Issue::from("2024001");
        assert_eq!(store.draw_result(&issue, 0).unwrap(), Some(3));
        assert_eq!(store.draw_result(&issue, 4).unwrap(), Some(5));
        assert_eq!(store.draw_result(&issue, 5).unwrap(), None);
        assert_eq!(store.draw_result(&Issue::from("2024999"), 0).unwrap(), None);
    }

    #[test]
    fn test_bad_open_code_rejected() {
        let db = Database::open_in_memory().unwrap();
        let store = db.predictions("p5");
        let err = store.upsert_result(&ResultRecord {
            issue: "2024001".into(),
            open_code: "3,a".into(),
        });
        assert!(err.is_err());
    }

    #[test]
    fn test_jsonl_import_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let preds_path = dir.path().join("preds.jsonl");
        let mut f = File::create(&preds_path).unwrap();
        writeln!(f, r#"{{"issue":"2024001","playtype":"gewei_sha1","expert_id":"a","numbers":[3]}}"#).unwrap();
        writeln!(f, r#"{{"issue":"2024001","playtype":"gewei_sha1","expert_id":"b","numbers":[4]}}"#).unwrap();
        writeln!(f).unwrap();
        writeln!(f, r#"{{"issue":"2024002","playtype":"gewei_sha1","expert_id":"a","numbers":[3]}}"#).unwrap();

        let results_path = dir.path().join("results.jsonl");
        let mut f = File::create(&results_path).unwrap();
        writeln!(f, r#"{{"issue":"2024001","open_code":"1 2 3 4 5"}}"#).unwrap();

        let db = Database::open_in_memory().unwrap();
        let store = db.predictions("p5");
        assert_eq!(store.import_predictions(&preds_path).unwrap(), 3);
        assert_eq!(store.import_results(&results_path).unwrap(), 1);
        assert_eq!(store.draw_count().unwrap(), 1);

        let stats = store.playtype_stats().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].issues, 2);
        assert_eq!(stats[0].rows, 3);
        assert_eq!(stats[0].max_experts, 2);
        assert_eq!(stats[0].latest_issue.as_deref(), Some("2024002"));
    }

    #[test]
    fn test_jsonl_import_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"issue\":\"1\"}\n").unwrap();
        let db = Database::open_in_memory().unwrap();
        let err = db.predictions("p5").import_predictions(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("bad.jsonl:1"));
    }
}
