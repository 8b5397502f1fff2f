//! Pending task execution and promotion.

use crate::config::{LotteryProfile, PromotionThresholds};
use crate::engine::{
    summarize, BacktestError, BacktestRequest, BacktestRunner, DrawResultSource, PredictionSource,
};
use crate::store::{TaskRow, TaskStore};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    pub executed: usize,
    pub promoted: usize,
    /// Tasks left pending because their backtest failed.
    pub failed: usize,
    /// First data-integrity failure, if any.
    pub integrity_error: Option<String>,
}

pub struct TaskExecutor<'a, S> {
    source: &'a S,
    store: &'a TaskStore,
    profile: &'a LotteryProfile,
    thresholds: PromotionThresholds,
    worker_threads: usize,
}

impl<'a, S> TaskExecutor<'a, S>
where
    S: PredictionSource + DrawResultSource + Sync,
{
    pub fn new(
        source: &'a S,
        store: &'a TaskStore,
        profile: &'a LotteryProfile,
        thresholds: PromotionThresholds,
    ) -> Self {
        Self {
            source,
            store,
            profile,
            thresholds,
            worker_threads: 0,
        }
    }

    /// Size of the dedicated rayon pool; 0 uses the global pool.
    pub fn with_worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n;
        self
    }

    /// Backtest up to `limit` pending tasks in parallel, then persist results
    /// in queue order.
    pub fn execute_pending(&self, limit: Option<usize>) -> Result<ExecutionReport> {
        let pending = self.store.pending_tasks(limit)?;
        if pending.is_empty() {
            info!(lottery = %self.profile.code, "no pending tasks");
            return Ok(ExecutionReport::default());
        }

        let runner = BacktestRunner::new(self.source, self.profile.digit_domain);
        let requests = self.settled_requests(&runner, &pending)?;

        let results = if self.worker_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.worker_threads)
                .build()?;
            pool.install(|| runner.run_many(&requests))
        } else {
            runner.run_many(&requests)
        };

        let mut report = ExecutionReport::default();
        for (task, outcome) in pending.iter().zip(results) {
            match outcome {
                Ok(result) => {
                    let summary = summarize(&result);
                    self.store.complete_task(task.id, &result, &summary)?;
                    self.store.insert_best_rank(task, &result, &summary)?;
                    report.executed += 1;

                    if summary.hit_rate >= self.thresholds.promote_hit_rate
                        && self.store.promote(task, summary.hit_rate)?
                    {
                        report.promoted += 1;
                        debug!(task = task.id, hit_rate = summary.hit_rate, "task promoted");
                    }
                }
                Err(e) => {
                    warn!(task = task.id, playtype = %task.playtype, "backtest failed: {}", e);
                    if e.is_data_integrity() && report.integrity_error.is_none() {
                        report.integrity_error = Some(e.to_string());
                    }
                    if let BacktestError::Source(inner) = e {
                        return Err(inner.context(format!("task {} failed", task.id)));
                    }
                    report.failed += 1;
                }
            }
        }

        info!(
            lottery = %self.profile.code,
            executed = report.executed,
            promoted = report.promoted,
            failed = report.failed,
            "task execution finished"
        );
        Ok(report)
    }

    /// Task windows end at the newest issue with a draw at the task's
    /// position; issues still awaiting their draw are skipped.
    fn settled_requests(
        &self,
        runner: &BacktestRunner<'_, S>,
        pending: &[TaskRow],
    ) -> Result<Vec<BacktestRequest>> {
        let mut tails: BTreeMap<(String, usize), usize> = BTreeMap::new();
        let mut requests = Vec::with_capacity(pending.len());
        for task in pending {
            let mut request = task.to_request();
            let key = (task.playtype.clone(), request.strategy.position());
            let tail = match tails.get(&key) {
                Some(tail) => *tail,
                None => {
                    let tail = runner
                        .undrawn_tail(&request)
                        .with_context(|| format!("task {}: locating newest drawn issue", task.id))?;
                    if tail > 0 {
                        debug!(playtype = %task.playtype, position = key.1, undrawn = tail, "skipping undrawn issues");
                    }
                    tails.insert(key, tail);
                    tail
                }
            };
            request.lookback_offset += tail;
            requests.push(request);
        }
        Ok(requests)
    }
}
