//! HitMatrix Library
//!
//! Rank-based hit/miss backtesting of expert digit predictions.
//!
//! - [`engine`]: ranking, evaluation, windowed backtest runs (no I/O)
//! - [`store`]: SQLite prediction/result store and task queue
//! - [`tasks`]: strategy generation, execution and re-analysis loop
//! - [`config`]: lottery profiles and promotion thresholds

pub mod config;
pub mod engine;
pub mod store;
pub mod tasks;
