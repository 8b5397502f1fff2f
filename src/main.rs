//! HitMatrix CLI
//!
//! One binary, parameterised by lottery and play-type.
//!
//! Usage:
//!   hitmatrix --lottery p5 init
//!   hitmatrix --lottery p5 import --predictions preds.jsonl --results draws.jsonl
//!   hitmatrix --lottery p5 run --playtype gewei_sha1 --ranks 1 --lookback-n 30
//!   hitmatrix --lottery p5 generate && hitmatrix --lottery p5 execute
//!   hitmatrix --lottery p5 reanalyze --issues 2024101,2024102 --position 4 [--force]
//!
//! Exit codes: 0 success, 2 configuration error, 3 runtime or data-integrity error.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use hitmatrix::config::{HitMatrixConfig, LotteryProfile};
use hitmatrix::engine::{
    summarize, BacktestRequest, BacktestRunner, IssueSelection, StrategyConfig, StrategyRecord,
};
use hitmatrix::store::Database;
use hitmatrix::tasks::{
    reanalyze_best, GenerationReport, ReanalysisScope, TaskExecutor, TaskGenerator,
};
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hitmatrix")]
#[command(about = "Rank-based hit/miss backtesting of expert digit predictions")]
struct Cli {
    /// TOML config (defaults to HITMATRIX_CONFIG_PATH or built-in profiles)
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the config)
    #[arg(long, env = "HITMATRIX_DB")]
    db: Option<String>,

    /// Lottery profile code
    #[arg(long, env = "HITMATRIX_LOTTERY", default_value = "p5")]
    lottery: String,

    /// Log level for hitmatrix targets when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database schema
    Init {
        /// Also write the effective config to this path
        #[arg(long)]
        write_config: Option<PathBuf>,
    },

    /// Load JSON-lines predictions and/or draw results
    Import {
        #[arg(long)]
        predictions: Option<PathBuf>,
        #[arg(long)]
        results: Option<PathBuf>,
    },

    /// Per-play-type coverage and queue status
    Inspect,

    /// Backtest one strategy and print a JSON summary
    Run {
        #[arg(long)]
        playtype: String,

        /// Active ranks, comma separated (1-based)
        #[arg(long, value_delimiter = ',', required = true, allow_negative_numbers = true)]
        ranks: Vec<i64>,

        /// "All", one issue, or a comma-separated list
        #[arg(long, default_value = "All")]
        issues: IssueSelection,

        #[arg(long)]
        lookback_n: Option<usize>,

        #[arg(long, default_value = "0")]
        offset: usize,

        /// Override the play-type's eliminate/pick semantics
        #[arg(long)]
        hit_semantics: Option<String>,

        #[arg(long)]
        skip_if_few: bool,

        #[arg(long)]
        min_experts: Option<usize>,

        /// none | push_next
        #[arg(long, default_value = "none")]
        tie_break: String,

        #[arg(long)]
        reverse_on_tie: bool,

        #[arg(long, default_value = "rank")]
        mode: String,

        /// Include per-issue verdicts in the output
        #[arg(long)]
        verdicts: bool,
    },

    /// Queue base and expansion tasks
    Generate {
        /// Limit to one play-type (default: every play-type of the lottery)
        #[arg(long)]
        playtype: Option<String>,
    },

    /// Backtest pending tasks and promote the strong ones
    Execute {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Re-run promoted strategies over a chosen issue set
    Reanalyze {
        #[arg(long, default_value = "All")]
        issues: IssueSelection,

        #[arg(long)]
        position: Option<usize>,

        /// Re-run strategies that were already reviewed
        #[arg(long)]
        force: bool,
    },
}

// =============================================================================
// EXIT HANDLING
// =============================================================================

enum CliError {
    Config(anyhow::Error),
    Runtime(anyhow::Error),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Runtime(_) => 3,
        }
    }
}

fn config_err<E: Into<anyhow::Error>>(e: E) -> CliError {
    CliError::Config(e.into())
}

fn runtime_err<E: Into<anyhow::Error>>(e: E) -> CliError {
    CliError::Runtime(e.into())
}

type CliResult<T> = std::result::Result<T, CliError>;

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("hitmatrix={}", level))),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    if let Err(e) = run_cli(cli) {
        let code = e.exit_code();
        match e {
            CliError::Config(err) => error!("configuration error: {:#}", err),
            CliError::Runtime(err) => error!("{:#}", err),
        }
        std::process::exit(code);
    }
}

fn run_cli(cli: Cli) -> CliResult<()> {
    let mut config = match &cli.config {
        Some(path) => HitMatrixConfig::load(path),
        None => HitMatrixConfig::from_env(),
    }
    .map_err(config_err)?;
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    let profile = config.lottery(&cli.lottery).map_err(config_err)?.clone();

    let db = Database::open(&config.db_path).map_err(runtime_err)?;

    match cli.command {
        Commands::Init { write_config } => {
            if let Some(path) = write_config {
                config
                    .save(&path)
                    .with_context(|| format!("Failed to write {}", path.display()))
                    .map_err(runtime_err)?;
            }
            info!(db = %config.db_path, lottery = %profile.code, "database initialised");
            print_json(&json!({ "db_path": config.db_path, "lottery": profile.code }))
        }
        Commands::Import { predictions, results } => import(&db, &profile, predictions, results),
        Commands::Inspect => inspect(&db, &profile),
        Commands::Run {
            playtype,
            ranks,
            issues,
            lookback_n,
            offset,
            hit_semantics,
            skip_if_few,
            min_experts,
            tie_break,
            reverse_on_tie,
            mode,
            verdicts,
        } => {
            let spec = profile.playtype(&playtype).map_err(config_err)?;
            let record = StrategyRecord {
                position: spec.position as i64,
                active_ranks: ranks,
                mode,
                hit_semantics: hit_semantics.unwrap_or_else(|| spec.hit_semantics.as_str().to_string()),
                skip_if_few,
                min_experts: min_experts.unwrap_or(config.min_experts),
                tie_break_mode: tie_break,
                reverse_on_tie,
            };
            let strategy = StrategyConfig::try_from(record).map_err(config_err)?;
            let request = BacktestRequest {
                selection: issues,
                play_type: spec.code.clone(),
                strategy,
                lookback_n,
                lookback_offset: offset,
            };
            run_single(&db, &profile, &request, verdicts)
        }
        Commands::Generate { playtype } => {
            let generator = TaskGenerator::new(&profile, config.min_experts);
            let predictions = db.predictions(&profile.code);
            let tasks = db.tasks(&profile.code);

            let specs = match &playtype {
                Some(code) => vec![profile.playtype(code).map_err(config_err)?.clone()],
                None => profile.playtypes.clone(),
            };
            let mut total = GenerationReport::default();
            for spec in &specs {
                let report = generator
                    .generate(&predictions, &tasks, spec)
                    .map_err(runtime_err)?;
                total.base_inserted += report.base_inserted;
                total.expansion_inserted += report.expansion_inserted;
            }
            if total.converged() {
                info!(lottery = %profile.code, "no new tasks; search has converged");
            }
            print_json(&json!({
                "lottery": profile.code,
                "base_inserted": total.base_inserted,
                "expansion_inserted": total.expansion_inserted,
                "converged": total.converged(),
            }))
        }
        Commands::Execute { limit } => {
            let predictions = db.predictions(&profile.code);
            let tasks = db.tasks(&profile.code);
            let report = TaskExecutor::new(&predictions, &tasks, &profile, config.thresholds.clone())
                .with_worker_threads(config.worker_threads)
                .execute_pending(limit)
                .map_err(runtime_err)?;
            print_json(&report)?;
            match report.integrity_error {
                Some(msg) => Err(runtime_err(anyhow!(msg))),
                None => Ok(()),
            }
        }
        Commands::Reanalyze { issues, position, force } => {
            let predictions = db.predictions(&profile.code);
            let tasks = db.tasks(&profile.code);
            let scope = ReanalysisScope::new(issues).at_position(position).forced(force);
            let report = reanalyze_best(&predictions, &tasks, &profile, &config.thresholds, &scope)
                .map_err(runtime_err)?;
            print_json(&report)
        }
    }
}

fn import(
    db: &Database,
    profile: &LotteryProfile,
    predictions: Option<PathBuf>,
    results: Option<PathBuf>,
) -> CliResult<()> {
    if predictions.is_none() && results.is_none() {
        return Err(config_err(anyhow!("import needs --predictions and/or --results")));
    }
    let store = db.predictions(&profile.code);
    let mut imported_predictions = 0;
    let mut imported_results = 0;
    if let Some(path) = predictions {
        imported_predictions = store.import_predictions(&path).map_err(runtime_err)?;
    }
    if let Some(path) = results {
        imported_results = store.import_results(&path).map_err(runtime_err)?;
    }
    print_json(&json!({
        "lottery": profile.code,
        "predictions": imported_predictions,
        "results": imported_results,
    }))
}

fn inspect(db: &Database, profile: &LotteryProfile) -> CliResult<()> {
    let predictions = db.predictions(&profile.code);
    let tasks = db.tasks(&profile.code);
    let stats = predictions.playtype_stats().map_err(runtime_err)?;
    let draws = predictions.draw_count().map_err(runtime_err)?;
    let (pending, done) = tasks.status_counts().map_err(runtime_err)?;
    let best = tasks.best_tasks(None).map_err(runtime_err)?.len();

    print_json(&json!({
        "lottery": profile.code,
        "draw_results": draws,
        "playtypes": stats,
        "tasks": { "pending": pending, "done": done, "best": best },
    }))
}

fn run_single(
    db: &Database,
    profile: &LotteryProfile,
    request: &BacktestRequest,
    with_verdicts: bool,
) -> CliResult<()> {
    let source = db.predictions(&profile.code);
    let runner = BacktestRunner::new(&source, profile.digit_domain);
    let (result, verdicts) = runner.run_detailed(request).map_err(runtime_err)?;
    let summary = summarize(&result);
    let fingerprint = result.fingerprint();
    info!(fingerprint = %fingerprint, hit_rate = summary.hit_rate, "run finished");

    let mut out = json!({
        "lottery": profile.code,
        "playtype": request.play_type,
        "strategy": request.strategy,
        "result": result,
        "summary": summary,
        "fingerprint": fingerprint,
    });
    if with_verdicts {
        out["verdicts"] = json!(verdicts);
    }
    print_json(&out)
}

fn print_json<T: serde::Serialize>(value: &T) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(runtime_err)?;
    println!("{}", text);
    Ok(())
}
