//! CLI command definitions for docpool.
//!
//! The `run` command pushes a synthetic, CPU-bound workload through a
//! [`WorkerPool`] so the scheduler can be exercised without any real
//! document-processing backend. Every Nth task can be made to fail or crash
//! its worker.

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::metrics::{export_metrics, init_metrics};
use crate::scheduler::{
    PoolStats, Priority, SubmitOptions, TaskContext, TaskExecutor, WorkerPool, WorkerPoolConfig,
};

/// Default number of synthetic tasks submitted by `run`.
const DEFAULT_TASKS: usize = 32;

/// Default hashing rounds per checksum task.
const DEFAULT_ROUNDS: u64 = 2_000_000;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Bounded parallel worker pool for document-processing tasks.
#[derive(Parser)]
#[command(name = "docpool")]
#[command(about = "Run document-processing tasks on a bounded pool of worker threads")]
#[command(version)]
#[command(
    long_about = "docpool schedules document-processing tasks onto a bounded pool of worker threads.\n\nThe run command drives a synthetic workload through the pool and reports how every task ended.\n\nExample usage:\n  docpool run --tasks 64 --max-workers 4 --high-every 8 --crash-every 20"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Drive a synthetic workload through the pool.
    Run(RunArgs),

    /// Print the effective pool configuration as YAML.
    Config(ConfigArgs),
}

/// Arguments for `docpool run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Number of tasks to submit.
    #[arg(short = 'n', long, default_value_t = DEFAULT_TASKS)]
    pub tasks: usize,

    /// Maximum number of concurrent workers (overrides the config file).
    #[arg(short = 'w', long)]
    pub max_workers: Option<usize>,

    /// Submit every Nth task with high priority (0 disables).
    #[arg(long, default_value_t = 0)]
    pub high_every: usize,

    /// Make every Nth task crash its worker (0 disables).
    #[arg(long, default_value_t = 0)]
    pub crash_every: usize,

    /// Make every Nth task fail with an error (0 disables).
    #[arg(long, default_value_t = 0)]
    pub fail_every: usize,

    /// Hashing rounds per checksum task.
    #[arg(long, default_value_t = DEFAULT_ROUNDS)]
    pub rounds: u64,

    /// Path to a YAML pool configuration.
    #[arg(short = 'c', long, env = "DOCPOOL_CONFIG")]
    pub config: Option<String>,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,

    /// Output the run summary as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `docpool config`.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Path to a YAML pool configuration.
    #[arg(short = 'c', long, env = "DOCPOOL_CONFIG")]
    pub config: Option<String>,

    /// Maximum number of concurrent workers (overrides the config file).
    #[arg(short = 'w', long)]
    pub max_workers: Option<usize>,
}

/// Summary printed at the end of `docpool run`.
#[derive(Debug, Serialize)]
struct RunSummary {
    tasks: usize,
    max_workers: usize,
    elapsed_ms: u64,
    outcomes: BTreeMap<String, usize>,
    stats: PoolStats,
}

/// CPU-bound stand-in for real document processing.
///
/// - `checksum` hashes `rounds` times, reporting progress and honouring cancellation
/// - `fail` returns an error
/// - `crash` panics, taking the worker down
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticExecutor;

impl TaskExecutor for SyntheticExecutor {
    fn execute(
        &self,
        ctx: &TaskContext,
        kind: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let seed = payload["seed"].as_u64().unwrap_or_default();

        match kind {
            "checksum" => {
                let rounds = payload["rounds"].as_u64().unwrap_or(DEFAULT_ROUNDS);
                let step = (rounds / 10).max(1);
                let mut hash = FNV_OFFSET ^ seed;

                for round in 0..rounds {
                    if round % step == 0 {
                        if ctx.is_cancelled() {
                            bail!("checksum of document {seed} aborted at round {round}");
                        }
                        ctx.report_progress(percent_done(round, rounds));
                    }
                    hash = (hash ^ round).wrapping_mul(FNV_PRIME);
                }
                ctx.report_progress(100);

                Ok(serde_json::json!({
                    "seed": seed,
                    "checksum": format!("{hash:016x}"),
                }))
            }
            "fail" => bail!("document {seed} is corrupt"),
            "crash" => panic!("renderer aborted on document {seed}"),
            other => bail!("unsupported task kind '{other}'"),
        }
    }
}

/// Percentage of `rounds` completed after `round`. Computed in u128 so large
/// round counts cannot overflow.
fn percent_done(round: u64, rounds: u64) -> u8 {
    if rounds == 0 {
        return 100;
    }
    let percent = u128::from(round) * 100 / u128::from(rounds);
    u8::try_from(percent.min(100)).unwrap_or(100)
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse CLI arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = parse_cli();
    run_with_cli(cli).await
}

/// Run the command selected by already-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => {
            run_run_command(args).await?;
        }
        Commands::Config(args) => {
            run_config_command(args)?;
        }
    }
    Ok(())
}

fn load_config(path: Option<&str>, max_workers: Option<usize>) -> anyhow::Result<WorkerPoolConfig> {
    let mut config = match path {
        Some(path) => WorkerPoolConfig::from_file(path)
            .with_context(|| format!("Failed to load pool config from {path}"))?,
        None => WorkerPoolConfig::default(),
    };

    if let Some(max_workers) = max_workers {
        config.max_workers = max_workers;
    }
    config.validate()?;
    Ok(config)
}

fn is_every(n: usize, index: usize) -> bool {
    n > 0 && (index + 1) % n == 0
}

fn synthetic_kind(index: usize, args: &RunArgs) -> &'static str {
    if is_every(args.crash_every, index) {
        "crash"
    } else if is_every(args.fail_every, index) {
        "fail"
    } else {
        "checksum"
    }
}

async fn run_run_command(args: RunArgs) -> anyhow::Result<()> {
    if args.metrics {
        init_metrics().context("Failed to initialize metrics")?;
    }

    let config = load_config(args.config.as_deref(), args.max_workers)?;
    let max_workers = config.max_workers;
    info!(
        tasks = args.tasks,
        max_workers = max_workers,
        "Starting synthetic workload"
    );

    let pool = WorkerPool::start(config, SyntheticExecutor)?;
    let started = Instant::now();

    let handles: Vec<_> = (0..args.tasks)
        .map(|index| {
            let priority = if is_every(args.high_every, index) {
                Priority::High
            } else {
                Priority::Normal
            };
            pool.submit(
                synthetic_kind(index, &args),
                serde_json::json!({ "seed": index, "rounds": args.rounds }),
                SubmitOptions::new().with_priority(priority),
            )
        })
        .collect();

    let results = futures::future::join_all(handles).await;
    let elapsed = started.elapsed();

    let mut outcomes = BTreeMap::new();
    for result in &results {
        let label = match result {
            Ok(_) => "completed",
            Err(e) => e.outcome_label(),
        };
        *outcomes.entry(label.to_string()).or_insert(0) += 1;
    }

    let stats = pool.stats().await?;
    pool.shutdown().await?;

    let summary = RunSummary {
        tasks: args.tasks,
        max_workers,
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        outcomes,
        stats,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if args.metrics {
        print!("{}", export_metrics());
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Ran {} tasks on up to {} workers in {} ms",
        summary.tasks, summary.max_workers, summary.elapsed_ms
    );
    for (outcome, count) in &summary.outcomes {
        println!("  {outcome:<10} {count}");
    }
    println!(
        "  worker replacements: {}, average run time: {:?}, success rate: {:.1}%",
        summary.stats.worker_replacements,
        summary.stats.average_run_time,
        summary.stats.success_rate()
    );
}

fn run_config_command(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref(), args.max_workers)?;
    print!("{}", config.to_yaml()?);
    Ok(())
}
