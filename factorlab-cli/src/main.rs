//! FactorLab CLI — optimize, poll, status, rank, backtest and advance commands.
//!
//! Commands:
//! - `optimize` — run the walk-forward supervisor until accepted, failed or Ctrl-C
//! - `poll` — print report records newer than the persisted cursor
//! - `status` — lease holder, liveness and the latest report
//! - `rank` — composite ranking for one date
//! - `backtest` — simulate a parameter set over a date range
//! - `advance` — move the paper portfolio forward one period

mod logging;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

use factorlab_core::data::{CsvStore, DataAccess, InMemoryStore, RetryingAccess};
use factorlab_core::domain::{DateRange, ParameterSet, TradeAction, TradeRecord};
use factorlab_core::scoring::ExclusionReason;
use factorlab_core::simulator::{PricePanel, Simulator};
use factorlab_runner::lease::LeaseFile;
use factorlab_runner::{
    read_params, EngineConfig, Evaluator, PerformanceMetrics, PortfolioTracker, ReportCursor,
    ReportLog, Supervisor, SupervisorOutcome, TradeLog,
};

#[derive(Parser)]
#[command(
    name = "factorlab",
    about = "FactorLab CLI — factor-ranking strategy optimization and paper trading"
)]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the walk-forward optimizer under the singleton supervisor.
    Optimize {
        /// Path to the engine TOML config.
        #[arg(long)]
        config: PathBuf,
    },
    /// Print reports newer than the last poll and advance the cursor.
    Poll {
        #[arg(long)]
        config: PathBuf,
    },
    /// Show lease liveness and the most recent report.
    Status {
        #[arg(long)]
        config: PathBuf,
    },
    /// Print the ranked list for a date.
    Rank {
        #[arg(long)]
        config: PathBuf,

        /// Scoring date (YYYY-MM-DD).
        #[arg(long)]
        date: NaiveDate,

        /// Parameter file. Defaults to the accepted parameters in the state dir.
        #[arg(long)]
        params: Option<PathBuf>,
    },
    /// Simulate a parameter set over a date range and log its trades.
    Backtest {
        #[arg(long)]
        config: PathBuf,

        #[arg(long)]
        params: Option<PathBuf>,

        /// First trading day (YYYY-MM-DD).
        #[arg(long)]
        start: NaiveDate,

        /// Last trading day (YYYY-MM-DD).
        #[arg(long)]
        end: NaiveDate,
    },
    /// Advance the paper portfolio to a date.
    Advance {
        #[arg(long)]
        config: PathBuf,

        #[arg(long)]
        date: NaiveDate,

        #[arg(long)]
        params: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    match cli.command {
        Commands::Optimize { config } => run_optimize(&config),
        Commands::Poll { config } => run_poll(&config),
        Commands::Status { config } => run_status(&config),
        Commands::Rank {
            config,
            date,
            params,
        } => run_rank(&config, date, params.as_deref()),
        Commands::Backtest {
            config,
            params,
            start,
            end,
        } => run_backtest(&config, params.as_deref(), start, end),
        Commands::Advance {
            config,
            date,
            params,
        } => run_advance(&config, date, params.as_deref()),
    }
}

// ─── Shared setup ───────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<EngineConfig> {
    EngineConfig::load(path).with_context(|| format!("loading config {}", path.display()))
}

fn open_data(config: &EngineConfig) -> Result<RetryingAccess<InMemoryStore>> {
    let store = CsvStore::load(&config.data.dir)
        .with_context(|| format!("loading market data from {}", config.data.dir.display()))?;
    Ok(RetryingAccess::new(store, config.data.retry.clone()))
}

fn load_params(config: &EngineConfig, explicit: Option<&Path>) -> Result<ParameterSet> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.accepted_params_path());
    read_params(&path).with_context(|| {
        format!(
            "reading parameters from {} (run `factorlab optimize` or pass --params)",
            path.display()
        )
    })
}

/// Flag set by Ctrl-C. The watcher thread lives for the rest of the process.
fn cancel_on_ctrl_c() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    let watcher = Arc::clone(&flag);
    thread::Builder::new()
        .name("factorlab-signal".into())
        .spawn(move || {
            if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                warn!("Ctrl-C received; stopping after the current window");
                watcher.store(true, Ordering::Relaxed);
            }
        })
        .context("spawning signal watcher")?;
    Ok(flag)
}

// ─── Commands ───────────────────────────────────────────────────────

fn run_optimize(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let data = open_data(&config)?;
    let cancel = cancel_on_ctrl_c()?;
    info!(
        data = data.name(),
        instruments = data.instruments().len(),
        state_dir = %config.supervisor.state_dir.display(),
        "starting optimizer"
    );

    let outcome = Supervisor::new(&config, &data)
        .run(Some(&cancel))
        .context("supervisor failed")?;

    match outcome {
        SupervisorOutcome::Accepted { params, verdict } => {
            println!("Accepted parameters {}", params.fingerprint().short());
            print_params(&params);
            println!(
                "Holdout return {:.2}% vs walk-forward {:.2}% (gap {:.2}pp)",
                verdict.metrics.total_return * 100.0,
                verdict.mean_wfo_return * 100.0,
                verdict.overfit_gap * 100.0
            );
            println!("Written to {}", config.accepted_params_path().display());
            Ok(())
        }
        SupervisorOutcome::Cancelled => {
            println!("Cancelled.");
            Ok(())
        }
        SupervisorOutcome::Failed { kind, reason } => bail!("optimization failed ({kind}): {reason}"),
    }
}

fn run_poll(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let log = ReportLog::open(config.report_path()).context("opening report log")?;
    let cursor = ReportCursor::new(config.cursor_path());
    for report in cursor.poll(&log).context("polling reports")? {
        println!("{}", serde_json::to_string(&report)?);
    }
    Ok(())
}

fn run_status(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let lease = LeaseFile::new(config.lease_path())
        .read()
        .context("reading lease")?;
    match lease {
        Some(record) => {
            let state = if record.is_stale(Utc::now()) {
                "stale"
            } else {
                "live"
            };
            println!(
                "Lease:      {} ({state}, renewed {}, ttl {}s)",
                record.holder, record.renewed_at, record.ttl_secs
            );
        }
        None => println!("Lease:      none"),
    }

    let log = ReportLog::open(config.report_path()).context("opening report log")?;
    match log.read_all()?.last() {
        Some(last) => {
            println!(
                "Last report: #{} {:?} pass {} at {}",
                last.iteration_id, last.kind, last.pass, last.timestamp
            );
            println!("             accepted={} reason={}", last.accepted, last.reason);
        }
        None => println!("Last report: none"),
    }

    let accepted = config.accepted_params_path();
    if accepted.exists() {
        let params = read_params(&accepted)?;
        println!("Accepted:   {}", params.fingerprint().short());
    }
    Ok(())
}

fn run_rank(config_path: &Path, date: NaiveDate, params: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let params = load_params(&config, params)?;
    let data = open_data(&config)?;
    let universe = config.resolve_universe(&data);
    let ranking = config
        .scoring_engine()
        .score(&data, date, &universe, &params)
        .with_context(|| format!("scoring {date}"))?;

    println!("Ranking for {date} ({} scored, {} excluded)", ranking.scores.len(), ranking.exclusions.len());
    println!("{:>4}  {:<12} {:>9}", "Rank", "Instrument", "Composite");
    println!("{}", "-".repeat(28));
    for (i, score) in ranking.scores.iter().enumerate() {
        let marker = if i < params.position_count { "*" } else { " " };
        println!("{:>4}{marker} {:<12} {:>9.4}", i + 1, score.instrument, score.composite);
    }
    for exclusion in &ranking.exclusions {
        let why = match &exclusion.reason {
            ExclusionReason::Filtered { rule } => format!("filtered: {rule}"),
            ExclusionReason::MissingFactor { factor, detail } => format!("missing {factor}: {detail}"),
        };
        println!("  excluded {:<12} {why}", exclusion.instrument);
    }
    Ok(())
}

fn run_backtest(
    config_path: &Path,
    params: Option<&Path>,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<()> {
    if start > end {
        bail!("--start {start} is after --end {end}");
    }
    let config = load_config(config_path)?;
    let params = load_params(&config, params)?;
    let data = open_data(&config)?;
    let range = DateRange::new(start, end);
    let evaluator = Evaluator::new(
        &data,
        config.scoring_engine(),
        config.resolve_universe(&data),
        config.simulation.clone(),
        config.strategy.initial_capital,
        range,
    )?;
    let result = evaluator.simulate(&params, range)?;
    let metrics = PerformanceMetrics::from_result(&result);

    let run = format!("backtest-{}-{start}-{end}", params.fingerprint().short());
    let log = TradeLog::new(config.trade_log_path(), run.clone());
    let written = log
        .append(&result.trades)
        .with_context(|| format!("writing {}", log.path().display()))?;

    println!();
    println!("=== Backtest Result ===");
    println!("Params:         {}", params.fingerprint().short());
    println!("Period:         {start} to {end}");
    println!("Days:           {}", result.trajectory.len());
    println!("Trades:         {}", metrics.trade_count);
    println!();
    print_metrics(&metrics);
    println!("Final Value:    {:.2}", result.final_value());
    println!("{written} trades logged under run '{run}'");
    Ok(())
}

fn run_advance(config_path: &Path, date: NaiveDate, params: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let params = load_params(&config, params)?;
    let data = open_data(&config)?;
    let universe = config.resolve_universe(&data);

    let ranking = config
        .scoring_engine()
        .score(&data, date, &universe, &params)
        .with_context(|| format!("scoring {date}"))?;
    let panel = PricePanel::load(&data, &universe, DateRange::new(date, date))?;
    let Some(prices) = panel.prices_on(date) else {
        bail!("no prices on {date}; not a trading day?");
    };

    let simulator = Simulator::new(params, config.simulation.clone())?;
    let mut tracker = PortfolioTracker::open(
        config.tracker_path(),
        simulator,
        TradeLog::new(config.trade_log_path(), "live"),
        config.strategy.initial_capital,
    )?;
    let advance = tracker
        .advance(date, &ranking, prices)
        .with_context(|| format!("advancing portfolio to {date}"))?;

    if advance.replayed {
        println!("{date} already advanced with this ranking; showing stored result.");
    }
    for trade in &advance.trades {
        print_trade(trade);
    }
    let state = &advance.state;
    println!(
        "Portfolio {}: cash {:.2}, {} positions, peak {:.2}",
        date,
        state.cash,
        state.positions.len(),
        state.peak_value
    );
    if let Some(mark) = tracker.last_mark() {
        println!("Value:     {:.2}", mark.value);
    }
    for order in tracker.pending_actions() {
        println!(
            "Next:      {} {} ({})",
            action_label(order.action),
            order.instrument,
            order.reason
        );
    }
    Ok(())
}

// ─── Output helpers ─────────────────────────────────────────────────

fn print_params(params: &ParameterSet) {
    for (factor, weight) in &params.factor_weights {
        println!("  {factor:<16} {weight:.4}");
    }
    println!("  positions        {}", params.position_count);
    println!("  stop_loss        {:.2}%", params.stop_loss_pct * 100.0);
    println!("  drawdown_control {:.2}%", params.drawdown_control_pct * 100.0);
}

fn print_metrics(metrics: &PerformanceMetrics) {
    println!("--- Performance ---");
    println!("Total Return:   {:.2}%", metrics.total_return * 100.0);
    println!("CAGR:           {:.2}%", metrics.cagr * 100.0);
    println!("Sharpe:         {:.3}", metrics.sharpe);
    println!("Max Drawdown:   {:.2}%", metrics.max_drawdown * 100.0);
    println!("Win Rate:       {:.1}%", metrics.win_rate * 100.0);
}

fn print_trade(trade: &TradeRecord) {
    println!(
        "{} {:<5} {:<12} {:>12.2} @ {:>10.4} ({})",
        trade.date,
        action_label(trade.action),
        trade.instrument,
        trade.shares,
        trade.price,
        trade.reason
    );
}

fn action_label(action: TradeAction) -> &'static str {
    match action {
        TradeAction::Enter => "ENTER",
        TradeAction::Add => "ADD",
        TradeAction::Exit => "EXIT",
    }
}
