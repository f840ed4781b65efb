//! Stratexec CLI — backtest and single-exec commands.
//!
//! Commands:
//! - `backtest` — replay a built-in strategy over synthetic or JSON bars and
//!   write the visualization bundle
//! - `exec` — run one ExecRequest JSON file and print the ExecResponse JSON
//! - `strategies` — list built-in strategy names
//!
//! Logging goes to stderr and is filtered with `RUST_LOG` (default `info`).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use stratexec_core::domain::Bar;
use stratexec_core::exec::ExecRequest;
use stratexec_core::{EngineConfig, ExecService};
use stratexec_runner::strategies::BUILTIN_NAMES;
use stratexec_runner::{builtin, export, run_backtest, save_artifacts, synthetic_bars, BacktestConfig, BacktestResult};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "stratexec", about = "Stateless strategy execution engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a built-in strategy bar by bar.
    Backtest {
        /// Backtest TOML config. Flags below override its values.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Built-in strategy name.
        #[arg(long)]
        strategy: Option<String>,

        #[arg(long)]
        symbol: Option<String>,

        /// Bar timeframe, e.g. 15m, 1h, 1d.
        #[arg(long)]
        timeframe: Option<String>,

        /// Number of synthetic bars.
        #[arg(long)]
        bars: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// Explicit market type (CRYPTO, A_STOCK, US_STOCK, HK_STOCK).
        #[arg(long)]
        market_type: Option<String>,

        /// Strategy parameter as key=value. Repeatable.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// JSON array of bars to replay instead of synthetic data.
        #[arg(long)]
        bars_json: Option<PathBuf>,

        /// Directory for the visualization bundle.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Run one exec request against a built-in strategy.
    Exec {
        /// ExecRequest JSON file.
        #[arg(long)]
        request: PathBuf,

        #[arg(long, default_value = "ma_cross")]
        strategy: String,

        /// Engine TOML config.
        #[arg(long)]
        engine_config: Option<PathBuf>,
    },
    /// List built-in strategies.
    Strategies,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Backtest {
            config,
            strategy,
            symbol,
            timeframe,
            bars,
            seed,
            market_type,
            params,
            bars_json,
            output_dir,
        } => {
            let mut cfg = match config {
                Some(path) => BacktestConfig::from_file(&path)?,
                None => BacktestConfig::default(),
            };
            if let Some(s) = strategy {
                cfg.strategy = s;
            }
            if let Some(s) = symbol {
                cfg.symbol = s;
            }
            if let Some(tf) = timeframe {
                cfg.timeframe = tf;
            }
            if let Some(n) = bars {
                cfg.bars = n;
            }
            if let Some(s) = seed {
                cfg.seed = s;
            }
            if market_type.is_some() {
                cfg.market_type = market_type;
            }
            cfg.params.extend(params);
            cfg.validate()?;
            run_backtest_cmd(&cfg, bars_json.as_deref(), &output_dir)
        }
        Commands::Exec { request, strategy, engine_config } => run_exec_cmd(&request, &strategy, engine_config.as_deref()),
        Commands::Strategies => {
            for name in BUILTIN_NAMES {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn lookup_strategy(name: &str) -> Result<stratexec_core::StrategyModule> {
    match builtin(name) {
        Some(module) => Ok(module),
        None => bail!("unknown strategy '{name}'. Valid: {}", BUILTIN_NAMES.join(", ")),
    }
}

fn load_bars(path: &Path) -> Result<Vec<Bar>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let bars: Vec<Bar> =
        serde_json::from_str(&content).with_context(|| format!("failed to parse bars from {}", path.display()))?;
    if let Some(i) = bars.iter().position(|b| !b.is_sane()) {
        bail!("bar {i} in {} is not a valid OHLC bar", path.display());
    }
    Ok(bars)
}

fn run_backtest_cmd(cfg: &BacktestConfig, bars_json: Option<&Path>, output_dir: &Path) -> Result<()> {
    let module = lookup_strategy(&cfg.strategy)?;
    let bars = match bars_json {
        Some(path) => load_bars(path)?,
        None => synthetic_bars(cfg)?,
    };
    let result = run_backtest(module, cfg, bars)?;
    print_summary(&result);
    let run_dir = save_artifacts(&result, output_dir)?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn run_exec_cmd(request_path: &Path, strategy: &str, engine_config: Option<&Path>) -> Result<()> {
    let content = std::fs::read_to_string(request_path)
        .with_context(|| format!("failed to read {}", request_path.display()))?;
    let mut request: ExecRequest = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse ExecRequest from {}", request_path.display()))?;
    let engine = match engine_config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    let mut service = ExecService::new(engine);
    service.register_strategy(lookup_strategy(strategy)?)?;
    if request.strategy_id.is_empty() {
        request.strategy_id = strategy.to_string();
    }
    tracing::debug!(exec_id = %request.exec_id, strategy, "exec request loaded");
    let response = service.execute(request);
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn print_summary(result: &BacktestResult) {
    let stats = export::statistics(result);
    println!("Strategy:      {} on {} ({}, {})", result.strategy, result.symbol, result.market, result.timeframe);
    println!("Bars:          {}", stats.total_bars);
    println!(
        "Orders:        {} ({} buy / {} sell), {} filled, {} rejected, {} canceled",
        stats.total_orders,
        stats.buy_orders,
        stats.sell_orders,
        stats.filled_orders,
        stats.rejected_orders,
        stats.canceled_orders
    );
    println!("Decisions:     {}", stats.total_decisions);
    if stats.failed_bars > 0 {
        println!("Failed bars:   {}", stats.failed_bars);
    }
    println!("Final equity:  {:.2} (initial {:.2})", stats.final_equity, result.initial_cash);
    println!("Total return:  {:.2}%", stats.total_return * 100.0);
    println!("Realized PnL:  {:.2}", stats.realized_pnl);
}
