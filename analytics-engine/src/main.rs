use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use analytics_engine::risk::load_scenarios;
use analytics_engine::{
    generate_synthetic_bars, load_file, AnalyticsConfig, BacktestConfig, BacktestEngine,
    BacktestOutcome, EquityPoint, FillTiming, FrontierPoint, MarketDataSeries, OptimizationMode,
    OptimizationResult, ParameterSweep, PerformanceMetricsCalculator, PerformanceReport,
    PortfolioOptimizer, RiskAnalyticsEngine, RiskReport, RunStatus, StrategyKind, StressScenario,
    SweepCase, SweepResult, Trade, VarMethod,
};

#[derive(Parser, Debug)]
#[command(name = "analytics-engine")]
#[command(version = "0.1.0")]
#[command(about = "Backtesting, risk and portfolio optimization analytics", long_about = None)]
struct Cli {
    /// JSON config file (backtest, risk and optimizer sections)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json", global = true)]
    output: OutputFormat,

    /// Pretty print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one backtest
    Backtest {
        #[command(flatten)]
        data: DataArgs,
        #[command(flatten)]
        strategy: StrategyArgs,
        #[command(flatten)]
        overrides: BacktestOverrides,
    },
    /// SMA crossover parameter grid, one backtest per (fast, slow) pair
    Sweep {
        #[command(flatten)]
        data: DataArgs,
        #[command(flatten)]
        overrides: BacktestOverrides,
        #[arg(long, value_delimiter = ',', default_value = "5,10,20")]
        fast: Vec<usize>,
        #[arg(long, value_delimiter = ',', default_value = "30,50,100")]
        slow: Vec<usize>,
    },
    /// VaR/CVaR and stress test of a strategy's book
    Risk {
        #[command(flatten)]
        data: DataArgs,
        #[command(flatten)]
        strategy: StrategyArgs,
        #[command(flatten)]
        overrides: BacktestOverrides,
        #[arg(long, value_enum)]
        method: Option<VarMethodArg>,
        #[arg(long)]
        confidence: Option<f64>,
        #[arg(long)]
        samples: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        /// JSON array of stress scenarios (built-in presets when omitted)
        #[arg(long)]
        scenarios: Option<PathBuf>,
    },
    /// Mean-variance weights over the symbols' close-to-close returns
    Optimize {
        #[command(flatten)]
        data: DataArgs,
        #[arg(long, value_enum, default_value = "min-variance")]
        mode: ModeArg,
        /// Required with --mode target-return
        #[arg(long)]
        target_return: Option<f64>,
        /// Forbid negative weights
        #[arg(long)]
        long_only: bool,
        /// Also compute this many efficient-frontier points
        #[arg(long)]
        frontier: Option<usize>,
    },
}

#[derive(Args, Debug)]
struct DataArgs {
    /// Data file path (CSV/JSON). If not provided, uses synthetic data.
    #[arg(short = 'f', long)]
    data_file: Option<PathBuf>,

    /// Symbols to load or generate
    #[arg(short, long, value_delimiter = ',', default_value = "BTC")]
    symbols: Vec<String>,

    /// Number of days of synthetic data
    #[arg(short, long, default_value = "365")]
    days: usize,

    /// Initial price for synthetic data
    #[arg(long, default_value = "100.0")]
    initial_price: f64,

    /// Seed for synthetic data
    #[arg(long, default_value = "42")]
    data_seed: u64,
}

#[derive(Args, Debug)]
struct StrategyArgs {
    #[arg(long, value_enum, default_value = "sma-crossover")]
    strategy: StrategyArg,
    #[arg(long, default_value = "20")]
    fast: usize,
    #[arg(long, default_value = "50")]
    slow: usize,
    #[arg(long, default_value = "14")]
    rsi_period: usize,
    #[arg(long, default_value = "30")]
    rsi_oversold: f64,
    #[arg(long, default_value = "70")]
    rsi_overbought: f64,
}

impl StrategyArgs {
    fn kind(&self) -> StrategyKind {
        match self.strategy {
            StrategyArg::SmaCrossover => StrategyKind::SmaCrossover {
                fast: self.fast,
                slow: self.slow,
            },
            StrategyArg::RsiReversion => StrategyKind::RsiReversion {
                period: self.rsi_period,
                oversold: self.rsi_oversold,
                overbought: self.rsi_overbought,
            },
            StrategyArg::BuyAndHold => StrategyKind::BuyAndHold,
        }
    }
}

/// Flags that override the config file
#[derive(Args, Debug)]
struct BacktestOverrides {
    #[arg(short, long)]
    capital: Option<f64>,
    #[arg(long)]
    commission: Option<f64>,
    #[arg(long)]
    slippage: Option<f64>,
    #[arg(long)]
    position_size: Option<f64>,
    #[arg(long, value_enum)]
    fill_timing: Option<FillTimingArg>,
}

impl BacktestOverrides {
    fn apply(&self, mut config: BacktestConfig) -> BacktestConfig {
        if let Some(capital) = self.capital {
            config.initial_capital = capital;
        }
        if let Some(commission) = self.commission {
            config.commission_rate = commission;
        }
        if let Some(slippage) = self.slippage {
            config.slippage_rate = slippage;
        }
        if let Some(pct) = self.position_size {
            config.position_size_pct = pct;
        }
        if let Some(timing) = self.fill_timing {
            config.fill_timing = match timing {
                FillTimingArg::SameBarClose => FillTiming::SameBarClose,
                FillTimingArg::NextBarOpen => FillTiming::NextBarOpen,
            };
        }
        config
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    SmaCrossover,
    RsiReversion,
    BuyAndHold,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FillTimingArg {
    SameBarClose,
    NextBarOpen,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum VarMethodArg {
    Historical,
    Parametric,
    MonteCarlo,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    MinVariance,
    MaxSharpe,
    TargetReturn,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AnalyticsConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AnalyticsConfig::default(),
    };

    match &cli.command {
        Command::Backtest {
            data,
            strategy,
            overrides,
        } => {
            let series = load_series(data)?;
            let backtest = overrides.apply(config.backtest.clone());
            let outcome = run_backtest(&series, &backtest, &strategy.kind())?;
            let summary = BacktestSummary::new(&outcome, &backtest, strategy.kind());
            emit(&cli, &summary, print_backtest_report)?;
        }
        Command::Sweep {
            data,
            overrides,
            fast,
            slow,
        } => {
            let series = load_series(data)?;
            let backtest = overrides.apply(config.backtest.clone());
            let cases: Vec<_> = fast
                .iter()
                .flat_map(|&f| slow.iter().map(move |&s| (f, s)))
                .filter(|(f, s)| f < s)
                .map(|(f, s)| {
                    SweepCase::new(
                        format!("sma_{}_{}", f, s),
                        backtest.clone(),
                        StrategyKind::SmaCrossover { fast: f, slow: s },
                    )
                })
                .collect();
            if cases.is_empty() {
                bail!("no (fast, slow) pair with fast < slow");
            }
            let results = ParameterSweep::run(&series, cases, |kind| kind.build());
            let rows: Vec<SweepRow> = results.into_iter().map(SweepRow::from).collect();
            emit(&cli, &rows, |rows: &Vec<SweepRow>| print_sweep_report(rows))?;
        }
        Command::Risk {
            data,
            strategy,
            overrides,
            method,
            confidence,
            samples,
            seed,
            scenarios,
        } => {
            let series = load_series(data)?;
            let backtest = overrides.apply(config.backtest.clone()).without_close_at_end();
            let outcome = run_backtest(&series, &backtest, &strategy.kind())?;

            let mut risk = config.risk.clone();
            if let Some(method) = method {
                risk.var_method = match method {
                    VarMethodArg::Historical => VarMethod::Historical,
                    VarMethodArg::Parametric => VarMethod::Parametric,
                    VarMethodArg::MonteCarlo => VarMethod::MonteCarlo,
                };
            }
            if let Some(confidence) = confidence {
                risk.confidence_level = *confidence;
            }
            if let Some(samples) = samples {
                risk.monte_carlo_samples = *samples;
            }
            if let Some(seed) = seed {
                risk.seed = *seed;
            }

            let scenarios = match scenarios {
                Some(path) => load_scenarios(path)
                    .with_context(|| format!("loading scenarios {}", path.display()))?,
                None => StressScenario::presets(),
            };

            let returns = PerformanceMetricsCalculator::period_returns(outcome.equity_curve());
            let report =
                RiskAnalyticsEngine::new(risk).report(&returns, &outcome.portfolio, &scenarios)?;
            emit(&cli, &report, print_risk_report)?;
        }
        Command::Optimize {
            data,
            mode,
            target_return,
            long_only,
            frontier,
        } => {
            let series = load_series(data)?;
            let mut optimizer_config = config.optimizer.clone();
            if *long_only {
                optimizer_config.allow_short_weights = false;
            }
            let mode = match (mode, target_return) {
                (ModeArg::MinVariance, _) => OptimizationMode::MinVariance,
                (ModeArg::MaxSharpe, _) => OptimizationMode::MaxSharpe,
                (ModeArg::TargetReturn, Some(target)) => OptimizationMode::TargetReturn(*target),
                (ModeArg::TargetReturn, None) => {
                    bail!("--mode target-return requires --target-return")
                }
            };

            let returns = series.close_returns();
            let optimizer = PortfolioOptimizer::new(optimizer_config);
            let result = optimizer.optimize(&returns, mode)?;
            let frontier = match frontier {
                Some(points) => optimizer.efficient_frontier(&returns, *points)?,
                None => Vec::new(),
            };

            let output = OptimizeOutput { result, frontier };
            emit(&cli, &output, print_optimize_report)?;
        }
    }

    Ok(())
}

fn load_series(args: &DataArgs) -> Result<MarketDataSeries> {
    let bars = if let Some(path) = &args.data_file {
        info!(path = %path.display(), "Loading data");
        let default_symbol = args.symbols.first().map(String::as_str).unwrap_or("UNKNOWN");
        load_file(path, default_symbol)?
    } else {
        info!(
            days = args.days,
            initial_price = args.initial_price,
            symbols = ?args.symbols,
            "Generating synthetic data"
        );
        args.symbols
            .iter()
            .enumerate()
            .flat_map(|(i, symbol)| {
                let seed = args.data_seed + i as u64;
                generate_synthetic_bars(symbol, args.days, args.initial_price, seed)
            })
            .collect()
    };

    Ok(MarketDataSeries::new(bars)?)
}

fn run_backtest(
    series: &MarketDataSeries,
    config: &BacktestConfig,
    kind: &StrategyKind,
) -> Result<BacktestOutcome> {
    let mut strategy = kind.build();
    let outcome = BacktestEngine::new(config.clone()).run(series, &mut strategy)?;
    Ok(outcome)
}

fn emit<T: Serialize>(cli: &Cli, value: &T, text: fn(&T)) -> Result<()> {
    match cli.output {
        OutputFormat::Json => {
            let json = if cli.pretty {
                serde_json::to_string_pretty(value)?
            } else {
                serde_json::to_string(value)?
            };
            println!("{}", json);
        }
        OutputFormat::Text => text(value),
    }
    Ok(())
}

#[derive(Serialize)]
struct BacktestSummary {
    strategy: StrategyKind,
    initial_capital: f64,
    final_equity: f64,
    status: RunStatus,
    bars_processed: usize,
    rejected_signals: usize,
    metrics: PerformanceReport,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
}

impl BacktestSummary {
    fn new(outcome: &BacktestOutcome, config: &BacktestConfig, strategy: StrategyKind) -> Self {
        Self {
            strategy,
            initial_capital: config.initial_capital,
            final_equity: outcome.final_equity(),
            status: outcome.status,
            bars_processed: outcome.bars_processed,
            rejected_signals: outcome.rejected_signals.len(),
            metrics: outcome.performance(config.bars_per_year),
            trades: outcome.trades.clone(),
            equity_curve: outcome.equity_curve().to_vec(),
        }
    }
}

#[derive(Serialize)]
struct SweepRow {
    label: String,
    error: Option<String>,
    final_equity: Option<f64>,
    trades: Option<usize>,
    metrics: Option<PerformanceReport>,
}

impl From<SweepResult> for SweepRow {
    fn from(result: SweepResult) -> Self {
        match result.run {
            Ok(run) => SweepRow {
                label: result.label,
                error: None,
                final_equity: Some(run.final_equity),
                trades: Some(run.trades),
                metrics: Some(run.report),
            },
            Err(err) => SweepRow {
                label: result.label,
                error: Some(err.to_string()),
                final_equity: None,
                trades: None,
                metrics: None,
            },
        }
    }
}

#[derive(Serialize)]
struct OptimizeOutput {
    result: OptimizationResult,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    frontier: Vec<FrontierPoint>,
}

const RULE: &str = "----------------------------------------------------------------";
const BANNER: &str = "================================================================";

fn print_backtest_report(summary: &BacktestSummary) {
    let m = &summary.metrics;
    println!();
    println!("{}", BANNER);
    println!("  BACKTEST REPORT - {:?}", summary.strategy);
    println!("{}", BANNER);
    println!();
    if let (Some(first), Some(last)) = (summary.equity_curve.first(), summary.equity_curve.last()) {
        println!(
            "  Period: {} to {}",
            first.timestamp.format("%Y-%m-%d"),
            last.timestamp.format("%Y-%m-%d")
        );
    }
    println!("  Bars processed:   {:>12}", summary.bars_processed);
    println!("  Status:           {:>12}", format!("{:?}", summary.status));
    println!();
    println!("{}", RULE);
    println!("  CAPITAL");
    println!("{}", RULE);
    println!("  Initial Capital:  ${:>12.2}", summary.initial_capital);
    println!("  Final Equity:     ${:>12.2}", summary.final_equity);
    println!("  Total Return:     {:>12.2}%", m.total_return * 100.0);
    println!("  Annual Return:    {:>12.2}%", m.annual_return * 100.0);
    println!();
    println!("{}", RULE);
    println!("  RISK METRICS");
    println!("{}", RULE);
    println!("  Volatility (Ann): {:>12.2}%", m.volatility * 100.0);
    println!("  Sharpe Ratio:     {:>12.3}", m.sharpe);
    println!("  Sortino Ratio:    {:>12.3}", m.sortino);
    println!("  Max Drawdown:     {:>12.2}%", m.max_drawdown * 100.0);
    println!("  Max DD Duration:  {:>12} bars", m.max_drawdown_duration_bars);
    println!("  Calmar Ratio:     {:>12.3}", m.calmar);
    println!();
    println!("{}", RULE);
    println!("  TRADE STATISTICS");
    println!("{}", RULE);
    println!("  Total Trades:     {:>12}", m.total_trades);
    println!("  Winning Trades:   {:>12}", m.winning_trades);
    println!("  Losing Trades:    {:>12}", m.losing_trades);
    println!("  Win Rate:         {:>12.1}%", m.win_rate * 100.0);
    println!("  Avg Win:          ${:>12.2}", m.avg_win);
    println!("  Avg Loss:         ${:>12.2}", m.avg_loss);
    if m.profit_factor_unbounded() {
        println!("  Profit Factor:    {:>12}", "inf");
    } else {
        println!("  Profit Factor:    {:>12.3}", m.profit_factor);
    }
    println!("  Expectancy:       ${:>12.2}", m.expectancy);
    println!("  Avg Trade Dur.:   {:>12.1} bars", m.avg_trade_duration);
    println!("  Largest Win:      ${:>12.2}", m.largest_win);
    println!("  Largest Loss:     ${:>12.2}", m.largest_loss);
    println!("  Rejected Signals: {:>12}", summary.rejected_signals);
    println!();
    println!("{}", BANNER);

    if !summary.trades.is_empty() {
        println!();
        println!("  RECENT TRADES (last 5)");
        println!("{}", RULE);
        for trade in summary.trades.iter().rev().take(5) {
            println!(
                "  {} {} -> {} | P&L: ${:+.2} ({:+.1}%) | {} bars",
                trade.symbol,
                trade.entry_fill.timestamp.format("%Y-%m-%d"),
                trade.exit_fill.timestamp.format("%Y-%m-%d"),
                trade.pnl,
                trade.pnl_percent,
                trade.duration_bars
            );
        }
        println!();
    }
}

fn print_sweep_report(rows: &[SweepRow]) {
    println!();
    println!(
        "  {:<16} {:>14} {:>8} {:>10} {:>10}",
        "CASE", "FINAL EQUITY", "TRADES", "SHARPE", "MAX DD"
    );
    println!("{}", RULE);
    for row in rows {
        match (&row.metrics, row.final_equity, &row.error) {
            (Some(m), Some(equity), _) => println!(
                "  {:<16} {:>14.2} {:>8} {:>10.3} {:>9.2}%",
                row.label,
                equity,
                m.total_trades,
                m.sharpe,
                m.max_drawdown * 100.0
            ),
            (_, _, Some(err)) => println!("  {:<16} error: {}", row.label, err),
            _ => println!("  {:<16} no result", row.label),
        }
    }
    println!();
}

fn print_risk_report(report: &RiskReport) {
    println!();
    println!("{}", BANNER);
    println!("  RISK REPORT - {:?} @ {:.1}%", report.method, report.confidence * 100.0);
    println!("{}", BANNER);
    println!("  Observations:     {:>12}", report.lookback_days);
    println!("  Samples:          {:>12}", report.sample_count);
    println!("  VaR:              {:>12.4}%", report.var95 * 100.0);
    println!("  CVaR:             {:>12.4}%", report.cvar95 * 100.0);
    println!();
    println!("{}", RULE);
    println!("  STRESS TESTS");
    println!("{}", RULE);
    for result in &report.stress_results {
        println!(
            "  {:<20} loss ${:>12.2} ({:>6.2}%)",
            result.scenario_name, result.loss_amount, result.loss_percent
        );
    }
    println!();
}

fn print_optimize_report(output: &OptimizeOutput) {
    let result = &output.result;
    println!();
    println!("{}", BANNER);
    println!("  PORTFOLIO OPTIMIZATION ({:?}, {} iterations)", result.status, result.iterations);
    println!("{}", BANNER);
    for (symbol, weight) in &result.weights {
        println!("  {:<12} {:>10.4}", symbol, weight);
    }
    println!("{}", RULE);
    println!("  Expected Return:  {:>12.6}", result.expected_return);
    println!("  Volatility:       {:>12.6}", result.expected_volatility);
    println!("  Sharpe:           {:>12.4}", result.sharpe);

    if !output.frontier.is_empty() {
        println!();
        println!("  EFFICIENT FRONTIER");
        println!("{}", RULE);
        for point in &output.frontier {
            println!(
                "  target {:>10.6}  return {:>10.6}  vol {:>10.6}",
                point.target_return, point.expected_return, point.expected_volatility
            );
        }
    }
    println!();
}
