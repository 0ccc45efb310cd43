//! Parallel parameter sweeps
//!
//! Each case is an independent backtest with its own strategy, portfolio and
//! indicator cache. Only the read-only market data is shared between workers.

use common::{BacktestConfig, PerformanceReport, Result};
use rayon::prelude::*;
use tracing::info;

use crate::data::MarketDataSeries;
use crate::engine::{BacktestEngine, RunStatus};
use crate::strategy::Strategy;

/// One sweep case: a backtest configuration plus the parameters the strategy
/// factory builds from
#[derive(Debug, Clone)]
pub struct SweepCase<P> {
    pub label: String,
    pub config: BacktestConfig,
    pub params: P,
}

impl<P> SweepCase<P> {
    pub fn new(label: impl Into<String>, config: BacktestConfig, params: P) -> Self {
        Self {
            label: label.into(),
            config,
            params,
        }
    }
}

/// Summary of one sweep run
#[derive(Debug, Clone, PartialEq)]
pub struct SweepRun {
    pub report: PerformanceReport,
    pub final_equity: f64,
    pub trades: usize,
    pub rejected_signals: usize,
    pub status: RunStatus,
}

#[derive(Debug)]
pub struct SweepResult {
    pub label: String,
    pub run: Result<SweepRun>,
}

pub struct ParameterSweep;

impl ParameterSweep {
    /// Run every case on the rayon pool. Results come back in input order.
    pub fn run<P, S, F>(
        series: &MarketDataSeries,
        cases: Vec<SweepCase<P>>,
        factory: F,
    ) -> Vec<SweepResult>
    where
        P: Send,
        S: Strategy,
        F: Fn(&P) -> S + Sync,
    {
        info!(cases = cases.len(), "Starting parameter sweep");

        cases
            .into_par_iter()
            .map(|case| {
                let mut strategy = factory(&case.params);
                let run = run_case(series, &case.config, &mut strategy);
                SweepResult { label: case.label, run }
            })
            .collect()
    }

    /// Split a multi-symbol configuration into one independent run per symbol
    pub fn run_per_symbol<S, F>(
        series: &MarketDataSeries,
        config: &BacktestConfig,
        factory: F,
    ) -> Vec<SweepResult>
    where
        S: Strategy,
        F: Fn() -> S + Sync,
    {
        let symbols: Vec<String> = if config.symbols.is_empty() {
            series.symbols().map(str::to_string).collect()
        } else {
            config.symbols.iter().cloned().collect()
        };

        let cases = symbols
            .into_iter()
            .map(|symbol| {
                let mut single = config.clone();
                single.symbols.clear();
                single.symbols.insert(symbol.clone());
                SweepCase::new(symbol, single, ())
            })
            .collect();

        Self::run(series, cases, |_| factory())
    }
}

fn run_case<S: Strategy>(
    series: &MarketDataSeries,
    config: &BacktestConfig,
    strategy: &mut S,
) -> Result<SweepRun> {
    let outcome = BacktestEngine::new(config.clone()).run(series, strategy)?;
    Ok(SweepRun {
        report: outcome.performance(config.bars_per_year),
        final_equity: outcome.final_equity(),
        trades: outcome.trades.len(),
        rejected_signals: outcome.rejected_signals.len(),
        status: outcome.status,
    })
}
