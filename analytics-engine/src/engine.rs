use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{
    AnalyticsError, BacktestConfig, Bar, EquityPoint, FillTiming, PerformanceReport, Result, Side,
    Signal, SignalAction, Trade,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::data::MarketDataSeries;
use crate::execution::{
    ExecutionSimulator, OrderQueue, OrderRequest, OrderType, ReferencePrice, SlippageModel,
};
use crate::indicators::IndicatorCache;
use crate::metrics::PerformanceMetricsCalculator;
use crate::portfolio::Portfolio;
use crate::strategy::Strategy;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled,
}

/// Signal the book could not honor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedSignal {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    pub reason: String,
}

/// Result of one backtest run
#[derive(Debug, Clone)]
pub struct BacktestOutcome {
    pub portfolio: Portfolio,
    pub trades: Vec<Trade>,
    pub rejected_signals: Vec<RejectedSignal>,
    pub status: RunStatus,
    pub bars_processed: usize,
}

impl BacktestOutcome {
    pub fn equity_curve(&self) -> &[EquityPoint] {
        self.portfolio.equity_curve()
    }

    pub fn final_equity(&self) -> f64 {
        self.portfolio.equity()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Cancelled
    }

    pub fn performance(&self, bars_per_year: f64) -> PerformanceReport {
        PerformanceMetricsCalculator::compute(self.equity_curve(), &self.trades, bars_per_year)
    }
}

/// Event-driven backtest engine
///
/// One run is a single-threaded loop over the merged bars of the selected
/// symbols. Strategies only ever see a prefix slice of their symbol's bars, so
/// there is no way to read a future bar.
pub struct BacktestEngine {
    config: BacktestConfig,
    simulator: ExecutionSimulator,
}

/// Mutable state of one run
struct RunState {
    portfolio: Portfolio,
    queue: OrderQueue,
    cache: IndicatorCache,
    rejected: Vec<RejectedSignal>,
    next_order_id: u64,
}

impl RunState {
    fn next_order_id(&mut self) -> u64 {
        let id = self.next_order_id;
        self.next_order_id += 1;
        id
    }

    fn reject(&mut self, symbol: &str, timestamp: DateTime<Utc>, side: Side, reason: String) {
        warn!(symbol, %timestamp, ?side, %reason, "Signal rejected");
        self.rejected.push(RejectedSignal {
            symbol: symbol.to_string(),
            timestamp,
            side,
            reason,
        });
    }
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        let simulator = ExecutionSimulator::from_config(&config);
        Self { config, simulator }
    }

    /// Replace the fixed slippage rate with another model
    pub fn with_slippage_model(mut self, model: SlippageModel) -> Self {
        self.simulator = self.simulator.with_slippage_model(model);
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn run<S: Strategy + ?Sized>(
        &self,
        series: &MarketDataSeries,
        strategy: &mut S,
    ) -> Result<BacktestOutcome> {
        self.run_with_cancel(series, strategy, &CancellationToken::new())
    }

    /// Run the backtest, polling `cancel` before every bar. A cancelled run
    /// returns the partial outcome with status [`RunStatus::Cancelled`].
    pub fn run_with_cancel<S: Strategy + ?Sized>(
        &self,
        series: &MarketDataSeries,
        strategy: &mut S,
        cancel: &CancellationToken,
    ) -> Result<BacktestOutcome> {
        self.config.validate()?;

        let symbols = self.resolve_symbols(series)?;
        let warmup = strategy.warmup_bars();
        let (start, end) = self.resolve_range(series, &symbols, warmup)?;
        let events = series.merged(&symbols, start, end);
        if events.is_empty() {
            return Err(AnalyticsError::InsufficientData {
                required: 1,
                actual: 0,
            });
        }

        info!(
            strategy = strategy.name(),
            symbols = ?symbols,
            %start,
            %end,
            bars = events.len(),
            fill_timing = ?self.config.fill_timing,
            "Starting backtest"
        );

        let mut state = RunState {
            portfolio: Portfolio::new(self.config.initial_capital),
            queue: OrderQueue::new(),
            cache: IndicatorCache::new(),
            rejected: Vec::new(),
            next_order_id: 1,
        };
        let mut status = RunStatus::Completed;
        let mut bars_processed = 0;
        let mut last_index: BTreeMap<&str, usize> = BTreeMap::new();

        let groups: Vec<_> = events.chunk_by(|a, b| a.timestamp == b.timestamp).collect();
        let group_count = groups.len();

        'groups: for (group_no, group) in groups.into_iter().enumerate() {
            let timestamp = group[0].timestamp;
            let mut touched = false;

            for event in group {
                if cancel.is_cancelled() {
                    status = RunStatus::Cancelled;
                    if touched {
                        state.portfolio.record_equity(timestamp);
                    }
                    break 'groups;
                }

                let bars = series.bars(event.symbol).unwrap_or(&[]);
                self.process_bar(&mut state, strategy, bars, event.index, warmup);
                last_index.insert(event.symbol, event.index);
                bars_processed += 1;
                touched = true;
            }

            if group_no + 1 == group_count {
                self.finish(&mut state, series, &last_index);
            }
            state.portfolio.record_equity(timestamp);
        }

        let portfolio = state.portfolio;
        let trades = portfolio.trades().to_vec();

        info!(
            status = ?status,
            bars_processed,
            trades = trades.len(),
            rejected = state.rejected.len(),
            final_equity = portfolio.equity(),
            indicator_cache_hits = state.cache.hits(),
            "Backtest finished"
        );

        Ok(BacktestOutcome {
            portfolio,
            trades,
            rejected_signals: state.rejected,
            status,
            bars_processed,
        })
    }

    fn resolve_symbols<'a>(&'a self, series: &'a MarketDataSeries) -> Result<Vec<&'a str>> {
        if self.config.symbols.is_empty() {
            return Ok(series.symbols().collect());
        }
        self.config
            .symbols
            .iter()
            .map(|symbol| {
                series
                    .bars(symbol)
                    .map(|_| symbol.as_str())
                    .ok_or_else(|| {
                        AnalyticsError::InvalidParameter(format!("unknown symbol {}", symbol))
                    })
            })
            .collect()
    }

    /// Resolve the run window.
    ///
    /// An explicit start must leave `warmup` bars of history for every symbol.
    /// Without one, the run starts at the first bar where some symbol has
    /// completed its warmup.
    fn resolve_range(
        &self,
        series: &MarketDataSeries,
        symbols: &[&str],
        warmup: usize,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let (first, last) = series
            .bounds(symbols.iter().copied())
            .ok_or(AnalyticsError::InsufficientData {
                required: warmup + 1,
                actual: 0,
            })?;

        let start = match self.config.start {
            Some(start) => {
                if start < first || start > last {
                    return Err(AnalyticsError::Range(format!(
                        "start {} outside data range {} to {}",
                        start, first, last
                    )));
                }
                for symbol in symbols {
                    let bars = series.bars(symbol).unwrap_or(&[]);
                    let available = bars.partition_point(|b| b.timestamp < start);
                    if available < warmup {
                        return Err(AnalyticsError::InsufficientData {
                            required: warmup,
                            actual: available,
                        });
                    }
                }
                start
            }
            None => symbols
                .iter()
                .filter_map(|symbol| series.bars(symbol).and_then(|bars| bars.get(warmup)))
                .map(|bar| bar.timestamp)
                .min()
                .ok_or_else(|| AnalyticsError::InsufficientData {
                    required: warmup + 1,
                    actual: symbols
                        .iter()
                        .filter_map(|s| series.bars(s).map(<[Bar]>::len))
                        .max()
                        .unwrap_or(0),
                })?,
        };

        let end = match self.config.end {
            Some(end) if end < first || end > last => {
                return Err(AnalyticsError::Range(format!(
                    "end {} outside data range {} to {}",
                    end, first, last
                )));
            }
            Some(end) => end,
            None => last,
        };

        if start >= end {
            return Err(AnalyticsError::Range(format!(
                "start {} must be before end {}",
                start, end
            )));
        }

        Ok((start, end))
    }

    fn process_bar<S: Strategy + ?Sized>(
        &self,
        state: &mut RunState,
        strategy: &mut S,
        bars: &[Bar],
        index: usize,
        warmup: usize,
    ) {
        let bar = &bars[index];

        if self.config.fill_timing == FillTiming::NextBarOpen {
            for order in state.queue.take_for(&bar.symbol) {
                if self.execute(state, &order, bar, index, ReferencePrice::Open) {
                    strategy.on_position(&bar.symbol, state.portfolio.quantity(&bar.symbol));
                }
            }
        }

        state.portfolio.mark(&bar.symbol, bar.close);

        // Bars still inside the warmup window are marked but not analyzed
        if index < warmup {
            return;
        }

        let signal = strategy.analyze(bar, &bars[..index], &mut state.cache);
        if signal.is_hold() {
            return;
        }

        let Some(order) = self.build_order(state, &signal, bar, index) else {
            return;
        };

        match self.config.fill_timing {
            FillTiming::SameBarClose => {
                if self.execute(state, &order, bar, index, ReferencePrice::Close) {
                    strategy.on_position(&bar.symbol, state.portfolio.quantity(&bar.symbol));
                }
            }
            FillTiming::NextBarOpen => {
                debug!(
                    order_id = order.order_id,
                    symbol = %order.symbol,
                    "Order queued for next bar"
                );
                state.queue.push(order);
            }
        }
    }

    /// Size a signal into an order, rejecting trades the book cannot make
    fn build_order(
        &self,
        state: &mut RunState,
        signal: &Signal,
        bar: &Bar,
        index: usize,
    ) -> Option<OrderRequest> {
        let side = match signal.action {
            SignalAction::Buy => Side::Buy,
            SignalAction::Sell => Side::Sell,
            SignalAction::Hold => return None,
        };
        let held = state.portfolio.quantity(&bar.symbol);

        let quantity = match (side, signal.target_quantity) {
            (_, Some(quantity)) => quantity,
            (Side::Buy, None) => {
                let reference = signal.limit_price.unwrap_or(bar.close);
                let unit_cost = self.simulator.unit_cost(reference, 0.0, bar.volume);
                state
                    .portfolio
                    .position_size(unit_cost, self.config.position_size_pct, signal.confidence)
            }
            (Side::Sell, None) => held,
        };

        if side == Side::Sell && quantity > held {
            state.reject(
                &bar.symbol,
                bar.timestamp,
                side,
                format!("sell {:.8} exceeds position {:.8}", quantity, held),
            );
            return None;
        }
        if !(quantity > 0.0) {
            let reason = match side {
                Side::Buy => "no cash available for buy".to_string(),
                Side::Sell => "no position to sell".to_string(),
            };
            state.reject(&bar.symbol, bar.timestamp, side, reason);
            return None;
        }

        Some(OrderRequest {
            order_id: state.next_order_id(),
            symbol: bar.symbol.clone(),
            side,
            quantity,
            order_type: signal.limit_price.map_or(OrderType::Market, OrderType::Limit),
            signal_bar: index,
        })
    }

    /// Simulate and book one order; true when a fill reached the portfolio
    fn execute(
        &self,
        state: &mut RunState,
        order: &OrderRequest,
        bar: &Bar,
        index: usize,
        reference: ReferencePrice,
    ) -> bool {
        let Some(fill) = self.simulator.simulate(order, bar, reference) else {
            debug!(order_id = order.order_id, symbol = %order.symbol, "Order not filled");
            return false;
        };

        let applied = match state.portfolio.apply_fill(&fill, index) {
            Ok(trade) => {
                debug!(
                    order_id = fill.order_id,
                    symbol = %fill.symbol,
                    side = ?fill.side,
                    qty = fill.filled_qty,
                    price = fill.fill_price,
                    commission = fill.commission,
                    "Fill"
                );
                if let Some(trade) = trade {
                    debug!(
                        symbol = %trade.symbol,
                        pnl = trade.pnl,
                        bars = trade.duration_bars,
                        "Trade closed"
                    );
                }
                true
            }
            Err(err) => {
                state.reject(&order.symbol, bar.timestamp, order.side, err.to_string());
                false
            }
        };

        // Holdings are valued at the close, never at the fill price
        state.portfolio.mark(&bar.symbol, bar.close);
        applied
    }

    /// Drop orders that never reached a next bar, then optionally liquidate
    fn finish(
        &self,
        state: &mut RunState,
        series: &MarketDataSeries,
        last_index: &BTreeMap<&str, usize>,
    ) {
        for order in state.queue.drain() {
            warn!(
                order_id = order.order_id,
                symbol = %order.symbol,
                "Order dropped at end of data"
            );
        }

        if !self.config.close_at_end {
            return;
        }

        let open: Vec<(String, f64)> = state
            .portfolio
            .positions()
            .values()
            .map(|p| (p.symbol.clone(), p.quantity))
            .collect();

        for (symbol, quantity) in open {
            let Some((bars, &index)) =
                series.bars(&symbol).zip(last_index.get(symbol.as_str()))
            else {
                continue;
            };
            let order = OrderRequest {
                order_id: state.next_order_id(),
                symbol: symbol.clone(),
                side: Side::Sell,
                quantity,
                order_type: OrderType::Market,
                signal_bar: index,
            };
            self.execute(state, &order, &bars[index], index, ReferencePrice::Close);
            if state.portfolio.has_position(&symbol) {
                warn!(symbol = %symbol, "Position not fully liquidated at end of data");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    use crate::data::generate_synthetic_bars;
    use crate::strategy::{BuyAndHold, SmaCrossover};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    fn flat_bars(symbol: &str, first_day: i64, prices: &[f64]) -> Vec<Bar> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Bar::new(symbol, day(first_day + i as i64), p, p, p, p, 1_000_000.0))
            .collect()
    }

    /// Emits fixed signals keyed by bar index
    struct Scripted {
        script: HashMap<usize, Signal>,
        warmup: usize,
        positions: Vec<(String, f64)>,
    }

    impl Scripted {
        fn new(script: Vec<(usize, Signal)>) -> Self {
            Self {
                script: script.into_iter().collect(),
                warmup: 0,
                positions: Vec::new(),
            }
        }
    }

    impl Strategy for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn warmup_bars(&self) -> usize {
            self.warmup
        }

        fn analyze(&mut self, _bar: &Bar, history: &[Bar], _cache: &mut IndicatorCache) -> Signal {
            self.script.get(&history.len()).cloned().unwrap_or_else(Signal::hold)
        }

        fn on_position(&mut self, symbol: &str, quantity: f64) {
            self.positions.push((symbol.to_string(), quantity));
        }
    }

    fn scenario_config() -> BacktestConfig {
        BacktestConfig::default().with_costs(0.001, 0.0)
    }

    fn scenario_series() -> MarketDataSeries {
        MarketDataSeries::new(flat_bars("BTC", 0, &[100.0, 110.0, 105.0, 120.0, 115.0])).unwrap()
    }

    #[test]
    fn test_same_bar_close_scenario() {
        let engine = BacktestEngine::new(scenario_config());
        let mut strategy = Scripted::new(vec![
            (0, Signal::buy(1.0).with_quantity(10.0)),
            (3, Signal::sell(1.0)),
        ]);

        let outcome = engine.run(&scenario_series(), &mut strategy).unwrap();

        assert_eq!(outcome.trades.len(), 1);
        let trade = &outcome.trades[0];
        assert_eq!(trade.entry_fill.fill_price, 100.0);
        assert_eq!(trade.exit_fill.fill_price, 120.0);
        assert_relative_eq!(trade.pnl, (120.0 - 100.0) * 10.0 - 1.0 - 1.2, epsilon = 1e-9);
        assert_eq!(trade.duration_bars, 3);
        assert_eq!(outcome.equity_curve().len(), 5);
        assert_relative_eq!(outcome.final_equity(), 10000.0 + trade.pnl, epsilon = 1e-9);
        assert_eq!(outcome.status, RunStatus::Completed);
    }

    #[test]
    fn test_next_bar_open_scenario() {
        let engine =
            BacktestEngine::new(scenario_config().with_fill_timing(FillTiming::NextBarOpen));
        let mut strategy = Scripted::new(vec![
            (0, Signal::buy(1.0).with_quantity(10.0)),
            (2, Signal::sell(1.0)),
        ]);

        let outcome = engine.run(&scenario_series(), &mut strategy).unwrap();

        assert_eq!(outcome.trades.len(), 1);
        let trade = &outcome.trades[0];
        assert_eq!(trade.entry_fill.fill_price, 110.0);
        assert_eq!(trade.exit_fill.fill_price, 120.0);
        assert_relative_eq!(trade.pnl, (120.0 - 110.0) * 10.0 - 1.1 - 1.2, epsilon = 1e-9);
    }

    #[test]
    fn test_orders_queued_at_end_are_dropped() {
        let engine =
            BacktestEngine::new(scenario_config().with_fill_timing(FillTiming::NextBarOpen));
        let mut strategy = Scripted::new(vec![(4, Signal::buy(1.0))]);

        let outcome = engine.run(&scenario_series(), &mut strategy).unwrap();

        assert!(outcome.trades.is_empty());
        assert_eq!(outcome.final_equity(), 10000.0);
    }

    #[test]
    fn test_close_at_end_liquidates() {
        let engine = BacktestEngine::new(scenario_config());
        let mut strategy = Scripted::new(vec![(0, Signal::buy(1.0).with_quantity(10.0))]);

        let outcome = engine.run(&scenario_series(), &mut strategy).unwrap();

        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].exit_fill.fill_price, 115.0);
        assert!(outcome.portfolio.positions().is_empty());

        let keep_open = BacktestEngine::new(scenario_config().without_close_at_end());
        let mut strategy = Scripted::new(vec![(0, Signal::buy(1.0).with_quantity(10.0))]);
        let outcome = keep_open.run(&scenario_series(), &mut strategy).unwrap();
        assert!(outcome.trades.is_empty());
        assert_eq!(outcome.portfolio.quantity("BTC"), 10.0);
    }

    #[test]
    fn test_invalid_sell_is_rejected_and_loop_continues() {
        let engine = BacktestEngine::new(scenario_config());
        let mut strategy = Scripted::new(vec![
            (0, Signal::buy(1.0).with_quantity(5.0)),
            (1, Signal::sell(1.0).with_quantity(8.0)),
            (3, Signal::sell(1.0)),
        ]);

        let outcome = engine.run(&scenario_series(), &mut strategy).unwrap();

        assert_eq!(outcome.rejected_signals.len(), 1);
        assert_eq!(outcome.rejected_signals[0].side, Side::Sell);
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.bars_processed, 5);
    }

    #[test]
    fn test_unaffordable_buy_is_rejected() {
        let engine = BacktestEngine::new(scenario_config());
        let mut strategy = Scripted::new(vec![(0, Signal::buy(1.0).with_quantity(1000.0))]);

        let outcome = engine.run(&scenario_series(), &mut strategy).unwrap();

        assert_eq!(outcome.rejected_signals.len(), 1);
        assert_eq!(outcome.final_equity(), 10000.0);
    }

    #[test]
    fn test_strategy_sees_fills_not_rejections() {
        let engine = BacktestEngine::new(scenario_config());
        let mut strategy = Scripted::new(vec![
            (0, Signal::buy(1.0).with_quantity(1000.0)),
            (1, Signal::buy(1.0).with_quantity(10.0)),
            (2, Signal::sell(1.0).with_quantity(10.0)),
        ]);

        let outcome = engine.run(&scenario_series(), &mut strategy).unwrap();

        assert_eq!(outcome.rejected_signals.len(), 1);
        assert_eq!(
            strategy.positions,
            vec![("BTC".to_string(), 10.0), ("BTC".to_string(), 0.0)]
        );
    }

    #[test]
    fn test_fill_bar_equity_marked_at_close() {
        let config = BacktestConfig::frictionless()
            .with_costs(0.0, 0.01)
            .without_close_at_end();
        let series = MarketDataSeries::new(flat_bars("BTC", 0, &[100.0, 100.0, 100.0])).unwrap();

        let outcome = BacktestEngine::new(config).run(&series, &mut BuyAndHold::new()).unwrap();

        let portfolio = &outcome.portfolio;
        let held = portfolio.cash() + portfolio.quantity("BTC") * 100.0;
        assert_eq!(outcome.equity_curve().len(), 3);
        for point in outcome.equity_curve() {
            assert_relative_eq!(point.equity, held, epsilon = 1e-9);
        }
        // Slippage is a realized cost on the fill bar
        assert!(outcome.equity_curve()[0].equity < 10000.0);
    }

    #[test]
    fn test_limit_fill_bar_equity_marked_at_close() {
        let bars: Vec<Bar> = (0..3)
            .map(|i| Bar::new("BTC", day(i), 100.0, 105.0, 95.0, 100.0, 1_000_000.0))
            .collect();
        let series = MarketDataSeries::new(bars).unwrap();
        let config = BacktestConfig::frictionless().without_close_at_end();
        let mut strategy = Scripted::new(vec![(
            0,
            Signal::buy(1.0).with_quantity(10.0).with_limit(97.0),
        )]);

        let outcome = BacktestEngine::new(config).run(&series, &mut strategy).unwrap();

        let position = outcome.portfolio.position("BTC").unwrap();
        assert_eq!(position.entry_fill.fill_price, 97.0);
        assert_relative_eq!(
            outcome.equity_curve()[0].equity,
            10000.0 - 970.0 + 1000.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_sizing_uses_cash_fraction() {
        let config = BacktestConfig::frictionless().with_position_size(0.5);
        let engine = BacktestEngine::new(config);
        let mut strategy = Scripted::new(vec![(0, Signal::buy(1.0))]);

        let outcome = engine.run(&scenario_series(), &mut strategy).unwrap();

        let entry = &outcome.trades[0].entry_fill;
        assert_relative_eq!(entry.filled_qty, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_range_errors() {
        let series = scenario_series();
        let mut strategy = BuyAndHold::new();

        let before_data = scenario_config().with_range(day(-5), day(3));
        let result = BacktestEngine::new(before_data).run(&series, &mut strategy);
        assert!(matches!(result, Err(AnalyticsError::Range(_))));

        let inverted = scenario_config().with_range(day(3), day(1));
        let result = BacktestEngine::new(inverted).run(&series, &mut strategy);
        assert!(matches!(result, Err(AnalyticsError::Range(_))));
    }

    #[test]
    fn test_insufficient_warmup_history() {
        let config = scenario_config().with_range(day(1), day(4));
        let mut strategy = Scripted::new(vec![]);
        strategy.warmup = 3;

        let result = BacktestEngine::new(config).run(&scenario_series(), &mut strategy);
        assert!(matches!(
            result,
            Err(AnalyticsError::InsufficientData { required: 3, actual: 1 })
        ));
    }

    #[test]
    fn test_default_start_skips_warmup() {
        let bars = generate_synthetic_bars("BTC", 120, 100.0, 3);
        let series = MarketDataSeries::new(bars.clone()).unwrap();
        let mut strategy = SmaCrossover::new(5, 20);

        let outcome = BacktestEngine::new(BacktestConfig::default())
            .run(&series, &mut strategy)
            .unwrap();

        assert_eq!(outcome.equity_curve().len(), 120 - 19);
        assert_eq!(outcome.equity_curve()[0].timestamp, bars[19].timestamp);
    }

    #[test]
    fn test_multi_symbol_equity_timestamps() {
        let mut bars = flat_bars("BTC", 0, &[100.0, 101.0, 102.0, 103.0, 104.0]);
        bars.extend(flat_bars("ETH", 2, &[10.0, 11.0, 12.0, 13.0, 14.0]));
        let series = MarketDataSeries::new(bars).unwrap();
        let mut strategy = BuyAndHold::new();
        let config = BacktestConfig::default().with_position_size(0.4);

        let outcome = BacktestEngine::new(config).run(&series, &mut strategy).unwrap();

        let stamps: Vec<_> = outcome.equity_curve().iter().map(|p| p.timestamp).collect();
        let expected: Vec<_> = (0..7).map(day).collect();
        assert_eq!(stamps, expected);
        assert_eq!(outcome.bars_processed, 10);
        assert_eq!(outcome.trades.len(), 2);
    }

    #[test]
    fn test_deterministic_runs() {
        let series = MarketDataSeries::new(generate_synthetic_bars("BTC", 200, 100.0, 9)).unwrap();
        let engine = BacktestEngine::new(BacktestConfig::crypto_daily());

        let a = engine.run(&series, &mut SmaCrossover::new(5, 20)).unwrap();
        let b = engine.run(&series, &mut SmaCrossover::new(5, 20)).unwrap();

        assert_eq!(a.trades, b.trades);
        assert_eq!(a.equity_curve(), b.equity_curve());
    }

    #[test]
    fn test_cancelled_before_first_bar() {
        let token = CancellationToken::new();
        token.cancel();

        let outcome = BacktestEngine::new(scenario_config())
            .run_with_cancel(&scenario_series(), &mut BuyAndHold::new(), &token)
            .unwrap();

        assert!(outcome.is_cancelled());
        assert!(outcome.equity_curve().is_empty());
        assert_eq!(outcome.bars_processed, 0);
    }

    #[test]
    fn test_unknown_symbol() {
        let config = scenario_config().with_symbol("DOGE");
        let result = BacktestEngine::new(config).run(&scenario_series(), &mut BuyAndHold::new());
        assert!(matches!(result, Err(AnalyticsError::InvalidParameter(_))));
    }
}
