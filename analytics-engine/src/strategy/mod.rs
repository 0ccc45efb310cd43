//! Pluggable trading strategies
//!
//! The engine only knows the [`Strategy`] trait. Concrete strategies are
//! picked at configuration time through [`StrategyKind`].

pub mod buy_and_hold;
pub mod rsi_reversion;
pub mod sma_crossover;

pub use buy_and_hold::BuyAndHold;
pub use rsi_reversion::RsiReversion;
pub use sma_crossover::SmaCrossover;

use common::{Bar, Signal};
use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorCache;

/// Signal source driven once per bar per symbol
pub trait Strategy {
    fn name(&self) -> &str;

    /// Bars of history that must exist before the first analyzed bar
    fn warmup_bars(&self) -> usize {
        0
    }

    /// Produce a signal for `bar`.
    ///
    /// `history` holds only the symbol's bars strictly before `bar`.
    fn analyze(&mut self, bar: &Bar, history: &[Bar], cache: &mut IndicatorCache) -> Signal;

    /// Called after each fill of this strategy's orders with the symbol's
    /// resulting position size. Rejected, dropped and unfilled orders never
    /// reach it.
    fn on_position(&mut self, _symbol: &str, _quantity: f64) {}
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn warmup_bars(&self) -> usize {
        (**self).warmup_bars()
    }

    fn analyze(&mut self, bar: &Bar, history: &[Bar], cache: &mut IndicatorCache) -> Signal {
        (**self).analyze(bar, history, cache)
    }

    fn on_position(&mut self, symbol: &str, quantity: f64) {
        (**self).on_position(symbol, quantity)
    }
}

/// Strategy selection for config files and the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyKind {
    SmaCrossover { fast: usize, slow: usize },
    RsiReversion { period: usize, oversold: f64, overbought: f64 },
    BuyAndHold,
}

impl StrategyKind {
    pub fn build(&self) -> Box<dyn Strategy + Send> {
        match *self {
            StrategyKind::SmaCrossover { fast, slow } => Box::new(SmaCrossover::new(fast, slow)),
            StrategyKind::RsiReversion {
                period,
                oversold,
                overbought,
            } => Box::new(RsiReversion::new(period, oversold, overbought)),
            StrategyKind::BuyAndHold => Box::new(BuyAndHold::new()),
        }
    }
}

impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::SmaCrossover { fast: 20, slow: 50 }
    }
}
