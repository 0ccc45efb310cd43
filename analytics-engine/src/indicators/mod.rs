//! Technical indicators with incremental state, served through a run-scoped cache

pub mod cache;
pub mod rsi;
pub mod sma;

pub use cache::IndicatorCache;
pub use rsi::{calculate_rsi, WilderRsi};
pub use sma::{calculate_sma, RollingSma};

/// Indicator identity used as a cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorKind {
    Sma(usize),
    Rsi(usize),
}

/// Incremental state for one indicator
#[derive(Debug, Clone)]
pub enum IndicatorState {
    Sma(RollingSma),
    Rsi(WilderRsi),
}

impl IndicatorState {
    pub fn new(kind: IndicatorKind) -> Self {
        match kind {
            IndicatorKind::Sma(period) => IndicatorState::Sma(RollingSma::new(period)),
            IndicatorKind::Rsi(period) => IndicatorState::Rsi(WilderRsi::new(period)),
        }
    }

    pub fn update(&mut self, price: f64) {
        match self {
            IndicatorState::Sma(s) => s.update(price),
            IndicatorState::Rsi(s) => s.update(price),
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            IndicatorState::Sma(s) => s.value(),
            IndicatorState::Rsi(s) => s.value(),
        }
    }
}
