use std::collections::HashSet;

use common::{Bar, Signal};

use crate::indicators::{IndicatorCache, IndicatorKind};

/// RSI mean reversion: buy oversold, exit overbought.
///
/// Stays flat until an entry actually fills, so an oversold reading keeps
/// signalling while earlier buys go unfilled.
#[derive(Debug, Clone)]
pub struct RsiReversion {
    period: usize,
    oversold: f64,
    overbought: f64,
    long: HashSet<String>,
}

impl RsiReversion {
    pub fn new(period: usize, oversold: f64, overbought: f64) -> Self {
        Self {
            period: period.max(1),
            oversold,
            overbought,
            long: HashSet::new(),
        }
    }
}

impl super::Strategy for RsiReversion {
    fn name(&self) -> &str {
        "rsi_reversion"
    }

    fn warmup_bars(&self) -> usize {
        self.period
    }

    fn analyze(&mut self, bar: &Bar, history: &[Bar], cache: &mut IndicatorCache) -> Signal {
        let Some(rsi) = cache.value(&bar.symbol, IndicatorKind::Rsi(self.period), history, bar)
        else {
            return Signal::hold();
        };

        if self.long.contains(&bar.symbol) {
            if rsi >= self.overbought {
                let strength = if self.overbought < 100.0 {
                    (rsi - self.overbought) / (100.0 - self.overbought)
                } else {
                    1.0
                };
                return Signal::sell(strength.max(0.5)).with_reason(format!(
                    "RSI({:.1}) >= {:.0} - take profit",
                    rsi, self.overbought
                ));
            }
        } else if rsi <= self.oversold {
            // Lower RSI = stronger signal
            let strength = if self.oversold > 0.0 {
                1.0 - rsi / self.oversold
            } else {
                1.0
            };
            return Signal::buy(strength.max(0.25)).with_reason(format!(
                "RSI({:.1}) <= {:.0}",
                rsi, self.oversold
            ));
        }
        Signal::hold()
    }

    fn on_position(&mut self, symbol: &str, quantity: f64) {
        if quantity > 0.0 {
            self.long.insert(symbol.to_string());
        } else {
            self.long.remove(symbol);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::bars_from_closes;
    use crate::strategy::Strategy;
    use common::SignalAction;

    #[test]
    fn test_buy_on_selloff_then_exit_on_rally() {
        let bars = bars_from_closes("BTC", &[100.0, 99.0, 95.0, 90.0, 94.0, 99.0, 104.0]);
        let mut strategy = RsiReversion::new(2, 30.0, 75.0);
        let mut cache = IndicatorCache::new();

        let signals: Vec<Signal> = (0..bars.len())
            .map(|i| {
                let signal = strategy.analyze(&bars[i], &bars[..i], &mut cache);
                match signal.action {
                    SignalAction::Buy => strategy.on_position("BTC", 1.0),
                    SignalAction::Sell => strategy.on_position("BTC", 0.0),
                    SignalAction::Hold => {}
                }
                signal
            })
            .collect();

        assert_eq!(signals[0].action, SignalAction::Hold);
        assert_eq!(signals[2].action, SignalAction::Buy);
        assert!(signals[2].confidence > 0.0);
        assert_eq!(signals[3].action, SignalAction::Hold);
        let exit = signals.iter().position(|s| s.action == SignalAction::Sell).unwrap();
        assert!(exit > 3);
    }

    #[test]
    fn test_unfilled_entry_signals_again() {
        let bars = bars_from_closes("BTC", &[100.0, 99.0, 95.0, 90.0]);
        let mut strategy = RsiReversion::new(2, 30.0, 75.0);
        let mut cache = IndicatorCache::new();

        let actions: Vec<SignalAction> = (0..bars.len())
            .map(|i| strategy.analyze(&bars[i], &bars[..i], &mut cache).action)
            .collect();

        assert_eq!(actions[2], SignalAction::Buy);
        assert_eq!(actions[3], SignalAction::Buy);
    }

    #[test]
    fn test_no_buy_when_rsi_high() {
        let bars = bars_from_closes("BTC", &[10.0, 11.0, 12.0, 13.0]);
        let mut strategy = RsiReversion::new(2, 30.0, 75.0);
        let mut cache = IndicatorCache::new();

        for i in 0..bars.len() {
            let signal = strategy.analyze(&bars[i], &bars[..i], &mut cache);
            assert_ne!(signal.action, SignalAction::Buy);
        }
    }
}
