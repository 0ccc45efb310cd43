use std::collections::HashSet;

use common::{Bar, Signal};

use crate::indicators::{IndicatorCache, IndicatorKind};

/// Long when the fast SMA crosses above the slow SMA, flat when it crosses back below.
///
/// Long/flat state follows filled positions, so a rejected entry never
/// produces an exit signal.
#[derive(Debug, Clone)]
pub struct SmaCrossover {
    fast: usize,
    slow: usize,
    long: HashSet<String>,
}

impl SmaCrossover {
    pub fn new(fast: usize, slow: usize) -> Self {
        let (fast, slow) = (fast.max(1), slow.max(1));
        Self {
            fast: fast.min(slow),
            slow: fast.max(slow),
            long: HashSet::new(),
        }
    }
}

impl super::Strategy for SmaCrossover {
    fn name(&self) -> &str {
        "sma_crossover"
    }

    // Previous-bar slow SMA needs `slow` closes of history; the current bar supplies one more
    fn warmup_bars(&self) -> usize {
        self.slow - 1
    }

    fn analyze(&mut self, bar: &Bar, history: &[Bar], cache: &mut IndicatorCache) -> Signal {
        let fast = IndicatorKind::Sma(self.fast);
        let slow = IndicatorKind::Sma(self.slow);

        let (Some(prev_fast), Some(prev_slow)) = (
            cache.previous_value(&bar.symbol, fast, history),
            cache.previous_value(&bar.symbol, slow, history),
        ) else {
            return Signal::hold();
        };
        let (Some(cur_fast), Some(cur_slow)) = (
            cache.value(&bar.symbol, fast, history, bar),
            cache.value(&bar.symbol, slow, history, bar),
        ) else {
            return Signal::hold();
        };

        let is_long = self.long.contains(&bar.symbol);
        let spread = if cur_slow != 0.0 {
            ((cur_fast - cur_slow) / cur_slow).abs()
        } else {
            0.0
        };
        // 1% separation between the averages counts as full conviction
        let confidence = (spread * 100.0).clamp(0.1, 1.0);

        if !is_long && prev_fast <= prev_slow && cur_fast > cur_slow {
            return Signal::buy(confidence).with_reason(format!(
                "SMA({}) {:.2} crossed above SMA({}) {:.2}",
                self.fast, cur_fast, self.slow, cur_slow
            ));
        }
        if is_long && prev_fast >= prev_slow && cur_fast < cur_slow {
            return Signal::sell(1.0).with_reason(format!(
                "SMA({}) {:.2} crossed below SMA({}) {:.2}",
                self.fast, cur_fast, self.slow, cur_slow
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
