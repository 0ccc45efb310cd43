/// Relative Strength Index with Wilder's smoothing
///
/// The first `period` price changes seed simple averages of gains and losses;
/// later changes are smoothed with alpha = 1 / period.
#[derive(Debug, Clone)]
pub struct WilderRsi {
    period: usize,
    prev_price: Option<f64>,
    changes: usize,
    avg_gain: f64,
    avg_loss: f64,
}

impl WilderRsi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_price: None,
            changes: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        }
    }

    pub fn update(&mut self, price: f64) {
        let Some(prev) = self.prev_price.replace(price) else {
            return;
        };
        let delta = price - prev;
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        self.changes += 1;

        if self.changes <= self.period {
            // Accumulate the seed window, then turn sums into averages
            self.avg_gain += gain;
            self.avg_loss += loss;
            if self.changes == self.period {
                self.avg_gain /= self.period as f64;
                self.avg_loss /= self.period as f64;
            }
        } else {
            let alpha = 1.0 / self.period as f64;
            self.avg_gain = self.avg_gain * (1.0 - alpha) + gain * alpha;
            self.avg_loss = self.avg_loss * (1.0 - alpha) + loss * alpha;
        }
    }

    /// None until `period` price changes have been seen
    pub fn value(&self) -> Option<f64> {
        if self.changes < self.period {
            return None;
        }
        if self.avg_loss == 0.0 {
            return Some(100.0);
        }
        let rs = self.avg_gain / self.avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

/// Calculate RSI for a full price path; warmup values are 50.0
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    let mut rsi = WilderRsi::new(period);
    prices
        .iter()
        .map(|&p| {
            rsi.update(p);
            rsi.value().unwrap_or(50.0)
        })
        .collect()
}
