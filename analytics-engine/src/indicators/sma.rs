use std::collections::VecDeque;

/// Rolling simple moving average over the last `period` values
#[derive(Debug, Clone)]
pub struct RollingSma {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
}

impl RollingSma {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            window: VecDeque::with_capacity(period.max(1)),
            sum: 0.0,
        }
    }

    pub fn update(&mut self, price: f64) {
        self.window.push_back(price);
        self.sum += price;
        if self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }
    }

    /// None until `period` values have been seen
    pub fn value(&self) -> Option<f64> {
        (self.window.len() == self.period).then(|| self.sum / self.period as f64)
    }
}

/// Calculate Simple Moving Average
///
/// Returns a vector of the same length as `prices`, None before the window is full.
pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; prices.len()];
    }
    let mut sma = RollingSma::new(period);
    prices
        .iter()
        .map(|&p| {
            sma.update(p);
            sma.value()
        })
        .collect()
}
