//! Order execution simulator
//!
//! Turns an order into a [`Fill`] against one bar:
//! - Market orders fill at the reference price moved against the trader by the slippage rate
//! - Limit orders fill at the limit price only when the bar traded through it
//! - Commission is charged on filled notional
//! - Optional volume participation cap produces partial fills
//!
//! The simulator never touches the portfolio; the engine applies the fill.

use std::fmt;
use std::sync::Arc;

use common::{BacktestConfig, Bar, Fill, Side};

/// Slippage rate as a function of (order size, bar volume)
pub type SlippageFn = dyn Fn(f64, f64) -> f64 + Send + Sync;

/// Slippage model
#[derive(Clone)]
pub enum SlippageModel {
    /// Constant fraction of the reference price
    Fixed(f64),
    /// `base_rate + impact * order_size / bar_volume`
    VolumeDependent { base_rate: f64, impact: f64 },
    /// Caller-supplied rate function
    Custom(Arc<SlippageFn>),
}

impl SlippageModel {
    pub fn custom(f: impl Fn(f64, f64) -> f64 + Send + Sync + 'static) -> Self {
        SlippageModel::Custom(Arc::new(f))
    }

    /// Slippage rate for an order, clamped to [0, 1)
    pub fn rate(&self, order_size: f64, bar_volume: f64) -> f64 {
        let rate = match self {
            SlippageModel::Fixed(rate) => *rate,
            SlippageModel::VolumeDependent { base_rate, impact } => {
                let participation = if bar_volume > 0.0 {
                    order_size / bar_volume
                } else {
                    1.0
                };
                base_rate + impact * participation
            }
            SlippageModel::Custom(f) => f(order_size, bar_volume),
        };
        if rate.is_finite() {
            rate.clamp(0.0, 0.999_999)
        } else {
            0.0
        }
    }
}

impl fmt::Debug for SlippageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlippageModel::Fixed(rate) => f.debug_tuple("Fixed").field(rate).finish(),
            SlippageModel::VolumeDependent { base_rate, impact } => f
                .debug_struct("VolumeDependent")
                .field("base_rate", base_rate)
                .field("impact", impact)
                .finish(),
            SlippageModel::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Default for SlippageModel {
    fn default() -> Self {
        SlippageModel::Fixed(0.0005)
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderType {
    Market,
    Limit(f64),
}

/// Which bar price a market order is referenced to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferencePrice {
    Open,
    Close,
}

impl ReferencePrice {
    pub fn of(self, bar: &Bar) -> f64 {
        match self {
            ReferencePrice::Open => bar.open,
            ReferencePrice::Close => bar.close,
        }
    }
}

/// Order submitted to the simulator
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub order_id: u64,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub order_type: OrderType,
    /// Index of the bar whose signal produced the order
    pub signal_bar: usize,
}

/// Execution simulator with commission and slippage models
#[derive(Debug, Clone)]
pub struct ExecutionSimulator {
    commission_rate: f64,
    slippage: SlippageModel,
    max_volume_participation: Option<f64>,
}

impl ExecutionSimulator {
    pub fn new(commission_rate: f64, slippage: SlippageModel) -> Self {
        Self {
            commission_rate,
            slippage,
            max_volume_participation: None,
        }
    }

    pub fn from_config(config: &BacktestConfig) -> Self {
        Self {
            commission_rate: config.commission_rate,
            slippage: SlippageModel::Fixed(config.slippage_rate),
            max_volume_participation: config.max_volume_participation,
        }
    }

    pub fn with_slippage_model(mut self, model: SlippageModel) -> Self {
        self.slippage = model;
        self
    }

    pub fn with_volume_cap(mut self, participation: f64) -> Self {
        self.max_volume_participation = Some(participation);
        self
    }

    pub fn commission_rate(&self) -> f64 {
        self.commission_rate
    }

    /// Fill `order` against `bar`.
    ///
    /// Returns None when a limit price is outside the bar's range or the
    /// volume cap leaves nothing to fill.
    pub fn simulate(
        &self,
        order: &OrderRequest,
        bar: &Bar,
        reference: ReferencePrice,
    ) -> Option<Fill> {
        if !(order.quantity > 0.0) {
            return None;
        }

        let filled_qty = self.fill_quantity(order.quantity, bar.volume);
        if !(filled_qty > 0.0) {
            return None;
        }

        let (fill_price, slippage) = match order.order_type {
            OrderType::Market => {
                let base = reference.of(bar);
                let rate = self.slippage.rate(filled_qty, bar.volume);
                let price = base * (1.0 + order.side.sign() * rate);
                (price, (price - base).abs())
            }
            OrderType::Limit(limit) => {
                if !bar.contains_price(limit) {
                    return None;
                }
                (limit, 0.0)
            }
        };

        Some(Fill {
            order_id: order.order_id,
            symbol: order.symbol.clone(),
            side: order.side,
            requested_qty: order.quantity,
            filled_qty,
            fill_price,
            commission: filled_qty * fill_price * self.commission_rate,
            slippage,
            timestamp: bar.timestamp,
        })
    }

    /// All-in cost per unit of buying at `reference_price`, used for sizing
    pub fn unit_cost(&self, reference_price: f64, order_size: f64, bar_volume: f64) -> f64 {
        let rate = self.slippage.rate(order_size, bar_volume);
        reference_price * (1.0 + rate) * (1.0 + self.commission_rate)
    }

    fn fill_quantity(&self, quantity: f64, bar_volume: f64) -> f64 {
        match self.max_volume_participation {
            Some(cap) => quantity.min(bar_volume * cap),
            None => quantity,
        }
    }
}

/// Orders waiting for the next bar of their symbol (next-bar-open execution)
#[derive(Debug, Default)]
pub struct OrderQueue {
    pending: Vec<OrderRequest>,
}

impl OrderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, order: OrderRequest) {
        self.pending.push(order);
    }

    /// Remove and return the orders for `symbol`, in submission order
    pub fn take_for(&mut self, symbol: &str) -> Vec<OrderRequest> {
        let (ready, pending): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|o| o.symbol == symbol);
        self.pending = pending;
        ready
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop everything still queued
    pub fn drain(&mut self) -> Vec<OrderRequest> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    fn sample_bar(close: f64, volume: f64) -> Bar {
        Bar::new(
            "BTC",
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            close - 0.5,
            close + 1.0,
            close - 1.0,
            close,
            volume,
        )
    }

    fn order(side: Side, quantity: f64, order_type: OrderType) -> OrderRequest {
        OrderRequest {
            order_id: 1,
            symbol: "BTC".to_string(),
            side,
            quantity,
            order_type,
            signal_bar: 0,
        }
    }

    #[test]
    fn test_market_fill_slippage_direction() {
        let sim = ExecutionSimulator::new(0.001, SlippageModel::Fixed(0.01));
        let bar = sample_bar(100.0, 1_000_000.0);

        let buy = sim
            .simulate(&order(Side::Buy, 10.0, OrderType::Market), &bar, ReferencePrice::Close)
            .unwrap();
        let sell = sim
            .simulate(&order(Side::Sell, 10.0, OrderType::Market), &bar, ReferencePrice::Close)
            .unwrap();

        assert_relative_eq!(buy.fill_price, 101.0, epsilon = 1e-12);
        assert_relative_eq!(sell.fill_price, 99.0, epsilon = 1e-12);
        assert_relative_eq!(buy.slippage, 1.0, epsilon = 1e-12);
        assert_relative_eq!(buy.commission, 10.0 * 101.0 * 0.001, epsilon = 1e-12);
        assert_eq!(buy.filled_qty, 10.0);
    }

    #[test]
    fn test_open_reference() {
        let sim = ExecutionSimulator::new(0.0, SlippageModel::Fixed(0.0));
        let bar = sample_bar(100.0, 1_000_000.0);

        let fill = sim
            .simulate(&order(Side::Buy, 1.0, OrderType::Market), &bar, ReferencePrice::Open)
            .unwrap();
        assert_eq!(fill.fill_price, 99.5);
    }

    #[test]
    fn test_limit_fills_only_inside_range() {
        let sim = ExecutionSimulator::new(0.001, SlippageModel::Fixed(0.01));
        let bar = sample_bar(100.0, 1_000_000.0);

        let limit_buy = |price| order(Side::Buy, 5.0, OrderType::Limit(price));
        let inside = sim.simulate(&limit_buy(99.5), &bar, ReferencePrice::Close);
        let outside = sim.simulate(&limit_buy(98.0), &bar, ReferencePrice::Close);

        let fill = inside.unwrap();
        assert_eq!(fill.fill_price, 99.5);
        assert_eq!(fill.slippage, 0.0);
        assert!(outside.is_none());
    }

    #[test]
    fn test_volume_cap_partial_fill() {
        let sim = ExecutionSimulator::new(0.0, SlippageModel::Fixed(0.0)).with_volume_cap(0.01);
        let bar = sample_bar(100.0, 100_000.0);

        let fill = sim
            .simulate(&order(Side::Buy, 2000.0, OrderType::Market), &bar, ReferencePrice::Close)
            .unwrap();

        assert_eq!(fill.requested_qty, 2000.0);
        assert_eq!(fill.filled_qty, 1000.0);
    }

    #[test]
    fn test_volume_dependent_slippage() {
        let model = SlippageModel::VolumeDependent {
            base_rate: 0.0005,
            impact: 0.1,
        };

        assert_relative_eq!(model.rate(0.0, 1000.0), 0.0005);
        assert_relative_eq!(model.rate(100.0, 1000.0), 0.0105);
        assert!(model.rate(10.0, 0.0) < 1.0);
    }

    #[test]
    fn test_custom_slippage_is_clamped() {
        let sim = ExecutionSimulator::new(0.0, SlippageModel::Fixed(0.0))
            .with_slippage_model(SlippageModel::custom(|size, _volume| size * 0.001));
        let bar = sample_bar(100.0, 1_000_000.0);

        let fill = sim
            .simulate(&order(Side::Sell, 20.0, OrderType::Market), &bar, ReferencePrice::Close)
            .unwrap();
        assert_relative_eq!(fill.fill_price, 98.0, epsilon = 1e-12);
        assert_eq!(SlippageModel::custom(|_, _| f64::NAN).rate(1.0, 1.0), 0.0);
        assert!(SlippageModel::custom(|_, _| 5.0).rate(1.0, 1.0) < 1.0);
    }

    #[test]
    fn test_order_queue_per_symbol() {
        let mut queue = OrderQueue::new();
        queue.push(order(Side::Buy, 1.0, OrderType::Market));
        let mut eth = order(Side::Buy, 2.0, OrderType::Market);
        eth.symbol = "ETH".to_string();
        queue.push(eth);

        assert_eq!(queue.len(), 2);
        let ready = queue.take_for("BTC");
        assert_eq!(ready.len(), 1);
        assert_eq!(queue.len(), 1);
        assert!(queue.take_for("BTC").is_empty());
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.is_empty());
    }
}
