use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{AnalyticsError, EquityPoint, Fill, Position, Result, Side, Trade};

/// Quantities below this are treated as flat
const QTY_EPSILON: f64 = 1e-9;

/// Cash, holdings and equity curve of one backtest run
#[derive(Debug, Clone)]
pub struct Portfolio {
    initial_capital: f64,
    cash: f64,
    positions: BTreeMap<String, Position>,
    equity_curve: Vec<EquityPoint>,
    trades: Vec<Trade>,
    realized_pnl: f64,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            cash: initial_capital,
            positions: BTreeMap::new(),
            equity_curve: Vec::new(),
            trades: Vec::new(),
            realized_pnl: 0.0,
        }
    }

    /// Cash plus market value of every holding at its last mark
    pub fn equity(&self) -> f64 {
        self.cash + self.positions_value()
    }

    pub fn positions_value(&self) -> f64 {
        self.positions.values().map(Position::market_value).sum()
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn positions(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Held quantity, 0 when flat
    pub fn quantity(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map(|p| p.quantity).unwrap_or(0.0)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    /// Mark a holding to `price`. No-op when flat.
    pub fn mark(&mut self, symbol: &str, price: f64) {
        if let Some(pos) = self.positions.get_mut(symbol) {
            pos.last_price = price;
        }
    }

    /// Append the current equity. A point for an already recorded timestamp
    /// replaces it, so the curve stays strictly increasing.
    pub fn record_equity(&mut self, timestamp: DateTime<Utc>) {
        let point = EquityPoint {
            timestamp,
            equity: self.equity(),
        };
        match self.equity_curve.last_mut() {
            Some(last) if last.timestamp == timestamp => *last = point,
            _ => self.equity_curve.push(point),
        }
    }

    /// Reject fills the book cannot absorb: sells beyond the held quantity
    /// (long-only) and buys costing more than the available cash.
    pub fn check_fill(&self, fill: &Fill) -> Result<()> {
        match fill.side {
            Side::Sell => {
                let held = self.quantity(&fill.symbol);
                if fill.filled_qty > held + QTY_EPSILON {
                    return Err(AnalyticsError::InvalidSignal {
                        symbol: fill.symbol.clone(),
                        reason: format!("sell {:.8} exceeds position {:.8}", fill.filled_qty, held),
                    });
                }
            }
            Side::Buy => {
                let cost = fill.notional() + fill.commission;
                if cost - self.cash > QTY_EPSILON * self.cash.abs().max(1.0) {
                    return Err(AnalyticsError::InvalidSignal {
                        symbol: fill.symbol.clone(),
                        reason: format!("buy costs {:.2}, cash available {:.2}", cost, self.cash),
                    });
                }
            }
        }
        Ok(())
    }

    /// Apply a fill produced at bar `bar_index`. Returns the closed trade
    /// when the fill reduces or closes a holding.
    pub fn apply_fill(&mut self, fill: &Fill, bar_index: usize) -> Result<Option<Trade>> {
        self.check_fill(fill)?;
        match fill.side {
            Side::Buy => {
                self.buy(fill, bar_index);
                Ok(None)
            }
            Side::Sell => Ok(self.sell(fill, bar_index)),
        }
    }

    fn buy(&mut self, fill: &Fill, bar_index: usize) {
        let cost = fill.notional() + fill.commission;
        self.cash -= cost;

        match self.positions.get_mut(&fill.symbol) {
            Some(pos) => {
                let total_qty = pos.quantity + fill.filled_qty;
                pos.cost_basis = (pos.cost_basis * pos.quantity + cost) / total_qty;
                pos.quantity = total_qty;
            }
            None => {
                self.positions.insert(
                    fill.symbol.clone(),
                    Position {
                        symbol: fill.symbol.clone(),
                        quantity: fill.filled_qty,
                        cost_basis: cost / fill.filled_qty,
                        // Provisional until the next mark
                        last_price: fill.fill_price,
                        entry_fill: fill.clone(),
                        entry_bar: bar_index,
                    },
                );
            }
        }
    }

    fn sell(&mut self, fill: &Fill, bar_index: usize) -> Option<Trade> {
        let pos = self.positions.get_mut(&fill.symbol)?;
        let quantity = fill.filled_qty.min(pos.quantity);

        let proceeds = quantity * fill.fill_price - fill.commission;
        let cost = quantity * pos.cost_basis;
        let pnl = proceeds - cost;

        self.cash += proceeds;
        self.realized_pnl += pnl;
        pos.quantity -= quantity;

        let trade = Trade {
            symbol: fill.symbol.clone(),
            entry_fill: pos.entry_fill.clone(),
            exit_fill: fill.clone(),
            quantity,
            pnl,
            pnl_percent: if cost > 0.0 { pnl / cost * 100.0 } else { 0.0 },
            duration_bars: bar_index.saturating_sub(pos.entry_bar),
        };

        if pos.quantity <= QTY_EPSILON {
            self.positions.remove(&fill.symbol);
        }

        self.trades.push(trade.clone());
        Some(trade)
    }

    /// Quantity affordable with `pct × confidence` of current cash at an
    /// all-in unit cost (slippage and commission included)
    pub fn position_size(&self, unit_cost: f64, pct: f64, confidence: f64) -> f64 {
        if !(unit_cost > 0.0) {
            return 0.0;
        }
        (self.cash.max(0.0) * pct * confidence) / unit_cost
    }
}
