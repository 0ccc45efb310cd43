use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Whether `price` lies inside the bar's traded range
    pub fn contains_price(&self, price: f64) -> bool {
        self.low <= price && price <= self.high
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells. Adverse price moves go in this direction.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

/// Signal action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// Trading signal produced by a strategy for one bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    /// Conviction in [0, 1]; scales position size when no target quantity is given
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_quantity: Option<f64>,
    /// Turns the order into a limit order at this price
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub reason: String,
}

impl Signal {
    pub fn hold() -> Self {
        Self {
            action: SignalAction::Hold,
            confidence: 0.0,
            target_quantity: None,
            limit_price: None,
            reason: String::new(),
        }
    }

    pub fn buy(confidence: f64) -> Self {
        Self {
            action: SignalAction::Buy,
            confidence: confidence.clamp(0.0, 1.0),
            target_quantity: None,
            limit_price: None,
            reason: String::new(),
        }
    }

    pub fn sell(confidence: f64) -> Self {
        Self {
            action: SignalAction::Sell,
            confidence: confidence.clamp(0.0, 1.0),
            target_quantity: None,
            limit_price: None,
            reason: String::new(),
        }
    }

    pub fn with_quantity(mut self, quantity: f64) -> Self {
        self.target_quantity = Some(quantity);
        self
    }

    pub fn with_limit(mut self, price: f64) -> Self {
        self.limit_price = Some(price);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn is_hold(&self) -> bool {
        self.action == SignalAction::Hold
    }
}

/// Simulated execution of one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: u64,
    pub symbol: String,
    pub side: Side,
    pub requested_qty: f64,
    pub filled_qty: f64,
    pub fill_price: f64,
    pub commission: f64,
    /// Per-unit price difference between the reference price and the fill price
    pub slippage: f64,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    /// Gross traded value, excluding commission
    pub fn notional(&self) -> f64 {
        self.filled_qty * self.fill_price
    }
}

/// Closed round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub entry_fill: Fill,
    pub exit_fill: Fill,
    /// Quantity closed by this trade (may be less than the entry fill on partial exits)
    pub quantity: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub duration_bars: usize,
}

/// Open holding in one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    /// Average entry price per unit, commission included
    pub cost_basis: f64,
    pub last_price: f64,
    pub entry_fill: Fill,
    pub entry_bar: usize,
}

impl Position {
    pub fn market_value(&self) -> f64 {
        self.quantity * self.last_price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        (self.last_price - self.cost_basis) * self.quantity
    }

    pub fn unrealized_pnl_pct(&self) -> f64 {
        let cost = self.cost_basis * self.quantity;
        if cost == 0.0 {
            0.0
        } else {
            self.unrealized_pnl() / cost * 100.0
        }
    }
}

/// One point of the equity curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// Performance metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    // Returns
    pub total_return: f64,
    pub annual_return: f64,
    // Risk metrics
    pub volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    /// Non-positive fraction of the running peak
    pub max_drawdown: f64,
    pub max_drawdown_duration_bars: usize,
    pub calmar: f64,
    // Trade statistics
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    /// `f64::INFINITY` when there are winners and no losers
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub expectancy: f64,
    pub avg_trade_duration: f64,
}

impl PerformanceReport {
    pub fn profit_factor_unbounded(&self) -> bool {
        self.profit_factor.is_infinite()
    }
}

/// VaR estimation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarMethod {
    #[default]
    Historical,
    Parametric,
    MonteCarlo,
}

/// VaR and CVaR, both reported as non-positive returns
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarEstimate {
    pub var: f64,
    pub cvar: f64,
}

/// Outcome of shocking the portfolio with one stress scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_name: String,
    pub starting_value: f64,
    pub stressed_value: f64,
    /// Positive for losses
    pub loss_amount: f64,
    pub loss_percent: f64,
}

/// Risk report for one portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub var95: f64,
    pub cvar95: f64,
    pub method: VarMethod,
    pub confidence: f64,
    pub lookback_days: usize,
    pub sample_count: usize,
    pub stress_results: Vec<ScenarioResult>,
}

/// How an optimizer call terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    ClosedForm,
    Converged,
    MaxIterations,
    Cancelled,
}

/// Mean-variance optimization output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub weights: BTreeMap<String, f64>,
    pub expected_return: f64,
    pub expected_volatility: f64,
    pub sharpe: f64,
    pub status: SolverStatus,
    pub iterations: usize,
}

/// One point of the efficient frontier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierPoint {
    pub target_return: f64,
    pub weights: BTreeMap<String, f64>,
    pub expected_return: f64,
    pub expected_volatility: f64,
}
