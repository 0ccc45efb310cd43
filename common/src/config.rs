use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};
use crate::types::VarMethod;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
pub const CALENDAR_DAYS_PER_YEAR: f64 = 365.0;

/// When a signal's order is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillTiming {
    /// Fill against the signal bar, market orders referenced to its close
    #[default]
    SameBarClose,
    /// Queue the order and fill on the symbol's next bar, market orders referenced to its open
    NextBarOpen,
}

/// Backtest parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub slippage_rate: f64,
    /// Symbols to replay; empty means every symbol in the series
    pub symbols: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    pub fill_timing: FillTiming,
    /// Fraction of cash committed by a full-confidence buy without a target quantity
    pub position_size_pct: f64,
    /// Cap on filled quantity as a fraction of bar volume (partial fills)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_volume_participation: Option<f64>,
    /// Liquidate open positions on the last bar
    pub close_at_end: bool,
    pub bars_per_year: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10000.0,
            commission_rate: 0.001,
            slippage_rate: 0.0005,
            symbols: BTreeSet::new(),
            start: None,
            end: None,
            fill_timing: FillTiming::SameBarClose,
            position_size_pct: 0.95,
            max_volume_participation: None,
            close_at_end: true,
            bars_per_year: TRADING_DAYS_PER_YEAR,
        }
    }
}

impl BacktestConfig {
    /// Preset for daily crypto bars (markets trade every calendar day)
    pub fn crypto_daily() -> Self {
        Self {
            bars_per_year: CALENDAR_DAYS_PER_YEAR,
            ..Default::default()
        }
    }

    /// Preset with zero trading costs
    pub fn frictionless() -> Self {
        Self {
            commission_rate: 0.0,
            slippage_rate: 0.0,
            ..Default::default()
        }
    }

    pub fn with_capital(mut self, capital: f64) -> Self {
        self.initial_capital = capital;
        self
    }

    pub fn with_costs(mut self, commission_rate: f64, slippage_rate: f64) -> Self {
        self.commission_rate = commission_rate;
        self.slippage_rate = slippage_rate;
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbols.insert(symbol.into());
        self
    }

    pub fn with_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn with_fill_timing(mut self, timing: FillTiming) -> Self {
        self.fill_timing = timing;
        self
    }

    pub fn with_position_size(mut self, pct: f64) -> Self {
        self.position_size_pct = pct;
        self
    }

    pub fn with_volume_cap(mut self, participation: f64) -> Self {
        self.max_volume_participation = Some(participation);
        self
    }

    pub fn without_close_at_end(mut self) -> Self {
        self.close_at_end = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.initial_capital > 0.0) {
            return Err(AnalyticsError::InvalidParameter(format!(
                "initial_capital must be > 0, got {}",
                self.initial_capital
            )));
        }
        check_unit_rate("commission_rate", self.commission_rate)?;
        check_unit_rate("slippage_rate", self.slippage_rate)?;
        if !(self.position_size_pct > 0.0 && self.position_size_pct <= 1.0) {
            return Err(AnalyticsError::InvalidParameter(format!(
                "position_size_pct must be in (0, 1], got {}",
                self.position_size_pct
            )));
        }
        if let Some(cap) = self.max_volume_participation {
            if !(cap > 0.0 && cap <= 1.0) {
                return Err(AnalyticsError::InvalidParameter(format!(
                    "max_volume_participation must be in (0, 1], got {}",
                    cap
                )));
            }
        }
        if !(self.bars_per_year > 0.0) {
            return Err(AnalyticsError::InvalidParameter(
                "bars_per_year must be > 0".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start >= end {
                return Err(AnalyticsError::Range(format!(
                    "start {} must be before end {}",
                    start, end
                )));
            }
        }
        Ok(())
    }
}

/// Risk analytics parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub confidence_level: f64,
    pub var_method: VarMethod,
    pub monte_carlo_samples: usize,
    /// Number of independently seeded chunks the sample count is split into
    pub monte_carlo_partitions: usize,
    pub seed: u64,
    /// Most recent return observations used; 0 means all
    pub lookback_days: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            var_method: VarMethod::Historical,
            monte_carlo_samples: 10_000,
            monte_carlo_partitions: 8,
            seed: 42,
            lookback_days: 252,
        }
    }
}

impl RiskConfig {
    pub fn with_method(mut self, method: VarMethod) -> Self {
        self.var_method = method;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_level = confidence;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_samples(mut self, samples: usize, partitions: usize) -> Self {
        self.monte_carlo_samples = samples;
        self.monte_carlo_partitions = partitions;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(AnalyticsError::InvalidParameter(format!(
                "confidence_level must be in (0, 1), got {}",
                self.confidence_level
            )));
        }
        if self.monte_carlo_samples == 0 || self.monte_carlo_partitions == 0 {
            return Err(AnalyticsError::InvalidParameter(
                "monte_carlo_samples and monte_carlo_partitions must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Portfolio optimizer parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub allow_short_weights: bool,
    /// Per-period risk-free rate, in the same units as the return series
    pub risk_free_rate: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            allow_short_weights: true,
            risk_free_rate: 0.0,
            max_iterations: 10_000,
            tolerance: 1e-10,
        }
    }
}

impl OptimizerConfig {
    pub fn long_only() -> Self {
        Self {
            allow_short_weights: false,
            ..Default::default()
        }
    }

    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(AnalyticsError::InvalidParameter(
                "max_iterations must be > 0".to_string(),
            ));
        }
        if !(self.tolerance > 0.0) {
            return Err(AnalyticsError::InvalidParameter(
                "tolerance must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Full configuration file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub backtest: BacktestConfig,
    pub risk: RiskConfig,
    pub optimizer: OptimizerConfig,
}

impl AnalyticsConfig {
    /// Load from a JSON file; missing sections and fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| AnalyticsError::DataLoadError(e.to_string()))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.backtest.validate()?;
        self.risk.validate()?;
        self.optimizer.validate()
    }
}

fn check_unit_rate(name: &str, value: f64) -> Result<()> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(AnalyticsError::InvalidParameter(format!(
            "{} must be in [0, 1), got {}",
            name, value
        )))
    }
}
