use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use common::{AnalyticsError, Result, ScenarioResult};
use serde::{Deserialize, Serialize};

use crate::portfolio::Portfolio;

/// Named set of per-symbol return shocks
///
/// Scenarios are plain data and load from JSON, e.g.
/// `{"name": "btc halving", "shocks": {"BTC": -0.5}, "default_shock": -0.2}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressScenario {
    pub name: String,
    #[serde(default)]
    pub shocks: BTreeMap<String, f64>,
    /// Shock for holdings not listed in `shocks`
    #[serde(default)]
    pub default_shock: Option<f64>,
}

impl StressScenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shocks: BTreeMap::new(),
            default_shock: None,
        }
    }

    pub fn with_shock(mut self, symbol: impl Into<String>, shock: f64) -> Self {
        self.shocks.insert(symbol.into(), shock);
        self
    }

    pub fn with_default_shock(mut self, shock: f64) -> Self {
        self.default_shock = Some(shock);
        self
    }

    pub fn shock_for(&self, symbol: &str) -> f64 {
        self.shocks
            .get(symbol)
            .copied()
            .or(self.default_shock)
            .unwrap_or(0.0)
    }

    /// Shocks below -100% would price holdings negative
    pub fn validate(&self) -> Result<()> {
        let all = self.shocks.values().chain(self.default_shock.iter());
        for &shock in all {
            if !(shock >= -1.0) || !shock.is_finite() {
                return Err(AnalyticsError::InvalidParameter(format!(
                    "scenario '{}': shock {} must be finite and >= -1",
                    self.name, shock
                )));
            }
        }
        Ok(())
    }

    /// Built-in scenarios
    pub fn presets() -> Vec<StressScenario> {
        vec![
            StressScenario::new("crypto_crash")
                .with_shock("BTC", -0.50)
                .with_shock("ETH", -0.60)
                .with_default_shock(-0.55),
            StressScenario::new("equity_correction").with_default_shock(-0.10),
            StressScenario::new("broad_selloff").with_default_shock(-0.20),
        ]
    }
}

/// Load a JSON array of scenarios
pub fn load_scenarios(path: &Path) -> Result<Vec<StressScenario>> {
    let content = fs::read_to_string(path)?;
    let scenarios: Vec<StressScenario> = serde_json::from_str(&content)?;
    for scenario in &scenarios {
        scenario.validate()?;
    }
    Ok(scenarios)
}

/// Revalue holdings under each scenario. Cash is not shocked.
pub fn run_stress_test(portfolio: &Portfolio, scenarios: &[StressScenario]) -> Vec<ScenarioResult> {
    let starting_value = portfolio.equity();

    scenarios
        .iter()
        .map(|scenario| {
            let stressed_holdings: f64 = portfolio
                .positions()
                .values()
                .map(|p| p.market_value() * (1.0 + scenario.shock_for(&p.symbol)))
                .sum();
            let stressed_value = portfolio.cash() + stressed_holdings;
            let loss_amount = starting_value - stressed_value;

            ScenarioResult {
                scenario_name: scenario.name.clone(),
                starting_value,
                stressed_value,
                loss_amount,
                loss_percent: if starting_value != 0.0 {
                    loss_amount / starting_value * 100.0
                } else {
                    0.0
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use common::{Fill, Side};

    fn portfolio_with(holdings: &[(&str, f64, f64)]) -> Portfolio {
        let mut portfolio = Portfolio::new(10000.0);
        for (i, &(symbol, qty, price)) in holdings.iter().enumerate() {
            let fill = Fill {
                order_id: i as u64 + 1,
                symbol: symbol.to_string(),
                side: Side::Buy,
                requested_qty: qty,
                filled_qty: qty,
                fill_price: price,
                commission: 0.0,
                slippage: 0.0,
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            };
            portfolio.apply_fill(&fill, 0).unwrap();
        }
        portfolio
    }

    #[test]
    fn test_shocks_holdings_not_cash() {
        // 4000 BTC, 2000 ETH, 4000 cash
        let portfolio = portfolio_with(&[("BTC", 40.0, 100.0), ("ETH", 100.0, 20.0)]);
        let scenario = StressScenario::new("mixed")
            .with_shock("BTC", -0.5)
            .with_default_shock(-0.1);

        let results = run_stress_test(&portfolio, &[scenario]);
        let result = &results[0];

        assert_relative_eq!(result.starting_value, 10000.0);
        assert_relative_eq!(result.stressed_value, 4000.0 + 2000.0 + 1800.0);
        assert_relative_eq!(result.loss_amount, 2200.0);
        assert_relative_eq!(result.loss_percent, 22.0);
    }

    #[test]
    fn test_unlisted_symbol_without_default_is_unshocked() {
        let portfolio = portfolio_with(&[("SOL", 10.0, 50.0)]);
        let scenario = StressScenario::new("btc only").with_shock("BTC", -0.9);
        let results = run_stress_test(&portfolio, &[scenario]);

        assert_eq!(results[0].loss_amount, 0.0);
    }

    #[test]
    fn test_scenarios_deserialize() {
        let json = r#"[
            {"name": "halving", "shocks": {"BTC": -0.3}},
            {"name": "everything", "default_shock": -0.25}
        ]"#;
        let scenarios: Vec<StressScenario> = serde_json::from_str(json).unwrap();

        assert_eq!(scenarios.len(), 2);
        assert_eq!(scenarios[0].shock_for("BTC"), -0.3);
        assert_eq!(scenarios[0].shock_for("ETH"), 0.0);
        assert_eq!(scenarios[1].shock_for("ETH"), -0.25);
    }

    #[test]
    fn test_validate_rejects_impossible_shock() {
        assert!(StressScenario::new("bad").with_shock("BTC", -1.5).validate().is_err());
        for preset in StressScenario::presets() {
            assert!(preset.validate().is_ok());
        }
    }

    #[test]
    fn test_load_scenarios_from_file() {
        let path = std::env::temp_dir()
            .join(format!("stress_scenarios_{}.json", std::process::id()));
        fs::write(&path, r#"[{"name": "dip", "default_shock": -0.05}]"#).unwrap();

        let scenarios = load_scenarios(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(scenarios, vec![StressScenario::new("dip").with_default_shock(-0.05)]);
    }
}
