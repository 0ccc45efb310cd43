//! Risk analytics: VaR/CVaR and stress testing

pub mod stress;
pub mod var;

pub use stress::{load_scenarios, run_stress_test, StressScenario};

use common::{Result, RiskConfig, RiskReport, ScenarioResult, VarEstimate, VarMethod};
use tracing::debug;

use crate::portfolio::Portfolio;

/// VaR/CVaR estimation and scenario analysis
#[derive(Debug, Clone, Default)]
pub struct RiskAnalyticsEngine {
    config: RiskConfig,
}

impl RiskAnalyticsEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// VaR and CVaR of `returns` at `confidence`. Monte Carlo draws use the
    /// configured sample count, partitions and seed.
    pub fn calculate_var(
        &self,
        returns: &[f64],
        confidence: f64,
        method: VarMethod,
    ) -> Result<VarEstimate> {
        let estimate = match method {
            VarMethod::Historical => var::historical(returns, confidence)?,
            VarMethod::Parametric => var::parametric(returns, confidence)?,
            VarMethod::MonteCarlo => var::monte_carlo(
                returns,
                confidence,
                self.config.monte_carlo_samples,
                self.config.monte_carlo_partitions,
                self.config.seed,
            )?,
        };
        debug!(?method, confidence, var = estimate.var, cvar = estimate.cvar, "VaR estimate");
        Ok(estimate)
    }

    pub fn run_stress_test(
        &self,
        portfolio: &Portfolio,
        scenarios: &[StressScenario],
    ) -> Vec<ScenarioResult> {
        run_stress_test(portfolio, scenarios)
    }

    /// Full report: configured VaR method over the last `lookback_days`
    /// returns (all of them when 0) plus the stress results
    pub fn report(
        &self,
        returns: &[f64],
        portfolio: &Portfolio,
        scenarios: &[StressScenario],
    ) -> Result<RiskReport> {
        self.config.validate()?;

        let window = match self.config.lookback_days {
            0 => returns,
            days => &returns[returns.len().saturating_sub(days)..],
        };
        let estimate =
            self.calculate_var(window, self.config.confidence_level, self.config.var_method)?;

        Ok(RiskReport {
            var95: estimate.var,
            cvar95: estimate.cvar,
            method: self.config.var_method,
            confidence: self.config.confidence_level,
            lookback_days: window.len(),
            sample_count: match self.config.var_method {
                VarMethod::MonteCarlo => self.config.monte_carlo_samples,
                _ => window.len(),
            },
            stress_results: self.run_stress_test(portfolio, scenarios),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AnalyticsError;

    fn returns() -> Vec<f64> {
        (0..300).map(|i| ((i * 53) % 300) as f64 / 3000.0 - 0.05).collect()
    }

    #[test]
    fn test_cvar_not_above_var_for_all_methods() {
        let engine = RiskAnalyticsEngine::new(RiskConfig::default().with_samples(2000, 4));
        for method in [VarMethod::Historical, VarMethod::Parametric, VarMethod::MonteCarlo] {
            let est = engine.calculate_var(&returns(), 0.95, method).unwrap();
            assert!(est.cvar <= est.var, "{:?}: {:?}", method, est);
            assert!(est.var <= 0.0);
        }
    }

    #[test]
    fn test_report_trims_lookback() {
        let mut config = RiskConfig::default();
        config.lookback_days = 100;
        let engine = RiskAnalyticsEngine::new(config);
        let portfolio = Portfolio::new(1000.0);

        let report = engine
            .report(&returns(), &portfolio, &StressScenario::presets())
            .unwrap();

        assert_eq!(report.lookback_days, 100);
        assert_eq!(report.sample_count, 100);
        assert_eq!(report.method, VarMethod::Historical);
        assert_eq!(report.stress_results.len(), 3);
        // Cash-only book loses nothing
        assert!(report.stress_results.iter().all(|r| r.loss_amount == 0.0));

        let expected = var::historical(&returns()[200..], 0.95).unwrap();
        assert_eq!(report.var95, expected.var);
    }

    #[test]
    fn test_report_rejects_empty_returns() {
        let engine = RiskAnalyticsEngine::default();
        let result = engine.report(&[], &Portfolio::new(1000.0), &[]);
        assert!(matches!(result, Err(AnalyticsError::InsufficientData { .. })));
    }
}
