//! Mean-variance (Markowitz) portfolio optimizer
//!
//! Unconstrained problems are solved in closed form from the KKT system.
//! With `allow_short_weights = false` the weights are confined to the
//! probability simplex and solved iteratively.

pub mod estimation;
pub mod solver;

pub use estimation::{ReturnMatrix, ReturnSeries};

use common::{
    AnalyticsError, FrontierPoint, OptimizationResult, OptimizerConfig, Result, SolverStatus,
};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::CancellationToken;
use solver::{Iteration, IterativeSolution};

/// Volatility below this is reported as riskless (Sharpe 0)
const VOL_EPSILON: f64 = 1e-12;

/// Return spread below which the frontier collapses to a single portfolio
const FLAT_FRONTIER_EPSILON: f64 = 1e-12;

/// Correlation above this marks two assets as duplicates
const MAX_CORRELATION: f64 = 1.0 - 1e-12;

/// What to optimize for
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMode {
    MinVariance,
    MaxSharpe,
    TargetReturn(f64),
}

#[derive(Debug, Clone, Default)]
pub struct PortfolioOptimizer {
    config: OptimizerConfig,
}

/// Moments of one return matrix
struct Moments {
    mean: DVector<f64>,
    cov: DMatrix<f64>,
}

impl PortfolioOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn optimize(
        &self,
        series: &ReturnSeries,
        mode: OptimizationMode,
    ) -> Result<OptimizationResult> {
        let matrix = ReturnMatrix::from_series(series)?;
        self.optimize_matrix(&matrix, mode, None)
    }

    /// Like [`optimize`](Self::optimize), polling `cancel` between solver
    /// iterations. A cancelled solve returns the current iterate with status
    /// [`SolverStatus::Cancelled`].
    pub fn optimize_with_cancel(
        &self,
        series: &ReturnSeries,
        mode: OptimizationMode,
        cancel: &CancellationToken,
    ) -> Result<OptimizationResult> {
        let matrix = ReturnMatrix::from_series(series)?;
        self.optimize_matrix(&matrix, mode, Some(cancel))
    }

    pub fn optimize_matrix(
        &self,
        matrix: &ReturnMatrix,
        mode: OptimizationMode,
        cancel: Option<&CancellationToken>,
    ) -> Result<OptimizationResult> {
        self.config.validate()?;
        let moments = Self::moments(matrix)?;
        self.solve(matrix, &moments, mode, cancel)
    }

    /// `n_points` frontier portfolios with targets evenly spaced from the
    /// minimum-variance return up to the largest asset mean, in target order
    pub fn efficient_frontier(
        &self,
        series: &ReturnSeries,
        n_points: usize,
    ) -> Result<Vec<FrontierPoint>> {
        if n_points == 0 {
            return Err(AnalyticsError::InvalidParameter(
                "efficient frontier needs at least one point".to_string(),
            ));
        }
        self.config.validate()?;

        let matrix = ReturnMatrix::from_series(series)?;
        let moments = Self::moments(&matrix)?;
        let min_variance = self.solve(&matrix, &moments, OptimizationMode::MinVariance, None)?;

        let low = min_variance.expected_return;
        let high = moments.mean.max().max(low);

        // Equal asset means: every target is the minimum-variance return and the
        // return constraint duplicates the budget constraint
        if high - low <= FLAT_FRONTIER_EPSILON * high.abs().max(1.0) {
            let point = FrontierPoint {
                target_return: low,
                weights: min_variance.weights,
                expected_return: min_variance.expected_return,
                expected_volatility: min_variance.expected_volatility,
            };
            return Ok(vec![point; n_points]);
        }

        let targets: Vec<f64> = if n_points == 1 {
            vec![low]
        } else {
            (0..n_points)
                .map(|k| low + (high - low) * k as f64 / (n_points - 1) as f64)
                .collect()
        };

        targets
            .par_iter()
            .map(|&target| {
                let mode = OptimizationMode::TargetReturn(target);
                let result = self.solve(&matrix, &moments, mode, None)?;
                Ok(FrontierPoint {
                    target_return: target,
                    weights: result.weights,
                    expected_return: result.expected_return,
                    expected_volatility: result.expected_volatility,
                })
            })
            .collect()
    }

    fn moments(matrix: &ReturnMatrix) -> Result<Moments> {
        if matrix.n_obs() <= matrix.n_assets() {
            return Err(AnalyticsError::SingularCovariance(format!(
                "{} observations for {} assets; need at least {}",
                matrix.n_obs(),
                matrix.n_assets(),
                matrix.n_assets() + 1
            )));
        }

        let cov = matrix.covariance();
        let n = matrix.n_assets();
        for i in 0..n {
            for j in (i + 1)..n {
                let (vi, vj) = (cov[(i, i)], cov[(j, j)]);
                if vi > 0.0 && vj > 0.0 && cov[(i, j)] / (vi * vj).sqrt() > MAX_CORRELATION {
                    return Err(AnalyticsError::SingularCovariance(format!(
                        "{} and {} are perfectly correlated",
                        matrix.symbols()[i],
                        matrix.symbols()[j]
                    )));
                }
            }
        }

        Ok(Moments {
            mean: matrix.mean(),
            cov,
        })
    }

    fn solve(
        &self,
        matrix: &ReturnMatrix,
        moments: &Moments,
        mode: OptimizationMode,
        cancel: Option<&CancellationToken>,
    ) -> Result<OptimizationResult> {
        let Moments { mean, cov } = moments;
        let rules = Iteration {
            max_iterations: self.config.max_iterations,
            tolerance: self.config.tolerance,
            cancel,
        };

        if let OptimizationMode::TargetReturn(target) = mode {
            if !self.config.allow_short_weights {
                let (lo, hi) = (mean.min(), mean.max());
                let slack = 1e-12 * (1.0 + hi.abs().max(lo.abs()));
                if target < lo - slack || target > hi + slack {
                    return Err(AnalyticsError::Infeasible(format!(
                        "target return {:.6} outside long-only range [{:.6}, {:.6}]",
                        target, lo, hi
                    )));
                }
            }
        }

        let solution = match (mode, self.config.allow_short_weights) {
            (OptimizationMode::MinVariance, true) => {
                closed_form(solver::min_variance_closed_form(cov, mean, None)?)
            }
            (OptimizationMode::TargetReturn(target), true) => {
                closed_form(solver::min_variance_closed_form(cov, mean, Some(target))?)
            }
            (OptimizationMode::MaxSharpe, true) => {
                closed_form(solver::tangency_closed_form(cov, mean, self.config.risk_free_rate)?)
            }
            (OptimizationMode::MinVariance, false) => {
                solver::min_variance_long_only(cov, mean, None, rules)
            }
            (OptimizationMode::TargetReturn(target), false) => {
                solver::min_variance_long_only(cov, mean, Some(target), rules)
            }
            (OptimizationMode::MaxSharpe, false) => {
                solver::max_sharpe_long_only(cov, mean, self.config.risk_free_rate, rules)?
            }
        };

        debug!(
            ?mode,
            status = ?solution.status,
            iterations = solution.iterations,
            "Optimizer finished"
        );

        Ok(self.describe(matrix, moments, solution))
    }

    fn describe(
        &self,
        matrix: &ReturnMatrix,
        moments: &Moments,
        solution: IterativeSolution,
    ) -> OptimizationResult {
        let w = &solution.weights;
        let expected_return = moments.mean.dot(w);
        let expected_volatility = w.dot(&(&moments.cov * w)).max(0.0).sqrt();
        let sharpe = if expected_volatility > VOL_EPSILON {
            (expected_return - self.config.risk_free_rate) / expected_volatility
        } else {
            0.0
        };

        OptimizationResult {
            weights: matrix
                .symbols()
                .iter()
                .cloned()
                .zip(w.iter().copied())
                .collect(),
            expected_return,
            expected_volatility,
            sharpe,
            status: solution.status,
            iterations: solution.iterations,
        }
    }
}

fn closed_form(weights: DVector<f64>) -> IterativeSolution {
    IterativeSolution {
        weights,
        status: SolverStatus::ClosedForm,
        iterations: 0,
    }
}
