//! Numerical building blocks for the mean-variance optimizer

use common::{AnalyticsError, Result, SolverStatus};
use nalgebra::{DMatrix, DVector};

use crate::cancel::CancellationToken;

/// Systems with a larger condition number are treated as singular
pub const MAX_CONDITION: f64 = 1e12;

/// Inner steps between multiplier updates of the return constraint
const MULTIPLIER_UPDATE_EVERY: usize = 25;

/// 2-norm condition number; infinite for a singular matrix
pub fn condition_number(matrix: &DMatrix<f64>) -> f64 {
    let singular = matrix.clone().svd(false, false).singular_values;
    let max = singular.max();
    let min = singular.min();
    if min <= 0.0 || !min.is_finite() {
        f64::INFINITY
    } else {
        max / min
    }
}

fn ensure_well_conditioned(matrix: &DMatrix<f64>, what: &str) -> Result<()> {
    let cond = condition_number(matrix);
    if cond > MAX_CONDITION {
        return Err(AnalyticsError::SingularCovariance(format!(
            "{} condition number {:.3e} exceeds {:.0e}",
            what, cond, MAX_CONDITION
        )));
    }
    Ok(())
}

/// Minimum-variance weights under `sum(w) = 1` and, when given,
/// `mu'w = target`, from the KKT system
///
/// ```text
/// | 2S  1  mu | |w|   |0|
/// | 1'  0  0  | |l| = |1|
/// | mu' 0  0  | |g|   |t|
/// ```
pub fn min_variance_closed_form(
    cov: &DMatrix<f64>,
    mean: &DVector<f64>,
    target: Option<f64>,
) -> Result<DVector<f64>> {
    let n = cov.nrows();
    let size = n + 1 + usize::from(target.is_some());

    let mut kkt = DMatrix::<f64>::zeros(size, size);
    let mut rhs = DVector::<f64>::zeros(size);

    kkt.view_mut((0, 0), (n, n)).copy_from(&(cov * 2.0));
    for i in 0..n {
        kkt[(i, n)] = 1.0;
        kkt[(n, i)] = 1.0;
    }
    rhs[n] = 1.0;

    if let Some(target) = target {
        for i in 0..n {
            kkt[(i, n + 1)] = mean[i];
            kkt[(n + 1, i)] = mean[i];
        }
        rhs[n + 1] = target;
    }

    ensure_well_conditioned(&kkt, "KKT system")?;

    let solution = kkt
        .lu()
        .solve(&rhs)
        .ok_or_else(|| {
            AnalyticsError::SingularCovariance("KKT system has no solution".to_string())
        })?;

    Ok(solution.rows(0, n).into_owned())
}

/// Unconstrained tangency weights `S^-1 (mu - rf)` normalized to sum to 1
pub fn tangency_closed_form(
    cov: &DMatrix<f64>,
    mean: &DVector<f64>,
    risk_free: f64,
) -> Result<DVector<f64>> {
    ensure_well_conditioned(cov, "covariance matrix")?;

    let excess = mean.map(|m| m - risk_free);
    let raw = cov
        .clone()
        .lu()
        .solve(&excess)
        .ok_or_else(|| {
            AnalyticsError::SingularCovariance("covariance matrix is not invertible".to_string())
        })?;

    let total = raw.sum();
    if total.abs() < 1e-12 {
        return Err(AnalyticsError::Infeasible(
            "tangency weights sum to zero; no excess return to normalize".to_string(),
        ));
    }
    Ok(raw / total)
}

/// Euclidean projection onto the probability simplex (sort-based)
pub fn project_simplex(v: &DVector<f64>) -> DVector<f64> {
    let mut sorted: Vec<f64> = v.iter().copied().collect();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let mut cumsum = 0.0;
    let mut theta = 0.0;
    for (i, u) in sorted.iter().enumerate() {
        cumsum += u;
        let t = (cumsum - 1.0) / (i + 1) as f64;
        if u - t > 0.0 {
            theta = t;
        }
    }

    v.map(|x| (x - theta).max(0.0))
}

/// Outcome of an iterative solve
#[derive(Debug, Clone)]
pub struct IterativeSolution {
    pub weights: DVector<f64>,
    pub status: SolverStatus,
    pub iterations: usize,
}

/// Stopping rules shared by the iterative solvers
#[derive(Debug, Clone, Copy)]
pub struct Iteration<'a> {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub cancel: Option<&'a CancellationToken>,
}

impl Iteration<'_> {
    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(CancellationToken::is_cancelled)
    }
}

fn largest_eigenvalue(matrix: &DMatrix<f64>) -> f64 {
    matrix
        .clone()
        .symmetric_eigen()
        .eigenvalues
        .iter()
        .copied()
        .fold(0.0, f64::max)
}

/// Long-only minimum variance by projected gradient on the simplex.
///
/// A return target is enforced with an augmented Lagrangian term
/// `g (mu'w - t) + rho/2 (mu'w - t)^2`; the multiplier `g` is refreshed
/// every few steps.
pub fn min_variance_long_only(
    cov: &DMatrix<f64>,
    mean: &DVector<f64>,
    target: Option<f64>,
    rules: Iteration<'_>,
) -> IterativeSolution {
    let n = cov.nrows();
    let lambda_max = largest_eigenvalue(cov).max(1e-16);
    let mu_sq = mean.norm_squared().max(1e-16);
    let rho = if target.is_some() { 2.0 * lambda_max / mu_sq } else { 0.0 };
    let lipschitz = 2.0 * lambda_max + rho * mu_sq;
    let step = 1.0 / lipschitz;

    let mut weights = DVector::from_element(n, 1.0 / n as f64);
    let mut multiplier = 0.0;

    for iteration in 1..=rules.max_iterations {
        if rules.cancelled() {
            return IterativeSolution {
                weights,
                status: SolverStatus::Cancelled,
                iterations: iteration - 1,
            };
        }

        let mut grad = cov * &weights * 2.0;
        let mut violation = 0.0;
        if let Some(target) = target {
            violation = mean.dot(&weights) - target;
            grad += mean * (multiplier + rho * violation);
        }

        let next = project_simplex(&(&weights - grad * step));
        let change = (&next - &weights).amax();
        weights = next;

        if let Some(target) = target.filter(|_| iteration % MULTIPLIER_UPDATE_EVERY == 0) {
            multiplier += rho * (mean.dot(&weights) - target);
        }

        let feasible = target.map_or(true, |_| violation.abs() <= rules.tolerance.sqrt());
        if change <= rules.tolerance && feasible {
            return IterativeSolution {
                weights,
                status: SolverStatus::Converged,
                iterations: iteration,
            };
        }
    }

    IterativeSolution {
        weights,
        status: SolverStatus::MaxIterations,
        iterations: rules.max_iterations,
    }
}

fn sharpe_and_gradient(
    cov: &DMatrix<f64>,
    excess: &DVector<f64>,
    w: &DVector<f64>,
) -> Option<(f64, DVector<f64>)> {
    let cov_w = cov * w;
    let variance = w.dot(&cov_w);
    if !(variance > 0.0) {
        return None;
    }
    let vol = variance.sqrt();
    let ret = excess.dot(w);
    let grad = excess / vol - cov_w * (ret / (vol * variance));
    Some((ret / vol, grad))
}

/// Long-only maximum Sharpe ratio by projected gradient ascent with a
/// backtracking step
pub fn max_sharpe_long_only(
    cov: &DMatrix<f64>,
    mean: &DVector<f64>,
    risk_free: f64,
    rules: Iteration<'_>,
) -> Result<IterativeSolution> {
    let n = cov.nrows();
    let excess = mean.map(|m| m - risk_free);
    if excess.iter().all(|&e| e <= 0.0) {
        return Err(AnalyticsError::Infeasible(
            "no asset has a positive excess return".to_string(),
        ));
    }

    let mut weights = DVector::from_element(n, 1.0 / n as f64);
    let Some((mut sharpe, mut grad)) = sharpe_and_gradient(cov, &excess, &weights) else {
        return Err(AnalyticsError::SingularCovariance(
            "equal-weight portfolio has zero variance".to_string(),
        ));
    };
    let mut step = 1.0;

    for iteration in 1..=rules.max_iterations {
        if rules.cancelled() {
            return Ok(IterativeSolution {
                weights,
                status: SolverStatus::Cancelled,
                iterations: iteration - 1,
            });
        }

        // Backtrack until the projected step improves the ratio
        let mut accepted = None;
        let mut trial_step = step;
        while trial_step > 1e-16 {
            let candidate = project_simplex(&(&weights + &grad * trial_step));
            if let Some((candidate_sharpe, candidate_grad)) =
                sharpe_and_gradient(cov, &excess, &candidate)
            {
                let ascent = grad.dot(&(&candidate - &weights));
                if candidate_sharpe >= sharpe + 1e-4 * ascent {
                    accepted = Some((candidate, candidate_sharpe, candidate_grad));
                    break;
                }
            }
            trial_step *= 0.5;
        }

        let Some((candidate, candidate_sharpe, candidate_grad)) = accepted else {
            return Ok(IterativeSolution {
                weights,
                status: SolverStatus::Converged,
                iterations: iteration,
            });
        };

        let change = (&candidate - &weights).amax();
        weights = candidate;
        sharpe = candidate_sharpe;
        grad = candidate_grad;
        step = (trial_step * 2.0).min(1e6);

        if change <= rules.tolerance {
            return Ok(IterativeSolution {
                weights,
                status: SolverStatus::Converged,
                iterations: iteration,
            });
        }
    }

    Ok(IterativeSolution {
        weights,
        status: SolverStatus::MaxIterations,
        iterations: rules.max_iterations,
    })
}
