//! Value-at-Risk estimators
//!
//! All estimators report VaR and CVaR as non-positive returns. A quantile on
//! the gain side reports zero loss.

use common::{AnalyticsError, Result, VarEstimate};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal as SampleNormal};
use rayon::prelude::*;
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

use crate::metrics::mean_and_stdev;

pub(crate) fn check_inputs(returns: &[f64], confidence: f64) -> Result<()> {
    if returns.is_empty() {
        return Err(AnalyticsError::InsufficientData {
            required: 1,
            actual: 0,
        });
    }
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(AnalyticsError::InvalidParameter(format!(
            "confidence must be in (0, 1), got {}",
            confidence
        )));
    }
    Ok(())
}

/// Empirical quantile of the sorted sample; CVaR averages the tail up to it
pub fn historical(returns: &[f64], confidence: f64) -> Result<VarEstimate> {
    check_inputs(returns, confidence)?;

    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let index = (((1.0 - confidence) * n as f64).floor() as usize).min(n - 1);
    let tail = &sorted[..=index];
    let cvar = tail.iter().sum::<f64>() / tail.len() as f64;

    Ok(clamp(sorted[index], cvar))
}

/// Closed-form estimate under a fitted normal distribution
pub fn parametric(returns: &[f64], confidence: f64) -> Result<VarEstimate> {
    check_inputs(returns, confidence)?;

    let (mu, sigma) = mean_and_stdev(returns);
    let standard = Normal::new(0.0, 1.0)
        .map_err(|e| AnalyticsError::InvalidParameter(format!("normal distribution: {}", e)))?;

    let tail = 1.0 - confidence;
    let z = standard.inverse_cdf(tail);
    let var = mu + sigma * z;
    let cvar = mu - sigma * standard.pdf(z) / tail;

    Ok(clamp(var, cvar))
}

/// Historical estimate over normal samples drawn from the fitted moments.
///
/// The sample count is split into `partitions` contiguous chunks; chunk `k`
/// draws from its own generator seeded with `seed + k`, so the sample set
/// depends only on (seed, samples, partitions) and not on thread scheduling.
pub fn monte_carlo(
    returns: &[f64],
    confidence: f64,
    samples: usize,
    partitions: usize,
    seed: u64,
) -> Result<VarEstimate> {
    check_inputs(returns, confidence)?;
    if samples == 0 {
        return Err(AnalyticsError::InvalidParameter(
            "monte_carlo_samples must be > 0".to_string(),
        ));
    }

    let (mu, sigma) = mean_and_stdev(returns);
    let draws = if sigma > 0.0 {
        let dist = SampleNormal::new(mu, sigma)
            .map_err(|e| AnalyticsError::InvalidParameter(format!("normal distribution: {}", e)))?;
        draw_partitioned(&dist, samples, partitions, seed)
    } else {
        vec![mu; samples]
    };

    historical(&draws, confidence)
}

/// Chunk sizes differ by at most one, larger chunks first
fn partition_sizes(samples: usize, partitions: usize) -> Vec<usize> {
    let parts = partitions.clamp(1, samples.max(1));
    let base = samples / parts;
    let extra = samples % parts;
    (0..parts).map(|k| base + usize::from(k < extra)).collect()
}

fn draw_partitioned(
    dist: &SampleNormal<f64>,
    samples: usize,
    partitions: usize,
    seed: u64,
) -> Vec<f64> {
    let sizes = partition_sizes(samples, partitions);

    let chunks: Vec<Vec<f64>> = sizes
        .par_iter()
        .enumerate()
        .map(|(k, &size)| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(k as u64));
            (0..size).map(|_| dist.sample(&mut rng)).collect()
        })
        .collect();

    chunks.concat()
}

fn clamp(var: f64, cvar: f64) -> VarEstimate {
    VarEstimate {
        var: var.min(0.0),
        cvar: cvar.min(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_returns() -> Vec<f64> {
        (0..100).map(|i| ((i * 37) % 100) as f64 / 1000.0 - 0.05).collect()
    }

    #[test]
    fn test_historical_index() {
        // Sorted: -0.05, -0.049, ..., 0.049; index floor(0.05 * 100) = 5
        let est = historical(&sample_returns(), 0.95).unwrap();

        assert_relative_eq!(est.var, -0.045, epsilon = 1e-12);
        let expected_cvar = (-0.05 - 0.049 - 0.048 - 0.047 - 0.046 - 0.045) / 6.0;
        assert_relative_eq!(est.cvar, expected_cvar, epsilon = 1e-12);
    }

    #[test]
    fn test_historical_clamps_index_and_gains() {
        let est = historical(&[0.01, 0.02], 0.01).unwrap();
        assert_eq!(est.var, 0.0);
        assert_eq!(est.cvar, 0.0);

        let single = historical(&[-0.03], 0.95).unwrap();
        assert_eq!(single.var, -0.03);
        assert_eq!(single.cvar, -0.03);
    }

    #[test]
    fn test_parametric_matches_normal_quantile() {
        let returns = vec![-0.02, 0.02, -0.02, 0.02];
        let est = parametric(&returns, 0.95).unwrap();

        // mu = 0, sigma = 0.02, z(0.05) = -1.6448536
        assert_relative_eq!(est.var, -0.02 * 1.644_853_6, epsilon = 1e-7);
        assert!(est.cvar < est.var);
    }

    #[test]
    fn test_monte_carlo_reproducible() {
        let returns = sample_returns();
        let a = monte_carlo(&returns, 0.95, 5000, 4, 7).unwrap();
        let b = monte_carlo(&returns, 0.95, 5000, 4, 7).unwrap();
        let c = monte_carlo(&returns, 0.95, 5000, 4, 8).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.cvar <= a.var);
    }

    #[test]
    fn test_monte_carlo_close_to_parametric() {
        let returns = sample_returns();
        let mc = monte_carlo(&returns, 0.95, 50_000, 8, 42).unwrap();
        let param = parametric(&returns, 0.95).unwrap();

        assert_relative_eq!(mc.var, param.var, epsilon = 5e-3);
    }

    #[test]
    fn test_flat_returns_are_zero_under_all_methods() {
        let flat = vec![0.0; 50];

        for est in [
            historical(&flat, 0.95).unwrap(),
            parametric(&flat, 0.95).unwrap(),
            monte_carlo(&flat, 0.95, 1000, 4, 1).unwrap(),
        ] {
            assert_eq!(est.var, 0.0);
            assert_eq!(est.cvar, 0.0);
        }
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            historical(&[], 0.95),
            Err(AnalyticsError::InsufficientData { .. })
        ));
        assert!(matches!(
            parametric(&[0.01], 1.0),
            Err(AnalyticsError::InvalidParameter(_))
        ));
        assert!(matches!(
            monte_carlo(&[0.01], 0.95, 0, 1, 1),
            Err(AnalyticsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_partition_sizes() {
        assert_eq!(partition_sizes(10, 3), vec![4, 3, 3]);
        assert_eq!(partition_sizes(2, 8), vec![1, 1]);
        assert_eq!(partition_sizes(5, 0), vec![5]);
        assert_eq!(partition_sizes(10, 3).iter().sum::<usize>(), 10);
    }
}
