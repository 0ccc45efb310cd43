use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{AnalyticsError, Result};
use nalgebra::{DMatrix, DVector};

/// Timestamped return series per symbol
pub type ReturnSeries = BTreeMap<String, Vec<(DateTime<Utc>, f64)>>;

/// Aligned returns, one column per asset and one row per observation
#[derive(Debug, Clone)]
pub struct ReturnMatrix {
    symbols: Vec<String>,
    data: DMatrix<f64>,
}

impl ReturnMatrix {
    /// Build from timestamped series. Every series must cover exactly the same
    /// timestamps in the same order.
    pub fn from_series(series: &ReturnSeries) -> Result<Self> {
        let Some((first_symbol, reference)) = series.iter().next() else {
            return Err(AnalyticsError::InsufficientData {
                required: 1,
                actual: 0,
            });
        };

        for (symbol, returns) in series {
            if returns.len() != reference.len() {
                return Err(AnalyticsError::Alignment(format!(
                    "{} has {} observations, {} has {}",
                    symbol,
                    returns.len(),
                    first_symbol,
                    reference.len()
                )));
            }
            let mismatch = returns
                .iter()
                .zip(reference)
                .position(|((a, _), (b, _))| a != b);
            if let Some(row) = mismatch {
                return Err(AnalyticsError::Alignment(format!(
                    "{} and {} disagree on timestamp at row {}",
                    symbol, first_symbol, row
                )));
            }
        }

        let symbols: Vec<String> = series.keys().cloned().collect();
        let columns: Vec<&Vec<(DateTime<Utc>, f64)>> = series.values().collect();
        let data = DMatrix::from_fn(reference.len(), symbols.len(), |i, j| columns[j][i].1);

        Self::checked(symbols, data)
    }

    /// Build from untimestamped columns of equal length
    pub fn from_columns(columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let Some(n_obs) = columns.first().map(|(_, c)| c.len()) else {
            return Err(AnalyticsError::InsufficientData {
                required: 1,
                actual: 0,
            });
        };
        if let Some((symbol, column)) = columns.iter().find(|(_, c)| c.len() != n_obs) {
            return Err(AnalyticsError::Alignment(format!(
                "{} has {} observations, expected {}",
                symbol,
                column.len(),
                n_obs
            )));
        }

        let data = DMatrix::from_fn(n_obs, columns.len(), |i, j| columns[j].1[i]);
        let symbols = columns.into_iter().map(|(s, _)| s).collect();
        Self::checked(symbols, data)
    }

    fn checked(symbols: Vec<String>, data: DMatrix<f64>) -> Result<Self> {
        if data.iter().any(|r| !r.is_finite()) {
            return Err(AnalyticsError::InvalidParameter(
                "return series contain non-finite values".to_string(),
            ));
        }
        Ok(Self { symbols, data })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn n_assets(&self) -> usize {
        self.data.ncols()
    }

    pub fn n_obs(&self) -> usize {
        self.data.nrows()
    }

    /// Sample mean return per asset
    pub fn mean(&self) -> DVector<f64> {
        let n = self.n_obs().max(1) as f64;
        DVector::from_iterator(
            self.n_assets(),
            self.data.column_iter().map(|c| c.sum() / n),
        )
    }

    /// Sample covariance (n - 1 divisor)
    pub fn covariance(&self) -> DMatrix<f64> {
        let n = self.n_obs();
        let mean = self.mean();
        let centered = DMatrix::from_fn(n, self.n_assets(), |i, j| self.data[(i, j)] - mean[j]);
        let denom = n.saturating_sub(1).max(1) as f64;
        (centered.transpose() * &centered) / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn ts(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day)
    }

    fn series(values: &[f64], offset: i64) -> Vec<(DateTime<Utc>, f64)> {
        values.iter().enumerate().map(|(i, &v)| (ts(i as i64 + offset), v)).collect()
    }

    #[test]
    fn test_mean_and_covariance() {
        let matrix = ReturnMatrix::from_columns(vec![
            ("A".to_string(), vec![0.01, 0.03, 0.02]),
            ("B".to_string(), vec![-0.01, -0.03, -0.02]),
        ])
        .unwrap();

        let mean = matrix.mean();
        let cov = matrix.covariance();

        assert_relative_eq!(mean[0], 0.02, epsilon = 1e-12);
        assert_relative_eq!(cov[(0, 0)], 0.0001, epsilon = 1e-12);
        assert_relative_eq!(cov[(0, 1)], -0.0001, epsilon = 1e-12);
        assert_relative_eq!(cov[(0, 1)], cov[(1, 0)]);
    }

    #[test]
    fn test_misaligned_lengths() {
        let mut input = ReturnSeries::new();
        input.insert("A".to_string(), series(&[0.1, 0.2, 0.3], 0));
        input.insert("B".to_string(), series(&[0.1, 0.2], 0));

        assert!(matches!(
            ReturnMatrix::from_series(&input),
            Err(AnalyticsError::Alignment(_))
        ));
    }

    #[test]
    fn test_misaligned_timestamps() {
        let mut input = ReturnSeries::new();
        input.insert("A".to_string(), series(&[0.1, 0.2, 0.3], 0));
        input.insert("B".to_string(), series(&[0.1, 0.2, 0.3], 1));

        assert!(matches!(
            ReturnMatrix::from_series(&input),
            Err(AnalyticsError::Alignment(_))
        ));
    }

    #[test]
    fn test_from_series_orders_columns_by_symbol() {
        let mut input = ReturnSeries::new();
        input.insert("ETH".to_string(), series(&[0.2, 0.4], 0));
        input.insert("BTC".to_string(), series(&[0.1, 0.3], 0));

        let matrix = ReturnMatrix::from_series(&input).unwrap();
        assert_eq!(matrix.symbols(), &["BTC".to_string(), "ETH".to_string()]);
        assert_eq!(matrix.n_obs(), 2);
        assert_relative_eq!(matrix.mean()[1], 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            ReturnMatrix::from_series(&ReturnSeries::new()),
            Err(AnalyticsError::InsufficientData { .. })
        ));
    }
}
