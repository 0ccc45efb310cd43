use chrono::{DateTime, Utc};
use common::{EquityPoint, PerformanceReport, Trade};

/// Performance statistics from an equity curve and its closed trades.
///
/// Every ratio degrades to a defined value (0, or +inf for an unbounded
/// profit factor) instead of NaN, and the empty case is a zeroed report.
pub struct PerformanceMetricsCalculator;

impl PerformanceMetricsCalculator {
    /// Calculate all performance metrics
    pub fn compute(
        equity_curve: &[EquityPoint],
        trades: &[Trade],
        bars_per_year: f64,
    ) -> PerformanceReport {
        let stats = Self::trade_stats(trades);
        let mut report = PerformanceReport {
            total_trades: trades.len(),
            winning_trades: stats.winning,
            losing_trades: stats.losing,
            win_rate: stats.win_rate,
            profit_factor: stats.profit_factor,
            avg_win: stats.avg_win,
            avg_loss: stats.avg_loss,
            largest_win: stats.largest_win,
            largest_loss: stats.largest_loss,
            expectancy: stats.expectancy,
            avg_trade_duration: stats.avg_duration,
            ..Default::default()
        };

        if equity_curve.len() < 2 {
            return report;
        }

        let initial = equity_curve[0].equity;
        let last = equity_curve[equity_curve.len() - 1].equity;
        report.total_return = if initial != 0.0 {
            (last - initial) / initial
        } else {
            0.0
        };
        report.annual_return = report.total_return * bars_per_year / equity_curve.len() as f64;

        let returns = Self::period_returns(equity_curve);
        let (mean, stdev) = mean_and_stdev(&returns);
        let scale = bars_per_year.sqrt();

        report.volatility = stdev * scale;
        report.sharpe = if stdev > 0.0 { mean / stdev * scale } else { 0.0 };
        report.sortino = Self::sortino(&returns, mean, scale);

        let (max_drawdown, duration) = Self::max_drawdown(equity_curve);
        report.max_drawdown = max_drawdown;
        report.max_drawdown_duration_bars = duration;
        report.calmar = if max_drawdown < 0.0 {
            report.annual_return / max_drawdown.abs()
        } else {
            0.0
        };

        report
    }

    /// Successive percent changes of the curve
    pub fn period_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
        equity_curve
            .windows(2)
            .map(|w| {
                let prev = w[0].equity;
                if prev != 0.0 {
                    (w[1].equity - prev) / prev
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Downside deviation uses only the negative periods
    fn sortino(returns: &[f64], mean: f64, scale: f64) -> f64 {
        let negatives: Vec<f64> = returns.iter().copied().filter(|&r| r < 0.0).collect();
        if negatives.is_empty() {
            return 0.0;
        }

        let downside =
            (negatives.iter().map(|r| r * r).sum::<f64>() / negatives.len() as f64).sqrt();
        if downside == 0.0 {
            return 0.0;
        }
        mean / downside * scale
    }

    /// Deepest drawdown (non-positive fraction) and the longest stretch in
    /// bars spent below a previous peak
    fn max_drawdown(equity_curve: &[EquityPoint]) -> (f64, usize) {
        let curve = Self::drawdown_curve(equity_curve);
        let max_drawdown = curve.iter().map(|(_, dd)| *dd).fold(0.0, f64::min);

        let mut longest = 0;
        let mut current = 0;
        for (_, dd) in &curve {
            if *dd < 0.0 {
                current += 1;
                longest = longest.max(current);
            } else {
                current = 0;
            }
        }

        (max_drawdown, longest)
    }

    /// Drawdown from the running peak at every point, as a non-positive fraction
    pub fn drawdown_curve(equity_curve: &[EquityPoint]) -> Vec<(DateTime<Utc>, f64)> {
        let Some(first) = equity_curve.first() else {
            return vec![];
        };

        let mut peak = first.equity;
        equity_curve
            .iter()
            .map(|point| {
                peak = peak.max(point.equity);
                let drawdown = if peak > 0.0 {
                    (point.equity - peak) / peak
                } else {
                    0.0
                };
                (point.timestamp, drawdown)
            })
            .collect()
    }

    fn trade_stats(trades: &[Trade]) -> TradeStats {
        if trades.is_empty() {
            return TradeStats::default();
        }

        let mut stats = TradeStats::default();
        let mut total_wins = 0.0;
        let mut total_losses = 0.0;
        let mut total_pnl = 0.0;
        let mut total_duration = 0usize;

        for trade in trades {
            if trade.pnl > 0.0 {
                stats.winning += 1;
                total_wins += trade.pnl;
                stats.largest_win = stats.largest_win.max(trade.pnl);
            } else if trade.pnl < 0.0 {
                stats.losing += 1;
                total_losses += trade.pnl.abs();
                stats.largest_loss = stats.largest_loss.min(trade.pnl);
            }
            total_pnl += trade.pnl;
            total_duration += trade.duration_bars;
        }

        let n = trades.len() as f64;
        stats.win_rate = stats.winning as f64 / n;
        if stats.winning > 0 {
            stats.avg_win = total_wins / stats.winning as f64;
        }
        if stats.losing > 0 {
            stats.avg_loss = total_losses / stats.losing as f64;
        }

        stats.profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        stats.expectancy = total_pnl / n;
        stats.avg_duration = total_duration as f64 / n;
        stats
    }
}

/// Mean and population standard deviation
pub(crate) fn mean_and_stdev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

#[derive(Debug, Default)]
struct TradeStats {
    winning: usize,
    losing: usize,
    win_rate: f64,
    avg_win: f64,
    avg_loss: f64,
    largest_win: f64,
    largest_loss: f64,
    profit_factor: f64,
    expectancy: f64,
    avg_duration: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};
    use common::{Fill, Side};

    fn make_equity_curve(values: &[f64]) -> Vec<EquityPoint> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                timestamp: start + Duration::days(i as i64),
                equity,
            })
            .collect()
    }

    fn make_trade(pnl: f64, duration_bars: usize) -> Trade {
        let fill = Fill {
            order_id: 1,
            symbol: "BTC".to_string(),
            side: Side::Buy,
            requested_qty: 1.0,
            filled_qty: 1.0,
            fill_price: 100.0,
            commission: 0.0,
            slippage: 0.0,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        Trade {
            symbol: "BTC".to_string(),
            entry_fill: fill.clone(),
            exit_fill: Fill {
                side: Side::Sell,
                fill_price: 100.0 + pnl,
                ..fill
            },
            quantity: 1.0,
            pnl,
            pnl_percent: pnl,
            duration_bars,
        }
    }

    #[test]
    fn test_basic_metrics() {
        let equity = make_equity_curve(&[10000.0, 10100.0, 10200.0, 10300.0, 10400.0]);
        let report = PerformanceMetricsCalculator::compute(&equity, &[], 252.0);

        assert_relative_eq!(report.total_return, 0.04, epsilon = 1e-12);
        assert_relative_eq!(report.annual_return, 0.04 * 252.0 / 5.0, epsilon = 1e-12);
        assert_eq!(report.max_drawdown, 0.0);
        assert!(report.sharpe > 0.0);
        assert_eq!(report.sortino, 0.0);
    }

    #[test]
    fn test_flat_curve() {
        let equity = make_equity_curve(&[10000.0; 6]);
        let report = PerformanceMetricsCalculator::compute(&equity, &[], 252.0);

        assert_eq!(report.sharpe, 0.0);
        assert_eq!(report.sortino, 0.0);
        assert_eq!(report.max_drawdown, 0.0);
        assert_eq!(report.volatility, 0.0);
        assert_eq!(report.calmar, 0.0);
    }

    #[test]
    fn test_max_drawdown() {
        let equity = make_equity_curve(&[10000.0, 11000.0, 9000.0, 9500.0, 10500.0]);
        let report = PerformanceMetricsCalculator::compute(&equity, &[], 252.0);

        // Peak 11000, trough 9000
        assert_relative_eq!(report.max_drawdown, -2000.0 / 11000.0, epsilon = 1e-12);
        assert_eq!(report.max_drawdown_duration_bars, 3);
        assert!(report.calmar > 0.0);
    }

    #[test]
    fn test_sortino_uses_negative_periods_only() {
        let equity = make_equity_curve(&[100.0, 110.0, 99.0, 108.9]);
        let report = PerformanceMetricsCalculator::compute(&equity, &[], 252.0);

        // Returns: +0.1, -0.1, +0.1; downside deviation 0.1
        let mean = 0.1 / 3.0;
        assert_relative_eq!(report.sortino, mean / 0.1 * 252f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_profit_factor() {
        let trades = vec![make_trade(100.0, 2), make_trade(-50.0, 4), make_trade(0.0, 1)];
        let report = PerformanceMetricsCalculator::compute(&[], &trades, 252.0);

        assert_eq!(report.total_trades, 3);
        assert_eq!(report.winning_trades, 1);
        assert_eq!(report.losing_trades, 1);
        assert_relative_eq!(report.profit_factor, 2.0);
        assert_relative_eq!(report.win_rate, 1.0 / 3.0);
        assert_relative_eq!(report.expectancy, 50.0 / 3.0);
        assert_relative_eq!(report.avg_trade_duration, 7.0 / 3.0);
        assert_eq!(report.largest_win, 100.0);
        assert_eq!(report.largest_loss, -50.0);
        assert_eq!(report.avg_loss, 50.0);
    }

    #[test]
    fn test_profit_factor_sentinels() {
        let winners_only =
            PerformanceMetricsCalculator::compute(&[], &[make_trade(10.0, 1)], 252.0);
        assert!(winners_only.profit_factor_unbounded());

        let losers_only =
            PerformanceMetricsCalculator::compute(&[], &[make_trade(-10.0, 1)], 252.0);
        assert_eq!(losers_only.profit_factor, 0.0);
    }

    #[test]
    fn test_empty_inputs() {
        let report = PerformanceMetricsCalculator::compute(&[], &[], 252.0);
        assert_eq!(report, PerformanceReport::default());

        let single = make_equity_curve(&[10000.0]);
        let report = PerformanceMetricsCalculator::compute(&single, &[], 252.0);
        assert_eq!(report, PerformanceReport::default());
    }

    #[test]
    fn test_compute_is_idempotent() {
        let equity = make_equity_curve(&[10000.0, 10300.0, 9800.0, 10100.0, 10700.0]);
        let trades = vec![make_trade(300.0, 3), make_trade(-120.0, 1)];

        let a = PerformanceMetricsCalculator::compute(&equity, &trades, 365.0);
        let b = PerformanceMetricsCalculator::compute(&equity, &trades, 365.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_drawdown_curve() {
        let equity = make_equity_curve(&[10000.0, 11000.0, 10000.0, 9000.0]);
        let dd_curve = PerformanceMetricsCalculator::drawdown_curve(&equity);

        assert_eq!(dd_curve.len(), 4);
        assert_eq!(dd_curve[0].1, 0.0);
        assert_eq!(dd_curve[1].1, 0.0);
        assert_relative_eq!(dd_curve[2].1, -1000.0 / 11000.0, epsilon = 1e-12);
        assert_relative_eq!(dd_curve[3].1, -2000.0 / 11000.0, epsilon = 1e-12);
    }
}
