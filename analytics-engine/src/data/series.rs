use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{AnalyticsError, Bar, Result};

/// Ordered bars per symbol
///
/// Construction enforces strictly increasing timestamps per symbol, so the
/// engine can hand out prefix slices as look-ahead-free history windows.
#[derive(Debug, Clone, Default)]
pub struct MarketDataSeries {
    bars: BTreeMap<String, Vec<Bar>>,
}

impl MarketDataSeries {
    /// Group bars by symbol and validate ordering
    pub fn new(bars: Vec<Bar>) -> Result<Self> {
        let mut grouped: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
        for bar in bars {
            grouped.entry(bar.symbol.clone()).or_default().push(bar);
        }
        for (symbol, series) in &grouped {
            Self::check_order(symbol, series)?;
        }
        Ok(Self { bars: grouped })
    }

    /// Single-symbol series; every bar's symbol is overwritten with `symbol`
    pub fn single(symbol: &str, mut bars: Vec<Bar>) -> Result<Self> {
        for bar in &mut bars {
            bar.symbol = symbol.to_string();
        }
        Self::new(bars)
    }

    fn check_order(symbol: &str, bars: &[Bar]) -> Result<()> {
        for pair in bars.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(AnalyticsError::Range(format!(
                    "{}: bars not strictly increasing at {}",
                    symbol, pair[1].timestamp
                )));
            }
        }
        Ok(())
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.bars.keys().map(String::as_str)
    }

    pub fn bars(&self, symbol: &str) -> Option<&[Bar]> {
        self.bars.get(symbol).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.bars.values().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.bars.values().map(Vec::len).sum()
    }

    /// Earliest and latest timestamp over the given symbols
    pub fn bounds<'a>(
        &self,
        symbols: impl IntoIterator<Item = &'a str>,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let mut bounds: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
        for symbol in symbols {
            let Some(series) = self.bars(symbol) else { continue };
            let (Some(first), Some(last)) = (series.first(), series.last()) else { continue };
            bounds = Some(match bounds {
                None => (first.timestamp, last.timestamp),
                Some((lo, hi)) => (lo.min(first.timestamp), hi.max(last.timestamp)),
            });
        }
        bounds
    }

    /// Simple close-to-close returns per symbol, timestamped at the later bar
    pub fn close_returns(&self) -> BTreeMap<String, Vec<(DateTime<Utc>, f64)>> {
        self.bars
            .iter()
            .map(|(symbol, bars)| {
                let returns = bars
                    .windows(2)
                    .map(|w| {
                        let r = if w[0].close != 0.0 {
                            (w[1].close - w[0].close) / w[0].close
                        } else {
                            0.0
                        };
                        (w[1].timestamp, r)
                    })
                    .collect();
                (symbol.clone(), returns)
            })
            .collect()
    }
}

/// Reference to one bar inside a series: symbol key plus index in its vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarRef<'a> {
    pub symbol: &'a str,
    pub index: usize,
    pub timestamp: DateTime<Utc>,
}

impl MarketDataSeries {
    /// Merge the selected symbols' bars in `[start, end]` into one ascending
    /// event sequence. Ties on timestamp are ordered by symbol.
    pub fn merged<'a>(
        &'a self,
        symbols: &[&'a str],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<BarRef<'a>> {
        let mut events: Vec<BarRef<'a>> = symbols
            .iter()
            .filter_map(|&symbol| self.bars(symbol).map(|bars| (symbol, bars)))
            .flat_map(|(symbol, bars)| {
                bars.iter()
                    .enumerate()
                    .filter(move |(_, b)| b.timestamp >= start && b.timestamp <= end)
                    .map(move |(index, b)| BarRef {
                        symbol,
                        index,
                        timestamp: b.timestamp,
                    })
            })
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.symbol.cmp(b.symbol)));
        events
    }
}
