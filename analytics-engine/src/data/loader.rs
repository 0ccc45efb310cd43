use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use common::{AnalyticsError, Bar, Result};
use serde::Deserialize;

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

/// One input row; the symbol column is optional
#[derive(Debug, Deserialize)]
struct BarRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    #[serde(default)]
    symbol: Option<String>,
}

impl BarRow {
    fn into_bar(self, default_symbol: &str, row: usize) -> Result<Bar> {
        let timestamp = parse_timestamp(&self.timestamp)?;
        let symbol = match self.symbol.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => default_symbol.to_string(),
        };
        let bar = Bar::new(
            symbol,
            timestamp,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
        );
        check_bar(&bar, row)?;
        Ok(bar)
    }
}

/// Load bars from a CSV file with a header row
///
/// Columns are matched by name: timestamp, open, high, low, close, volume and
/// an optional symbol. Rows without a symbol are tagged with `default_symbol`.
pub fn load_csv(path: &Path, default_symbol: &str) -> Result<Vec<Bar>> {
    let file = File::open(path)
        .map_err(|e| AnalyticsError::DataLoadError(format!("{}: {}", path.display(), e)))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(file));

    reader
        .deserialize::<BarRow>()
        .enumerate()
        .map(|(i, row)| {
            let row_number = i + 2;
            let row =
                row.map_err(|e| AnalyticsError::CsvError(format!("row {}: {}", row_number, e)))?;
            row.into_bar(default_symbol, row_number)
        })
        .collect()
}

/// Load bars from a JSON array of rows in the CSV column layout
pub fn load_json(path: &Path, default_symbol: &str) -> Result<Vec<Bar>> {
    let file = File::open(path)
        .map_err(|e| AnalyticsError::DataLoadError(format!("{}: {}", path.display(), e)))?;
    let rows: Vec<BarRow> = serde_json::from_reader(BufReader::new(file))?;
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| row.into_bar(default_symbol, i + 1))
        .collect()
}

fn check_bar(bar: &Bar, row: usize) -> Result<()> {
    let prices = [bar.open, bar.high, bar.low, bar.close];
    if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return Err(AnalyticsError::DataLoadError(format!(
            "row {}: prices must be finite and positive",
            row
        )));
    }
    if bar.high < bar.low || !(bar.volume >= 0.0) {
        return Err(AnalyticsError::DataLoadError(format!(
            "row {}: inconsistent bar (high {} < low {} or negative volume)",
            row, bar.high, bar.low
        )));
    }
    Ok(())
}

/// RFC 3339, common date/datetime layouts, or Unix seconds
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .map(|date| date.and_time(chrono::NaiveTime::MIN))
        });
    if let Some(naive) = naive {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    s.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| AnalyticsError::CsvError(format!("Unable to parse timestamp: {}", s)))
}
