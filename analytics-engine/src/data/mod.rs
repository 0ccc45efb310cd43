//! Market data adapters: file loaders, synthetic generators and the
//! validated per-symbol series the engine replays

pub mod loader;
pub mod series;
pub mod synthetic;

pub use loader::{load_csv, load_json};
pub use series::{BarRef, MarketDataSeries};
pub use synthetic::{bars_from_closes, generate_synthetic_bars};

use std::path::Path;

use common::{AnalyticsError, Bar, Result};

/// Load bars by file extension (`.csv` or `.json`)
pub fn load_file(path: &Path, default_symbol: &str) -> Result<Vec<Bar>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "csv" => load_csv(path, default_symbol),
        "json" => load_json(path, default_symbol),
        other => Err(AnalyticsError::DataLoadError(format!(
            "{}: unsupported file format '{}'",
            path.display(),
            other
        ))),
    }
}
