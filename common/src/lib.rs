pub mod config;
pub mod error;
pub mod types;

pub use config::{AnalyticsConfig, BacktestConfig, FillTiming, OptimizerConfig, RiskConfig};
pub use error::{AnalyticsError, Result};
pub use types::*;
