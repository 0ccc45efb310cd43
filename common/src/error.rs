use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Range error: {0}")]
    Range(String),

    #[error("Insufficient data: need at least {required} bars, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Invalid signal for {symbol}: {reason}")]
    InvalidSignal { symbol: String, reason: String },

    #[error("Alignment error: {0}")]
    Alignment(String),

    #[error("Singular covariance: {0}")]
    SingularCovariance(String),

    #[error("Infeasible: {0}")]
    Infeasible(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Data loading error: {0}")]
    DataLoadError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parse error: {0}")]
    CsvError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
