use thiserror::Error;

/// Core error taxonomy. Every variant is recovered at asset or record
/// scope by the runner/pipeline and aggregated into the run summary.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("data fetch failed for {symbol}: {reason}")]
    DataFetch { symbol: String, reason: String },

    #[error("insufficient data for {symbol}: {got} bars, need {need}")]
    InsufficientData {
        symbol: String,
        got: usize,
        need: usize,
    },

    #[error("numeric instability: {0}")]
    NumericInstability(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Short machine-readable tag used in run summaries and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataFetch { .. } => "data_fetch",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::NumericInstability(_) => "numeric_instability",
            Self::Validation(_) => "validation",
            Self::Persistence(_) => "persistence",
            Self::Http(_) => "http",
            Self::Json(_) => "json",
            Self::Io(_) => "io",
        }
    }
}

impl From<rusqlite::Error> for ScanError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<duckdb::Error> for ScanError {
    fn from(e: duckdb::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
