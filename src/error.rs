use thiserror::Error;

/// Main error type for the trading bot
#[derive(Error, Debug)]
pub enum SpotbotError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    Validation(String),

    // Environment contract errors
    #[error("Invalid action index: {0} (expected 0=Hold, 1=Buy, 2=Sell)")]
    InvalidAction(usize),

    #[error("Episode is done; call reset() before stepping again")]
    EpisodeDone,

    // Market data errors
    #[error("Insufficient market data: {0}")]
    InsufficientData(String),

    #[error("Invalid market data: {0}")]
    InvalidMarketData(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Model persistence errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Tensor error: {0}")]
    Tensor(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for SpotbotError
pub type Result<T> = std::result::Result<T, SpotbotError>;

impl From<burn::record::RecorderError> for SpotbotError {
    fn from(err: burn::record::RecorderError) -> Self {
        SpotbotError::Checkpoint(format!("{:?}", err))
    }
}
