//! Error types for the evaluation core.

use thiserror::Error;

/// Main error type for backtests, optimization sweeps and analyses.
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Strategy error: {0}")]
    StrategyError(String),

    #[error("No data loaded")]
    NoData,

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Optimization error: {0}")]
    OptimizationError(String),
}

impl BacktestError {
    /// Shorthand used by strategy implementations.
    pub fn strategy(msg: impl Into<String>) -> Self {
        BacktestError::StrategyError(msg.into())
    }

    /// Shorthand for configuration failures.
    pub fn config(msg: impl Into<String>) -> Self {
        BacktestError::ConfigError(msg.into())
    }
}

/// Result type alias for backtest operations.
pub type Result<T> = std::result::Result<T, BacktestError>;
