//! Error types for the bioreactor gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the bioreactor gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Telemetry payload is not a mapping
    #[error("structural validation error: {0}")]
    Structural(String),

    /// Request body failed field validation
    #[error("validation error: {0}")]
    Validation(String),

    /// Existing log file was written with a different column layout
    #[error("schema mismatch in {path}: header does not match schema {expected}")]
    SchemaMismatch { path: String, expected: String },

    /// Broker publish failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Broker client setup error
    #[error("broker error: {0}")]
    Broker(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding error
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error came from the persistence layer
    #[must_use]
    pub const fn is_persistence(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Csv(_) | Self::SchemaMismatch { .. })
    }
}
