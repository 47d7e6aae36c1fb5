//! Error types for Lethe operations

/// Result type for Lethe operations
pub type Result<T> = std::result::Result<T, LetheError>;

/// Error types for the Lethe context manager
#[derive(Debug, thiserror::Error)]
pub enum LetheError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Window-level error (impossible internal state)
    #[error("Window error: {0}")]
    Window(String),

    /// Service lifecycle error
    #[error("Service error: {0}")]
    Service(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
