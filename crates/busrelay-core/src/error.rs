//! Error types for the busrelay core.

/// Core error type for busrelay infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Invalid destination identifier.
    #[error("invalid destination id: {0:?} (must be non-empty ASCII alphanumerics, '-' or '_')")]
    InvalidDestinationId(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience result type for busrelay core operations.
pub type RelayResult<T> = Result<T, RelayError>;
