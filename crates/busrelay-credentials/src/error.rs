//! Error types for the credential lifecycle.

/// Errors raised while obtaining credentials for a partition.
///
/// The type is `Clone` so one refresh result can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    /// No exchange identity is configured for the partition.
    #[error("unknown credential partition: {0}")]
    UnknownPartition(String),

    /// The exchange endpoint could not be reached or the connection failed.
    #[error("credential exchange for {partition} failed: {message}")]
    Exchange {
        /// Partition being refreshed.
        partition: String,
        /// Transport error description.
        message: String,
    },

    /// The exchange call did not complete in time.
    #[error("credential exchange for {partition} timed out")]
    Timeout {
        /// Partition being refreshed.
        partition: String,
    },

    /// The exchange endpoint answered with a non-success status.
    #[error("credential exchange for {partition} rejected with status {status}: {body}")]
    Rejected {
        /// Partition being refreshed.
        partition: String,
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The exchange response did not contain usable credentials.
    #[error("invalid credential exchange response: {0}")]
    InvalidResponse(String),

    /// The cache store failed.
    #[error("credential cache error: {0}")]
    Cache(String),

    /// Client certificate or private key material is unusable.
    #[error("invalid client identity: {0}")]
    Identity(String),
}

impl CredentialError {
    /// Whether a later attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Exchange { .. } | Self::Timeout { .. } | Self::Cache(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::UnknownPartition(_) | Self::InvalidResponse(_) | Self::Identity(_) => false,
        }
    }
}
