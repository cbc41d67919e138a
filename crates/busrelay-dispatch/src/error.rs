//! Error types for the dispatch pipeline.
//!
//! Only [`DispatchError`] crosses the orchestrator boundary. Every other
//! error here is absorbed into a per-destination outcome.

use busrelay_auth::SigningError;
use busrelay_core::DestinationId;
use busrelay_credentials::CredentialError;

/// Failure of the outbound HTTP call itself.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The call did not complete within the delivery timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other transport failure.
    #[error("request failed: {0}")]
    Request(String),
}

/// Failure to deliver to one destination.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Credentials for the destination partition could not be obtained.
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    /// The request could not be signed.
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// The request body could not be encoded.
    #[error("failed to encode request body: {0}")]
    Encode(String),

    /// The outbound call failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The destination answered with a non-success status.
    #[error("destination rejected the request with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The destination accepted the call but reported failed entries.
    #[error("destination reported {count} failed entries: {message}")]
    FailedEntries {
        /// `FailedEntryCount` from the response.
        count: u32,
        /// First error code/message reported.
        message: String,
    },
}

impl DeliveryError {
    /// Whether another attempt may succeed.
    ///
    /// Authentication rejections count as retryable: the orchestrator drops
    /// the cached credentials before the next attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Credentials(e) => e.is_retryable(),
            Self::Signing(e) => e.is_retryable(),
            Self::Encode(_) => false,
            Self::Transport(_) | Self::FailedEntries { .. } => true,
            Self::Rejected { status, .. } => {
                matches!(status, 401 | 403 | 408 | 429) || *status >= 500
            }
        }
    }

    /// Whether the destination rejected the request's credentials.
    #[must_use]
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Rejected { status: 401 | 403, .. })
    }
}

/// The dispatch failure that withholds acknowledgment.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// At least one required destination failed.
    #[error("delivery to required destination(s) failed: {}", join_ids(failed))]
    PartialDispatchFailure {
        /// Required destinations that failed.
        failed: Vec<DestinationId>,
        /// Outcomes of every targeted destination.
        outcomes: Vec<crate::dispatcher::DispatchOutcome>,
    },
}

/// Failure to hand a message to its partition worker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    /// The worker task for the partition is no longer running.
    #[error("worker for {topic}/{partition} has stopped")]
    Stopped {
        /// Topic of the partition.
        topic: String,
        /// Partition number.
        partition: i32,
    },
}

fn join_ids(ids: &[DestinationId]) -> String {
    ids.iter()
        .map(DestinationId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
