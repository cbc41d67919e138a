//! Error types for request signing and signature verification.

/// Errors raised while signing a request.
///
/// These come from cryptographic primitives or from header material that
/// cannot be represented on the wire. Neither improves on retry.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The HMAC primitive rejected its key.
    #[error("HMAC-SHA256 failure: {0}")]
    Hmac(String),

    /// A header name or value cannot be sent as an HTTP header.
    #[error("invalid header {name}: {reason}")]
    InvalidHeader {
        /// Header name as supplied.
        name: String,
        /// Why the header was rejected.
        reason: String,
    },
}

impl SigningError {
    /// Signing failures are fatal for the current attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Errors that can occur while verifying a SigV4 signed request.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The `Authorization` header is missing from the request.
    #[error("Missing Authorization header")]
    MissingAuthHeader,

    /// The `Authorization` header could not be parsed.
    #[error("Invalid Authorization header format")]
    InvalidAuthHeader,

    /// The signing algorithm is not supported (only AWS4-HMAC-SHA256 is supported).
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A header referenced in `SignedHeaders` is missing.
    #[error("Missing required header: {0}")]
    MissingHeader(String),

    /// The `Credential` component is not `AKID/date/region/service/aws4_request`.
    #[error("Invalid credential format")]
    InvalidCredential,

    /// The access key ID is unknown to the key provider.
    #[error("Access key not found: {0}")]
    AccessKeyNotFound(String),

    /// `x-amz-content-sha256` does not match the body.
    #[error("Payload hash does not match x-amz-content-sha256")]
    PayloadHashMismatch,

    /// The computed signature does not match the provided signature.
    #[error("Signature does not match")]
    SignatureDoesNotMatch,

    /// Recomputing the signature failed.
    #[error(transparent)]
    Signing(#[from] SigningError),
}
