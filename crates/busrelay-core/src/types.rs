//! Common type definitions shared across busrelay components.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a configured delivery destination (e.g. `aws1`).
///
/// The id doubles as the environment-variable prefix for the destination's
/// settings, so it is restricted to ASCII alphanumerics, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DestinationId(String);

impl DestinationId {
    /// Create a new destination id.
    ///
    /// # Errors
    /// Returns an error if the id is empty or contains characters other than
    /// ASCII alphanumerics, `-` or `_`.
    pub fn new(id: impl Into<String>) -> Result<Self, crate::RelayError> {
        let id = id.into();
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(crate::RelayError::InvalidDestinationId(id));
        }
        Ok(Self(id))
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The environment variable prefix for this destination (`aws-1` -> `AWS_1`).
    #[must_use]
    pub fn env_prefix(&self) -> String {
        self.0.to_ascii_uppercase().replace('-', "_")
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Temporary credentials issued by the credential exchange.
///
/// Credentials are immutable once issued: a refresh replaces the whole value.
/// The `Debug` implementation redacts the secret key and session token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// The access key id (`ASIA...` for temporary credentials).
    pub access_key_id: String,
    /// The secret access key used to derive signing keys.
    pub secret_access_key: String,
    /// The session token, sent as `x-amz-security-token` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// The region these credentials were issued for.
    pub region: String,
    /// Absolute expiry instant.
    pub expires_at: DateTime<Utc>,
}

impl Credentials {
    /// Time left before these credentials expire, or zero if already expired.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the credentials remain usable for more than `safety_margin` at `now`.
    ///
    /// Credentials inside the margin (or past `expires_at`) are considered
    /// expiring and must be replaced before use.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>, safety_margin: Duration) -> bool {
        self.remaining(now) > safety_margin
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
