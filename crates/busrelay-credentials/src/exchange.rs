//! Certificate-authenticated credential exchange.
//!
//! The exchange trades a long-lived client certificate for short-lived
//! credentials: a `POST /sessions` over mutual TLS with a JSON body naming the
//! profile, role and trust anchor. [`RolesAnywhereExchange`] is the HTTP
//! implementation; the manager only sees the [`CredentialExchange`] trait.

use std::time::Duration;

use busrelay_core::{CredentialSettings, Credentials, ExchangeProfile};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CredentialError;
use crate::identity::ClientIdentity;

/// Path of the session-creation endpoint.
pub const SESSIONS_PATH: &str = "/sessions";

/// Longest response body excerpt carried in an error.
const ERROR_BODY_LIMIT: usize = 512;

/// Issues temporary credentials for one partition.
#[async_trait::async_trait]
pub trait CredentialExchange: Send + Sync + std::fmt::Debug {
    /// Perform one exchange call for `partition`.
    ///
    /// `region` is recorded on the returned credentials.
    async fn exchange(
        &self,
        partition: &str,
        profile: &ExchangeProfile,
        region: &str,
    ) -> Result<Credentials, CredentialError>;
}

/// JSON body of a session request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    /// Profile ARN.
    pub profile_arn: String,
    /// Trust anchor ARN.
    pub trust_anchor_arn: String,
    /// Role ARN.
    pub role_arn: String,
    /// Requested credential lifetime.
    pub duration_seconds: u32,
    /// Optional session name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
}

impl ExchangeRequest {
    /// Build the request body for `profile`.
    #[must_use]
    pub fn new(profile: &ExchangeProfile, duration_seconds: u32, session_name: Option<String>) -> Self {
        Self {
            profile_arn: profile.profile_arn.clone(),
            trust_anchor_arn: profile.trust_anchor_arn.clone(),
            role_arn: profile.role_arn.clone(),
            duration_seconds,
            session_name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeResponse {
    #[serde(default)]
    credentials: Option<IssuedCredentials>,
    #[serde(default)]
    credential_set: Vec<CredentialSetEntry>,
}

#[derive(Debug, Deserialize)]
struct CredentialSetEntry {
    credentials: IssuedCredentials,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuedCredentials {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    session_token: Option<String>,
    expiration: Expiration,
}

impl std::fmt::Debug for IssuedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// Expiry as sent by the endpoint: RFC 3339 text, or epoch milliseconds as
/// a number or a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Expiration {
    Millis(i64),
    Text(String),
}

impl Expiration {
    fn to_datetime(&self) -> Result<DateTime<Utc>, CredentialError> {
        let millis = match self {
            Self::Millis(millis) => *millis,
            Self::Text(text) => match text.trim().parse::<i64>() {
                Ok(millis) => millis,
                Err(_) => {
                    return DateTime::parse_from_rfc3339(text.trim())
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| {
                            CredentialError::InvalidResponse(format!(
                                "unparseable expiration {text:?}: {e}"
                            ))
                        });
                }
            },
        };
        Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
            CredentialError::InvalidResponse(format!("expiration out of range: {millis}"))
        })
    }
}

/// Parse an exchange response body into [`Credentials`].
///
/// Accepts either a top-level `credentials` object or the first entry of a
/// `credentialSet` array.
///
/// # Errors
///
/// Returns [`CredentialError::InvalidResponse`] if the body carries no
/// credentials or an unparseable expiration.
pub fn parse_exchange_response(body: &[u8], region: &str) -> Result<Credentials, CredentialError> {
    let response: ExchangeResponse = serde_json::from_slice(body)
        .map_err(|e| CredentialError::InvalidResponse(e.to_string()))?;

    let issued = response
        .credentials
        .or_else(|| response.credential_set.into_iter().next().map(|e| e.credentials))
        .ok_or_else(|| CredentialError::InvalidResponse("no credentials in response".to_owned()))?;

    if issued.access_key_id.is_empty() || issued.secret_access_key.is_empty() {
        return Err(CredentialError::InvalidResponse(
            "empty access key or secret".to_owned(),
        ));
    }

    Ok(Credentials {
        expires_at: issued.expiration.to_datetime()?,
        access_key_id: issued.access_key_id,
        secret_access_key: issued.secret_access_key,
        session_token: issued.session_token.filter(|t| !t.is_empty()),
        region: region.to_owned(),
    })
}

/// HTTP implementation of [`CredentialExchange`] with a mutual-TLS client.
#[derive(Debug, Clone)]
pub struct RolesAnywhereExchange {
    client: reqwest::Client,
    duration_seconds: u32,
    session_name: Option<String>,
}

impl RolesAnywhereExchange {
    /// Build the exchange client from the shared credential settings.
    ///
    /// Without a configured certificate the client connects without a client
    /// identity, which only suits plain-HTTP loopback endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Identity`] for unusable identity material and
    /// [`CredentialError::Exchange`] if the HTTP client cannot be built.
    pub fn new(settings: &CredentialSettings) -> Result<Self, CredentialError> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(settings.exchange_timeout)
            .connect_timeout(settings.exchange_timeout.min(Duration::from_secs(5)));

        match ClientIdentity::from_settings(settings)? {
            Some(identity) => builder = builder.identity(identity.to_tls_identity()?),
            None => warn!("No client certificate configured; credential exchange runs without mutual TLS"),
        }

        let client = builder.build().map_err(|e| CredentialError::Exchange {
            partition: String::new(),
            message: e.to_string(),
        })?;

        Ok(Self {
            client,
            duration_seconds: settings.duration_seconds,
            session_name: settings.session_name.clone(),
        })
    }
}

#[async_trait::async_trait]
impl CredentialExchange for RolesAnywhereExchange {
    async fn exchange(
        &self,
        partition: &str,
        profile: &ExchangeProfile,
        region: &str,
    ) -> Result<Credentials, CredentialError> {
        let url = format!("{}://{}{SESSIONS_PATH}", profile.scheme, profile.host);
        let body = ExchangeRequest::new(profile, self.duration_seconds, self.session_name.clone());

        debug!(partition, url = %url, role_arn = %profile.role_arn, "Requesting temporary credentials");

        let map_transport = |e: reqwest::Error| {
            if e.is_timeout() {
                CredentialError::Timeout {
                    partition: partition.to_owned(),
                }
            } else {
                CredentialError::Exchange {
                    partition: partition.to_owned(),
                    message: e.to_string(),
                }
            }
        };

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(map_transport)?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes);
            return Err(CredentialError::Rejected {
                partition: partition.to_owned(),
                status: status.as_u16(),
                body: text.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        parse_exchange_response(&bytes, region)
    }
}
