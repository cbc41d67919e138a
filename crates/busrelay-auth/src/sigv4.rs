//! AWS Signature Version 4 signing primitives.
//!
//! The signing flow:
//!
//! 1. Hash the payload ([`hash_payload`]).
//! 2. Build the canonical request ([`CanonicalRequest`]).
//! 3. Build the string to sign from the timestamp, credential scope and the
//!    canonical request hash ([`build_string_to_sign`]).
//! 4. Derive the signing key through the HMAC-SHA256 chain
//!    ([`derive_signing_key`]).
//! 5. Sign and assemble the `Authorization` header
//!    ([`compute_authorization_header`]).
//!
//! All functions are pure. A failure of the HMAC primitive is reported as a
//! [`SigningError`] and is never retried.

use busrelay_core::Credentials;
use chrono::{DateTime, Utc};
use hmac::{Hmac, KeyInit, Mac};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::canonical::CanonicalRequest;
use crate::error::SigningError;

/// The only algorithm supported by this implementation.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Terminator of every credential scope.
pub const SCOPE_TERMINATOR: &str = "aws4_request";

/// SHA-256 of the empty byte string, lower-case hex.
pub const EMPTY_PAYLOAD_HASH: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Timestamp format of `x-amz-date`.
const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Date stamp format of the credential scope.
const DATE_STAMP_FORMAT: &str = "%Y%m%d";

type HmacSha256 = Hmac<Sha256>;

/// Everything besides the request itself that a signature binds to.
#[derive(Debug, Clone, Copy)]
pub struct SigningContext<'a> {
    /// Request time (UTC). Rendered at second precision.
    pub timestamp: DateTime<Utc>,
    /// Signing region.
    pub region: &'a str,
    /// Signing service.
    pub service: &'a str,
    /// Credentials the signature is computed with.
    pub credentials: &'a Credentials,
}

impl<'a> SigningContext<'a> {
    /// Create a signing context.
    #[must_use]
    pub fn new(
        timestamp: DateTime<Utc>,
        region: &'a str,
        service: &'a str,
        credentials: &'a Credentials,
    ) -> Self {
        Self {
            timestamp,
            region,
            service,
            credentials,
        }
    }

    /// The `x-amz-date` value (`yyyyMMdd'T'HHmmss'Z'`).
    #[must_use]
    pub fn amz_date(&self) -> String {
        self.timestamp.format(AMZ_DATE_FORMAT).to_string()
    }

    /// The scope date (`yyyyMMdd`).
    #[must_use]
    pub fn date_stamp(&self) -> String {
        self.timestamp.format(DATE_STAMP_FORMAT).to_string()
    }

    /// The credential scope `date/region/service/aws4_request`.
    #[must_use]
    pub fn credential_scope(&self) -> String {
        credential_scope(&self.date_stamp(), self.region, self.service)
    }
}

/// Compute the lower-case hex SHA-256 of `payload`.
///
/// # Examples
///
/// ```
/// use busrelay_auth::sigv4::{EMPTY_PAYLOAD_HASH, hash_payload};
///
/// assert_eq!(hash_payload(b""), EMPTY_PAYLOAD_HASH);
/// ```
#[must_use]
pub fn hash_payload(payload: &[u8]) -> String {
    if payload.is_empty() {
        return EMPTY_PAYLOAD_HASH.to_owned();
    }
    hex::encode(Sha256::digest(payload))
}

/// Build the credential scope `date/region/service/aws4_request`.
#[must_use]
pub fn credential_scope(date_stamp: &str, region: &str, service: &str) -> String {
    format!("{date_stamp}/{region}/{service}/{SCOPE_TERMINATOR}")
}

/// Build the SigV4 string to sign.
///
/// ```text
/// AWS4-HMAC-SHA256\n
/// <timestamp>\n
/// <date>/<region>/<service>/aws4_request\n
/// <hex(SHA256(canonical_request))>
/// ```
///
/// # Examples
///
/// ```
/// use busrelay_auth::sigv4::build_string_to_sign;
///
/// let sts = build_string_to_sign("20130524T000000Z", "20130524", "us-east-1", "s3", "");
/// assert!(sts.starts_with("AWS4-HMAC-SHA256\n20130524T000000Z\n20130524/us-east-1/s3/aws4_request\n"));
/// ```
#[must_use]
pub fn build_string_to_sign(
    timestamp: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
    canonical_request: &str,
) -> String {
    let scope = credential_scope(date_stamp, region, service);
    let canonical_hash = hash_payload(canonical_request.as_bytes());
    format!("{ALGORITHM}\n{timestamp}\n{scope}\n{canonical_hash}")
}

/// Derive the SigV4 signing key.
///
/// ```text
/// DateKey              = HMAC-SHA256("AWS4" + secret_key, date)
/// DateRegionKey        = HMAC-SHA256(DateKey, region)
/// DateRegionServiceKey = HMAC-SHA256(DateRegionKey, service)
/// SigningKey           = HMAC-SHA256(DateRegionServiceKey, "aws4_request")
/// ```
///
/// # Errors
///
/// Returns [`SigningError::Hmac`] if the HMAC primitive rejects a key.
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, SigningError> {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes())?;
    let date_region_key = hmac_sha256(&date_key, region.as_bytes())?;
    let date_region_service_key = hmac_sha256(&date_region_key, service.as_bytes())?;
    hmac_sha256(&date_region_service_key, SCOPE_TERMINATOR.as_bytes())
}

/// Compute the hex HMAC-SHA256 signature of `string_to_sign`.
///
/// # Errors
///
/// Returns [`SigningError::Hmac`] if the HMAC primitive rejects the key.
pub fn compute_signature(signing_key: &[u8], string_to_sign: &str) -> Result<String, SigningError> {
    hmac_sha256(signing_key, string_to_sign.as_bytes()).map(hex::encode)
}

/// Sign a canonical request and assemble the `Authorization` header value.
///
/// The result has the form
/// `AWS4-HMAC-SHA256 Credential=<akid>/<scope>, SignedHeaders=<names>, Signature=<hex>`.
///
/// # Errors
///
/// Returns [`SigningError`] if a cryptographic primitive fails.
pub fn compute_authorization_header(
    context: &SigningContext<'_>,
    canonical_request: &CanonicalRequest,
) -> Result<String, SigningError> {
    let rendered = canonical_request.to_string();
    debug!(canonical_request = %rendered, "Built canonical request");

    let date_stamp = context.date_stamp();
    let string_to_sign = build_string_to_sign(
        &context.amz_date(),
        &date_stamp,
        context.region,
        context.service,
        &rendered,
    );
    debug!(string_to_sign, "Built string to sign");

    let signing_key = derive_signing_key(
        &context.credentials.secret_access_key,
        &date_stamp,
        context.region,
        context.service,
    )?;
    let signature = compute_signature(&signing_key, &string_to_sign)?;

    Ok(format!(
        "{ALGORITHM} Credential={}/{}, SignedHeaders={}, Signature={signature}",
        context.credentials.access_key_id,
        credential_scope(&date_stamp, context.region, context.service),
        canonical_request.signed_headers,
    ))
}

/// Compute HMAC-SHA256 and return the raw bytes.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SigningError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| SigningError::Hmac(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
