//! AWS Signature Version 4 verification.
//!
//! The inverse of [`crate::sign::sign_request`]: parse the `Authorization`
//! header, rebuild the canonical request from the signed headers, recompute
//! the signature and compare it in constant time. Loopback endpoints use this
//! to check what the relay sends.

use busrelay_core::Credentials;
use chrono::{NaiveDateTime, TimeZone, Utc};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::canonical::CanonicalRequest;
use crate::error::AuthError;
use crate::keys::SecretKeyProvider;
use crate::sigv4::{
    ALGORITHM, SCOPE_TERMINATOR, SigningContext, compute_authorization_header, hash_payload,
};

/// Parsed components of a SigV4 `Authorization` header.
///
/// ```text
/// AWS4-HMAC-SHA256 Credential=AKID/20130524/us-east-1/s3/aws4_request,
///   SignedHeaders=host;x-amz-content-sha256;x-amz-date,
///   Signature=<hex-signature>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAuth {
    /// The access key id.
    pub access_key_id: String,
    /// Date component of the credential scope (`yyyyMMdd`).
    pub date: String,
    /// Region of the credential scope.
    pub region: String,
    /// Service of the credential scope.
    pub service: String,
    /// Signed header names, lower-case.
    pub signed_headers: Vec<String>,
    /// Hex-encoded signature.
    pub signature: String,
}

/// Parse a SigV4 `Authorization` header value.
///
/// # Errors
///
/// Returns [`AuthError::InvalidAuthHeader`] if a component is missing,
/// [`AuthError::UnsupportedAlgorithm`] for any algorithm other than
/// `AWS4-HMAC-SHA256`, and [`AuthError::InvalidCredential`] for a malformed
/// credential scope.
pub fn parse_authorization_header(header: &str) -> Result<ParsedAuth, AuthError> {
    let (algorithm, rest) = header.split_once(' ').ok_or(AuthError::InvalidAuthHeader)?;
    if algorithm != ALGORITHM {
        return Err(AuthError::UnsupportedAlgorithm(algorithm.to_owned()));
    }

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;
    for part in rest.split(',') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("Credential=") {
            credential = Some(value);
        } else if let Some(value) = part.strip_prefix("SignedHeaders=") {
            signed_headers = Some(value);
        } else if let Some(value) = part.strip_prefix("Signature=") {
            signature = Some(value);
        }
    }

    let credential = credential.ok_or(AuthError::InvalidAuthHeader)?;
    let signed_headers = signed_headers.ok_or(AuthError::InvalidAuthHeader)?;
    let signature = signature.ok_or(AuthError::InvalidAuthHeader)?;

    let scope: Vec<&str> = credential.splitn(5, '/').collect();
    let [access_key_id, date, region, service, terminator] = scope.as_slice() else {
        return Err(AuthError::InvalidCredential);
    };
    if *terminator != SCOPE_TERMINATOR {
        return Err(AuthError::InvalidCredential);
    }

    Ok(ParsedAuth {
        access_key_id: (*access_key_id).to_owned(),
        date: (*date).to_owned(),
        region: (*region).to_owned(),
        service: (*service).to_owned(),
        signed_headers: signed_headers.split(';').map(ToOwned::to_owned).collect(),
        signature: signature.to_owned(),
    })
}

/// Verify a SigV4 signed request against its body.
///
/// The `x-amz-content-sha256` header, when present, must match the body.
///
/// # Errors
///
/// Returns an [`AuthError`] describing the first check that failed.
pub fn verify_signature(
    parts: &http::request::Parts,
    body: &[u8],
    keys: &dyn SecretKeyProvider,
) -> Result<ParsedAuth, AuthError> {
    let auth_header = parts
        .headers
        .get(http::header::AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;
    let parsed = parse_authorization_header(auth_header)?;
    let secret_key = keys.secret_key(&parsed.access_key_id)?;

    let payload_hash = hash_payload(body);
    if let Some(declared) = parts.headers.get("x-amz-content-sha256") {
        if declared.as_bytes() != payload_hash.as_bytes() {
            return Err(AuthError::PayloadHashMismatch);
        }
    }

    let amz_date = header_str(parts, "x-amz-date")?;
    let timestamp = NaiveDateTime::parse_from_str(amz_date, "%Y%m%dT%H%M%SZ")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| AuthError::MissingHeader("x-amz-date".to_owned()))?;

    let mut signed = Vec::with_capacity(parsed.signed_headers.len());
    for name in &parsed.signed_headers {
        let values = parts.headers.get_all(name.as_str());
        let mut found = false;
        for value in values {
            let value = value
                .to_str()
                .map_err(|_| AuthError::MissingHeader(name.clone()))?;
            signed.push((name.as_str(), value));
            found = true;
        }
        if !found {
            return Err(AuthError::MissingHeader(name.clone()));
        }
    }

    let canonical = CanonicalRequest::new(
        parts.method.as_str(),
        parts.uri.path(),
        parts.uri.query().unwrap_or(""),
        &signed,
        &payload_hash,
    );

    let credentials = Credentials {
        access_key_id: parsed.access_key_id.clone(),
        secret_access_key: secret_key,
        session_token: None,
        region: parsed.region.clone(),
        expires_at: timestamp,
    };
    let context = SigningContext::new(timestamp, &parsed.region, &parsed.service, &credentials);
    let expected = compute_authorization_header(&context, &canonical)?;
    let expected_signature = expected
        .rsplit_once("Signature=")
        .map_or("", |(_, signature)| signature);

    if parsed.date != context.date_stamp() {
        return Err(AuthError::InvalidCredential);
    }

    if bool::from(parsed.signature.as_bytes().ct_eq(expected_signature.as_bytes())) {
        debug!(access_key_id = %parsed.access_key_id, "Signature verification succeeded");
        Ok(parsed)
    } else {
        debug!(access_key_id = %parsed.access_key_id, "Signature mismatch");
        Err(AuthError::SignatureDoesNotMatch)
    }
}

fn header_str<'a>(parts: &'a http::request::Parts, name: &str) -> Result<&'a str, AuthError> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| AuthError::MissingHeader(name.to_owned()))?
        .to_str()
        .map_err(|_| AuthError::MissingHeader(name.to_owned()))
}
