//! Signed request assembly.
//!
//! [`sign_request`] turns a request description plus a [`SigningContext`] into
//! the complete set of headers an outbound call must carry.

use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::canonical::CanonicalRequest;
use crate::error::SigningError;
use crate::sigv4::{SigningContext, compute_authorization_header, hash_payload};

/// Header carrying the payload hash.
pub const X_AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";
/// Header carrying the request timestamp.
pub const X_AMZ_DATE: &str = "x-amz-date";
/// Header carrying the session token of temporary credentials.
pub const X_AMZ_SECURITY_TOKEN: &str = "x-amz-security-token";

/// A request to be signed.
#[derive(Debug, Clone, Copy)]
pub struct SignableRequest<'a> {
    /// HTTP method.
    pub method: &'a str,
    /// Value of the `host` header (`host[:port]`).
    pub host: &'a str,
    /// URL path.
    pub path: &'a str,
    /// Raw query string without the leading `?`.
    pub query: &'a str,
    /// Additional headers to send and sign (e.g. `content-type`, `x-amz-target`).
    pub headers: &'a [(&'a str, &'a str)],
    /// Request body.
    pub body: &'a [u8],
}

/// Sign `request` and return every header it must be sent with.
///
/// The map holds `host`, `x-amz-date`, `x-amz-content-sha256`,
/// `x-amz-security-token` (when the credentials carry a session token), the
/// caller's extra headers and `authorization`. All of them except
/// `authorization` are signed.
///
/// # Errors
///
/// Returns [`SigningError`] if a cryptographic primitive fails or a header
/// cannot be encoded.
pub fn sign_request(
    request: &SignableRequest<'_>,
    context: &SigningContext<'_>,
) -> Result<HeaderMap, SigningError> {
    let payload_hash = hash_payload(request.body);
    let amz_date = context.amz_date();

    let mut headers: Vec<(&str, &str)> = Vec::with_capacity(request.headers.len() + 4);
    headers.push(("host", request.host));
    headers.push((X_AMZ_DATE, &amz_date));
    headers.push((X_AMZ_CONTENT_SHA256, &payload_hash));
    if let Some(token) = context.credentials.session_token.as_deref() {
        headers.push((X_AMZ_SECURITY_TOKEN, token));
    }
    headers.extend_from_slice(request.headers);

    let canonical = CanonicalRequest::new(
        request.method,
        request.path,
        request.query,
        &headers,
        &payload_hash,
    );
    let authorization = compute_authorization_header(context, &canonical)?;

    debug!(
        access_key_id = %context.credentials.access_key_id,
        host = request.host,
        signed_headers = %canonical.signed_headers,
        "Signed request"
    );

    let mut map = HeaderMap::with_capacity(headers.len() + 1);
    for (name, value) in headers {
        map.append(header_name(name)?, header_value(name, value)?);
    }
    map.insert(
        http::header::AUTHORIZATION,
        header_value("authorization", &authorization)?,
    );
    Ok(map)
}

fn header_name(name: &str) -> Result<HeaderName, SigningError> {
    HeaderName::from_bytes(name.trim().to_lowercase().as_bytes()).map_err(|e| {
        SigningError::InvalidHeader {
            name: name.to_owned(),
            reason: e.to_string(),
        }
    })
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, SigningError> {
    HeaderValue::from_str(value.trim()).map_err(|e| SigningError::InvalidHeader {
        name: name.to_owned(),
        reason: e.to_string(),
    })
}
