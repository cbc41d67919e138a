//! Canonical request construction for AWS Signature Version 4.
//!
//! The canonical request is the newline-separated string:
//!
//! ```text
//! HTTPRequestMethod\n
//! CanonicalURI\n
//! CanonicalQueryString\n
//! CanonicalHeaders\n\n
//! SignedHeaders\n
//! HashedPayload
//! ```
//!
//! Every component is normalized so that the same logical request always
//! produces the same string. Malformed fragments (bad percent escapes, pairs
//! without `=`) are kept as literals rather than rejected.

use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, percent_encode};

use crate::sigv4::hash_payload;

/// Characters percent-encoded in URI path segments: everything except the
/// unreserved set (A-Z, a-z, 0-9, `-`, `_`, `.`, `~`).
const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Characters percent-encoded in query keys and values. Same as the path set,
/// except `/` is preserved.
const QUERY_ENCODE_SET: &AsciiSet = &URI_ENCODE_SET.remove(b'/');

/// The normalized inputs of one signing operation.
///
/// Built per request and never cached. `Display` renders the canonical
/// request string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    /// HTTP method, as given.
    pub method: String,
    /// Canonical URI (`/` when the path is empty).
    pub uri: String,
    /// Canonical query string.
    pub query: String,
    /// Canonical headers keyed by lower-cased name.
    pub headers: BTreeMap<String, String>,
    /// Sorted, `;`-joined signed header names.
    pub signed_headers: String,
    /// Hex SHA-256 of the request body.
    pub payload_hash: String,
}

impl CanonicalRequest {
    /// Normalize the request components. Every header passed in is signed.
    ///
    /// # Examples
    ///
    /// ```
    /// use busrelay_auth::canonical::CanonicalRequest;
    ///
    /// let canonical = CanonicalRequest::new(
    ///     "POST",
    ///     "",
    ///     "b=2&a=1",
    ///     &[("Host", "events.eu-west-1.amazonaws.com")],
    ///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
    /// );
    /// assert_eq!(canonical.uri, "/");
    /// assert_eq!(canonical.query, "a=1&b=2");
    /// assert_eq!(canonical.signed_headers, "host");
    /// ```
    #[must_use]
    pub fn new(
        method: &str,
        uri: &str,
        query: &str,
        headers: &[(&str, &str)],
        payload_hash: &str,
    ) -> Self {
        let headers = build_canonical_headers(headers);
        let signed_headers = headers.keys().map(String::as_str).collect::<Vec<_>>().join(";");
        Self {
            method: method.to_owned(),
            uri: build_canonical_uri(uri),
            query: build_canonical_query_string(query),
            headers,
            signed_headers,
            payload_hash: payload_hash.to_owned(),
        }
    }

    /// Hex SHA-256 of the rendered canonical request.
    #[must_use]
    pub fn hash(&self) -> String {
        hash_payload(self.to_string().as_bytes())
    }
}

impl fmt::Display for CanonicalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.method)?;
        writeln!(f, "{}", self.uri)?;
        writeln!(f, "{}", self.query)?;
        for (name, value) in &self.headers {
            writeln!(f, "{name}:{value}")?;
        }
        writeln!(f)?;
        writeln!(f, "{}", self.signed_headers)?;
        f.write_str(&self.payload_hash)
    }
}

/// Build the full canonical request string from its components.
///
/// # Examples
///
/// ```
/// use busrelay_auth::canonical::build_canonical_request;
///
/// let canonical = build_canonical_request(
///     "GET",
///     "/test.txt",
///     "",
///     &[("host", "examplebucket.s3.amazonaws.com")],
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
/// );
/// assert!(canonical.starts_with("GET\n/test.txt\n"));
/// ```
#[must_use]
pub fn build_canonical_request(
    method: &str,
    uri: &str,
    query_string: &str,
    headers: &[(&str, &str)],
    payload_hash: &str,
) -> String {
    CanonicalRequest::new(method, uri, query_string, headers, payload_hash).to_string()
}

/// Build the canonical URI by URI-encoding each path segment individually.
///
/// Forward slashes are preserved and empty paths are normalized to `/`.
///
/// ```
/// use busrelay_auth::canonical::build_canonical_uri;
///
/// assert_eq!(build_canonical_uri(""), "/");
/// assert_eq!(build_canonical_uri("/hello world"), "/hello%20world");
/// ```
#[must_use]
pub fn build_canonical_uri(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_owned();
    }

    path.split('/')
        .map(|segment| {
            // Decode first so an already-encoded path is not double-encoded.
            reencode(segment, URI_ENCODE_SET)
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Build the canonical query string.
///
/// Each pair is split on its first `=`; key and value are decoded (`+` counts
/// as a space) and re-encoded independently, so space becomes `%20`, `*`
/// becomes `%2A`, and `~` and `/` are kept. Values are grouped by key and
/// sorted, keys are sorted. The operation is idempotent.
///
/// # Examples
///
/// ```
/// use busrelay_auth::canonical::build_canonical_query_string;
///
/// assert_eq!(build_canonical_query_string("b=2&a=1"), "a=1&b=2");
/// assert_eq!(build_canonical_query_string("q=a b*"), "q=a%20b%2A");
/// ```
#[must_use]
pub fn build_canonical_query_string(query: &str) -> String {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for pair in query.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params
            .entry(encode_query_component(key))
            .or_default()
            .push(encode_query_component(value));
    }

    params
        .into_iter()
        .flat_map(|(key, mut values)| {
            values.sort_unstable();
            values.into_iter().map(move |value| format!("{key}={value}"))
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Build the canonical header map.
///
/// Names are trimmed and lower-cased; values are trimmed and runs of
/// whitespace collapsed to one space. Repeated names are joined with commas
/// in the order given.
#[must_use]
pub fn build_canonical_headers(headers: &[(&str, &str)]) -> BTreeMap<String, String> {
    let mut header_map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = collapse_whitespace(value.trim());
        header_map
            .entry(name.trim().to_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    header_map
}

/// Normalize one query key or value.
fn encode_query_component(raw: &str) -> String {
    reencode(&raw.replace('+', " "), QUERY_ENCODE_SET)
}

/// Decode escapes to raw bytes and encode them again with `set`.
///
/// Works on bytes so escapes of invalid UTF-8 survive unchanged.
fn reencode(raw: &str, set: &'static AsciiSet) -> String {
    let bytes: Vec<u8> = percent_decode_str(raw).collect();
    percent_encode(&bytes, set).to_string()
}

/// Collapse consecutive whitespace characters to a single space.
fn collapse_whitespace(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_was_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
                prev_was_space = true;
            }
        } else {
            result.push(ch);
            prev_was_space = false;
        }
    }
    result
}
