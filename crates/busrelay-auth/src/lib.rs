//! AWS Signature Version 4 request signing for busrelay.
//!
//! Every outbound call the relay makes (event-bus deliveries) carries a SigV4
//! `Authorization` header computed here, without a pre-built SDK signer.
//!
//! # Usage
//!
//! ```rust
//! use busrelay_auth::sign::{SignableRequest, sign_request};
//! use busrelay_auth::sigv4::SigningContext;
//! use busrelay_core::Credentials;
//! use chrono::Utc;
//!
//! let credentials = Credentials {
//!     access_key_id: "ASIAEXAMPLE".to_owned(),
//!     secret_access_key: "secret".to_owned(),
//!     session_token: None,
//!     region: "eu-west-1".to_owned(),
//!     expires_at: Utc::now(),
//! };
//! let context = SigningContext::new(Utc::now(), "eu-west-1", "events", &credentials);
//! let request = SignableRequest {
//!     method: "POST",
//!     host: "events.eu-west-1.amazonaws.com",
//!     path: "/",
//!     query: "",
//!     headers: &[("x-amz-target", "AWSEvents.PutEvents")],
//!     body: b"{}",
//! };
//! let headers = sign_request(&request, &context).unwrap();
//! assert!(headers.contains_key("authorization"));
//! ```
//!
//! # Modules
//!
//! - [`canonical`] - Canonical request construction
//! - [`sigv4`] - String to sign, key derivation and the `Authorization` header
//! - [`sign`] - Complete signed header set for an outbound request
//! - [`verify`] - Signature verification, the inverse of [`sign`]
//! - [`keys`] - Secret key lookup for verification
//! - [`error`] - Signing and verification errors

pub mod canonical;
pub mod error;
pub mod keys;
pub mod sign;
pub mod sigv4;
pub mod verify;

pub use canonical::{CanonicalRequest, build_canonical_request};
pub use error::{AuthError, SigningError};
pub use keys::{SecretKeyProvider, StaticSecretKeyProvider};
pub use sign::{SignableRequest, sign_request};
pub use sigv4::{
    EMPTY_PAYLOAD_HASH, SigningContext, build_string_to_sign, compute_authorization_header,
    derive_signing_key, hash_payload,
};
pub use verify::{ParsedAuth, parse_authorization_header, verify_signature};
