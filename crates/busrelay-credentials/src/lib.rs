//! Temporary credential lifecycle for busrelay.
//!
//! Each destination partition signs with short-lived credentials obtained by
//! exchanging a client certificate at a session endpoint. This crate keeps
//! those credentials in a cache store and refreshes them before they expire:
//!
//! - [`cache`] - the get/set-with-TTL/delete store and its in-memory implementation
//! - [`exchange`] - the certificate-authenticated exchange protocol
//! - [`identity`] - client certificate and key normalization
//! - [`manager`] - cache-aside retrieval with single-flight refresh

pub mod cache;
pub mod error;
pub mod exchange;
pub mod identity;
pub mod manager;

pub use cache::{CacheStore, MemoryCacheStore, credentials_key};
pub use error::CredentialError;
pub use exchange::{CredentialExchange, ExchangeRequest, RolesAnywhereExchange, parse_exchange_response};
pub use identity::{ClientIdentity, to_pem};
pub use manager::{CredentialManager, CredentialState};
