//! Credential cache store.
//!
//! The manager only needs get/set-with-TTL/delete over string keys and
//! values, so that is all [`CacheStore`] exposes. [`MemoryCacheStore`] is the
//! in-process implementation; a networked store plugs in behind the same
//! trait.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::CredentialError;

/// Suffix appended to the cache partition to form the credential key.
pub const CREDENTIALS_KEY_SUFFIX: &str = "aws-credentials";

/// The cache key holding a partition's credentials (`<partition>:aws-credentials`).
#[must_use]
pub fn credentials_key(partition: &str) -> String {
    format!("{partition}:{CREDENTIALS_KEY_SUFFIX}")
}

/// Key/value store with per-entry expiry.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync + std::fmt::Debug {
    /// Read a live entry.
    async fn get(&self, key: &str) -> Result<Option<String>, CredentialError>;

    /// Write an entry that expires after `ttl`, replacing any previous value.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CredentialError>;

    /// Remove an entry. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CredentialError>;
}

/// In-memory [`CacheStore`] backed by a `DashMap`.
///
/// Expired entries are dropped lazily on read.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use busrelay_credentials::cache::{CacheStore, MemoryCacheStore};
///
/// # tokio_test::block_on(async {
/// let store = MemoryCacheStore::new();
/// store.set("aws1:aws-credentials", "{}".to_owned(), Duration::from_secs(60)).await.unwrap();
/// assert_eq!(store.get("aws1:aws-credentials").await.unwrap().as_deref(), Some("{}"));
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryCacheStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            let (value, deadline) = entry.value();
            if *deadline > now {
                return Ok(Some(value.clone()));
            }
        }
        self.entries.remove_if(key, |_, (_, deadline)| *deadline <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CredentialError> {
        let deadline = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| CredentialError::Cache(format!("TTL out of range: {ttl:?}")))?;
        self.entries.insert(key.to_owned(), (value, deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CredentialError> {
        self.entries.remove(key);
        Ok(())
    }
}
