//! Credential lifecycle manager.
//!
//! [`CredentialManager::get_credentials`] is cache-aside: it returns the
//! cached credentials of a partition while they are valid beyond the safety
//! margin, and otherwise refreshes them through the exchange. Concurrent
//! refreshes of the same partition are collapsed into one exchange call
//! whose result every waiter shares.
//!
//! The manager makes at most one exchange attempt per call. Retries belong to
//! the caller.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use busrelay_core::{CredentialSettings, Credentials, DestinationConfig, ExchangeProfile};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheStore, credentials_key};
use crate::error::CredentialError;
use crate::exchange::CredentialExchange;

type RefreshFuture = Shared<BoxFuture<'static, Result<Credentials, CredentialError>>>;

/// Lifecycle state of a partition's cached credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// Nothing (usable) is cached.
    Absent,
    /// Cached and valid beyond the safety margin.
    Valid,
    /// Cached but inside the safety margin or already expired.
    Expiring,
}

impl CredentialState {
    /// Classify a cache entry at the current time.
    #[must_use]
    pub fn of(entry: Option<&Credentials>, safety_margin: std::time::Duration) -> Self {
        match entry {
            None => Self::Absent,
            Some(creds) if creds.is_valid_at(Utc::now(), safety_margin) => Self::Valid,
            Some(_) => Self::Expiring,
        }
    }
}

/// Exchange identity and signing region of one partition.
#[derive(Debug, Clone)]
struct Partition {
    profile: ExchangeProfile,
    region: String,
}

struct Inner {
    partitions: HashMap<String, Partition>,
    settings: CredentialSettings,
    cache: Arc<dyn CacheStore>,
    exchange: Arc<dyn CredentialExchange>,
    in_flight: Mutex<HashMap<String, RefreshFuture>>,
}

/// Produces credentials valid for signing, per destination partition.
///
/// Cheap to clone; clones share the cache, exchange and in-flight refreshes.
#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut partitions: Vec<&String> = self.inner.partitions.keys().collect();
        partitions.sort();
        f.debug_struct("CredentialManager")
            .field("partitions", &partitions)
            .field("settings", &self.inner.settings)
            .field("cache", &self.inner.cache)
            .field("exchange", &self.inner.exchange)
            .finish_non_exhaustive()
    }
}

impl CredentialManager {
    /// Create a manager for the partitions of `destinations`.
    ///
    /// Partitions are keyed by each destination's cache partition name.
    #[must_use]
    pub fn new(
        destinations: &[DestinationConfig],
        settings: CredentialSettings,
        cache: Arc<dyn CacheStore>,
        exchange: Arc<dyn CredentialExchange>,
    ) -> Self {
        let partitions = destinations
            .iter()
            .map(|d| {
                (
                    d.exchange.cache_partition.clone(),
                    Partition {
                        profile: d.exchange.clone(),
                        region: d.region.clone(),
                    },
                )
            })
            .collect();

        if settings.sandbox_credentials {
            warn!("Sandbox credentials enabled: exchange failures fall back to synthetic credentials");
        }

        Self {
            inner: Arc::new(Inner {
                partitions,
                settings,
                cache,
                exchange,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Return credentials for `partition` that are valid beyond the safety margin.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::UnknownPartition`] for an unconfigured
    /// partition, or the exchange error when a required refresh fails (unless
    /// sandbox credentials are enabled).
    pub async fn get_credentials(&self, partition: &str) -> Result<Credentials, CredentialError> {
        if !self.inner.partitions.contains_key(partition) {
            return Err(CredentialError::UnknownPartition(partition.to_owned()));
        }

        let cached = self.inner.read_cache(partition).await;
        match CredentialState::of(cached.as_ref(), self.inner.settings.safety_margin) {
            CredentialState::Valid => {
                debug!(partition, "Using cached credentials");
                if let Some(creds) = cached {
                    return Ok(creds);
                }
            }
            state => debug!(partition, ?state, "Cached credentials unusable, refreshing"),
        }

        let refresh = {
            let mut in_flight = self.inner.in_flight.lock();
            in_flight
                .entry(partition.to_owned())
                .or_insert_with(|| {
                    Arc::clone(&self.inner)
                        .refresh(partition.to_owned())
                        .boxed()
                        .shared()
                })
                .clone()
        };

        let result = refresh.clone().await;

        {
            let mut in_flight = self.inner.in_flight.lock();
            if in_flight
                .get(partition)
                .is_some_and(|current| Shared::ptr_eq(current, &refresh))
            {
                in_flight.remove(partition);
            }
        }

        result
    }

    /// Drop the cached credentials of `partition` so the next call refreshes.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Cache`] if the cache store fails.
    pub async fn invalidate(&self, partition: &str) -> Result<(), CredentialError> {
        info!(partition, "Invalidating cached credentials");
        self.inner.cache.delete(&credentials_key(partition)).await
    }
}

impl Inner {
    /// Read and decode the cache entry. Store failures and corrupt entries
    /// both read as absent.
    async fn read_cache(&self, partition: &str) -> Option<Credentials> {
        let key = credentials_key(partition);
        let raw = match self.cache.get(&key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(partition, error = %e, "Credential cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(creds) => Some(creds),
            Err(e) => {
                warn!(partition, error = %e, "Discarding corrupt credential cache entry");
                None
            }
        }
    }

    async fn write_cache(&self, partition: &str, creds: &Credentials) {
        let ttl = self.settings.cache_ttl.min(creds.remaining(Utc::now()));
        if ttl.is_zero() {
            return;
        }
        let value = match serde_json::to_string(creds) {
            Ok(value) => value,
            Err(e) => {
                warn!(partition, error = %e, "Failed to encode credentials for the cache");
                return;
            }
        };
        if let Err(e) = self.cache.set(&credentials_key(partition), value, ttl).await {
            warn!(partition, error = %e, "Credential cache write failed");
        }
    }

    async fn refresh(self: Arc<Self>, partition: String) -> Result<Credentials, CredentialError> {
        // Another refresh may have completed since the caller read the cache.
        if let Some(creds) = self.read_cache(&partition).await {
            if creds.is_valid_at(Utc::now(), self.settings.safety_margin) {
                return Ok(creds);
            }
        }

        let spec = self
            .partitions
            .get(&partition)
            .ok_or_else(|| CredentialError::UnknownPartition(partition.clone()))?;

        match self
            .exchange
            .exchange(&partition, &spec.profile, &spec.region)
            .await
        {
            Ok(creds) if !creds.is_valid_at(Utc::now(), self.settings.safety_margin) => {
                error!(
                    partition = %partition,
                    expires_at = %creds.expires_at,
                    safety_margin = ?self.settings.safety_margin,
                    "Issued credentials expire inside the safety margin"
                );
                Err(CredentialError::InvalidResponse(format!(
                    "credentials for {partition} expire at {}, inside the safety margin",
                    creds.expires_at
                )))
            }
            Ok(creds) => {
                info!(
                    partition = %partition,
                    access_key_id = %creds.access_key_id,
                    expires_at = %creds.expires_at,
                    "Obtained temporary credentials"
                );
                self.write_cache(&partition, &creds).await;
                Ok(creds)
            }
            Err(e) if self.settings.sandbox_credentials => {
                warn!(partition = %partition, error = %e, "Credential exchange failed, using sandbox credentials");
                let creds = self.sandbox_credentials(&spec.region);
                if creds.is_valid_at(Utc::now(), self.settings.safety_margin) {
                    Ok(creds)
                } else {
                    Err(CredentialError::InvalidResponse(format!(
                        "sandbox credentials for {partition} would expire inside the safety margin"
                    )))
                }
            }
            Err(e) => {
                error!(partition = %partition, error = %e, "Credential exchange failed");
                Err(e)
            }
        }
    }

    fn sandbox_credentials(&self, region: &str) -> Credentials {
        Credentials {
            access_key_id: "SANDBOXACCESSKEYID".to_owned(),
            secret_access_key: "SANDBOX-SECRET-ACCESS-KEY".to_owned(),
            session_token: Some("SANDBOX-SESSION-TOKEN".to_owned()),
            region: region.to_owned(),
            expires_at: Utc::now() + chrono::Duration::seconds(i64::from(self.settings.duration_seconds)),
        }
    }
}
