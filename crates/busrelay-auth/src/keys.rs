//! Secret key lookup for signature verification.

use std::collections::HashMap;

use crate::error::AuthError;

/// Resolves the secret access key of an access key id.
pub trait SecretKeyProvider: Send + Sync {
    /// Retrieve the secret access key for the given access key id.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AccessKeyNotFound`] if the access key id is not recognized.
    fn secret_key(&self, access_key_id: &str) -> Result<String, AuthError>;
}

/// An in-memory [`SecretKeyProvider`] backed by a `HashMap`.
///
/// # Examples
///
/// ```
/// use busrelay_auth::keys::{SecretKeyProvider, StaticSecretKeyProvider};
///
/// let provider = StaticSecretKeyProvider::new([("ASIAEXAMPLE".to_owned(), "secret".to_owned())]);
/// assert_eq!(provider.secret_key("ASIAEXAMPLE").unwrap(), "secret");
/// ```
#[derive(Clone, Default)]
pub struct StaticSecretKeyProvider {
    keys: HashMap<String, String>,
}

impl StaticSecretKeyProvider {
    /// Create a provider from `(access_key_id, secret_key)` pairs.
    pub fn new(keys: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }
}

impl std::fmt::Debug for StaticSecretKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSecretKeyProvider")
            .field("access_key_ids", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SecretKeyProvider for StaticSecretKeyProvider {
    fn secret_key(&self, access_key_id: &str) -> Result<String, AuthError> {
        self.keys
            .get(access_key_id)
            .cloned()
            .ok_or_else(|| AuthError::AccessKeyNotFound(access_key_id.to_owned()))
    }
}
