//! Client identity material for the mutual-TLS credential exchange.
//!
//! Certificates and private keys are supplied either as PEM or as bare
//! base64-encoded DER (the form secrets managers usually hand out). Both are
//! normalized to PEM before they reach the TLS client.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use busrelay_core::CredentialSettings;

use crate::error::CredentialError;

/// PEM label of an X.509 certificate.
pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";
/// PEM label of a PKCS#8 private key.
pub const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";

const PEM_LINE_WIDTH: usize = 64;

/// Certificate and private key presented to the exchange endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    certificate_pem: String,
    private_key_pem: String,
}

impl ClientIdentity {
    /// Build an identity from PEM or base64 DER inputs.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Identity`] if either input is empty or not
    /// valid base64.
    pub fn new(certificate: &str, private_key: &str) -> Result<Self, CredentialError> {
        Ok(Self {
            certificate_pem: to_pem(certificate, CERTIFICATE_LABEL)?,
            private_key_pem: to_pem(private_key, PRIVATE_KEY_LABEL)?,
        })
    }

    /// Build the identity configured in `settings`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Identity`] when only one of certificate and
    /// key is configured, or when either cannot be decoded.
    pub fn from_settings(settings: &CredentialSettings) -> Result<Option<Self>, CredentialError> {
        match (&settings.certificate, &settings.private_key) {
            (Some(certificate), Some(key)) => Self::new(certificate, key).map(Some),
            (None, None) => Ok(None),
            _ => Err(CredentialError::Identity(
                "certificate and private key must be configured together".to_owned(),
            )),
        }
    }

    /// Certificate followed by key, the bundle the TLS client loads.
    #[must_use]
    pub fn pem_bundle(&self) -> String {
        format!("{}\n{}\n", self.certificate_pem, self.private_key_pem)
    }

    /// Convert into a TLS client identity.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Identity`] if the TLS backend rejects the material.
    pub fn to_tls_identity(&self) -> Result<reqwest::Identity, CredentialError> {
        reqwest::Identity::from_pem(self.pem_bundle().as_bytes())
            .map_err(|e| CredentialError::Identity(e.to_string()))
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("certificate_pem_len", &self.certificate_pem.len())
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// Normalize `input` to a PEM block with the given label.
///
/// Input that already contains PEM armour is returned trimmed. Otherwise all
/// whitespace is removed, the remainder decoded as base64, and re-encoded in
/// 64-column lines between `-----BEGIN <label>-----` and `-----END <label>-----`.
///
/// # Errors
///
/// Returns [`CredentialError::Identity`] if the input is empty or not base64.
///
/// # Examples
///
/// ```
/// use busrelay_credentials::identity::to_pem;
///
/// let pem = to_pem("AAEC", "CERTIFICATE").unwrap();
/// assert_eq!(pem, "-----BEGIN CERTIFICATE-----\nAAEC\n-----END CERTIFICATE-----");
/// ```
pub fn to_pem(input: &str, label: &str) -> Result<String, CredentialError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CredentialError::Identity(format!("empty {label}")));
    }
    if trimmed.contains("-----BEGIN ") {
        return Ok(trimmed.to_owned());
    }

    let cleaned: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let der = STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| CredentialError::Identity(format!("{label} is not valid base64: {e}")))?;

    let encoded = STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {label}-----\n");
    for line in encoded.as_bytes().chunks(PEM_LINE_WIDTH) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {label}-----"));
    Ok(pem)
}
