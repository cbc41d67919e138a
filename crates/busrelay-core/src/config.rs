//! Configuration management for busrelay.
//!
//! All configuration is driven by environment variables and loaded once at
//! startup into an immutable [`RelayConfig`], which is then handed to each
//! component by reference. Nothing reads the environment after startup.

use std::fmt;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::error::{RelayError, RelayResult};
use crate::types::DestinationId;

const DEFAULT_SCHEME: &str = "https";
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_SERVICE: &str = "events";
const DEFAULT_EVENT_BUS_NAME: &str = "default";

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable, one line per event.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Identity parameters for the certificate-authenticated credential exchange
/// of a single destination partition.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct ExchangeProfile {
    /// Exchange endpoint host (e.g. `rolesanywhere.eu-west-1.amazonaws.com`).
    #[builder(setter(into))]
    pub host: String,
    /// URL scheme used to reach the exchange endpoint.
    #[builder(default = DEFAULT_SCHEME.to_owned(), setter(into))]
    pub scheme: String,
    /// ARN of the profile the session is created under.
    #[builder(setter(into))]
    pub profile_arn: String,
    /// ARN of the role to assume.
    #[builder(setter(into))]
    pub role_arn: String,
    /// ARN of the trust anchor that validates the client certificate.
    #[builder(setter(into))]
    pub trust_anchor_arn: String,
    /// Cache key prefix for this partition's credentials.
    #[builder(setter(into))]
    pub cache_partition: String,
}

/// Static configuration of one delivery destination.
///
/// Loaded once at startup and read-only thereafter. `is_required` selects the
/// partial-failure policy: a failed required destination fails the whole
/// dispatch, a failed optional one is logged and tolerated.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct DestinationConfig {
    /// Destination identifier, also the credential partition name.
    pub id: DestinationId,
    /// Event-bus endpoint host.
    #[builder(setter(into))]
    pub host: String,
    /// URL scheme for the event-bus endpoint.
    #[builder(default = DEFAULT_SCHEME.to_owned(), setter(into))]
    pub scheme: String,
    /// Signing region (credential scope).
    #[builder(default = DEFAULT_REGION.to_owned(), setter(into))]
    pub region: String,
    /// Signing service name (credential scope).
    #[builder(default = DEFAULT_SERVICE.to_owned(), setter(into))]
    pub service: String,
    /// Name of the event bus receiving the entries.
    #[builder(default = DEFAULT_EVENT_BUS_NAME.to_owned(), setter(into))]
    pub event_bus_name: String,
    /// Routing token in the transformed message that selects this destination.
    #[builder(setter(into))]
    pub routing_discriminator: String,
    /// Whether a delivery failure to this destination fails the dispatch.
    #[builder(default = false)]
    pub is_required: bool,
    /// Whether messages without a routing token are delivered here.
    #[builder(default = false)]
    pub default_target: bool,
    /// Credential exchange identity for this destination's partition.
    pub exchange: ExchangeProfile,
}

impl DestinationConfig {
    /// The endpoint URL outbound calls are sent to.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("{}://{}/", self.scheme, self.host)
    }
}

/// Settings shared by all credential partitions.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSettings {
    /// Optional session name sent with each exchange request.
    pub session_name: Option<String>,
    /// Requested lifetime of issued credentials.
    pub duration_seconds: u32,
    /// Upper bound on one exchange call.
    pub exchange_timeout: Duration,
    /// Client certificate (base64 DER or PEM) for mutual TLS.
    pub certificate: Option<String>,
    /// Client private key (base64 DER or PEM) for mutual TLS.
    pub private_key: Option<String>,
    /// Upper bound on how long credentials stay in the cache store.
    pub cache_ttl: Duration,
    /// Minimum remaining validity below which cached credentials are replaced.
    pub safety_margin: Duration,
    /// Explicit opt-in: fall back to synthetic credentials when the exchange fails.
    pub sandbox_credentials: bool,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            session_name: None,
            duration_seconds: 3600,
            exchange_timeout: Duration::from_millis(5000),
            certificate: None,
            private_key: None,
            cache_ttl: Duration::from_secs(3500),
            safety_margin: Duration::from_secs(300),
            sandbox_credentials: false,
        }
    }
}

impl fmt::Debug for CredentialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSettings")
            .field("session_name", &self.session_name)
            .field("duration_seconds", &self.duration_seconds)
            .field("exchange_timeout", &self.exchange_timeout)
            .field("certificate", &self.certificate.as_ref().map(|_| "..."))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("cache_ttl", &self.cache_ttl)
            .field("safety_margin", &self.safety_margin)
            .field("sandbox_credentials", &self.sandbox_credentials)
            .finish()
    }
}

/// Message validation and routing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSettings {
    /// Field whose value must equal `expected` for a message to be delivered.
    pub field: String,
    /// Expected discriminator value (exact string match).
    pub expected: String,
    /// Field carrying the routing token(s).
    pub routing_field: String,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            field: "G6181_CODESTA2".to_owned(),
            expected: "13".to_owned(),
            routing_field: "awsDestiny".to_owned(),
        }
    }
}

/// Outbound envelope settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeSettings {
    /// Template for the business identifier; `{field}` is replaced by the
    /// field's value, everything else is copied literally.
    pub business_id_template: String,
    /// `Source` of each event entry.
    pub source: String,
    /// `DetailType` of each event entry.
    pub detail_type: String,
}

impl Default for EnvelopeSettings {
    fn default() -> Self {
        Self {
            business_id_template:
                "{G6181_CCENCONT}{G6181_NUMORD}{G6181_JNUMDET}-01001-00000-{G6181_FECHAEJE}"
                    .to_owned(),
            source: "openbank.payments".to_owned(),
            detail_type: "Transfer_KO".to_owned(),
        }
    }
}

/// Outbound delivery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    /// Upper bound on one outbound call.
    pub timeout: Duration,
    /// Attempts per destination, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub initial_backoff: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

/// Global configuration for busrelay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Log level filter (overridden by `RUST_LOG`).
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Destinations in configuration order.
    pub destinations: Vec<DestinationConfig>,
    /// Credential lifecycle settings.
    pub credentials: CredentialSettings,
    /// Validation and routing settings.
    pub validation: ValidationSettings,
    /// Envelope settings.
    pub envelope: EnvelopeSettings,
    /// Delivery settings.
    pub delivery: DeliverySettings,
}

impl RelayConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `LOG_LEVEL` | `info` |
    /// | `LOG_FORMAT` | `text` |
    /// | `RELAY_DESTINATIONS` | `aws1,aws2` |
    /// | `<ID>_HOST` | *(required)* |
    /// | `<ID>_ENDPOINT_SCHEME` | `https` |
    /// | `<ID>_REGION` | `us-east-1` |
    /// | `<ID>_SERVICE` | `events` |
    /// | `<ID>_EVENT_BUS_NAME` | `default` |
    /// | `<ID>_ROUTING_DISCRIMINATOR` | `<id>` |
    /// | `<ID>_REQUIRED` | `true` for the first destination |
    /// | `<ID>_DEFAULT_TARGET` | `true` for the first destination |
    /// | `<ID>_EXCHANGE_HOST` | *(required)* |
    /// | `<ID>_EXCHANGE_SCHEME` | `https` |
    /// | `<ID>_PROFILE_ARN`, `<ID>_ROLE_ARN`, `<ID>_TRUST_ANCHOR_ARN` | *(required)* |
    /// | `<ID>_CACHE_PARTITION` | `<id>` |
    /// | `EXCHANGE_SESSION_NAME` | *(unset)* |
    /// | `EXCHANGE_DURATION_SECONDS` | `3600` |
    /// | `EXCHANGE_TIMEOUT_MS` | `5000` |
    /// | `EXCHANGE_CERTIFICATE`, `EXCHANGE_PRIVATE_KEY` | *(unset)* |
    /// | `CREDENTIAL_CACHE_TTL_SECONDS` | `3500` |
    /// | `CREDENTIAL_SAFETY_MARGIN_SECONDS` | `300` |
    /// | `SANDBOX_CREDENTIALS` | `false` |
    /// | `VALIDATION_FIELD` | `G6181_CODESTA2` |
    /// | `VALIDATION_EXPECTED` | `13` |
    /// | `ROUTING_FIELD` | `awsDestiny` |
    /// | `BUSINESS_ID_TEMPLATE` | see [`EnvelopeSettings::default`] |
    /// | `EVENT_SOURCE` | `openbank.payments` |
    /// | `EVENT_DETAIL_TYPE` | `Transfer_KO` |
    /// | `DELIVERY_TIMEOUT_MS` | `5000` |
    /// | `DELIVERY_MAX_ATTEMPTS` | `3` |
    /// | `DELIVERY_BACKOFF_MS` | `200` |
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when a required variable is missing, a
    /// value cannot be parsed, or the credential lifetime does not exceed the
    /// safety margin.
    pub fn from_env() -> RelayResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// [`RelayConfig::from_env`] delegates here; tests pass a map lookup.
    ///
    /// # Errors
    ///
    /// See [`RelayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> RelayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvSource { lookup };

        let log_format = match env.string("LOG_FORMAT", "text").to_ascii_lowercase().as_str() {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => {
                return Err(RelayError::Config(format!(
                    "LOG_FORMAT must be `text` or `json`, got {other:?}"
                )));
            }
        };

        let ids = env
            .string("RELAY_DESTINATIONS", "aws1,aws2")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(DestinationId::new)
            .collect::<RelayResult<Vec<_>>>()?;

        let mut destinations = Vec::with_capacity(ids.len());
        for (index, id) in ids.into_iter().enumerate() {
            if destinations.iter().any(|d: &DestinationConfig| d.id == id) {
                return Err(RelayError::Config(format!("duplicate destination id: {id}")));
            }
            destinations.push(load_destination(&env, id, index == 0)?);
        }

        if destinations.is_empty() {
            return Err(RelayError::Config(
                "RELAY_DESTINATIONS must name at least one destination".to_owned(),
            ));
        }
        if !destinations.iter().any(|d| d.default_target) {
            return Err(RelayError::Config(
                "at least one destination must be a default target".to_owned(),
            ));
        }

        let duration_seconds = u32::try_from(env.u64("EXCHANGE_DURATION_SECONDS", 3600)?)
            .map_err(|_| {
                RelayError::Config("EXCHANGE_DURATION_SECONDS is out of range".to_owned())
            })?;

        let credentials = CredentialSettings {
            session_name: env.optional("EXCHANGE_SESSION_NAME"),
            duration_seconds,
            exchange_timeout: Duration::from_millis(env.u64("EXCHANGE_TIMEOUT_MS", 5000)?),
            certificate: env.optional("EXCHANGE_CERTIFICATE"),
            private_key: env.optional("EXCHANGE_PRIVATE_KEY"),
            cache_ttl: Duration::from_secs(env.u64("CREDENTIAL_CACHE_TTL_SECONDS", 3500)?),
            safety_margin: Duration::from_secs(env.u64("CREDENTIAL_SAFETY_MARGIN_SECONDS", 300)?),
            sandbox_credentials: env.bool("SANDBOX_CREDENTIALS", false)?,
        };
        if u64::from(credentials.duration_seconds) <= credentials.safety_margin.as_secs() {
            return Err(RelayError::Config(format!(
                "EXCHANGE_DURATION_SECONDS ({}) must exceed CREDENTIAL_SAFETY_MARGIN_SECONDS ({})",
                credentials.duration_seconds,
                credentials.safety_margin.as_secs()
            )));
        }

        let validation_defaults = ValidationSettings::default();
        let validation = ValidationSettings {
            field: env.string("VALIDATION_FIELD", &validation_defaults.field),
            expected: env.string("VALIDATION_EXPECTED", &validation_defaults.expected),
            routing_field: env.string("ROUTING_FIELD", &validation_defaults.routing_field),
        };

        let envelope_defaults = EnvelopeSettings::default();
        let envelope = EnvelopeSettings {
            business_id_template: env.string(
                "BUSINESS_ID_TEMPLATE",
                &envelope_defaults.business_id_template,
            ),
            source: env.string("EVENT_SOURCE", &envelope_defaults.source),
            detail_type: env.string("EVENT_DETAIL_TYPE", &envelope_defaults.detail_type),
        };

        let max_attempts = u32::try_from(env.u64("DELIVERY_MAX_ATTEMPTS", 3)?)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                RelayError::Config("DELIVERY_MAX_ATTEMPTS must be between 1 and 2^32-1".to_owned())
            })?;

        let delivery = DeliverySettings {
            timeout: Duration::from_millis(env.u64("DELIVERY_TIMEOUT_MS", 5000)?),
            max_attempts,
            initial_backoff: Duration::from_millis(env.u64("DELIVERY_BACKOFF_MS", 200)?),
        };

        Ok(Self {
            log_level: env.string("LOG_LEVEL", "info"),
            log_format,
            destinations,
            credentials,
            validation,
            envelope,
            delivery,
        })
    }
}

fn load_destination<F>(
    env: &EnvSource<F>,
    id: DestinationId,
    first: bool,
) -> RelayResult<DestinationConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let prefix = id.env_prefix();
    let key = |suffix: &str| format!("{prefix}_{suffix}");

    let exchange = ExchangeProfile {
        host: env.required(&key("EXCHANGE_HOST"))?,
        scheme: env.scheme(&key("EXCHANGE_SCHEME"))?,
        profile_arn: env.required(&key("PROFILE_ARN"))?,
        role_arn: env.required(&key("ROLE_ARN"))?,
        trust_anchor_arn: env.required(&key("TRUST_ANCHOR_ARN"))?,
        cache_partition: env.string(&key("CACHE_PARTITION"), id.as_str()),
    };

    Ok(DestinationConfig {
        host: env.required(&key("HOST"))?,
        scheme: env.scheme(&key("ENDPOINT_SCHEME"))?,
        region: env.string(&key("REGION"), DEFAULT_REGION),
        service: env.string(&key("SERVICE"), DEFAULT_SERVICE),
        event_bus_name: env.string(&key("EVENT_BUS_NAME"), DEFAULT_EVENT_BUS_NAME),
        routing_discriminator: env.string(&key("ROUTING_DISCRIMINATOR"), id.as_str()),
        is_required: env.bool(&key("REQUIRED"), first)?,
        default_target: env.bool(&key("DEFAULT_TARGET"), first)?,
        exchange,
        id,
    })
}

/// Typed access to a key/value source.
struct EnvSource<F> {
    lookup: F,
}

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty trimmed value, or `None`.
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_owned())
    }

    fn required(&self, key: &str) -> RelayResult<String> {
        self.optional(key)
            .ok_or_else(|| RelayError::Config(format!("missing required variable {key}")))
    }

    fn bool(&self, key: &str, default: bool) -> RelayResult<bool> {
        match self.optional(key) {
            None => Ok(default),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Ok(true),
                "0" | "false" | "no" => Ok(false),
                _ => Err(RelayError::Config(format!(
                    "{key} must be a boolean, got {v:?}"
                ))),
            },
        }
    }

    fn u64(&self, key: &str, default: u64) -> RelayResult<u64> {
        match self.optional(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| {
                RelayError::Config(format!("{key} must be a non-negative integer, got {v:?}"))
            }),
        }
    }

    fn scheme(&self, key: &str) -> RelayResult<String> {
        let scheme = self.string(key, DEFAULT_SCHEME).to_ascii_lowercase();
        if scheme == "https" || scheme == "http" {
            Ok(scheme)
        } else {
            Err(RelayError::Config(format!(
                "{key} must be `https` or `http`, got {scheme:?}"
            )))
        }
    }
}
