//! Fakes shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use busrelay_core::{
    CredentialSettings, Credentials, DeliverySettings, DestinationConfig, DestinationId,
    EnvelopeSettings, ExchangeProfile, LogFormat, RelayConfig, ValidationSettings,
};
use busrelay_credentials::{CredentialError, CredentialExchange, CredentialManager, MemoryCacheStore};
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;

use crate::dispatcher::Dispatcher;
use crate::error::TransportError;
use crate::message::InboundMessage;
use crate::retry::RetryPolicy;
use crate::routing::default_routing;
use crate::transform::JsonTransformer;
use crate::transport::{HttpTransport, OutboundRequest, TransportResponse};

pub(crate) const ACCESS_KEY: &str = "ASIATESTKEY";
pub(crate) const SECRET_KEY: &str = "test-secret";

/// Issues the same long-lived credentials for every partition.
#[derive(Debug, Default)]
pub(crate) struct StaticExchange;

#[async_trait::async_trait]
impl CredentialExchange for StaticExchange {
    async fn exchange(
        &self,
        _partition: &str,
        _profile: &ExchangeProfile,
        region: &str,
    ) -> Result<Credentials, CredentialError> {
        Ok(Credentials {
            access_key_id: ACCESS_KEY.to_owned(),
            secret_access_key: SECRET_KEY.to_owned(),
            session_token: Some("session".to_owned()),
            region: region.to_owned(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }
}

/// Answers with a fixed status per host (200 by default) and records requests.
#[derive(Debug, Default)]
pub(crate) struct FakeTransport {
    statuses: HashMap<String, u16>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl FakeTransport {
    pub(crate) fn with_statuses(statuses: &[(&str, u16)]) -> Self {
        Self {
            statuses: statuses
                .iter()
                .map(|(host, status)| ((*host).to_owned(), *status))
                .collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl HttpTransport for FakeTransport {
    async fn post(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let host = request
            .headers
            .get("host")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        self.requests.lock().push(request);
        let status = self.statuses.get(&host).copied().unwrap_or(200);
        Ok(TransportResponse {
            status,
            body: Bytes::from_static(br#"{"FailedEntryCount":0,"Entries":[{"EventId":"1"}]}"#),
        })
    }
}

pub(crate) fn destination(id: &str, required: bool, default_target: bool) -> DestinationConfig {
    DestinationConfig::builder()
        .id(DestinationId::new(id).unwrap())
        .host(format!("{id}.events.test"))
        .region("eu-west-1")
        .routing_discriminator(id)
        .is_required(required)
        .default_target(default_target)
        .exchange(
            ExchangeProfile::builder()
                .host("exchange.test")
                .profile_arn("arn:profile")
                .role_arn("arn:role")
                .trust_anchor_arn("arn:anchor")
                .cache_partition(id)
                .build(),
        )
        .build()
}

pub(crate) fn config(destinations: Vec<DestinationConfig>) -> RelayConfig {
    RelayConfig {
        log_level: "debug".to_owned(),
        log_format: LogFormat::Text,
        destinations,
        credentials: CredentialSettings::default(),
        validation: ValidationSettings {
            field: "discriminator".to_owned(),
            expected: "13".to_owned(),
            routing_field: "route".to_owned(),
        },
        envelope: EnvelopeSettings {
            business_id_template: "{a}{b}".to_owned(),
            ..EnvelopeSettings::default()
        },
        delivery: DeliverySettings::default(),
    }
}

pub(crate) fn dispatcher(config: RelayConfig, transport: Arc<FakeTransport>) -> Dispatcher {
    let manager = CredentialManager::new(
        &config.destinations,
        config.credentials.clone(),
        Arc::new(MemoryCacheStore::new()),
        Arc::new(StaticExchange),
    );
    let transformer = JsonTransformer::new(
        config.validation.routing_field.clone(),
        default_routing(&config.destinations),
    );
    Dispatcher::new(Arc::new(config), manager, transport, Arc::new(transformer)).with_retry_policy(
        RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
    )
}

pub(crate) fn message(payload: &str) -> InboundMessage {
    InboundMessage::new("payments", 0, 42, payload.to_owned())
}
