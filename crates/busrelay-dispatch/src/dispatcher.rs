//! The dispatch orchestrator.
//!
//! For each inbound message the [`Dispatcher`]:
//!
//! 1. transforms the payload into a [`Record`](crate::transform::Record);
//! 2. validates the discriminator field, skipping (but acknowledging) the
//!    message when it does not match;
//! 3. renders the business identifier and resolves the target destinations;
//! 4. delivers to every target concurrently, each with its own credentials,
//!    signature and bounded retry;
//! 5. folds the outcomes through the required/optional policy into an
//!    acknowledgment decision.

use std::sync::Arc;

use busrelay_auth::{SignableRequest, SigningContext, sign_request};
use busrelay_core::{DestinationConfig, DestinationId, RelayConfig};
use busrelay_credentials::CredentialManager;
use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::ack::{AckDecision, AckSink};
use crate::envelope::{CONTENT_TYPE, PUT_EVENTS_TARGET, PutEventsRequest, check_put_events_response};
use crate::error::{DeliveryError, DispatchError};
use crate::message::InboundMessage;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::routing::resolve_targets;
use crate::transform::{BusinessIdTemplate, PayloadTransformer, validate};
use crate::transport::{HttpTransport, OutboundRequest};

/// Longest response body excerpt kept in a rejection.
const ERROR_BODY_LIMIT: usize = 512;

/// Result of delivering one message to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The destination accepted the event.
    Delivered {
        /// Attempts used, including the successful one.
        attempts: u32,
    },
    /// Every attempt failed, or a non-retryable error stopped the retries.
    Failed {
        /// The last error.
        reason: String,
        /// Attempts made.
        attempts: u32,
    },
}

/// Per-destination outcome of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// The destination.
    pub destination: DestinationId,
    /// Whether the destination was required.
    pub required: bool,
    /// What happened.
    pub status: DeliveryStatus,
}

impl DispatchOutcome {
    /// Whether the delivery succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self.status, DeliveryStatus::Delivered { .. })
    }

    /// The failure reason, if the delivery failed.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            DeliveryStatus::Failed { reason, .. } => Some(reason),
            DeliveryStatus::Delivered { .. } => None,
        }
    }
}

/// Successful result of [`Dispatcher::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchReport {
    /// The message was not delivered anywhere (unparseable or failed validation).
    Skipped {
        /// Why the message was skipped.
        reason: String,
    },
    /// The message was delivered to every required target.
    Delivered {
        /// The business identifier sent.
        business_id: String,
        /// Outcomes per targeted destination, optional failures included.
        outcomes: Vec<DispatchOutcome>,
    },
}

/// Orchestrates validation, routing, signing and delivery of messages.
///
/// Cheap to share behind an `Arc`; holds no per-message state.
#[derive(Debug)]
pub struct Dispatcher {
    config: Arc<RelayConfig>,
    credentials: CredentialManager,
    transport: Arc<dyn HttpTransport>,
    transformer: Arc<dyn PayloadTransformer>,
    template: BusinessIdTemplate,
    retry: RetryPolicy,
}

impl Dispatcher {
    /// Create a dispatcher with the retry policy of `config.delivery`.
    #[must_use]
    pub fn new(
        config: Arc<RelayConfig>,
        credentials: CredentialManager,
        transport: Arc<dyn HttpTransport>,
        transformer: Arc<dyn PayloadTransformer>,
    ) -> Self {
        let template = BusinessIdTemplate::parse(&config.envelope.business_id_template);
        let retry = RetryPolicy::from_settings(&config.delivery);
        Self {
            config,
            credentials,
            transport,
            transformer,
            template,
            retry,
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Dispatch one message.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::PartialDispatchFailure`] when at least one
    /// required destination failed. Every other failure is absorbed into the
    /// report.
    pub async fn dispatch(&self, message: &InboundMessage) -> Result<DispatchReport, DispatchError> {
        let record = match self.transformer.transform(&message.payload) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Skipping message that cannot be transformed"
                );
                return Ok(DispatchReport::Skipped {
                    reason: e.to_string(),
                });
            }
        };

        let validation = &self.config.validation;
        if let Err(found) = validate(&record, validation) {
            info!(
                offset = message.offset,
                field = %validation.field,
                expected = %validation.expected,
                found = ?found,
                "Message failed validation, skipping delivery"
            );
            return Ok(DispatchReport::Skipped {
                reason: format!(
                    "{} is {} instead of {}",
                    validation.field,
                    found.as_deref().unwrap_or("missing"),
                    validation.expected
                ),
            });
        }

        let business_id = self.template.render(&record);
        let targets = resolve_targets(&record, &validation.routing_field, &self.config.destinations);
        debug!(
            offset = message.offset,
            business_id = %business_id,
            targets = ?targets.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            "Dispatching message"
        );

        let outcomes = join_all(targets.into_iter().map(|d| self.deliver(d, &business_id))).await;

        let mut failed = Vec::new();
        for outcome in &outcomes {
            if let Some(reason) = outcome.failure_reason() {
                if outcome.required {
                    error!(destination = %outcome.destination, reason, "Required destination failed");
                    failed.push(outcome.destination.clone());
                } else {
                    warn!(destination = %outcome.destination, reason, "Optional destination failed, continuing");
                }
            }
        }

        if failed.is_empty() {
            Ok(DispatchReport::Delivered {
                business_id,
                outcomes,
            })
        } else {
            Err(DispatchError::PartialDispatchFailure { failed, outcomes })
        }
    }

    /// Dispatch one message and hand the acknowledgment decision to `sink`.
    ///
    /// The message is acknowledged unless a required destination failed.
    pub async fn process(&self, message: &InboundMessage, sink: &dyn AckSink) -> AckDecision {
        let decision = match self.dispatch(message).await {
            Ok(DispatchReport::Skipped { reason }) => {
                debug!(offset = message.offset, reason = %reason, "Message skipped");
                AckDecision::Acknowledge
            }
            Ok(DispatchReport::Delivered { outcomes, .. }) => {
                debug!(
                    offset = message.offset,
                    destinations = outcomes.len(),
                    "Message dispatched"
                );
                AckDecision::Acknowledge
            }
            Err(e) => {
                error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Dispatch failed"
                );
                AckDecision::Withhold
            }
        };
        sink.record(message, decision).await;
        decision
    }

    async fn deliver(&self, destination: &DestinationConfig, business_id: &str) -> DispatchOutcome {
        let (result, attempts) = retry_with_backoff(
            self.retry,
            DeliveryError::is_retryable,
            |attempt| self.attempt(destination, business_id, attempt),
        )
        .await;

        let status = match result {
            Ok(()) => {
                info!(destination = %destination.id, attempts, "Event delivered");
                DeliveryStatus::Delivered { attempts }
            }
            Err(e) => DeliveryStatus::Failed {
                reason: e.to_string(),
                attempts,
            },
        };
        DispatchOutcome {
            destination: destination.id.clone(),
            required: destination.is_required,
            status,
        }
    }

    async fn attempt(
        &self,
        destination: &DestinationConfig,
        business_id: &str,
        attempt: u32,
    ) -> Result<(), DeliveryError> {
        let partition = &destination.exchange.cache_partition;
        let credentials = self.credentials.get_credentials(partition).await?;

        let body = PutEventsRequest::for_business_id(
            business_id,
            &self.config.envelope,
            &destination.event_bus_name,
        )?
        .to_body()?;

        let context = SigningContext::new(
            Utc::now(),
            &destination.region,
            &destination.service,
            &credentials,
        );
        let headers = sign_request(
            &SignableRequest {
                method: "POST",
                host: &destination.host,
                path: "/",
                query: "",
                headers: &[
                    ("content-type", CONTENT_TYPE),
                    ("x-amz-target", PUT_EVENTS_TARGET),
                ],
                body: &body,
            },
            &context,
        )?;

        debug!(destination = %destination.id, attempt, "Sending signed request");
        let response = self
            .transport
            .post(OutboundRequest {
                url: destination.endpoint_url(),
                headers,
                body: Bytes::from(body),
            })
            .await?;

        if !response.is_success() {
            let error = DeliveryError::Rejected {
                status: response.status,
                body: String::from_utf8_lossy(&response.body)
                    .chars()
                    .take(ERROR_BODY_LIMIT)
                    .collect(),
            };
            if error.is_auth_rejection() {
                if let Err(e) = self.credentials.invalidate(partition).await {
                    warn!(partition = %partition, error = %e, "Failed to invalidate credentials");
                }
            }
            return Err(error);
        }

        check_put_events_response(&response.body)?;
        Ok(())
    }
}
