//! Loopback integration tests for busrelay.
//!
//! Each test starts in-process HTTP endpoints standing in for the event bus
//! and the credential exchange, then runs the real pipeline against them
//! over TCP: exchange client, credential cache, signer, transport and
//! dispatcher.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::Result;
use busrelay_auth::{StaticSecretKeyProvider, verify_signature};
use busrelay_core::RelayConfig;
use busrelay_credentials::{CredentialManager, MemoryCacheStore, RolesAnywhereExchange};
use busrelay_dispatch::{Dispatcher, JsonTransformer, ReqwestTransport, default_routing};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::warn;

/// Access key issued by [`ExchangeEndpoint`].
pub const ISSUED_ACCESS_KEY: &str = "ASIAINTEGRATIONTEST";
/// Secret key issued by [`ExchangeEndpoint`].
pub const ISSUED_SECRET_KEY: &str = "integration/secret/key";
/// Session token issued by [`ExchangeEndpoint`].
pub const ISSUED_SESSION_TOKEN: &str = "integration-session-token";

static INIT: Once = Once::new();

/// Initialize tracing (once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

type Handler = Arc<dyn Fn(Request<()>, Bytes) -> Response<Full<Bytes>> + Send + Sync>;

/// Delay applied before each request reaches its handler.
type Latency = Arc<Mutex<Duration>>;

/// Serve `handler` on an ephemeral loopback port until the runtime stops.
async fn serve(handler: Handler, latency: Latency) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let handler = Arc::clone(&handler);
            let latency = Arc::clone(&latency);
            tokio::spawn(async move {
                let service = service_fn(move |request: Request<Incoming>| {
                    let handler = Arc::clone(&handler);
                    let delay = *latency.lock();
                    async move {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        let (parts, body) = request.into_parts();
                        let body = match body.collect().await {
                            Ok(collected) => collected.to_bytes(),
                            Err(e) => {
                                warn!(error = %e, "failed to read request body");
                                Bytes::new()
                            }
                        };
                        Ok::<_, Infallible>(handler(Request::from_parts(parts, ()), body))
                    }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    warn!(error = %e, "loopback connection error");
                }
            });
        }
    });

    Ok(addr)
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

/// A request received by the fake event bus.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    /// Request headers.
    pub headers: http::HeaderMap,
    /// Parsed JSON body.
    pub body: serde_json::Value,
    /// Access key id, if the signature verified.
    pub verified_key: Option<String>,
}

#[derive(Debug, Default)]
struct EventBusState {
    scripted: Mutex<VecDeque<u16>>,
    default_status: Mutex<u16>,
    captured: Mutex<Vec<CapturedEvent>>,
    latency: Latency,
}

/// Fake event bus that verifies SigV4 signatures and records `PutEvents` calls.
#[derive(Debug, Clone)]
pub struct EventBusEndpoint {
    addr: SocketAddr,
    state: Arc<EventBusState>,
}

impl EventBusEndpoint {
    /// Start an endpoint accepting the issued keys and the sandbox key.
    pub async fn start() -> Result<Self> {
        let state = Arc::new(EventBusState {
            default_status: Mutex::new(200),
            ..EventBusState::default()
        });
        let keys = StaticSecretKeyProvider::new([
            (ISSUED_ACCESS_KEY.to_owned(), ISSUED_SECRET_KEY.to_owned()),
            (
                "SANDBOXACCESSKEYID".to_owned(),
                "SANDBOX-SECRET-ACCESS-KEY".to_owned(),
            ),
        ]);

        let handler_state = Arc::clone(&state);
        let handler: Handler = Arc::new(move |request: Request<()>, body: Bytes| {
            let (parts, ()) = request.into_parts();
            let verified = verify_signature(&parts, &body, &keys);
            handler_state.captured.lock().push(CapturedEvent {
                headers: parts.headers.clone(),
                body: serde_json::from_slice(&body).unwrap_or_default(),
                verified_key: verified.as_ref().ok().map(|p| p.access_key_id.clone()),
            });

            if let Err(e) = verified {
                return json_response(
                    StatusCode::FORBIDDEN,
                    format!(r#"{{"__type":"InvalidSignatureException","message":"{e}"}}"#),
                );
            }

            let status = handler_state
                .scripted
                .lock()
                .pop_front()
                .unwrap_or(*handler_state.default_status.lock());
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if status.is_success() {
                json_response(
                    status,
                    r#"{"FailedEntryCount":0,"Entries":[{"EventId":"11111111-2222-3333-4444-555555555555"}]}"#
                        .to_owned(),
                )
            } else {
                json_response(status, r#"{"__type":"InternalException"}"#.to_owned())
            }
        });
        let addr = serve(handler, Arc::clone(&state.latency)).await?;

        Ok(Self { addr, state })
    }

    /// `host:port` of the endpoint.
    #[must_use]
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    /// Hold every later request for `delay` before answering.
    pub fn delay_responses(&self, delay: Duration) {
        *self.state.latency.lock() = delay;
    }

    /// Answer every later request with `status`.
    pub fn respond_with(&self, status: u16) {
        *self.state.default_status.lock() = status;
    }

    /// Answer the next requests with `statuses`, in order.
    pub fn script(&self, statuses: &[u16]) {
        self.state.scripted.lock().extend(statuses.iter().copied());
    }

    /// Requests received so far.
    #[must_use]
    pub fn captured(&self) -> Vec<CapturedEvent> {
        self.state.captured.lock().clone()
    }
}

#[derive(Debug, Default)]
struct ExchangeState {
    calls: AtomicUsize,
    reject: Mutex<bool>,
    bodies: Mutex<Vec<serde_json::Value>>,
}

/// Fake credential exchange serving `POST /sessions`.
#[derive(Debug, Clone)]
pub struct ExchangeEndpoint {
    addr: SocketAddr,
    state: Arc<ExchangeState>,
}

impl ExchangeEndpoint {
    /// Start an endpoint that issues credentials valid for one hour.
    pub async fn start() -> Result<Self> {
        let state = Arc::new(ExchangeState::default());
        let handler_state = Arc::clone(&state);
        let handler: Handler = Arc::new(move |request: Request<()>, body: Bytes| {
            handler_state.calls.fetch_add(1, Ordering::SeqCst);
            handler_state
                .bodies
                .lock()
                .push(serde_json::from_slice(&body).unwrap_or_default());

            if request.method() != http::Method::POST || request.uri().path() != "/sessions" {
                return json_response(StatusCode::NOT_FOUND, "{}".to_owned());
            }
            if *handler_state.reject.lock() {
                return json_response(
                    StatusCode::FORBIDDEN,
                    r#"{"message":"Untrusted certificate"}"#.to_owned(),
                );
            }

            let expiration = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
            json_response(
                StatusCode::CREATED,
                serde_json::json!({
                    "credentialSet": [{
                        "credentials": {
                            "accessKeyId": ISSUED_ACCESS_KEY,
                            "secretAccessKey": ISSUED_SECRET_KEY,
                            "sessionToken": ISSUED_SESSION_TOKEN,
                            "expiration": expiration,
                        }
                    }]
                })
                .to_string(),
            )
        });
        let addr = serve(handler, Latency::default()).await?;

        Ok(Self { addr, state })
    }

    /// `host:port` of the endpoint.
    #[must_use]
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    /// Number of exchange calls received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Reject every later exchange with 403.
    pub fn reject(&self) {
        *self.state.reject.lock() = true;
    }

    /// JSON bodies of the received exchange requests.
    #[must_use]
    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.state.bodies.lock().clone()
    }
}

/// Loopback endpoints for a two-destination relay.
#[derive(Debug, Clone)]
pub struct Harness {
    /// Primary destination (`aws1`): required, default target.
    pub primary: EventBusEndpoint,
    /// Secondary destination (`aws2`): optional, selected by routing token.
    pub secondary: EventBusEndpoint,
    /// Credential exchange shared by both destinations.
    pub exchange: ExchangeEndpoint,
}

impl Harness {
    /// Start all endpoints.
    pub async fn start() -> Result<Self> {
        init_tracing();
        Ok(Self {
            primary: EventBusEndpoint::start().await?,
            secondary: EventBusEndpoint::start().await?,
            exchange: ExchangeEndpoint::start().await?,
        })
    }

    /// Configuration pointing at the endpoints, with `overrides` applied on top.
    pub fn config(&self, overrides: &[(&str, &str)]) -> Result<RelayConfig> {
        let mut vars = vec![
            ("RELAY_DESTINATIONS".to_owned(), "aws1,aws2".to_owned()),
            ("VALIDATION_FIELD".to_owned(), "discriminator".to_owned()),
            ("VALIDATION_EXPECTED".to_owned(), "13".to_owned()),
            ("BUSINESS_ID_TEMPLATE".to_owned(), "{a}{b}".to_owned()),
            ("DELIVERY_MAX_ATTEMPTS".to_owned(), "2".to_owned()),
            ("DELIVERY_BACKOFF_MS".to_owned(), "1".to_owned()),
            ("DELIVERY_TIMEOUT_MS".to_owned(), "2000".to_owned()),
            ("EXCHANGE_TIMEOUT_MS".to_owned(), "2000".to_owned()),
            ("EXCHANGE_SESSION_NAME".to_owned(), "busrelay-it".to_owned()),
        ];
        for (id, bus) in [("AWS1", &self.primary), ("AWS2", &self.secondary)] {
            vars.extend([
                (format!("{id}_HOST"), bus.host()),
                (format!("{id}_ENDPOINT_SCHEME"), "http".to_owned()),
                (format!("{id}_REGION"), "eu-west-1".to_owned()),
                (format!("{id}_EVENT_BUS_NAME"), format!("{}-bus", id.to_lowercase())),
                (format!("{id}_EXCHANGE_HOST"), self.exchange.host()),
                (format!("{id}_EXCHANGE_SCHEME"), "http".to_owned()),
                (format!("{id}_PROFILE_ARN"), format!("arn:aws:rolesanywhere:eu-west-1:111122223333:profile/{id}")),
                (format!("{id}_ROLE_ARN"), format!("arn:aws:iam::111122223333:role/{id}")),
                (format!("{id}_TRUST_ANCHOR_ARN"), format!("arn:aws:rolesanywhere:eu-west-1:111122223333:trust-anchor/{id}")),
            ]);
        }
        vars.extend(
            overrides
                .iter()
                .map(|(key, value)| ((*key).to_owned(), (*value).to_owned())),
        );

        Ok(RelayConfig::from_lookup(|key| {
            vars.iter()
                .rev()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.clone())
        })?)
    }

    /// A dispatcher wired with the production collaborators.
    pub fn dispatcher(&self, overrides: &[(&str, &str)]) -> Result<Dispatcher> {
        let config = Arc::new(self.config(overrides)?);
        let credentials = CredentialManager::new(
            &config.destinations,
            config.credentials.clone(),
            Arc::new(MemoryCacheStore::new()),
            Arc::new(RolesAnywhereExchange::new(&config.credentials)?),
        );
        let transport = ReqwestTransport::new(config.delivery.timeout)?;
        let transformer = JsonTransformer::new(
            config.validation.routing_field.clone(),
            default_routing(&config.destinations),
        );
        Ok(Dispatcher::new(
            config,
            credentials,
            Arc::new(transport),
            Arc::new(transformer),
        ))
    }
}

mod test_credentials;
mod test_delivery;
