//! Outbound HTTP transport.
//!
//! The orchestrator hands a fully signed request to an [`HttpTransport`] and
//! interprets the status itself. [`ReqwestTransport`] is the production
//! implementation.

use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;

use crate::error::TransportError;

/// A signed request ready to send.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Absolute URL.
    pub url: String,
    /// Complete header set, including `authorization`.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Bytes,
}

/// Status and body of a completed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Bytes,
}

impl TransportResponse {
    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends signed POST requests.
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync + std::fmt::Debug {
    /// Send `request` and return the response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if no response was received.
    async fn post(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError>;
}

/// [`HttpTransport`] over a pooled `reqwest` client with a per-call timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport whose calls time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Request`] if the client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(&request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await
            .map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify)?;
        Ok(TransportResponse { status, body })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}
