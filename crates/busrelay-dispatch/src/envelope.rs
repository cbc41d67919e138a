//! Event-bus `PutEvents` envelope.
//!
//! Each valid message becomes one entry:
//!
//! ```json
//! {"Entries":[{"Source":"openbank.payments","DetailType":"Transfer_KO",
//!   "Detail":"{\"payload\":{\"operationId\":\"...\"}}","EventBusName":"default"}]}
//! ```
//!
//! `Detail` is itself a JSON document serialized into a string.

use busrelay_core::EnvelopeSettings;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Content type of the JSON 1.1 protocol.
pub const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// `x-amz-target` of the `PutEvents` operation.
pub const PUT_EVENTS_TARGET: &str = "AWSEvents.PutEvents";

/// `PutEvents` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutEventsRequest {
    /// Entries to publish.
    pub entries: Vec<PutEventsEntry>,
}

/// One event entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutEventsEntry {
    /// Event source.
    pub source: String,
    /// Event detail type.
    pub detail_type: String,
    /// JSON-encoded event detail.
    pub detail: String,
    /// Target event bus.
    pub event_bus_name: String,
}

/// The `Detail` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDetail {
    /// Detail payload.
    pub payload: EventPayload,
}

/// Payload of the `Detail` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    /// The business identifier of the message.
    pub operation_id: String,
}

impl PutEventsRequest {
    /// Build the single-entry request for `business_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Encode`] if the detail cannot be serialized.
    pub fn for_business_id(
        business_id: &str,
        settings: &EnvelopeSettings,
        event_bus_name: &str,
    ) -> Result<Self, DeliveryError> {
        let detail = EventDetail {
            payload: EventPayload {
                operation_id: business_id.to_owned(),
            },
        };
        let detail =
            serde_json::to_string(&detail).map_err(|e| DeliveryError::Encode(e.to_string()))?;
        Ok(Self {
            entries: vec![PutEventsEntry {
                source: settings.source.clone(),
                detail_type: settings.detail_type.clone(),
                detail,
                event_bus_name: event_bus_name.to_owned(),
            }],
        })
    }

    /// Serialize to the request body.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Encode`] on serialization failure.
    pub fn to_body(&self) -> Result<Vec<u8>, DeliveryError> {
        serde_json::to_vec(self).map_err(|e| DeliveryError::Encode(e.to_string()))
    }
}

/// `PutEvents` response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutEventsResponse {
    /// Number of entries the bus did not accept.
    #[serde(default)]
    pub failed_entry_count: u32,
    /// Per-entry results.
    #[serde(default)]
    pub entries: Vec<PutEventsResultEntry>,
}

/// Per-entry `PutEvents` result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutEventsResultEntry {
    /// Id of the accepted event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Error code of a rejected entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Error message of a rejected entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Check a 2xx `PutEvents` response body for rejected entries.
///
/// An empty or unparseable body is accepted: the status already reported success.
///
/// # Errors
///
/// Returns [`DeliveryError::FailedEntries`] when `FailedEntryCount > 0`.
pub fn check_put_events_response(body: &[u8]) -> Result<PutEventsResponse, DeliveryError> {
    let response: PutEventsResponse = serde_json::from_slice(body).unwrap_or_default();
    if response.failed_entry_count > 0 {
        let message = response
            .entries
            .iter()
            .find_map(|e| {
                e.error_code.as_ref().map(|code| {
                    format!("{code}: {}", e.error_message.as_deref().unwrap_or_default())
                })
            })
            .unwrap_or_else(|| "no error detail".to_owned());
        return Err(DeliveryError::FailedEntries {
            count: response.failed_entry_count,
            message,
        });
    }
    Ok(response)
}
