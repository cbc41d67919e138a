//! Dispatch orchestrator for busrelay.
//!
//! Turns inbound stream messages into signed event-bus deliveries:
//!
//! - [`transform`]: payload parsing, discriminator validation and business
//!   identifier rendering
//! - [`routing`]: choosing the destinations of a message
//! - [`envelope`]: the `PutEvents` wire format
//! - [`transport`]: the outbound HTTP seam
//! - [`retry`]: bounded exponential backoff
//! - [`dispatcher`]: the per-message pipeline and the partial-failure policy
//! - [`ack`]: acknowledgment decisions
//! - [`worker`]: sequential processing per stream partition

pub mod ack;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod message;
pub mod retry;
pub mod routing;
pub mod transform;
pub mod transport;
pub mod worker;

#[cfg(test)]
mod testing;

pub use ack::{AckDecision, AckSink, LoggingAckSink, MemoryAckSink, RecordedAck};
pub use dispatcher::{DeliveryStatus, DispatchOutcome, DispatchReport, Dispatcher};
pub use error::{DeliveryError, DispatchError, TransportError, WorkerError};
pub use message::InboundMessage;
pub use retry::RetryPolicy;
pub use routing::{default_routing, resolve_targets};
pub use transform::{BusinessIdTemplate, JsonTransformer, PayloadTransformer, Record, TransformError};
pub use transport::{HttpTransport, OutboundRequest, ReqwestTransport, TransportResponse};
pub use worker::{DEFAULT_QUEUE_CAPACITY, PartitionRelay};
