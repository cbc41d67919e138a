//! Acknowledgment decisions and the sink that receives them.

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::message::InboundMessage;

/// What the stream consumer should do with a processed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Commit the offset; the message is done.
    Acknowledge,
    /// Leave the offset uncommitted so the message is redelivered.
    Withhold,
}

impl AckDecision {
    /// Whether the message is acknowledged.
    #[must_use]
    pub fn is_acknowledge(self) -> bool {
        matches!(self, Self::Acknowledge)
    }
}

/// Receives the acknowledgment decision for each processed message.
#[async_trait::async_trait]
pub trait AckSink: Send + Sync + std::fmt::Debug {
    /// Apply `decision` to `message`.
    async fn record(&self, message: &InboundMessage, decision: AckDecision);
}

/// Sink that only logs decisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAckSink;

#[async_trait::async_trait]
impl AckSink for LoggingAckSink {
    async fn record(&self, message: &InboundMessage, decision: AckDecision) {
        match decision {
            AckDecision::Acknowledge => info!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "Message acknowledged"
            ),
            AckDecision::Withhold => warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "Acknowledgment withheld, message will be redelivered"
            ),
        }
    }
}

/// One recorded decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAck {
    /// Topic of the message.
    pub topic: String,
    /// Partition of the message.
    pub partition: i32,
    /// Offset of the message.
    pub offset: i64,
    /// The decision taken.
    pub decision: AckDecision,
}

/// Sink that keeps every decision in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryAckSink {
    records: Mutex<Vec<RecordedAck>>,
}

impl MemoryAckSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded decisions.
    #[must_use]
    pub fn records(&self) -> Vec<RecordedAck> {
        self.records.lock().clone()
    }
}

#[async_trait::async_trait]
impl AckSink for MemoryAckSink {
    async fn record(&self, message: &InboundMessage, decision: AckDecision) {
        self.records.lock().push(RecordedAck {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            decision,
        });
    }
}
