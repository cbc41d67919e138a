//! Inbound stream messages.

use bytes::Bytes;

/// One message pulled from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition (monotonic).
    pub offset: i64,
    /// Raw payload.
    pub payload: Bytes,
}

impl InboundMessage {
    /// Create a message.
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            payload: payload.into(),
        }
    }
}
