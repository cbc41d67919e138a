//! Per-partition sequential workers.
//!
//! Messages of one `(topic, partition)` are processed strictly in submission
//! order by a dedicated task: a message is dispatched and its acknowledgment
//! decision recorded before the next one starts. Different partitions run
//! in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::ack::AckSink;
use crate::dispatcher::Dispatcher;
use crate::error::WorkerError;
use crate::message::InboundMessage;

/// Default capacity of each partition queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

type PartitionKey = (String, i32);

#[derive(Debug)]
struct Worker {
    sender: mpsc::Sender<InboundMessage>,
    handle: JoinHandle<u64>,
}

/// Fans messages out to one sequential worker per partition.
#[derive(Debug)]
pub struct PartitionRelay {
    dispatcher: Arc<Dispatcher>,
    sink: Arc<dyn AckSink>,
    capacity: usize,
    workers: HashMap<PartitionKey, Worker>,
}

impl PartitionRelay {
    /// Create a relay whose partition queues hold up to `capacity` messages.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, sink: Arc<dyn AckSink>, capacity: usize) -> Self {
        Self {
            dispatcher,
            sink,
            capacity: capacity.max(1),
            workers: HashMap::new(),
        }
    }

    /// Number of partitions with a running worker.
    #[must_use]
    pub fn partitions(&self) -> usize {
        self.workers.len()
    }

    /// Queue `message` on its partition's worker, starting the worker on
    /// first use. Waits while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Stopped`] if the partition worker has exited.
    pub async fn submit(&mut self, message: InboundMessage) -> Result<(), WorkerError> {
        let key = (message.topic.clone(), message.partition);
        let Self {
            dispatcher,
            sink,
            capacity,
            workers,
        } = self;
        let worker = workers.entry(key).or_insert_with_key(|(topic, partition)| {
            spawn_worker(
                topic.clone(),
                *partition,
                *capacity,
                Arc::clone(dispatcher),
                Arc::clone(sink),
            )
        });

        worker.sender.send(message).await.map_err(|e| WorkerError::Stopped {
            topic: e.0.topic,
            partition: e.0.partition,
        })
    }

    /// Close every queue and wait for the workers to drain them.
    ///
    /// Returns the number of messages processed.
    pub async fn shutdown(self) -> u64 {
        let mut processed = 0;
        for ((topic, partition), worker) in self.workers {
            drop(worker.sender);
            match worker.handle.await {
                Ok(count) => processed += count,
                Err(e) => error!(topic = %topic, partition, error = %e, "Partition worker failed"),
            }
        }
        info!(processed, "Partition workers drained");
        processed
    }
}

fn spawn_worker(
    topic: String,
    partition: i32,
    capacity: usize,
    dispatcher: Arc<Dispatcher>,
    sink: Arc<dyn AckSink>,
) -> Worker {
    let (sender, mut receiver) = mpsc::channel::<InboundMessage>(capacity);
    debug!(topic = %topic, partition, "Starting partition worker");
    let handle = tokio::spawn(async move {
        let mut processed = 0_u64;
        while let Some(message) = receiver.recv().await {
            dispatcher.process(&message, sink.as_ref()).await;
            processed += 1;
        }
        debug!(topic = %topic, partition, processed, "Partition worker stopped");
        processed
    });
    Worker { sender, handle }
}
