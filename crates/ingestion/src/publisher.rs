//! Non-blocking hand-off of block records to the message bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eth_ingestion_telemetry::Metrics;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::PublishError;
use crate::types::BlockRecord;

/// A serialized record addressed to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Destination topic.
    pub topic: String,
    /// Ordering key, the decimal block number.
    pub key: String,
    /// UTF-8 JSON payload.
    pub payload: Vec<u8>,
}

/// Final outcome of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The bus durably accepted the message.
    Delivered {
        /// Partition the message landed in.
        partition: i32,
        /// Offset within the partition.
        offset: i64,
    },
    /// The bus rejected or lost the message.
    DeliveryFailed(String),
}

impl DeliveryStatus {
    /// Whether the message was delivered.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Resolves once the bus confirms or rejects a message.
pub type DeliveryFuture = BoxFuture<'static, DeliveryStatus>;

/// Asynchronous message-bus client.
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Enqueue `message` without blocking.
    ///
    /// Must fail with [`PublishError::Overloaded`] when the outbound buffer
    /// is full rather than waiting for room.
    fn send(&self, message: BusMessage) -> Result<DeliveryFuture, PublishError>;

    /// Wait up to `timeout` for every enqueued message to be confirmed.
    async fn flush(&self, timeout: Duration) -> Result<(), PublishError>;
}

#[async_trait]
impl<T: BusTransport + ?Sized> BusTransport for Arc<T> {
    fn send(&self, message: BusMessage) -> Result<DeliveryFuture, PublishError> {
        (**self).send(message)
    }

    async fn flush(&self, timeout: Duration) -> Result<(), PublishError> {
        (**self).flush(timeout).await
    }
}

/// A delivery outcome together with the message it belongs to.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// Block number carried by the message.
    pub block_number: u64,
    /// Topic the message was sent to.
    pub topic: String,
    /// Outcome reported by the bus.
    pub status: DeliveryStatus,
}

/// Sink for delivery confirmations.
///
/// Runs outside the ingestion loop; implementations must not touch loop state.
pub trait DeliveryObserver: Send + Sync {
    /// Called once per published message.
    fn on_delivery(&self, report: &DeliveryReport);
}

/// Logs every delivery report and counts outcomes.
pub struct LoggingObserver {
    metrics: Metrics,
}

impl LoggingObserver {
    /// Create an observer that records into `metrics`.
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }
}

impl DeliveryObserver for LoggingObserver {
    fn on_delivery(&self, report: &DeliveryReport) {
        self.metrics.inc_deliveries(report.status.is_delivered());
        match &report.status {
            DeliveryStatus::Delivered { partition, offset } => info!(
                block_number = report.block_number,
                offset,
                "Message delivered to {} [{}]",
                report.topic,
                partition
            ),
            DeliveryStatus::DeliveryFailed(reason) => error!(
                block_number = report.block_number,
                topic = %report.topic,
                "Message delivery failed: {}",
                reason
            ),
        }
    }
}

/// Handle to one in-flight publish.
///
/// Dropping it does not cancel delivery; the outcome still reaches the
/// observer.
#[derive(Debug)]
pub struct PublishHandle {
    block_number: u64,
    status: oneshot::Receiver<DeliveryStatus>,
}

impl PublishHandle {
    /// Block number of the published record.
    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    /// Wait for the delivery outcome.
    pub async fn delivery(self) -> DeliveryStatus {
        self.status.await.unwrap_or_else(|_| {
            DeliveryStatus::DeliveryFailed("delivery watcher dropped".to_string())
        })
    }
}

/// Serializes block records and hands them to a [`BusTransport`].
pub struct Publisher<T> {
    transport: T,
    topic: String,
    observer: Arc<dyn DeliveryObserver>,
    pending: TaskTracker,
}

impl<T: BusTransport> Publisher<T> {
    /// Create a publisher sending to `topic`.
    pub fn new(transport: T, topic: impl Into<String>, observer: Arc<dyn DeliveryObserver>) -> Self {
        Self {
            transport,
            topic: topic.into(),
            observer,
            pending: TaskTracker::new(),
        }
    }

    /// Topic this publisher sends to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Number of messages whose delivery outcome is still outstanding.
    pub fn pending_deliveries(&self) -> usize {
        self.pending.len()
    }

    /// Hand `record` to the bus, keyed by its block number.
    ///
    /// Returns as soon as the transport accepted the message. The delivery
    /// outcome is forwarded to the observer from a background task.
    pub fn publish(&self, record: &BlockRecord) -> Result<PublishHandle, PublishError> {
        let message = encode(&self.topic, record)?;
        let delivery = self.transport.send(message)?;

        let (tx, rx) = oneshot::channel();
        let observer = Arc::clone(&self.observer);
        let report_topic = self.topic.clone();
        let block_number = record.number;
        self.pending.spawn(async move {
            let status = delivery.await;
            observer.on_delivery(&DeliveryReport {
                block_number,
                topic: report_topic,
                status: status.clone(),
            });
            let _ = tx.send(status);
        });

        debug!(block_number, topic = %self.topic, "Handed block to bus");
        Ok(PublishHandle { block_number, status: rx })
    }

    /// Flush the transport and drain outstanding delivery reports. Both steps
    /// share one deadline `timeout` from now. Consumes the publisher,
    /// releasing the transport.
    pub async fn shutdown(self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        self.pending.close();
        let outstanding = self.pending.len();
        info!(outstanding, "Flushing bus transport");

        match tokio::time::timeout_at(deadline, self.transport.flush(timeout)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to flush bus transport: {}", e),
            Err(_) => warn!("Timed out flushing bus transport"),
        }
        if tokio::time::timeout_at(deadline, self.pending.wait()).await.is_err() {
            warn!(
                abandoned = self.pending.len(),
                "Timed out waiting for delivery reports"
            );
        }
    }
}

/// Serialize `record` into a bus message.
pub fn encode(topic: &str, record: &BlockRecord) -> Result<BusMessage, PublishError> {
    Ok(BusMessage {
        topic: topic.to_string(),
        key: record.number.to_string(),
        payload: serde_json::to_vec(record)?,
    })
}
