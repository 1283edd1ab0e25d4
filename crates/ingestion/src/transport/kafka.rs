//! Kafka transport backed by librdkafka.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::util::Timeout;
use rdkafka::client::ClientContext;
use tokio::sync::oneshot;
use tracing::info;

use crate::error::PublishError;
use crate::publisher::{BusMessage, BusTransport, DeliveryFuture, DeliveryStatus};

/// Kafka producer settings.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Comma-separated `host:port` broker list.
    pub bootstrap_servers: String,
    /// Client id reported to the brokers.
    pub client_id: String,
    /// Capacity of the local outbound queue; a full queue means `Overloaded`.
    pub queue_max_messages: usize,
    /// How long librdkafka keeps retrying a message before failing it.
    pub message_timeout: Duration,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            client_id: "ethereum_ingestion".to_string(),
            queue_max_messages: 100_000,
            message_timeout: Duration::from_secs(30),
        }
    }
}

/// Routes librdkafka delivery callbacks to the per-message oneshot.
struct DeliveryContext;

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = Box<oneshot::Sender<DeliveryStatus>>;

    fn delivery(&self, result: &DeliveryResult<'_>, sender: Self::DeliveryOpaque) {
        let status = match result {
            Ok(message) => DeliveryStatus::Delivered {
                partition: message.partition(),
                offset: message.offset(),
            },
            Err((err, _)) => DeliveryStatus::DeliveryFailed(err.to_string()),
        };
        let _ = sender.send(status);
    }
}

/// Kafka producer polled by librdkafka's background thread.
pub struct KafkaTransport {
    producer: Arc<ThreadedProducer<DeliveryContext>>,
}

impl KafkaTransport {
    /// Connect a producer to the configured brokers.
    pub fn new(config: &KafkaConfig) -> Result<Self, PublishError> {
        let producer: ThreadedProducer<DeliveryContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("client.id", &config.client_id)
            .set("queue.buffering.max.messages", config.queue_max_messages.to_string())
            .set("message.timeout.ms", config.message_timeout.as_millis().to_string())
            .create_with_context(DeliveryContext)
            .map_err(|e| PublishError::Transport(format!("failed to create producer: {e}")))?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            client_id = %config.client_id,
            "Created Kafka producer"
        );
        Ok(Self { producer: Arc::new(producer) })
    }
}

#[async_trait]
impl BusTransport for KafkaTransport {
    fn send(&self, message: BusMessage) -> Result<DeliveryFuture, PublishError> {
        let (tx, rx) = oneshot::channel();
        let record = BaseRecord::with_opaque_to(&message.topic, Box::new(tx))
            .key(message.key.as_str())
            .payload(message.payload.as_slice());

        match self.producer.send(record) {
            Ok(()) => Ok(Box::pin(async move {
                rx.await.unwrap_or_else(|_| {
                    DeliveryStatus::DeliveryFailed("producer dropped before delivery report".into())
                })
            })),
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), _)) => {
                Err(PublishError::Overloaded)
            }
            Err((err, _)) => Err(PublishError::Transport(err.to_string())),
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<(), PublishError> {
        let producer = Arc::clone(&self.producer);
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| PublishError::Transport(format!("flush task failed: {e}")))?
            .map_err(|e| PublishError::Transport(format!("flush failed: {e}")))
    }
}
