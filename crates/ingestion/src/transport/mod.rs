//! Message-bus transports.

#[cfg(feature = "kafka")]
mod kafka;
mod stdout;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaTransport};
pub use stdout::{StdoutTransport, DEFAULT_LINE_QUEUE};
