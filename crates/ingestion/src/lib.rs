//! Ethereum block ingestion: polls a node for new heads, enriches every
//! transaction with its receipt and logs, and publishes one canonical JSON
//! record per block to a message bus.

pub mod assembler;
pub mod config;
pub mod enricher;
pub mod error;
pub mod fetcher;
pub mod ingestion_loop;
pub mod normalize;
pub mod publisher;
pub mod retry;
pub mod rpc_client;
pub mod transport;
pub mod types;

pub use assembler::BlockAssembler;
pub use config::IngestionConfig;
pub use enricher::TransactionEnricher;
pub use error::{FetchError, IngestError, MalformedBlockError, PublishError};
pub use fetcher::{BlockFetcher, NodeRpc};
pub use ingestion_loop::{IngestionLoop, IngestionState, TickOutcome};
pub use publisher::{
    BusMessage, BusTransport, DeliveryFuture, DeliveryObserver, DeliveryReport, DeliveryStatus,
    LoggingObserver, PublishHandle, Publisher,
};
pub use retry::{RetryConfig, RetryPolicy};
pub use rpc_client::RpcClient;
pub use types::{BlockRecord, LogRecord, TransactionRecord};
