//! Pipeline settings.

use std::time::Duration;

use crate::enricher::DEFAULT_MAX_CONCURRENT_RECEIPTS;
use crate::retry::RetryConfig;

/// Settings for one [`crate::IngestionLoop`].
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Bus topic blocks are published to.
    pub topic: String,
    /// Delay between ticks.
    pub poll_interval: Duration,
    /// Maximum receipt fetches in flight for one block.
    pub max_concurrent_receipts: usize,
    /// Hard timeout of every RPC call.
    pub rpc_timeout: Duration,
    /// Backoff for failed RPC calls.
    pub retry: RetryConfig,
    /// How long shutdown waits for outstanding delivery reports.
    pub flush_timeout: Duration,
    /// Optional JSON-lines file receiving a summary of each published block.
    pub sample_output_path: Option<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            topic: "ethereum-blocks".to_string(),
            poll_interval: Duration::from_secs(2),
            max_concurrent_receipts: DEFAULT_MAX_CONCURRENT_RECEIPTS,
            rpc_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            flush_timeout: Duration::from_secs(5),
            sample_output_path: None,
        }
    }
}
