//! The polling driver: detects new heads and drives fetch, enrich,
//! assemble and publish for each of them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use eth_ingestion_telemetry::{audit, Metrics};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::assembler::BlockAssembler;
use crate::config::IngestionConfig;
use crate::enricher::TransactionEnricher;
use crate::error::{FetchError, IngestError, PublishError};
use crate::fetcher::{BlockFetcher, NodeRpc};
use crate::publisher::{
    BusTransport, DeliveryObserver, LoggingObserver, PublishHandle, Publisher,
};
use crate::retry::RetryPolicy;

/// Progress owned by the loop. Not persisted across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionState {
    last_seen_block_number: Option<u64>,
}

impl IngestionState {
    /// Number of the last block handed to the bus, if any.
    pub fn last_seen_block_number(&self) -> Option<u64> {
        self.last_seen_block_number
    }

    /// Whether `number` is strictly newer than anything handed off so far.
    pub fn is_new(&self, number: u64) -> bool {
        self.last_seen_block_number.map_or(true, |last| number > last)
    }

    fn advance(&mut self, number: u64) {
        if self.is_new(number) {
            self.last_seen_block_number = Some(number);
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The block was handed to the bus.
    Published(u64),
    /// The head was not newer than the last seen block.
    Stale {
        /// Head reported by the node.
        latest: u64,
        /// Last block handed off.
        last_seen: u64,
    },
    /// The bus was overloaded and the block was dropped; state still advanced.
    Dropped(u64),
    /// Processing the block failed; it will be retried next tick.
    Failed {
        /// Block that failed.
        block_number: u64,
        /// Failure class, see [`IngestError::reason`].
        reason: &'static str,
    },
    /// The head could not be fetched.
    PollFailed,
    /// Cancellation was requested.
    Cancelled,
}

#[derive(Debug, Serialize)]
struct AuditBlock {
    block_number: u64,
    block_hash: String,
    transaction_count: usize,
    log_count: usize,
    published_at: DateTime<Utc>,
}

/// Polls the node and publishes each new head exactly once per process
/// lifetime (barring restarts and delivery failures).
pub struct IngestionLoop<R, T> {
    fetcher: BlockFetcher<R>,
    enricher: TransactionEnricher,
    publisher: Publisher<T>,
    state: IngestionState,
    poll_interval: Duration,
    flush_timeout: Duration,
    sample_output_path: Option<String>,
    metrics: Metrics,
    cancel: CancellationToken,
}

impl<R: NodeRpc, T: BusTransport> IngestionLoop<R, T> {
    /// Create a loop whose delivery reports are logged and counted.
    pub fn new(
        rpc: R,
        transport: T,
        config: IngestionConfig,
        metrics: Metrics,
        cancel: CancellationToken,
    ) -> Self {
        let observer = Arc::new(LoggingObserver::new(metrics.clone()));
        Self::with_observer(rpc, transport, observer, config, metrics, cancel)
    }

    /// Create a loop feeding delivery reports to `observer`.
    pub fn with_observer(
        rpc: R,
        transport: T,
        observer: Arc<dyn DeliveryObserver>,
        config: IngestionConfig,
        metrics: Metrics,
        cancel: CancellationToken,
    ) -> Self {
        let fetcher = BlockFetcher::new(
            rpc,
            RetryPolicy::new(config.retry),
            config.rpc_timeout,
            metrics.clone(),
            cancel.clone(),
        );
        Self {
            fetcher,
            enricher: TransactionEnricher::new(config.max_concurrent_receipts),
            publisher: Publisher::new(transport, config.topic, observer),
            state: IngestionState::default(),
            poll_interval: config.poll_interval,
            flush_timeout: config.flush_timeout,
            sample_output_path: config.sample_output_path,
            metrics,
            cancel,
        }
    }

    /// Current loop state.
    pub fn state(&self) -> IngestionState {
        self.state
    }

    /// Run until cancelled, then drain outstanding deliveries.
    pub async fn run(mut self) {
        info!(topic = %self.publisher.topic(), "Starting Ethereum block ingestion...");

        while !self.cancel.is_cancelled() {
            if self.tick().await == TickOutcome::Cancelled {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(
            last_seen_block_number = ?self.state.last_seen_block_number(),
            "Ingestion cancelled, draining pending deliveries"
        );
        self.publisher.shutdown(self.flush_timeout).await;
    }

    /// Perform one poll and, if the head is new, process it.
    ///
    /// Never fails: every error is logged here and reported as the outcome.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.cancel.is_cancelled() {
            return TickOutcome::Cancelled;
        }

        let latest = match self.fetcher.fetch_latest_number().await {
            Ok(number) => number,
            Err(FetchError::Cancelled) => return TickOutcome::Cancelled,
            Err(e) => {
                error!(error = %e, "Failed to get latest block number");
                return TickOutcome::PollFailed;
            }
        };

        if let Some(last_seen) = self.state.last_seen_block_number() {
            if latest <= last_seen {
                debug!(latest, last_seen, "No new blocks");
                return TickOutcome::Stale { latest, last_seen };
            }
        }

        match self.handle_block(latest).await {
            Ok(_handle) => {
                self.advance(latest);
                self.metrics.inc_blocks_published();
                TickOutcome::Published(latest)
            }
            Err(IngestError::Publish(PublishError::Overloaded)) => {
                error!(
                    block_number = latest,
                    "Bus overloaded, dropping block"
                );
                self.advance(latest);
                self.metrics.inc_blocks_dropped();
                TickOutcome::Dropped(latest)
            }
            Err(IngestError::Fetch(FetchError::Cancelled)) => TickOutcome::Cancelled,
            Err(e) => {
                let reason = e.reason();
                error!(block_number = latest, reason, error = %e, "Error handling block");
                self.metrics.inc_blocks_skipped(reason);
                TickOutcome::Failed { block_number: latest, reason }
            }
        }
    }

    async fn handle_block(&self, number: u64) -> Result<PublishHandle, IngestError> {
        let block = self.fetcher.fetch_block_with_transactions(number).await?;
        let transactions = self
            .enricher
            .enrich(&self.fetcher, number, &block.transactions)
            .await?;
        self.metrics.inc_transactions_enriched(transactions.len() as u64);

        let record = BlockAssembler::assemble(&block, transactions)?;
        let handle = self.publisher.publish(&record)?;

        info!(
            block_number = record.number,
            transactions = record.transactions.len(),
            "Published block"
        );

        if self.sample_output_path.is_some() {
            let sample = AuditBlock {
                block_number: record.number,
                block_hash: record.hash.clone(),
                transaction_count: record.transactions.len(),
                log_count: record.transactions.iter().map(|tx| tx.logs.len()).sum(),
                published_at: Utc::now(),
            };
            if let Err(e) = audit::write_audit_sample(self.sample_output_path.as_deref(), &sample) {
                warn!("Failed to write audit sample: {}", e);
            }
        }

        Ok(handle)
    }

    fn advance(&mut self, number: u64) {
        self.state.advance(number);
        self.metrics.set_last_seen_block(number);
    }
}
