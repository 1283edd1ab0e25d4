//! Node access with per-call timeout, retry and cancellation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use async_trait::async_trait;
use eth_ingestion_telemetry::Metrics;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::FetchError;
use crate::retry::RetryPolicy;
use crate::types::{RawBlock, RawReceipt};

/// Transport-level access to an Ethereum node.
///
/// Implementations perform exactly one request per call and never retry;
/// `Ok(None)` means the node answered `null`.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Number of the latest block known to the node.
    async fn block_number(&self) -> Result<u64, FetchError>;

    /// Block `number` with full transaction objects.
    async fn block_by_number(&self, number: u64) -> Result<Option<RawBlock>, FetchError>;

    /// Receipt of the transaction `hash`.
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<RawReceipt>, FetchError>;
}

#[async_trait]
impl<R: NodeRpc + ?Sized> NodeRpc for Arc<R> {
    async fn block_number(&self) -> Result<u64, FetchError> {
        (**self).block_number().await
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<RawBlock>, FetchError> {
        (**self).block_by_number(number).await
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<RawReceipt>, FetchError> {
        (**self).transaction_receipt(hash).await
    }
}

/// Wraps a [`NodeRpc`] with hard timeouts, bounded exponential backoff on
/// transport failures and cancellation.
///
/// `NotFound` and malformed responses are returned immediately. No caching.
pub struct BlockFetcher<R> {
    rpc: R,
    retry: RetryPolicy,
    timeout: Duration,
    metrics: Metrics,
    cancel: CancellationToken,
}

impl<R: NodeRpc> BlockFetcher<R> {
    /// Create a new fetcher.
    pub fn new(
        rpc: R,
        retry: RetryPolicy,
        timeout: Duration,
        metrics: Metrics,
        cancel: CancellationToken,
    ) -> Self {
        Self { rpc, retry, timeout, metrics, cancel }
    }

    /// Number of the latest block.
    pub async fn fetch_latest_number(&self) -> Result<u64, FetchError> {
        self.call("get_block_number", "latest block number".to_string(), || async {
            self.rpc.block_number().await.map(Some)
        })
        .await
    }

    /// Block `number` with its transactions.
    pub async fn fetch_block_with_transactions(&self, number: u64) -> Result<RawBlock, FetchError> {
        self.call("get_block", format!("block {number}"), || self.rpc.block_by_number(number))
            .await
    }

    /// Receipt for the transaction `tx_hash`.
    pub async fn fetch_receipt(&self, tx_hash: B256) -> Result<RawReceipt, FetchError> {
        self.call("get_receipt", format!("receipt {tx_hash}"), || {
            self.rpc.transaction_receipt(tx_hash)
        })
        .await
    }

    async fn call<T, F, Fut>(
        &self,
        operation: &'static str,
        subject: String,
        mut request: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let start = Instant::now();
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                outcome = tokio::time::timeout(self.timeout, request()) => outcome,
            };
            self.metrics.observe_rpc_latency(operation, start.elapsed().as_secs_f64());

            let err = match outcome {
                Ok(Ok(Some(value))) => return Ok(value),
                Ok(Ok(None)) => return Err(FetchError::NotFound(subject)),
                Ok(Err(err)) => err,
                Err(_) => FetchError::Timeout(self.timeout),
            };
            self.metrics.inc_rpc_errors();

            if !err.is_retryable() {
                return Err(err);
            }

            attempt += 1;
            let Some(delay) = self.retry.next_delay(attempt) else {
                return Err(err);
            };
            warn!(
                operation,
                subject = %subject,
                attempt,
                max_retries = self.retry.max_retries(),
                error = %err,
                "RPC call failed, backing off for {:?}",
                delay
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
