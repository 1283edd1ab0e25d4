//! Receipt fan-out for the transactions of one block.

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use crate::error::{IngestError, MalformedBlockError};
use crate::fetcher::{BlockFetcher, NodeRpc};
use crate::normalize::encode_hex;
use crate::types::{LogRecord, RawLog, RawReceipt, RawTransaction, TransactionRecord};

/// Default maximum number of receipt fetches in flight for one block.
pub const DEFAULT_MAX_CONCURRENT_RECEIPTS: usize = 10;

/// Fetches receipts for a block's transactions with bounded concurrency.
#[derive(Debug, Clone)]
pub struct TransactionEnricher {
    max_in_flight: usize,
}

impl TransactionEnricher {
    /// Create an enricher allowing at most `max_in_flight` concurrent receipt fetches.
    pub fn new(max_in_flight: usize) -> Self {
        Self { max_in_flight: max_in_flight.max(1) }
    }

    /// Enrich every transaction of a block with its receipt.
    ///
    /// Output order matches `transactions` regardless of completion order.
    /// Each receipt is retried by the fetcher; if one still fails the whole
    /// block fails and no partial result is returned.
    pub async fn enrich<R: NodeRpc>(
        &self,
        fetcher: &BlockFetcher<R>,
        block_number: u64,
        transactions: &[RawTransaction],
    ) -> Result<Vec<TransactionRecord>, IngestError> {
        let pending: Vec<_> = transactions
            .iter()
            .map(|tx| enrich_one(fetcher, tx))
            .collect();
        let records: Vec<TransactionRecord> = stream::iter(pending)
            .buffered(self.max_in_flight)
            .try_collect()
            .await?;

        debug!(block_number, transactions = records.len(), "Enriched transactions");
        Ok(records)
    }
}

async fn enrich_one<R: NodeRpc>(
    fetcher: &BlockFetcher<R>,
    tx: &RawTransaction,
) -> Result<TransactionRecord, IngestError> {
    let receipt = fetcher.fetch_receipt(tx.hash).await?;
    Ok(transaction_record(tx, &receipt)?)
}

/// Combine a transaction with its receipt, hex-normalizing every byte field.
pub fn transaction_record(
    tx: &RawTransaction,
    receipt: &RawReceipt,
) -> Result<TransactionRecord, MalformedBlockError> {
    if receipt.transaction_hash != tx.hash {
        return Err(MalformedBlockError::ReceiptMismatch {
            requested: encode_hex(tx.hash),
            reported: encode_hex(receipt.transaction_hash),
        });
    }

    let status = match receipt.status {
        Some(status) if status.is_zero() => 0,
        _ => 1,
    };

    Ok(TransactionRecord {
        hash: encode_hex(tx.hash),
        from: encode_hex(tx.from),
        to: tx.to.map(encode_hex),
        value: tx.value.to_string(),
        gas: tx.gas.to::<u64>(),
        gas_price: tx.gas_price.unwrap_or_default().to_string(),
        input: encode_hex(&tx.input),
        status,
        gas_used: receipt.gas_used.to::<u64>(),
        logs: receipt.logs.iter().map(log_record).collect(),
    })
}

fn log_record(log: &RawLog) -> LogRecord {
    LogRecord {
        address: encode_hex(log.address),
        topics: log.topics.iter().map(encode_hex).collect(),
        data: encode_hex(&log.data),
    }
}
