//! Raw node payloads and the canonical records published to the bus.

use alloy::primitives::{Address, Bytes, B256, U256, U64};
use serde::{Deserialize, Serialize};

/// A block as returned by `eth_getBlockByNumber(number, true)`.
///
/// Header fields are optional because the node reports them as `null` for
/// pending blocks; the assembler rejects such blocks.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    /// Block number.
    pub number: Option<U64>,
    /// Block hash.
    pub hash: Option<B256>,
    /// Parent block hash.
    pub parent_hash: Option<B256>,
    /// Unix timestamp in seconds.
    pub timestamp: Option<U64>,
    /// Full transaction objects, in on-chain order.
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
}

/// A transaction object embedded in a [`RawBlock`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    /// Transaction hash.
    pub hash: B256,
    /// Sender.
    pub from: Address,
    /// Recipient, `None` for contract creation.
    pub to: Option<Address>,
    /// Transferred value in wei.
    pub value: U256,
    /// Gas limit.
    pub gas: U64,
    /// Gas price in wei. Typed transactions report the effective price here.
    #[serde(default)]
    pub gas_price: Option<U256>,
    /// Call data.
    #[serde(default)]
    pub input: Bytes,
}

/// A receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReceipt {
    /// Hash of the transaction this receipt belongs to.
    pub transaction_hash: B256,
    /// Execution status, `1` on success. Absent on pre-Byzantium receipts.
    #[serde(default)]
    pub status: Option<U64>,
    /// Gas consumed by this transaction.
    pub gas_used: U64,
    /// Emitted logs, in emission order.
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

/// A log entry inside a [`RawReceipt`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawLog {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics.
    #[serde(default)]
    pub topics: Vec<B256>,
    /// Non-indexed data.
    #[serde(default)]
    pub data: Bytes,
}

/// Canonical block record published to the bus.
///
/// Field declaration order is the JSON field order on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: u64,
    pub transactions: Vec<TransactionRecord>,
}

/// A transaction enriched with its receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    /// Decimal string, wei.
    pub value: String,
    pub gas: u64,
    /// Decimal string, wei.
    pub gas_price: String,
    pub input: String,
    pub status: u8,
    pub gas_used: u64,
    pub logs: Vec<LogRecord>,
}

/// A log emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
}
