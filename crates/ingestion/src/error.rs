//! Error taxonomy for the ingestion pipeline.

use std::time::Duration;

/// Failure of a single node RPC call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The node was unreachable, answered with an error, or timed out. Retryable.
    #[error("transport error: {0}")]
    Transport(String),
    /// The call exceeded its hard timeout. Treated like [`FetchError::Transport`].
    #[error("rpc call timed out after {0:?}")]
    Timeout(Duration),
    /// The node has no data for the request (pruned or reorged). Not retried.
    #[error("not found: {0}")]
    NotFound(String),
    /// The node answered with a payload that could not be decoded. Not retried.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The caller's cancellation signal fired before the call completed.
    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether another attempt of the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

/// A raw block or its enrichment cannot be turned into a [`crate::BlockRecord`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedBlockError {
    /// A required header field was absent (e.g. a pending block).
    #[error("block is missing header field `{0}`")]
    MissingField(&'static str),
    /// Enrichment produced a different number of transactions than the block holds.
    #[error("block has {expected} transactions but {actual} were enriched")]
    TransactionCountMismatch {
        /// Transactions in the source block.
        expected: usize,
        /// Transactions handed to the assembler.
        actual: usize,
    },
    /// A receipt does not belong to the transaction it was fetched for.
    #[error("receipt for {requested} reports transaction {reported}")]
    ReceiptMismatch {
        /// Hash the receipt was requested for.
        requested: String,
        /// Hash reported inside the receipt.
        reported: String,
    },
}

/// Synchronous failure of the publish hand-off.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The transport's outbound buffer is full; the block is dropped.
    #[error("bus outbound buffer is full")]
    Overloaded,
    /// The transport rejected the message for any other reason.
    #[error("bus transport error: {0}")]
    Transport(String),
    /// The record could not be serialized.
    #[error("failed to serialize block record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Any failure that aborts one ingestion tick.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Fetching the block or a receipt failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The block could not be assembled.
    #[error(transparent)]
    MalformedBlock(#[from] MalformedBlockError),
    /// The hand-off to the bus failed.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl IngestError {
    /// Short label used for metrics and structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Fetch(FetchError::Transport(_)) | Self::Fetch(FetchError::Timeout(_)) => {
                "transport"
            }
            Self::Fetch(FetchError::NotFound(_)) => "not_found",
            Self::Fetch(FetchError::Malformed(_)) | Self::MalformedBlock(_) => "malformed",
            Self::Fetch(FetchError::Cancelled) => "cancelled",
            Self::Publish(PublishError::Overloaded) => "overloaded",
            Self::Publish(_) => "publish",
        }
    }
}
