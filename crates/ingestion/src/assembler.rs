//! Canonical block record assembly.

use crate::error::MalformedBlockError;
use crate::normalize::encode_hex;
use crate::types::{BlockRecord, RawBlock, TransactionRecord};

/// Combines block header fields with enriched transactions.
///
/// Pure and synchronous: the same inputs always produce the same record.
pub struct BlockAssembler;

impl BlockAssembler {
    /// Assemble the canonical record for `block`.
    ///
    /// # Arguments
    /// * `block` - The raw block as returned by the node
    /// * `transactions` - Enriched transactions, in on-chain order
    ///
    /// # Returns
    /// The block record, or an error if a header field is missing or the
    /// enrichment does not cover every transaction of the block.
    pub fn assemble(
        block: &RawBlock,
        transactions: Vec<TransactionRecord>,
    ) -> Result<BlockRecord, MalformedBlockError> {
        let number = block.number.ok_or(MalformedBlockError::MissingField("number"))?;
        let hash = block.hash.ok_or(MalformedBlockError::MissingField("hash"))?;
        let parent_hash = block
            .parent_hash
            .ok_or(MalformedBlockError::MissingField("parentHash"))?;
        let timestamp = block
            .timestamp
            .ok_or(MalformedBlockError::MissingField("timestamp"))?;

        if transactions.len() != block.transactions.len() {
            return Err(MalformedBlockError::TransactionCountMismatch {
                expected: block.transactions.len(),
                actual: transactions.len(),
            });
        }

        Ok(BlockRecord {
            number: number.to::<u64>(),
            hash: encode_hex(hash),
            parent_hash: encode_hex(parent_hash),
            timestamp: timestamp.to::<u64>(),
            transactions,
        })
    }
}
