//! Inclusion proofs for source-chain events
//!
//! A proof is only produced after the block's receipts rebuild to the exact
//! `receiptsRoot` of its header. Receipts may come from the cache, but a
//! cached set that fails verification is discarded and fetched again.

pub mod block;
pub mod cache;
pub mod envelope;
pub mod receipts;
pub mod trie;

use alloy_primitives::B256;
use eyre::{eyre, Result, WrapErr};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::rpc::JsonRpc;
use crate::source::SourceEvent;
use crate::types::BridgeAssetKind;

pub use block::SourceBlock;
pub use cache::{FileReceiptCache, ReceiptCache};
pub use envelope::{CodecError, ProofEnvelope};
pub use receipts::{LogEntry, Receipt, RetrievalMode};
pub use trie::ReceiptTrie;

/// Integrity failures while building a proof.
///
/// These are never retried for the affected event.
#[derive(Debug, Clone, Error)]
pub enum ProofError {
    #[error("receipts of block {block_number} rebuild to root {computed}, header has {expected}")]
    InvalidReceiptsRoot {
        block_number: u64,
        computed: B256,
        expected: B256,
    },
    #[error("block {block_number} has two receipts at transaction index {transaction_index}")]
    DuplicateReceipt {
        block_number: u64,
        transaction_index: u64,
    },
    #[error("block {block_number} has no receipt at transaction index {transaction_index}")]
    MissingReceipt {
        block_number: u64,
        transaction_index: u64,
    },
    #[error("log {log_index} is not part of the receipt of transaction {transaction_hash}")]
    LogNotInReceipt {
        transaction_hash: B256,
        log_index: u64,
    },
}

/// Builds [`ProofEnvelope`]s from a source-chain JSON-RPC endpoint
pub struct ProofGenerator {
    rpc: Arc<dyn JsonRpc>,
    retrieval: RetrievalMode,
    cache: Option<Arc<dyn ReceiptCache>>,
    dump_dir: Option<PathBuf>,
}

impl ProofGenerator {
    pub fn new(rpc: Arc<dyn JsonRpc>, retrieval: RetrievalMode) -> Self {
        Self {
            rpc,
            retrieval,
            cache: None,
            dump_dir: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ReceiptCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Also write every generated proof to `dir` as JSON and borsh files
    pub fn with_dump_dir(mut self, dir: PathBuf) -> Self {
        self.dump_dir = Some(dir);
        self
    }

    pub async fn block_by_hash(&self, block_hash: B256) -> Result<SourceBlock> {
        let value = self
            .rpc
            .request("eth_getBlockByHash", json!([block_hash, false]))
            .await?;
        SourceBlock::from_rpc(value).wrap_err_with(|| format!("Failed to load block {}", block_hash))
    }

    /// Receipts of `block`, checked against its receipts root
    pub async fn verified_receipts(
        &self,
        block: &SourceBlock,
    ) -> Result<(Vec<Receipt>, ReceiptTrie)> {
        if let Some(cache) = &self.cache {
            if let Some(receipts) = cache.get(block.hash).await {
                match ReceiptTrie::build_and_verify(block, &receipts) {
                    Ok(trie) => return Ok((receipts, trie)),
                    Err(e) => {
                        warn!(
                            block_number = block.number,
                            error = %e,
                            "Cached receipts failed verification, refetching"
                        );
                        cache.evict(block.hash).await;
                    }
                }
            }
        }

        let started = Instant::now();
        let receipts =
            receipts::fetch_block_receipts(self.rpc.as_ref(), block, self.retrieval).await?;
        debug!(
            block_number = block.number,
            count = receipts.len(),
            mode = ?self.retrieval,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched block receipts"
        );

        let trie = ReceiptTrie::build_and_verify(block, &receipts)?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(block.hash, &receipts).await {
                warn!(block_number = block.number, error = %e, "Failed to cache block receipts");
            }
        }
        Ok((receipts, trie))
    }

    /// Build the inclusion proof of one event
    pub async fn proof_for_event(
        &self,
        kind: BridgeAssetKind,
        event: &SourceEvent,
    ) -> Result<ProofEnvelope> {
        let block = self.block_by_hash(event.block_hash).await?;
        if block.number != event.block_number {
            return Err(eyre!(
                "Event {} claims block {} but block {} has number {}",
                event.transaction_hash,
                event.block_number,
                event.block_hash,
                block.number
            ));
        }

        let (receipts, trie) = self.verified_receipts(&block).await?;
        let envelope = build_envelope(&block, &receipts, &trie, event)?;

        metrics::record_proof_generated(kind);
        info!(
            kind = %kind,
            block_number = block.number,
            tx_hash = ?event.transaction_hash,
            receipt_index = envelope.receipt_index,
            log_index = envelope.log_index,
            "Built event proof"
        );

        if let Some(dir) = &self.dump_dir {
            if let Err(e) = dump_proof(dir, kind, event, &envelope).await {
                warn!(error = %e, "Failed to write proof dump");
            }
        }
        Ok(envelope)
    }
}

/// Assemble the envelope of `event` from an already verified trie
pub fn build_envelope(
    block: &SourceBlock,
    receipts: &[Receipt],
    trie: &ReceiptTrie,
    event: &SourceEvent,
) -> Result<ProofEnvelope, ProofError> {
    let receipt = receipts
        .iter()
        .find(|r| r.transaction_index == event.transaction_index)
        .ok_or(ProofError::MissingReceipt {
            block_number: block.number,
            transaction_index: event.transaction_index,
        })?;

    // Block-wide log index minus the logs of earlier receipts
    let preceding: u64 = receipts
        .iter()
        .filter(|r| r.transaction_index < event.transaction_index)
        .map(|r| r.logs.len() as u64)
        .sum();
    let log_not_found = ProofError::LogNotInReceipt {
        transaction_hash: event.transaction_hash,
        log_index: event.log_index,
    };
    let position = event
        .log_index
        .checked_sub(preceding)
        .ok_or_else(|| log_not_found.clone())?;
    let log = receipt
        .logs
        .get(position as usize)
        .filter(|log| **log == event.log_entry())
        .ok_or(log_not_found)?;

    Ok(ProofEnvelope {
        log_index: position,
        log_entry_data: log.rlp_encoded(),
        receipt_index: receipt.transaction_index,
        receipt_data: receipt.rlp_encoded(),
        header_data: block.header_rlp.to_vec(),
        proof: trie
            .extract_proof(receipt.transaction_index)?
            .into_iter()
            .map(|node| node.to_vec())
            .collect(),
    })
}

async fn dump_proof(
    dir: &std::path::Path,
    kind: BridgeAssetKind,
    event: &SourceEvent,
    envelope: &ProofEnvelope,
) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let stem = format!(
        "{}_{}_{}_{:?}",
        kind.proof_file_prefix(),
        envelope.receipt_index,
        envelope.log_index,
        event.transaction_hash
    );
    tokio::fs::write(
        dir.join(format!("{}.json", stem)),
        serde_json::to_vec(envelope)?,
    )
    .await?;
    tokio::fs::write(dir.join(format!("{}.borsh", stem)), envelope.encode()?).await?;
    Ok(())
}
