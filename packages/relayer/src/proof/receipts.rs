//! Receipt normalization and canonical encoding
//!
//! Receipts can be fetched three ways (per transaction, batched, or with a
//! single bulk call). Each provider renders quantities differently, so every
//! strategy goes through [`RpcReceipt`] and ends up as the same [`Receipt`].

use alloy_primitives::{Address, Bloom, Bytes, B256};
use alloy_rlp::{BufMut, Encodable, Header};
use eyre::{eyre, Result, WrapErr};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::block::SourceBlock;
use crate::rpc::{quantity, to_quantity, JsonRpc};

/// A log entry in its consensus form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

impl LogEntry {
    fn payload_length(&self) -> usize {
        self.address.length() + self.topics.length() + self.data.length()
    }

    /// RLP encoding as committed in the receipt
    pub fn rlp_encoded(&self) -> Vec<u8> {
        alloy_rlp::encode(self)
    }
}

impl Encodable for LogEntry {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.address.encode(out);
        self.topics.encode(out);
        self.data.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

/// Normalized transaction receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub transaction_index: u64,
    pub logs: Vec<LogEntry>,
    pub logs_bloom: Bloom,
    pub cumulative_gas_used: u64,
    pub status: u8,
    #[serde(rename = "type")]
    pub tx_type: u8,
}

impl Receipt {
    fn payload_length(&self) -> usize {
        self.status.length()
            + self.cumulative_gas_used.length()
            + self.logs_bloom.length()
            + self.logs.length()
    }

    /// Canonical receipt encoding used as the trie leaf value.
    ///
    /// Typed receipts (EIP-2718) are the type byte followed by the RLP list.
    pub fn rlp_encoded(&self) -> Vec<u8> {
        let payload_length = self.payload_length();
        let mut out = Vec::with_capacity(1 + payload_length + 9);
        if self.tx_type != 0 {
            out.push(self.tx_type);
        }
        Header {
            list: true,
            payload_length,
        }
        .encode(&mut out);
        self.status.encode(&mut out);
        self.cumulative_gas_used.encode(&mut out);
        self.logs_bloom.encode(&mut out);
        self.logs.encode(&mut out);
        out
    }
}

/// Trie key of a receipt: RLP of its transaction index
pub fn trie_key(transaction_index: u64) -> Vec<u8> {
    alloy_rlp::encode(transaction_index)
}

/// Receipt as returned by a JSON-RPC provider
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: B256,
    #[serde(deserialize_with = "quantity::deserialize")]
    pub block_number: u64,
    #[serde(deserialize_with = "quantity::deserialize")]
    pub transaction_index: u64,
    pub logs: Vec<RpcLog>,
    pub logs_bloom: Bloom,
    #[serde(deserialize_with = "quantity::deserialize")]
    pub cumulative_gas_used: u64,
    #[serde(default, deserialize_with = "quantity::option::deserialize")]
    pub status: Option<u64>,
    #[serde(default, rename = "type", deserialize_with = "quantity::option::deserialize")]
    pub tx_type: Option<u64>,
}

/// Log as returned inside an RPC receipt; block metadata fields are ignored
#[derive(Debug, Clone, Deserialize)]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

impl TryFrom<RpcReceipt> for Receipt {
    type Error = eyre::Report;

    fn try_from(raw: RpcReceipt) -> Result<Self> {
        let status = match raw.status {
            Some(0) => 0,
            Some(1) => 1,
            Some(other) => {
                return Err(eyre!(
                    "Receipt {} has invalid status {}",
                    raw.transaction_hash,
                    other
                ))
            }
            None => {
                return Err(eyre!(
                    "Receipt {} has no status field (pre-Byzantium receipts are not supported)",
                    raw.transaction_hash
                ))
            }
        };
        let tx_type = u8::try_from(raw.tx_type.unwrap_or(0))
            .wrap_err_with(|| format!("Receipt {} has invalid type", raw.transaction_hash))?;

        Ok(Receipt {
            transaction_hash: raw.transaction_hash,
            block_number: raw.block_number,
            transaction_index: raw.transaction_index,
            logs: raw
                .logs
                .into_iter()
                .map(|log| LogEntry {
                    address: log.address,
                    topics: log.topics,
                    data: log.data,
                })
                .collect(),
            logs_bloom: raw.logs_bloom,
            cumulative_gas_used: raw.cumulative_gas_used,
            status,
            tx_type,
        })
    }
}

/// Parse and normalize one receipt JSON value
pub fn normalize_receipt(value: Value) -> Result<Receipt> {
    if value.is_null() {
        return Err(eyre!("Receipt is not available yet"));
    }
    let raw: RpcReceipt =
        serde_json::from_value(value).wrap_err("Failed to parse transaction receipt")?;
    Receipt::try_from(raw)
}

/// Normalize the receipts of a whole block, ordered by transaction index
pub fn normalize_block_receipts(block: &SourceBlock, values: Vec<Value>) -> Result<Vec<Receipt>> {
    let mut receipts = values
        .into_iter()
        .map(normalize_receipt)
        .collect::<Result<Vec<_>>>()?;
    receipts.sort_by_key(|r| r.transaction_index);

    if receipts.len() != block.transactions.len() {
        return Err(eyre!(
            "Block {} has {} transactions but {} receipts were returned",
            block.number,
            block.transactions.len(),
            receipts.len()
        ));
    }
    Ok(receipts)
}

/// How the receipts of a block are retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalMode {
    /// One `eth_getTransactionReceipt` per transaction, issued concurrently
    #[default]
    Sequential,
    /// All `eth_getTransactionReceipt` calls in one JSON-RPC batch
    Batch,
    /// A single bulk call returning every receipt of the block
    #[serde(alias = "parity")]
    BlockReceipts,
}

/// Fetch and normalize all receipts of `block`
pub async fn fetch_block_receipts(
    rpc: &dyn JsonRpc,
    block: &SourceBlock,
    mode: RetrievalMode,
) -> Result<Vec<Receipt>> {
    let values = match mode {
        RetrievalMode::Sequential => {
            try_join_all(
                block
                    .transactions
                    .iter()
                    .map(|tx| rpc.request("eth_getTransactionReceipt", json!([tx]))),
            )
            .await?
        }
        RetrievalMode::Batch => {
            let calls = block
                .transactions
                .iter()
                .map(|tx| ("eth_getTransactionReceipt".to_string(), json!([tx])))
                .collect();
            rpc.batch_request(calls).await?
        }
        RetrievalMode::BlockReceipts => {
            let value = rpc
                .request("eth_getBlockReceipts", json!([to_quantity(block.number)]))
                .await?;
            match value {
                Value::Array(values) => values,
                other => {
                    return Err(eyre!(
                        "Bulk receipts call for block {} returned {}",
                        block.number,
                        other
                    ))
                }
            }
        }
    };

    normalize_block_receipts(block, values)
        .wrap_err_with(|| format!("Failed to normalize receipts of block {}", block.number))
}
