//! Source-chain block as needed for proof construction

use alloy::consensus::Header;
use alloy_primitives::{Bytes, B256};
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use serde_json::Value;

/// Block header fields plus the ordered transaction hashes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBlock {
    pub number: u64,
    pub hash: B256,
    pub receipts_root: B256,
    pub transactions: Vec<B256>,
    /// RLP-encoded header, embedded in the proof envelope
    pub header_rlp: Bytes,
}

#[derive(Deserialize)]
struct BlockExtras {
    hash: B256,
    #[serde(default)]
    transactions: Vec<B256>,
}

impl SourceBlock {
    /// Build from an `eth_getBlockBy*` response fetched without full transactions
    pub fn from_rpc(value: Value) -> Result<Self> {
        if value.is_null() {
            return Err(eyre!("Block not found"));
        }
        let extras: BlockExtras = serde_json::from_value(value.clone())
            .wrap_err("Failed to parse block hash and transactions")?;
        let header: Header =
            serde_json::from_value(value).wrap_err("Failed to parse block header")?;

        let header_rlp = Bytes::from(alloy_rlp::encode(&header));
        let computed_hash = alloy_primitives::keccak256(&header_rlp);
        if computed_hash != extras.hash {
            return Err(eyre!(
                "Header of block {} re-encodes to hash {} but provider reported {}",
                header.number,
                computed_hash,
                extras.hash
            ));
        }

        Ok(Self {
            number: header.number,
            hash: extras.hash,
            receipts_root: header.receipts_root,
            transactions: extras.transactions,
            header_rlp,
        })
    }
}
