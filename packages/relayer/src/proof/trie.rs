//! Receipt trie of a block
//!
//! Leaves are keyed by `rlp(transaction_index)` and hold the canonical
//! receipt encoding. The root must match the header's `receiptsRoot` before
//! any proof is taken from the trie.

use alloy_primitives::{Bytes, B256};
use alloy_trie::proof::ProofRetainer;
use alloy_trie::{HashBuilder, Nibbles, EMPTY_ROOT_HASH};

use super::block::SourceBlock;
use super::receipts::{trie_key, Receipt};
use super::ProofError;

/// Receipt trie built from a block's receipts
#[derive(Debug, Clone)]
pub struct ReceiptTrie {
    block_number: u64,
    root: B256,
    /// (key path, leaf value) sorted by path
    leaves: Vec<(Nibbles, Vec<u8>)>,
}

impl ReceiptTrie {
    /// Build the trie and compute its root
    pub fn build(block_number: u64, receipts: &[Receipt]) -> Result<Self, ProofError> {
        let mut indexed: Vec<(u64, Nibbles, Vec<u8>)> = receipts
            .iter()
            .map(|r| {
                (
                    r.transaction_index,
                    Nibbles::unpack(trie_key(r.transaction_index)),
                    r.rlp_encoded(),
                )
            })
            .collect();
        indexed.sort_by(|a, b| a.1.cmp(&b.1));

        if let Some(pair) = indexed.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(ProofError::DuplicateReceipt {
                block_number,
                transaction_index: pair[0].0,
            });
        }

        let leaves: Vec<(Nibbles, Vec<u8>)> = indexed
            .into_iter()
            .map(|(_, key, value)| (key, value))
            .collect();

        let root = if leaves.is_empty() {
            EMPTY_ROOT_HASH
        } else {
            let mut builder = HashBuilder::default();
            for (key, value) in &leaves {
                builder.add_leaf(key.clone(), value);
            }
            builder.root()
        };

        Ok(Self {
            block_number,
            root,
            leaves,
        })
    }

    /// Build the trie and check its root against the block header
    pub fn build_and_verify(block: &SourceBlock, receipts: &[Receipt]) -> Result<Self, ProofError> {
        let trie = Self::build(block.number, receipts)?;
        if trie.root != block.receipts_root {
            return Err(ProofError::InvalidReceiptsRoot {
                block_number: block.number,
                computed: trie.root,
                expected: block.receipts_root,
            });
        }
        Ok(trie)
    }

    pub fn root(&self) -> B256 {
        self.root
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Value stored at a transaction index
    #[cfg(test)]
    pub(crate) fn leaf(&self, transaction_index: u64) -> Option<&[u8]> {
        let key = Nibbles::unpack(trie_key(transaction_index));
        self.leaves
            .binary_search_by(|(k, _)| k.cmp(&key))
            .ok()
            .map(|i| self.leaves[i].1.as_slice())
    }

    /// Proof nodes from the root down to the leaf of `transaction_index`,
    /// each node in its RLP encoding
    pub fn extract_proof(&self, transaction_index: u64) -> Result<Vec<Bytes>, ProofError> {
        let target = Nibbles::unpack(trie_key(transaction_index));
        if self.leaves.binary_search_by(|(k, _)| k.cmp(&target)).is_err() {
            return Err(ProofError::MissingReceipt {
                block_number: self.block_number,
                transaction_index,
            });
        }

        let mut builder =
            HashBuilder::default().with_proof_retainer(ProofRetainer::new(vec![target.clone()]));
        for (key, value) in &self.leaves {
            builder.add_leaf(key.clone(), value);
        }
        let _ = builder.root();

        let nodes = builder
            .take_proof_nodes()
            .matching_nodes_sorted(&target)
            .into_iter()
            .map(|(_, node)| node)
            .collect();
        Ok(nodes)
    }
}
