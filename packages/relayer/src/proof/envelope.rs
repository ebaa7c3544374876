//! Proof envelope submitted to the NEAR connectors
//!
//! Borsh layout, in field order: `log_index` u64 LE, `log_entry_data`,
//! `receipt_index` u64 LE, `receipt_data`, `header_data` (each a u32 LE
//! length followed by bytes), then `proof` as a u32 LE count of
//! length-prefixed nodes.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode proof envelope: {0}")]
    Encode(std::io::Error),
    #[error("failed to decode proof envelope: {0}")]
    Decode(std::io::Error),
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct ProofEnvelope {
    /// Position of the log within its receipt
    pub log_index: u64,
    pub log_entry_data: Vec<u8>,
    /// Transaction index of the receipt within its block
    pub receipt_index: u64,
    pub receipt_data: Vec<u8>,
    pub header_data: Vec<u8>,
    /// Trie nodes from root to leaf
    pub proof: Vec<Vec<u8>>,
}

impl ProofEnvelope {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        self.try_to_vec().map_err(CodecError::Encode)
    }

    /// Decode an envelope; trailing bytes are rejected
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::try_from_slice(bytes).map_err(CodecError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> ProofEnvelope {
        ProofEnvelope {
            log_index: 1,
            log_entry_data: vec![0xaa, 0xbb],
            receipt_index: 258,
            receipt_data: vec![0x01],
            header_data: vec![],
            proof: vec![vec![0xc0], vec![0xde, 0xad]],
        }
    }

    #[test]
    fn test_byte_layout() {
        let bytes = sample().encode().unwrap();
        let expected: Vec<u8> = [
            &1u64.to_le_bytes()[..],
            &2u32.to_le_bytes(),
            &[0xaa, 0xbb],
            &258u64.to_le_bytes(),
            &1u32.to_le_bytes(),
            &[0x01],
            &0u32.to_le_bytes(),
            &2u32.to_le_bytes(),
            &1u32.to_le_bytes(),
            &[0xc0],
            &2u32.to_le_bytes(),
            &[0xde, 0xad],
        ]
        .concat();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = sample().encode().unwrap();
        bytes.push(0);
        assert!(matches!(
            ProofEnvelope::decode(&bytes),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_input() {
        let bytes = sample().encode().unwrap();
        assert!(ProofEnvelope::decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(ProofEnvelope::decode(&[]).is_err());
    }

    proptest! {
        #[test]
        fn test_round_trip(
            log_index in any::<u64>(),
            receipt_index in any::<u64>(),
            log_entry_data in prop::collection::vec(any::<u8>(), 0..128),
            receipt_data in prop::collection::vec(any::<u8>(), 0..256),
            header_data in prop::collection::vec(any::<u8>(), 0..64),
            proof in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..8),
        ) {
            let envelope = ProofEnvelope {
                log_index,
                log_entry_data,
                receipt_index,
                receipt_data,
                header_data,
                proof,
            };
            let bytes = envelope.encode().unwrap();
            prop_assert_eq!(ProofEnvelope::decode(&bytes).unwrap(), envelope);
        }
    }
}
