//! NEAR transaction signing
//!
//! Transactions are borsh-serialized, hashed with SHA-256 and signed with the
//! relayer's ed25519 key.

use borsh::BorshSerialize;
use ed25519_dalek::{Signer, SigningKey};
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize)]
pub enum PublicKey {
    Ed25519([u8; 32]),
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicKey::Ed25519(bytes) => write!(f, "ed25519:{}", bs58::encode(bytes).into_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize)]
pub enum Signature {
    Ed25519([u8; 64]),
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize)]
pub struct FunctionCallAction {
    pub method_name: String,
    pub args: Vec<u8>,
    pub gas: u64,
    pub deposit: u128,
}

/// Transaction actions; only function calls are ever built, the leading
/// variants keep the wire discriminants aligned
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize)]
pub enum Action {
    CreateAccount,
    DeployContract { code: Vec<u8> },
    FunctionCall(FunctionCallAction),
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize)]
pub struct Transaction {
    pub signer_id: String,
    pub public_key: PublicKey,
    pub nonce: u64,
    pub receiver_id: String,
    pub block_hash: [u8; 32],
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signature: Signature,
}

#[derive(Deserialize)]
struct KeyFile {
    account_id: String,
    #[serde(alias = "private_key")]
    secret_key: String,
}

/// Relayer account key
pub struct NearSigner {
    account_id: String,
    signing_key: SigningKey,
}

impl fmt::Debug for NearSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NearSigner")
            .field("account_id", &self.account_id)
            .field("public_key", &self.public_key().to_string())
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl NearSigner {
    /// Load a key file in the NEAR CLI credentials format
    pub fn from_key_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read key file {}", path.display()))?;
        let key: KeyFile = serde_json::from_str(&contents)
            .wrap_err_with(|| format!("Invalid key file {}", path.display()))?;
        Self::from_secret_key(&key.account_id, &key.secret_key)
    }

    /// Parse an `ed25519:<base58>` secret key (32-byte seed or 64-byte keypair)
    pub fn from_secret_key(account_id: &str, secret_key: &str) -> Result<Self> {
        let encoded = secret_key
            .strip_prefix("ed25519:")
            .ok_or_else(|| eyre!("Only ed25519 secret keys are supported"))?;
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| eyre!("Secret key is not valid base58: {}", e))?;

        let seed: [u8; 32] = match bytes.len() {
            32 | 64 => bytes[..32]
                .try_into()
                .map_err(|_| eyre!("Secret key has invalid length"))?,
            other => return Err(eyre!("Secret key has invalid length {}", other)),
        };
        let signing_key = SigningKey::from_bytes(&seed);

        if bytes.len() == 64 && bytes[32..] != signing_key.verifying_key().to_bytes() {
            return Err(eyre!("Secret key does not match its embedded public key"));
        }

        Ok(Self {
            account_id: account_id.to_string(),
            signing_key,
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::Ed25519(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign and return the transaction together with its hash
    pub fn sign(&self, transaction: Transaction) -> Result<(SignedTransaction, [u8; 32])> {
        let bytes = transaction
            .try_to_vec()
            .wrap_err("Failed to serialize transaction")?;
        let hash: [u8; 32] = Sha256::digest(&bytes).into();
        let signature = self.signing_key.sign(&hash);

        Ok((
            SignedTransaction {
                transaction,
                signature: Signature::Ed25519(signature.to_bytes()),
            },
            hash,
        ))
    }
}
