//! NEAR JSON-RPC client: view calls, account state and signed function calls

pub mod signer;
pub mod tokens;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use eyre::{eyre, Result, WrapErr};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::orchestrator::DestinationChain;
use crate::rpc::JsonRpc;

pub use signer::{Action, FunctionCallAction, NearSigner, Transaction};
pub use tokens::NearFungibleTokens;

/// Gas attached to every relay and reward call (300 Tgas)
pub const DEFAULT_GAS: u64 = 300_000_000_000_000;

#[derive(Debug, Deserialize)]
struct CallFunctionResult {
    #[serde(default)]
    result: Option<Vec<u8>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountView {
    amount: String,
}

#[derive(Debug, Deserialize)]
struct AccessKeyView {
    nonce: u64,
    block_hash: String,
}

#[derive(Debug, Deserialize)]
struct TransactionView {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct FinalExecutionOutcome {
    status: Value,
    transaction: TransactionView,
}

pub struct NearClient {
    rpc: Arc<dyn JsonRpc>,
    signer: Option<NearSigner>,
    /// Serializes nonce allocation for the signing key
    nonce_lock: Mutex<()>,
}

impl NearClient {
    pub fn new(rpc: Arc<dyn JsonRpc>, signer: Option<NearSigner>) -> Self {
        Self {
            rpc,
            signer,
            nonce_lock: Mutex::new(()),
        }
    }

    pub fn account_id(&self) -> Option<&str> {
        self.signer.as_ref().map(NearSigner::account_id)
    }

    async fn query(&self, params: Value) -> Result<Value> {
        self.rpc.request("query", params).await
    }

    /// Call a view method and return its raw result bytes
    pub async fn view_function(&self, contract: &str, method: &str, args: &[u8]) -> Result<Vec<u8>> {
        let value = self
            .query(json!({
                "request_type": "call_function",
                "finality": "final",
                "account_id": contract,
                "method_name": method,
                "args_base64": BASE64.encode(args),
            }))
            .await
            .wrap_err_with(|| format!("View call {}.{} failed", contract, method))?;

        let result: CallFunctionResult = serde_json::from_value(value)
            .wrap_err_with(|| format!("Unexpected response to {}.{}", contract, method))?;
        if let Some(error) = result.error {
            return Err(eyre!("View call {}.{} failed: {}", contract, method, error));
        }
        result
            .result
            .ok_or_else(|| eyre!("View call {}.{} returned no result", contract, method))
    }

    /// Call a view method with JSON arguments and parse its JSON result
    pub async fn view_json<T: DeserializeOwned>(
        &self,
        contract: &str,
        method: &str,
        args: &Value,
    ) -> Result<T> {
        let args = serde_json::to_vec(args)?;
        let bytes = self.view_function(contract, method, &args).await?;
        serde_json::from_slice(&bytes)
            .wrap_err_with(|| format!("Failed to parse result of {}.{}", contract, method))
    }

    /// Liquid balance of an account in yoctoNEAR
    pub async fn account_balance(&self, account_id: &str) -> Result<u128> {
        let value = self
            .query(json!({
                "request_type": "view_account",
                "finality": "final",
                "account_id": account_id,
            }))
            .await?;
        let account: AccountView = serde_json::from_value(value)?;
        account
            .amount
            .parse()
            .map_err(|e| eyre!("Invalid balance {:?}: {}", account.amount, e))
    }

    /// Sign, send and wait for a single function call; returns the tx hash
    pub async fn function_call(
        &self,
        contract: &str,
        method: &str,
        args: Vec<u8>,
        gas: u64,
        deposit: u128,
    ) -> Result<String> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| eyre!("No signing key configured for NEAR calls"))?;
        let public_key = signer.public_key();

        let _guard = self.nonce_lock.lock().await;
        let value = self
            .query(json!({
                "request_type": "view_access_key",
                "finality": "final",
                "account_id": signer.account_id(),
                "public_key": public_key.to_string(),
            }))
            .await
            .wrap_err("Failed to read access key")?;
        let access_key: AccessKeyView = serde_json::from_value(value)?;

        let block_hash: [u8; 32] = bs58::decode(&access_key.block_hash)
            .into_vec()
            .map_err(|e| eyre!("Invalid block hash {}: {}", access_key.block_hash, e))?
            .try_into()
            .map_err(|_| eyre!("Block hash {} has wrong length", access_key.block_hash))?;

        let transaction = Transaction {
            signer_id: signer.account_id().to_string(),
            public_key,
            nonce: access_key.nonce + 1,
            receiver_id: contract.to_string(),
            block_hash,
            actions: vec![Action::FunctionCall(FunctionCallAction {
                method_name: method.to_string(),
                args,
                gas,
                deposit,
            })],
        };
        let (signed, hash) = signer.sign(transaction)?;
        let encoded = borsh::BorshSerialize::try_to_vec(&signed)
            .wrap_err("Failed to serialize signed transaction")?;

        debug!(
            contract,
            method,
            tx_hash = %bs58::encode(hash).into_string(),
            "Broadcasting NEAR transaction"
        );
        let value = self
            .rpc
            .request("broadcast_tx_commit", json!([BASE64.encode(encoded)]))
            .await
            .wrap_err_with(|| format!("Failed to broadcast {}.{}", contract, method))?;

        let outcome: FinalExecutionOutcome = serde_json::from_value(value)?;
        if let Some(failure) = outcome.status.get("Failure") {
            return Err(eyre!(
                "Transaction {} calling {}.{} failed: {}",
                outcome.transaction.hash,
                contract,
                method,
                failure
            ));
        }
        info!(contract, method, tx_hash = %outcome.transaction.hash, "NEAR transaction executed");
        Ok(outcome.transaction.hash)
    }
}

/// Ethereum light client deployed on NEAR, plus the relayer's own account
pub struct NearDestination {
    near: Arc<NearClient>,
    client_account: String,
}

impl NearDestination {
    pub fn new(near: Arc<NearClient>, client_account: &str) -> Self {
        Self {
            near,
            client_account: client_account.to_string(),
        }
    }
}

#[async_trait]
impl DestinationChain for NearDestination {
    async fn last_block_number(&self) -> Result<u64> {
        let bytes = self
            .near
            .view_function(&self.client_account, "last_block_number", &[])
            .await?;
        let raw: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| eyre!("last_block_number returned {} bytes", bytes.len()))?;
        Ok(u64::from_le_bytes(raw))
    }

    async fn relayer_balance(&self) -> Result<Option<u128>> {
        match self.near.account_id() {
            Some(account) => Ok(Some(self.near.account_balance(account).await?)),
            None => Ok(None),
        }
    }
}
