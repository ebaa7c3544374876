//! Source chain (Ethereum) access: event queries, proofs, token metadata

pub mod events;

use alloy::sol;
use alloy::sol_types::SolCall;
use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::incentivizer::TokenMetadataSource;
use crate::proof::{LogEntry, ProofEnvelope, ProofGenerator};
use crate::rpc::{quantity, to_quantity, JsonRpc};
use crate::types::{BridgeAssetKind, TokenMetadata};

sol! {
    interface IERC20Metadata {
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }
}

/// Log returned by an event query
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceEvent {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(deserialize_with = "quantity::deserialize")]
    pub block_number: u64,
    pub block_hash: B256,
    pub transaction_hash: B256,
    #[serde(deserialize_with = "quantity::deserialize")]
    pub transaction_index: u64,
    /// Block-wide log index
    #[serde(deserialize_with = "quantity::deserialize")]
    pub log_index: u64,
    #[serde(default)]
    pub removed: bool,
}

impl SourceEvent {
    pub fn log_entry(&self) -> LogEntry {
        LogEntry {
            address: self.address,
            topics: self.topics.clone(),
            data: self.data.clone(),
        }
    }
}

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Events emitted by `address` with `topic0` in the inclusive block range
    async fn events(
        &self,
        address: Address,
        topic0: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<SourceEvent>>;

    async fn proof_for_event(
        &self,
        kind: BridgeAssetKind,
        event: &SourceEvent,
    ) -> Result<ProofEnvelope>;
}

/// Ethereum JSON-RPC backed source
pub struct EthSource {
    rpc: Arc<dyn JsonRpc>,
    proofs: ProofGenerator,
}

impl EthSource {
    pub fn new(rpc: Arc<dyn JsonRpc>, proofs: ProofGenerator) -> Self {
        Self { rpc, proofs }
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Bytes> {
        let value = self
            .rpc
            .request(
                "eth_call",
                json!([{ "to": to, "data": Bytes::from(data) }, "latest"]),
            )
            .await?;
        serde_json::from_value(value).wrap_err("eth_call returned a non-hex result")
    }
}

#[async_trait]
impl EventSource for EthSource {
    async fn events(
        &self,
        address: Address,
        topic0: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<SourceEvent>> {
        let filter = json!([{
            "address": address,
            "topics": [topic0],
            "fromBlock": to_quantity(from_block),
            "toBlock": to_quantity(to_block),
        }]);
        let value = self.rpc.request("eth_getLogs", filter).await?;
        let mut events: Vec<SourceEvent> =
            serde_json::from_value(value).wrap_err("Failed to parse eth_getLogs response")?;

        events.retain(|e| !e.removed);
        events.sort_by_key(|e| (e.block_number, e.log_index));
        debug!(
            address = %address,
            from_block,
            to_block,
            count = events.len(),
            "Queried source events"
        );
        Ok(events)
    }

    async fn proof_for_event(
        &self,
        kind: BridgeAssetKind,
        event: &SourceEvent,
    ) -> Result<ProofEnvelope> {
        self.proofs.proof_for_event(kind, event).await
    }
}

#[async_trait]
impl TokenMetadataSource for EthSource {
    async fn token_metadata(&self, token: &str) -> Result<TokenMetadata> {
        let address: Address = token
            .parse()
            .map_err(|e| eyre!("Invalid ERC-20 address {}: {}", token, e))?;

        let symbol = self
            .call(address, IERC20Metadata::symbolCall {}.abi_encode())
            .await?;
        let symbol = IERC20Metadata::symbolCall::abi_decode_returns(&symbol, true)
            .wrap_err_with(|| format!("Failed to decode symbol() of {}", token))?
            ._0;

        let decimals = self
            .call(address, IERC20Metadata::decimalsCall {}.abi_encode())
            .await?;
        let decimals = IERC20Metadata::decimalsCall::abi_decode_returns(&decimals, true)
            .wrap_err_with(|| format!("Failed to decode decimals() of {}", token))?
            ._0;

        Ok(TokenMetadata { symbol, decimals })
    }
}
