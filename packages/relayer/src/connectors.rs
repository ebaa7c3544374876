//! Destination connectors on NEAR, one per bridge asset kind

use async_trait::async_trait;
use eyre::{eyre, Result};
use std::collections::HashMap;
use std::sync::Arc;

use crate::near::{NearClient, DEFAULT_GAS};
use crate::types::{BridgeAssetKind, ProofCheck};

/// Deposit attached to proof submissions to cover storage (0.06 NEAR)
pub const SUBMIT_DEPOSIT: u128 = 100_000_000_000_000_000_000 * 600;

/// Answer of the destination's proof-usage view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofUsage {
    Used,
    Unused,
    /// The connector cannot tell; the proof is always submitted
    Unsupported,
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn kind(&self) -> BridgeAssetKind;

    fn account_id(&self) -> &str;

    async fn is_used_proof(&self, proof: &[u8]) -> Result<ProofUsage>;

    /// Submit a borsh-encoded proof envelope; returns the transaction hash
    async fn submit(&self, proof: &[u8]) -> Result<String>;
}

pub struct NearConnector {
    kind: BridgeAssetKind,
    account_id: String,
    near: Arc<NearClient>,
}

impl NearConnector {
    pub fn new(kind: BridgeAssetKind, account_id: &str, near: Arc<NearClient>) -> Self {
        Self {
            kind,
            account_id: account_id.to_string(),
            near,
        }
    }
}

fn parse_proof_usage(check: ProofCheck, raw: &[u8]) -> Result<ProofUsage> {
    let used = match check {
        ProofCheck::Unsupported => return Ok(ProofUsage::Unsupported),
        ProofCheck::BorshByte => match raw {
            [0] => false,
            [1] => true,
            other => return Err(eyre!("is_used_proof returned {:?}, expected one byte", other)),
        },
        ProofCheck::JsonBool => serde_json::from_slice::<bool>(raw)
            .map_err(|e| eyre!("is_used_proof returned non-boolean JSON: {}", e))?,
    };
    Ok(if used {
        ProofUsage::Used
    } else {
        ProofUsage::Unused
    })
}

#[async_trait]
impl Connector for NearConnector {
    fn kind(&self) -> BridgeAssetKind {
        self.kind
    }

    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn is_used_proof(&self, proof: &[u8]) -> Result<ProofUsage> {
        let check = self.kind.proof_check();
        if check == ProofCheck::Unsupported {
            return Ok(ProofUsage::Unsupported);
        }
        let raw = self
            .near
            .view_function(&self.account_id, "is_used_proof", proof)
            .await?;
        parse_proof_usage(check, &raw)
    }

    async fn submit(&self, proof: &[u8]) -> Result<String> {
        self.near
            .function_call(
                &self.account_id,
                self.kind.submit_method(),
                proof.to_vec(),
                DEFAULT_GAS,
                SUBMIT_DEPOSIT,
            )
            .await
    }
}

/// Connectors by bridge asset kind
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<BridgeAssetKind, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) -> Result<()> {
        let kind = connector.kind();
        if self.connectors.contains_key(&kind) {
            return Err(eyre!("Connector for {} registered twice", kind));
        }
        self.connectors.insert(kind, connector);
        Ok(())
    }

    pub fn get(&self, kind: BridgeAssetKind) -> Result<Arc<dyn Connector>> {
        self.connectors
            .get(&kind)
            .cloned()
            .ok_or_else(|| eyre!("No connector configured for {}", kind))
    }

    pub fn kinds(&self) -> Vec<BridgeAssetKind> {
        BridgeAssetKind::ALL
            .into_iter()
            .filter(|kind| self.connectors.contains_key(kind))
            .collect()
    }
}
