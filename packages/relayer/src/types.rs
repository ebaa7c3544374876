//! Common types for the Ethereum → NEAR relay
//!
//! Every bridge asset kind is described by data (policy tables below) rather
//! than by a dedicated relayer type, so the relay algorithm stays shared.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bridge connector whose source-chain events are relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BridgeAssetKind {
    /// ETH locked in the EthCustodian contract
    CustodianLock,
    /// ERC-20 tokens locked in the ERC20Locker
    Erc20Lock,
    /// ERC-721 tokens locked in the NFT locker
    Erc721Lock,
    /// eNEAR burned on Ethereum to unlock native NEAR
    NearNativeLock,
    /// Bridged NEP-141 tokens withdrawn through the token factory
    FungibleFactoryLock,
    /// Fast bridge transfers awaiting unlock on NEAR
    FastBridgeTransfer,
}

impl BridgeAssetKind {
    pub const ALL: [BridgeAssetKind; 6] = [
        BridgeAssetKind::CustodianLock,
        BridgeAssetKind::Erc20Lock,
        BridgeAssetKind::Erc721Lock,
        BridgeAssetKind::NearNativeLock,
        BridgeAssetKind::FungibleFactoryLock,
        BridgeAssetKind::FastBridgeTransfer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeAssetKind::CustodianLock => "custodian-lock",
            BridgeAssetKind::Erc20Lock => "erc20-lock",
            BridgeAssetKind::Erc721Lock => "erc721-lock",
            BridgeAssetKind::NearNativeLock => "near-native-lock",
            BridgeAssetKind::FungibleFactoryLock => "fungible-factory-lock",
            BridgeAssetKind::FastBridgeTransfer => "fast-bridge-transfer",
        }
    }

    /// Label used for the per-kind metrics
    pub fn gauge_prefix(&self) -> &'static str {
        match self {
            BridgeAssetKind::CustodianLock => "eth",
            BridgeAssetKind::Erc20Lock => "erc20",
            BridgeAssetKind::Erc721Lock => "erc721",
            BridgeAssetKind::NearNativeLock => "enear",
            BridgeAssetKind::FungibleFactoryLock => "nep141",
            BridgeAssetKind::FastBridgeTransfer => "fast_bridge",
        }
    }

    /// Prefix of the proof dump files written for this kind
    pub fn proof_file_prefix(&self) -> &'static str {
        match self {
            BridgeAssetKind::CustodianLock => "proofdata_ethCustodian",
            BridgeAssetKind::Erc20Lock => "proofdata_erc20Locker",
            BridgeAssetKind::Erc721Lock => "proofdata_erc721Locker",
            BridgeAssetKind::NearNativeLock => "proofdata_eNear",
            BridgeAssetKind::FungibleFactoryLock => "proofdata_nep141Locker",
            BridgeAssetKind::FastBridgeTransfer => "proofdata_fastBridge",
        }
    }

    pub fn aurora_policy(&self) -> AuroraPolicy {
        match self {
            BridgeAssetKind::CustodianLock | BridgeAssetKind::Erc20Lock => AuroraPolicy::Both,
            BridgeAssetKind::Erc721Lock | BridgeAssetKind::FungibleFactoryLock => {
                AuroraPolicy::NonAuroraOnly
            }
            BridgeAssetKind::NearNativeLock | BridgeAssetKind::FastBridgeTransfer => {
                AuroraPolicy::NeverEligible
            }
        }
    }

    /// How the destination connector answers "was this proof already used".
    ///
    /// The NFT locker and the fast bridge expose no such view, so their
    /// events are always submitted.
    pub fn proof_check(&self) -> ProofCheck {
        match self {
            BridgeAssetKind::CustodianLock => ProofCheck::BorshByte,
            BridgeAssetKind::Erc20Lock
            | BridgeAssetKind::NearNativeLock
            | BridgeAssetKind::FungibleFactoryLock => ProofCheck::JsonBool,
            BridgeAssetKind::Erc721Lock | BridgeAssetKind::FastBridgeTransfer => {
                ProofCheck::Unsupported
            }
        }
    }

    /// Destination contract method receiving the borsh-encoded proof
    pub fn submit_method(&self) -> &'static str {
        match self {
            BridgeAssetKind::CustodianLock | BridgeAssetKind::Erc20Lock => "deposit",
            BridgeAssetKind::NearNativeLock | BridgeAssetKind::Erc721Lock => {
                "finalise_eth_to_near_transfer"
            }
            BridgeAssetKind::FungibleFactoryLock => "withdraw",
            BridgeAssetKind::FastBridgeTransfer => "unlock",
        }
    }
}

impl fmt::Display for BridgeAssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BridgeAssetKind {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BridgeAssetKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| eyre::eyre!("Unknown bridge asset kind: {}", s))
    }
}

/// Which classes of events a kind may relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuroraPolicy {
    /// Both aurora-eligible and plain NEAR transfers are relayed
    Both,
    /// Aurora-eligible events are skipped
    NonAuroraOnly,
    /// Events are never classified as aurora-eligible
    NeverEligible,
}

impl AuroraPolicy {
    /// Whether routing messages are inspected at all
    pub fn classifies(&self) -> bool {
        !matches!(self, AuroraPolicy::NeverEligible)
    }

    /// Whether an event of the given class is relayed under this policy
    pub fn accepts(&self, is_aurora_event: bool, relay_only_aurora_events: bool) -> bool {
        if is_aurora_event && *self == AuroraPolicy::NonAuroraOnly {
            return false;
        }
        is_aurora_event || !relay_only_aurora_events
    }
}

/// Shape of the destination's proof-usage view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofCheck {
    /// View returns a single raw byte (0 or 1)
    BorshByte,
    /// View returns a JSON boolean
    JsonBool,
    /// No usage view exists for this connector
    Unsupported,
}

/// Lock event forwarded to the incentivizer after a successful relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEvent {
    /// Lowercase 0x-prefixed address of the locked token
    pub source_contract_address: String,
    pub sender: String,
    /// Raw integer amount in source-token units
    pub amount: String,
    pub destination_account_id: String,
    pub source_tx_hash: String,
}

/// Token symbol and decimals as reported on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub symbol: String,
    pub decimals: u8,
}
