//! Event ABIs of the Ethereum-side bridge contracts

use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy_primitives::B256;
use eyre::{Result, WrapErr};

use super::SourceEvent;
use crate::types::{BridgeAssetKind, LockEvent};

sol! {
    contract EthCustodian {
        event Deposited(address indexed sender, string recipient, uint256 amount, uint256 fee);
    }

    contract Erc20Locker {
        event Locked(address indexed token, address indexed sender, uint256 amount, string accountId);
    }

    contract ENear {
        event TransferToNearInitiated(address indexed sender, uint256 amount, string accountId);
    }

    contract Erc721Locker {
        event Locked(address indexed token, address indexed sender, string tokenId, string accountId);
    }

    contract BridgeTokenFactory {
        event Withdraw(
            string token,
            address indexed sender,
            uint256 amount,
            string recipient,
            address indexed tokenEthAddress
        );
    }

    contract FastBridge {
        event TransferTokens(
            uint256 indexed nonce,
            address sender,
            address token,
            address recipient,
            uint256 amount,
            string unlock_recipient,
            bytes32 indexed transfer_id
        );
    }
}

/// topic0 of the event relayed for `kind`
pub fn event_signature(kind: BridgeAssetKind) -> B256 {
    match kind {
        BridgeAssetKind::CustodianLock => EthCustodian::Deposited::SIGNATURE_HASH,
        BridgeAssetKind::Erc20Lock => Erc20Locker::Locked::SIGNATURE_HASH,
        BridgeAssetKind::NearNativeLock => ENear::TransferToNearInitiated::SIGNATURE_HASH,
        BridgeAssetKind::Erc721Lock => Erc721Locker::Locked::SIGNATURE_HASH,
        BridgeAssetKind::FungibleFactoryLock => BridgeTokenFactory::Withdraw::SIGNATURE_HASH,
        BridgeAssetKind::FastBridgeTransfer => FastBridge::TransferTokens::SIGNATURE_HASH,
    }
}

/// Fields of a decoded event the relay cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    /// Recipient string inspected for aurora routing
    pub routing_message: String,
    /// Present for the kinds whose deposits can be incentivized
    pub lock: Option<LockEvent>,
}

fn hex_string(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn decode_event(kind: BridgeAssetKind, event: &SourceEvent) -> Result<DecodedEvent> {
    let topics = event.topics.iter().copied();
    let data = event.data.as_ref();
    let tx_hash = hex_string(event.transaction_hash);

    let decoded = match kind {
        BridgeAssetKind::CustodianLock => {
            let ev = EthCustodian::Deposited::decode_raw_log(topics, data, true)
                .wrap_err("Failed to decode Deposited event")?;
            DecodedEvent {
                lock: Some(LockEvent {
                    source_contract_address: hex_string(event.address),
                    sender: hex_string(ev.sender),
                    amount: ev.amount.to_string(),
                    destination_account_id: ev.recipient.clone(),
                    source_tx_hash: tx_hash,
                }),
                routing_message: ev.recipient,
            }
        }
        BridgeAssetKind::Erc20Lock => {
            let ev = Erc20Locker::Locked::decode_raw_log(topics, data, true)
                .wrap_err("Failed to decode ERC-20 Locked event")?;
            DecodedEvent {
                lock: Some(LockEvent {
                    source_contract_address: hex_string(ev.token),
                    sender: hex_string(ev.sender),
                    amount: ev.amount.to_string(),
                    destination_account_id: ev.accountId.clone(),
                    source_tx_hash: tx_hash,
                }),
                routing_message: ev.accountId,
            }
        }
        BridgeAssetKind::NearNativeLock => {
            let ev = ENear::TransferToNearInitiated::decode_raw_log(topics, data, true)
                .wrap_err("Failed to decode TransferToNearInitiated event")?;
            DecodedEvent {
                lock: Some(LockEvent {
                    source_contract_address: hex_string(event.address),
                    sender: hex_string(ev.sender),
                    amount: ev.amount.to_string(),
                    destination_account_id: ev.accountId.clone(),
                    source_tx_hash: tx_hash,
                }),
                routing_message: ev.accountId,
            }
        }
        BridgeAssetKind::Erc721Lock => {
            let ev = Erc721Locker::Locked::decode_raw_log(topics, data, true)
                .wrap_err("Failed to decode ERC-721 Locked event")?;
            DecodedEvent {
                routing_message: ev.accountId,
                lock: None,
            }
        }
        BridgeAssetKind::FungibleFactoryLock => {
            let ev = BridgeTokenFactory::Withdraw::decode_raw_log(topics, data, true)
                .wrap_err("Failed to decode Withdraw event")?;
            DecodedEvent {
                routing_message: ev.recipient,
                lock: None,
            }
        }
        BridgeAssetKind::FastBridgeTransfer => {
            let ev = FastBridge::TransferTokens::decode_raw_log(topics, data, true)
                .wrap_err("Failed to decode TransferTokens event")?;
            DecodedEvent {
                routing_message: ev.unlock_recipient,
                lock: None,
            }
        }
    };
    Ok(decoded)
}

/// Whether a routing message targets the aurora engine.
///
/// Aurora recipients look like `<engine account>:<payload>`.
pub fn is_event_for_aurora(routing_target: &str, message: &str) -> bool {
    let mut parts = message.split(':');
    match (parts.next(), parts.next()) {
        (Some(account), Some(_)) => account == routing_target,
        _ => false,
    }
}
