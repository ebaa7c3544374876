//! Fixtures and in-memory collaborators shared by the unit tests

use alloy::consensus::Header;
use alloy::sol_types::SolEvent;
use alloy_primitives::{keccak256, Address, Bloom, Bytes, LogData, B256, U256};
use alloy_rlp::Decodable;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use eyre::{eyre, Result};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::connectors::{Connector, ProofUsage};
use crate::event_relayer::{RelayLedger, RelayRecord};
use crate::incentivizer::{
    IncentivizationLedger, IncentivizationRecord, IncentivizationRule, PriceSource, RewardTokens,
    TokenMetadataSource,
};
use crate::orchestrator::DestinationChain;
use crate::proof::{LogEntry, ProofEnvelope, ProofError, Receipt, ReceiptTrie, SourceBlock};
use crate::rpc::{to_quantity, JsonRpc};
use crate::session::{RelaySession, SessionStore};
use crate::source::events::{Erc20Locker, Erc721Locker, EthCustodian};
use crate::source::{EventSource, SourceEvent};
use crate::types::{BridgeAssetKind, ProofCheck, TokenMetadata};

pub const SAMPLE_BLOCK_NUMBER: u64 = 17_000_000;
const EVENT_BLOCK_NUMBER: u64 = 5;

// ---------------------------------------------------------------------------
// Receipts and blocks
// ---------------------------------------------------------------------------

/// Successful receipt with two logs, deterministic in its arguments
pub fn sample_receipt(index: u64, cumulative_gas_used: u64, tx_type: u8) -> Receipt {
    let logs: Vec<LogEntry> = (0..2u8)
        .map(|i| LogEntry {
            address: Address::repeat_byte(0x40u8.wrapping_add(index as u8)),
            topics: vec![B256::with_last_byte(i), B256::repeat_byte(index as u8)],
            data: Bytes::from(vec![index as u8, i, 0xda]),
        })
        .collect();

    let mut logs_bloom = Bloom::default();
    for log in &logs {
        logs_bloom.accrue_raw_log(log.address, &log.topics);
    }

    Receipt {
        transaction_hash: keccak256(index.to_be_bytes()),
        block_number: SAMPLE_BLOCK_NUMBER,
        transaction_index: index,
        logs,
        logs_bloom,
        cumulative_gas_used,
        status: 1,
        tx_type,
    }
}

/// Block whose header commits to `receipts`
pub fn sample_block(receipts: &[Receipt]) -> SourceBlock {
    let number = receipts
        .first()
        .map(|r| r.block_number)
        .unwrap_or(SAMPLE_BLOCK_NUMBER);
    let root = ReceiptTrie::build(number, receipts).unwrap().root();
    let header = Header {
        number,
        receipts_root: root,
        gas_limit: 30_000_000,
        timestamp: 1_700_000_000,
        base_fee_per_gas: Some(7),
        ..Default::default()
    };
    let header_rlp = Bytes::from(alloy_rlp::encode(&header));

    let mut ordered = receipts.to_vec();
    ordered.sort_by_key(|r| r.transaction_index);
    SourceBlock {
        number,
        hash: keccak256(&header_rlp),
        receipts_root: root,
        transactions: ordered.iter().map(|r| r.transaction_hash).collect(),
        header_rlp,
    }
}

/// `eth_getBlockByHash` response for `block`
fn block_json(block: &SourceBlock) -> Value {
    let header = Header::decode(&mut block.header_rlp.as_ref()).unwrap();
    let mut value = serde_json::to_value(&header).unwrap();
    let obj = value.as_object_mut().unwrap();
    obj.insert("hash".into(), json!(block.hash));
    obj.insert("transactions".into(), json!(block.transactions));
    value
}

fn log_json(receipt: &Receipt, log: &LogEntry, log_index: usize) -> Value {
    json!({
        "address": log.address,
        "topics": log.topics,
        "data": log.data,
        "blockNumber": to_quantity(receipt.block_number),
        "transactionHash": receipt.transaction_hash,
        "logIndex": to_quantity(log_index as u64),
        "removed": false,
    })
}

/// Receipt as rendered by geth: every quantity hex encoded
pub fn receipt_json_hex(receipt: &Receipt) -> Value {
    json!({
        "transactionHash": receipt.transaction_hash,
        "blockHash": B256::repeat_byte(0xbb),
        "blockNumber": to_quantity(receipt.block_number),
        "transactionIndex": to_quantity(receipt.transaction_index),
        "from": Address::repeat_byte(0x01),
        "to": Address::repeat_byte(0x02),
        "gasUsed": "0x5208",
        "cumulativeGasUsed": to_quantity(receipt.cumulative_gas_used),
        "logs": receipt
            .logs
            .iter()
            .enumerate()
            .map(|(i, log)| log_json(receipt, log, i))
            .collect::<Vec<_>>(),
        "logsBloom": receipt.logs_bloom,
        "status": to_quantity(receipt.status as u64),
        "type": to_quantity(receipt.tx_type as u64),
    })
}

/// Receipt as rendered by providers using plain numbers; legacy receipts
/// carry no `type`
pub fn receipt_json_numeric(receipt: &Receipt) -> Value {
    let mut value = json!({
        "transactionHash": receipt.transaction_hash,
        "blockNumber": receipt.block_number,
        "transactionIndex": receipt.transaction_index,
        "cumulativeGasUsed": receipt.cumulative_gas_used.to_string(),
        "logs": receipt
            .logs
            .iter()
            .enumerate()
            .map(|(i, log)| log_json(receipt, log, i))
            .collect::<Vec<_>>(),
        "logsBloom": receipt.logs_bloom,
        "status": receipt.status,
    });
    if receipt.tx_type != 0 {
        value["type"] = json!(receipt.tx_type);
    }
    value
}

/// Log event of the `log_position`-th log of the receipt at `transaction_index`
pub fn source_event_for(
    block: &SourceBlock,
    receipts: &[Receipt],
    transaction_index: u64,
    log_position: usize,
) -> SourceEvent {
    let receipt = receipts
        .iter()
        .find(|r| r.transaction_index == transaction_index)
        .unwrap();
    let preceding: usize = receipts
        .iter()
        .filter(|r| r.transaction_index < transaction_index)
        .map(|r| r.logs.len())
        .sum();
    let log = &receipt.logs[log_position];

    SourceEvent {
        address: log.address,
        topics: log.topics.clone(),
        data: log.data.clone(),
        block_number: block.number,
        block_hash: block.hash,
        transaction_hash: receipt.transaction_hash,
        transaction_index,
        log_index: (preceding + log_position) as u64,
        removed: false,
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

pub fn source_event_from_log(address: Address, log: LogData) -> SourceEvent {
    SourceEvent {
        address,
        topics: log.topics().to_vec(),
        transaction_hash: keccak256(&log.data),
        data: log.data,
        block_number: EVENT_BLOCK_NUMBER,
        block_hash: B256::repeat_byte(0xbb),
        transaction_index: 0,
        log_index: 0,
        removed: false,
    }
}

pub fn erc20_locked_event(
    locker: Address,
    token: Address,
    amount: U256,
    recipient: &str,
) -> SourceEvent {
    let log = Erc20Locker::Locked {
        token,
        sender: Address::repeat_byte(0x5e),
        amount,
        accountId: recipient.to_string(),
    }
    .encode_log_data();
    source_event_from_log(locker, log)
}

pub fn custodian_deposit_event(custodian: Address, amount: U256, recipient: &str) -> SourceEvent {
    let log = EthCustodian::Deposited {
        sender: Address::repeat_byte(0x5e),
        recipient: recipient.to_string(),
        amount,
        fee: U256::ZERO,
    }
    .encode_log_data();
    source_event_from_log(custodian, log)
}

pub fn nft_locked_event(locker: Address, recipient: &str) -> SourceEvent {
    let log = Erc721Locker::Locked {
        token: Address::repeat_byte(0x03),
        sender: Address::repeat_byte(0x5e),
        tokenId: "1".to_string(),
        accountId: recipient.to_string(),
    }
    .encode_log_data();
    source_event_from_log(locker, log)
}

/// SRC -> RWD rule, both with two decimals, factor 0.01 and a cap of 10 RWD
pub fn sample_rule(source_token: &str) -> IncentivizationRule {
    IncentivizationRule {
        rule_id: "rule-1".into(),
        source_token: source_token.into(),
        source_symbol: "SRC".into(),
        source_decimals: 2,
        reward_token: "reward.near".into(),
        reward_symbol: "RWD".into(),
        reward_decimals: 2,
        fiat_symbol: "USDT".into(),
        reward_factor: BigDecimal::from_str("0.01").unwrap(),
        base_amount: BigDecimal::from(0),
        total_cap: BigDecimal::from(10),
    }
}

// ---------------------------------------------------------------------------
// JSON-RPC
// ---------------------------------------------------------------------------

type Handler = dyn Fn(&str, &Value) -> Result<Value> + Send + Sync;

/// JSON-RPC transport answering from a closure; records every method called
pub struct MockRpc {
    handler: Box<Handler>,
    calls: Mutex<Vec<String>>,
}

impl MockRpc {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Serves `eth_getTransactionReceipt` and `eth_getBlockReceipts`
    pub fn with_receipts(receipts: &[Receipt]) -> Self {
        Self::serving(None, receipts)
    }

    /// Like [`MockRpc::with_receipts`], plus `eth_getBlockByHash` for `block`
    pub fn with_block(block: &SourceBlock, receipts: &[Receipt]) -> Self {
        Self::serving(Some(block), receipts)
    }

    fn serving(block: Option<&SourceBlock>, receipts: &[Receipt]) -> Self {
        let block = block.map(|b| (b.hash, block_json(b)));
        let by_hash: HashMap<B256, Value> = receipts
            .iter()
            .map(|r| (r.transaction_hash, receipt_json_hex(r)))
            .collect();
        let bulk: Vec<Value> = receipts.iter().map(receipt_json_numeric).collect();

        Self::new(move |method, params| match method {
            "eth_getTransactionReceipt" => {
                let hash: B256 = serde_json::from_value(params[0].clone())?;
                Ok(by_hash.get(&hash).cloned().unwrap_or(Value::Null))
            }
            "eth_getBlockReceipts" => Ok(Value::Array(bulk.clone())),
            "eth_getBlockByHash" => {
                let hash: B256 = serde_json::from_value(params[0].clone())?;
                Ok(match &block {
                    Some((block_hash, value)) if *block_hash == hash => value.clone(),
                    _ => Value::Null,
                })
            }
            other => Err(eyre!("unexpected method {}", other)),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl JsonRpc for MockRpc {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.calls.lock().unwrap().push(method.to_string());
        (self.handler)(method, &params)
    }

    async fn batch_request(&self, calls: Vec<(String, Value)>) -> Result<Vec<Value>> {
        self.calls.lock().unwrap().push("batch".to_string());
        calls
            .iter()
            .map(|(method, params)| (self.handler)(method, params))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Relay collaborators
// ---------------------------------------------------------------------------

/// Event source returning a fixed list of events and synthetic proofs
pub struct MockEventSource {
    events: Vec<SourceEvent>,
    ranges: Mutex<Vec<(u64, u64)>>,
    fail_io: AtomicBool,
    fail_integrity_once: AtomicBool,
}

impl MockEventSource {
    pub fn new(events: Vec<SourceEvent>) -> Self {
        Self {
            events,
            ranges: Mutex::new(Vec::new()),
            fail_io: AtomicBool::new(false),
            fail_integrity_once: AtomicBool::new(false),
        }
    }

    /// Every proof request fails like an unreachable provider
    pub fn fail_proofs_with_io(&self) {
        self.fail_io.store(true, Ordering::SeqCst);
    }

    /// The next proof request fails the receipts root check
    pub fn fail_first_proof_with_integrity_error(&self) {
        self.fail_integrity_once.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.fail_io.store(false, Ordering::SeqCst);
        self.fail_integrity_once.store(false, Ordering::SeqCst);
    }

    pub fn queried_ranges(&self) -> Vec<(u64, u64)> {
        self.ranges.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for MockEventSource {
    async fn events(
        &self,
        _address: Address,
        _topic0: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<SourceEvent>> {
        self.ranges.lock().unwrap().push((from_block, to_block));
        Ok(self.events.clone())
    }

    async fn proof_for_event(
        &self,
        _kind: BridgeAssetKind,
        event: &SourceEvent,
    ) -> Result<ProofEnvelope> {
        if self.fail_io.load(Ordering::SeqCst) {
            return Err(eyre!("connection reset by peer"));
        }
        if self.fail_integrity_once.swap(false, Ordering::SeqCst) {
            return Err(ProofError::InvalidReceiptsRoot {
                block_number: event.block_number,
                computed: B256::repeat_byte(0x01),
                expected: B256::repeat_byte(0x02),
            }
            .into());
        }
        Ok(ProofEnvelope {
            log_index: event.log_index,
            log_entry_data: event.log_entry().rlp_encoded(),
            receipt_index: event.transaction_index,
            receipt_data: event.transaction_hash.to_vec(),
            header_data: event.block_hash.to_vec(),
            proof: Vec::new(),
        })
    }
}

/// Connector remembering submitted proofs; deposit hashes are `near-tx-<n>`
pub struct MockConnector {
    kind: BridgeAssetKind,
    used: Mutex<HashSet<Vec<u8>>>,
    submissions: Mutex<Vec<Vec<u8>>>,
    fail: AtomicBool,
}

impl MockConnector {
    pub fn new(kind: BridgeAssetKind) -> Self {
        Self {
            kind,
            used: Mutex::new(HashSet::new()),
            submissions: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail_submissions(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<Vec<u8>> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn kind(&self) -> BridgeAssetKind {
        self.kind
    }

    fn account_id(&self) -> &str {
        "connector.test.near"
    }

    async fn is_used_proof(&self, proof: &[u8]) -> Result<ProofUsage> {
        if self.kind.proof_check() == ProofCheck::Unsupported {
            return Ok(ProofUsage::Unsupported);
        }
        Ok(if self.used.lock().unwrap().contains(proof) {
            ProofUsage::Used
        } else {
            ProofUsage::Unused
        })
    }

    async fn submit(&self, proof: &[u8]) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(eyre!("Smart contract panicked: proof rejected"));
        }
        self.used.lock().unwrap().insert(proof.to_vec());
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(proof.to_vec());
        Ok(format!("near-tx-{}", submissions.len()))
    }
}

#[derive(Default)]
pub struct MemoryRelayLedger {
    records: Mutex<Vec<RelayRecord>>,
}

impl MemoryRelayLedger {
    pub fn records(&self) -> Vec<RelayRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelayLedger for MemoryRelayLedger {
    async fn record_relay(&self, record: &RelayRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Incentivization collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryIncentivizationLedger {
    records: Mutex<Vec<IncentivizationRecord>>,
}

impl MemoryIncentivizationLedger {
    /// Pretend `amount` was already paid under a rule
    pub fn seed(&self, rule_id: &str, source_token: &str, reward_token: &str, amount: u128) {
        self.records.lock().unwrap().push(IncentivizationRecord {
            rule_id: rule_id.into(),
            source_token: source_token.into(),
            reward_token: reward_token.into(),
            recipient: "seed.near".into(),
            source_tx_hash: "0x00".into(),
            reward_tx_hash: "seed".into(),
            amount,
        });
    }

    pub fn records(&self) -> Vec<IncentivizationRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl IncentivizationLedger for MemoryIncentivizationLedger {
    async fn record_incentivization(&self, record: &IncentivizationRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn total_spent(
        &self,
        rule_id: &str,
        source_token: &str,
        reward_token: &str,
    ) -> Result<u128> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.rule_id == rule_id
                    && r.source_token == source_token
                    && r.reward_token == reward_token
            })
            .map(|r| r.amount)
            .sum())
    }
}

/// Fixed prices by symbol, independent of the fiat pivot
pub struct MockPrices {
    prices: HashMap<String, BigDecimal>,
}

impl MockPrices {
    pub fn new(prices: &[(&str, &str)]) -> Self {
        Self {
            prices: prices
                .iter()
                .map(|(symbol, price)| (symbol.to_string(), BigDecimal::from_str(price).unwrap()))
                .collect(),
        }
    }
}

#[async_trait]
impl PriceSource for MockPrices {
    async fn price(&self, symbol: &str, fiat: &str) -> Result<BigDecimal> {
        self.prices
            .get(symbol)
            .cloned()
            .ok_or_else(|| eyre!("No price for {}{}", symbol, fiat))
    }
}

fn metadata_map(entries: &[(&str, &str, u8)]) -> HashMap<String, TokenMetadata> {
    entries
        .iter()
        .map(|(token, symbol, decimals)| {
            (
                token.to_lowercase(),
                TokenMetadata {
                    symbol: symbol.to_string(),
                    decimals: *decimals,
                },
            )
        })
        .collect()
}

pub struct MockTokenMetadata {
    tokens: HashMap<String, TokenMetadata>,
}

impl MockTokenMetadata {
    pub fn new(entries: &[(&str, &str, u8)]) -> Self {
        Self {
            tokens: metadata_map(entries),
        }
    }
}

#[async_trait]
impl TokenMetadataSource for MockTokenMetadata {
    async fn token_metadata(&self, token: &str) -> Result<TokenMetadata> {
        self.tokens
            .get(&token.to_lowercase())
            .cloned()
            .ok_or_else(|| eyre!("Unknown token {}", token))
    }
}

/// Reward token holding `balance` for the relayer; transfers are recorded
pub struct MockRewardTokens {
    balance: Mutex<u128>,
    transfers: Mutex<Vec<(String, u128)>>,
    registered: Mutex<Vec<String>>,
    metadata: Mutex<HashMap<String, TokenMetadata>>,
    fail: AtomicBool,
    tx_counter: AtomicUsize,
}

impl MockRewardTokens {
    pub fn new(balance: u128) -> Self {
        Self {
            balance: Mutex::new(balance),
            transfers: Mutex::new(Vec::new()),
            registered: Mutex::new(Vec::new()),
            metadata: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
            tx_counter: AtomicUsize::new(0),
        }
    }

    pub fn fail_transfers(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn set_metadata(&self, token: &str, symbol: &str, decimals: u8) {
        self.metadata
            .lock()
            .unwrap()
            .extend(metadata_map(&[(token, symbol, decimals)]));
    }

    pub fn transfers(&self) -> Vec<(String, u128)> {
        self.transfers.lock().unwrap().clone()
    }

    pub fn registered(&self) -> Vec<String> {
        self.registered.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenMetadataSource for MockRewardTokens {
    async fn token_metadata(&self, token: &str) -> Result<TokenMetadata> {
        self.metadata
            .lock()
            .unwrap()
            .get(&token.to_lowercase())
            .cloned()
            .ok_or_else(|| eyre!("Unknown token {}", token))
    }
}

#[async_trait]
impl RewardTokens for MockRewardTokens {
    async fn balance_of(&self, _token: &str, _account: &str) -> Result<u128> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn ensure_registered(&self, _token: &str, account: &str) -> Result<()> {
        let mut registered = self.registered.lock().unwrap();
        if !registered.iter().any(|a| a == account) {
            registered.push(account.to_string());
        }
        Ok(())
    }

    async fn transfer(&self, _token: &str, receiver: &str, amount: u128) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(eyre!("ft_transfer failed"));
        }
        {
            let mut balance = self.balance.lock().unwrap();
            *balance = balance
                .checked_sub(amount)
                .ok_or_else(|| eyre!("The account doesn't have enough balance"))?;
        }
        self.transfers
            .lock()
            .unwrap()
            .push((receiver.to_string(), amount));
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("reward-tx-{}", n))
    }
}

// ---------------------------------------------------------------------------
// Orchestration collaborators
// ---------------------------------------------------------------------------

/// Light client reporting `heights` in turn, then repeating the last one
pub struct MockDestination {
    heights: Vec<u64>,
    next: AtomicUsize,
}

impl MockDestination {
    pub fn new(heights: &[u64]) -> Self {
        Self {
            heights: heights.to_vec(),
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DestinationChain for MockDestination {
    async fn last_block_number(&self) -> Result<u64> {
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        self.heights
            .get(i)
            .or_else(|| self.heights.last())
            .copied()
            .ok_or_else(|| eyre!("light client unavailable"))
    }

    async fn relayer_balance(&self) -> Result<Option<u128>> {
        Ok(None)
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    saved: Mutex<Option<RelaySession>>,
}

impl MemorySessionStore {
    pub fn saved(&self) -> Option<RelaySession> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<RelaySession>> {
        Ok(self.saved())
    }

    async fn save(&self, session: &RelaySession) -> Result<()> {
        *self.saved.lock().unwrap() = Some(session.clone());
        Ok(())
    }
}
