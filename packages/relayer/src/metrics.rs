//! Prometheus metrics for the Ethereum → NEAR event relayer
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec, Counter,
    CounterVec, Gauge, GaugeVec,
};

use crate::types::BridgeAssetKind;

lazy_static! {
    // Per-connector relay metrics
    pub static ref EVENTS_PROCESSED: CounterVec = register_counter_vec!(
        "eth2near_relayer_events_processed_total",
        "Events whose proof was built and checked against the connector",
        &["connector"]
    ).unwrap();

    pub static ref EVENTS_SKIPPED: CounterVec = register_counter_vec!(
        "eth2near_relayer_events_skipped_total",
        "Events skipped because their proof was already used",
        &["connector"]
    ).unwrap();

    pub static ref EVENTS_RELAYED: CounterVec = register_counter_vec!(
        "eth2near_relayer_events_relayed_total",
        "Proofs submitted successfully",
        &["connector"]
    ).unwrap();

    pub static ref SUBMIT_FAILURES: CounterVec = register_counter_vec!(
        "eth2near_relayer_submit_failures_total",
        "Proof submissions that failed and will not be retried",
        &["connector"]
    ).unwrap();

    pub static ref PROOFS_GENERATED: CounterVec = register_counter_vec!(
        "eth2near_relayer_proofs_generated_total",
        "Inclusion proofs built",
        &["connector"]
    ).unwrap();

    pub static ref LAST_RELAYED_BLOCK: GaugeVec = register_gauge_vec!(
        "eth2near_relayer_last_block_with_relayed_event",
        "Source block of the most recent relayed event",
        &["connector"]
    ).unwrap();

    pub static ref INTEGRITY_FAILURES: CounterVec = register_counter_vec!(
        "eth2near_relayer_integrity_failures_total",
        "Events dropped because their block's receipts did not match the header",
        &["connector"]
    ).unwrap();

    // Incentivization
    pub static ref INCENTIVES_PAID: CounterVec = register_counter_vec!(
        "eth2near_relayer_incentives_paid_total",
        "Reward transfers executed",
        &["rule"]
    ).unwrap();

    pub static ref INCENTIVES_SKIPPED: CounterVec = register_counter_vec!(
        "eth2near_relayer_incentives_skipped_total",
        "Reward attempts skipped without paying",
        &["rule", "reason"]
    ).unwrap();

    pub static ref INCENTIVE_FAILURES: CounterVec = register_counter_vec!(
        "eth2near_relayer_incentive_failures_total",
        "Reward attempts that failed with an error",
        &["rule"]
    ).unwrap();

    // Loop state
    pub static ref CLIENT_HEIGHT: Gauge = register_gauge!(
        "eth2near_relayer_client_last_block",
        "Last Ethereum block known to the NEAR light client"
    ).unwrap();

    pub static ref LAST_PROCESSED_BLOCK: Gauge = register_gauge!(
        "eth2near_relayer_last_processed_block",
        "Last Ethereum block fully processed by the relayer"
    ).unwrap();

    pub static ref CYCLE_ERRORS: Counter = register_counter!(
        "eth2near_relayer_cycle_errors_total",
        "Relay cycles that failed and will be retried"
    ).unwrap();

    pub static ref RELAYER_BALANCE: Gauge = register_gauge!(
        "eth2near_relayer_near_balance",
        "Balance of the relayer account in NEAR"
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "eth2near_relayer_up",
        "Whether the relayer is up and running"
    ).unwrap();

    pub static ref LAST_SUCCESSFUL_POLL: Gauge = register_gauge!(
        "eth2near_relayer_last_successful_poll_timestamp",
        "Unix timestamp of last successful poll"
    ).unwrap();
}

const YOCTO_PER_NEAR: f64 = 1e24;

pub fn record_processed(kind: BridgeAssetKind) {
    EVENTS_PROCESSED.with_label_values(&[kind.gauge_prefix()]).inc();
}

pub fn record_skipped(kind: BridgeAssetKind) {
    EVENTS_SKIPPED.with_label_values(&[kind.gauge_prefix()]).inc();
}

pub fn record_relayed(kind: BridgeAssetKind, block_number: u64) {
    EVENTS_RELAYED.with_label_values(&[kind.gauge_prefix()]).inc();
    LAST_RELAYED_BLOCK
        .with_label_values(&[kind.gauge_prefix()])
        .set(block_number as f64);
}

pub fn record_submit_failure(kind: BridgeAssetKind) {
    SUBMIT_FAILURES.with_label_values(&[kind.gauge_prefix()]).inc();
}

pub fn record_proof_generated(kind: BridgeAssetKind) {
    PROOFS_GENERATED.with_label_values(&[kind.gauge_prefix()]).inc();
}

pub fn record_integrity_failure(kind: BridgeAssetKind) {
    INTEGRITY_FAILURES.with_label_values(&[kind.gauge_prefix()]).inc();
}

pub fn record_incentivization_paid(rule_id: &str) {
    INCENTIVES_PAID.with_label_values(&[rule_id]).inc();
}

pub fn record_incentivization_skipped(rule_id: &str, reason: &str) {
    INCENTIVES_SKIPPED.with_label_values(&[rule_id, reason]).inc();
}

pub fn record_incentivization_failure(rule_id: &str) {
    INCENTIVE_FAILURES.with_label_values(&[rule_id]).inc();
}

/// Update the light client height and the relay cursor
pub fn set_heights(client_height: u64, last_processed: u64) {
    CLIENT_HEIGHT.set(client_height as f64);
    LAST_PROCESSED_BLOCK.set(last_processed as f64);
    record_successful_poll();
}

pub fn record_cycle_error() {
    CYCLE_ERRORS.inc();
}

/// Record the relayer balance given in yoctoNEAR
///
/// Converted to NEAR as `f64`, so balances above 2^53 yoctoNEAR lose their
/// lowest digits. Fine for a gauge; exact amounts come from the RPC.
pub fn set_relayer_balance(yocto: u128) {
    RELAYER_BALANCE.set(yocto as f64 / YOCTO_PER_NEAR);
}

fn record_successful_poll() {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    LAST_SUCCESSFUL_POLL.set(timestamp);
}
