use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// Amounts are stored as decimal TEXT: raw token units overflow SQLite's
// 64-bit integers, so sums are computed in Rust as u128.

/// A proof submission that succeeded on NEAR
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RelayEvent {
    pub id: i64,
    pub kind: String,
    pub event_tx_hash: String,
    pub block_number: i64,
    pub deposit_tx_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRelayEvent {
    pub kind: String,
    pub event_tx_hash: String,
    pub block_number: i64,
    pub deposit_tx_hash: String,
}

/// An incentive paid to a bridge user
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IncentivizationEvent {
    pub id: i64,
    pub rule_id: String,
    pub source_token: String,
    pub reward_token: String,
    pub recipient: String,
    pub source_tx_hash: String,
    pub reward_tx_hash: String,
    pub amount: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewIncentivizationEvent {
    pub rule_id: String,
    pub source_token: String,
    pub reward_token: String,
    pub recipient: String,
    pub source_tx_hash: String,
    pub reward_tx_hash: String,
    pub amount: String,
}
