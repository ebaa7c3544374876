use async_trait::async_trait;
use chrono::Utc;
use eyre::{eyre, Result, WrapErr};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

use crate::event_relayer::{RelayLedger, RelayRecord};
use crate::incentivizer::{IncentivizationLedger, IncentivizationRecord};

pub mod models;

pub use models::*;

/// Create a database connection pool.
///
/// A single connection keeps `sqlite::memory:` databases shared and matches
/// the single-writer relay loop.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .wrap_err_with(|| format!("Invalid database URL {}", database_url))?
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Insert a relayed event
pub async fn insert_relay_event(pool: &SqlitePool, event: &NewRelayEvent) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO relay_events (kind, event_tx_hash, block_number, deposit_tx_hash, created_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(&event.kind)
    .bind(&event.event_tx_hash)
    .bind(event.block_number)
    .bind(&event.deposit_tx_hash)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .wrap_err("Failed to insert relay event")?;

    Ok(row.get("id"))
}

/// Relay events recorded for a source transaction
#[cfg(test)]
pub(crate) async fn get_relay_events_by_tx(pool: &SqlitePool, event_tx_hash: &str) -> Result<Vec<RelayEvent>> {
    let rows = sqlx::query_as::<_, RelayEvent>(
        r#"SELECT id, kind, event_tx_hash, block_number, deposit_tx_hash, created_at
           FROM relay_events WHERE event_tx_hash = $1 ORDER BY id"#,
    )
    .bind(event_tx_hash)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to get relay events")?;

    Ok(rows)
}

/// Insert an incentive payout
pub async fn insert_incentivization_event(
    pool: &SqlitePool,
    event: &NewIncentivizationEvent,
) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO incentivization_events (rule_id, source_token, reward_token, recipient,
            source_tx_hash, reward_tx_hash, amount, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(&event.rule_id)
    .bind(&event.source_token)
    .bind(&event.reward_token)
    .bind(&event.recipient)
    .bind(&event.source_tx_hash)
    .bind(&event.reward_tx_hash)
    .bind(&event.amount)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .wrap_err("Failed to insert incentivization event")?;

    Ok(row.get("id"))
}

/// Payouts recorded under a rule
#[cfg(test)]
pub(crate) async fn get_incentivization_events(
    pool: &SqlitePool,
    rule_id: &str,
    source_token: &str,
    reward_token: &str,
) -> Result<Vec<IncentivizationEvent>> {
    let rows = sqlx::query_as::<_, IncentivizationEvent>(
        r#"SELECT id, rule_id, source_token, reward_token, recipient, source_tx_hash,
                  reward_tx_hash, amount, created_at
           FROM incentivization_events
           WHERE rule_id = $1 AND source_token = $2 AND reward_token = $3
           ORDER BY id"#,
    )
    .bind(rule_id)
    .bind(source_token)
    .bind(reward_token)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to get incentivization events")?;

    Ok(rows)
}

/// Sum of payouts under a rule in raw reward-token units
pub async fn get_total_incentivized(
    pool: &SqlitePool,
    rule_id: &str,
    source_token: &str,
    reward_token: &str,
) -> Result<u128> {
    let rows = sqlx::query(
        r#"SELECT amount FROM incentivization_events
           WHERE rule_id = $1 AND source_token = $2 AND reward_token = $3"#,
    )
    .bind(rule_id)
    .bind(source_token)
    .bind(reward_token)
    .fetch_all(pool)
    .await
    .wrap_err("Failed to sum incentivization events")?;

    rows.iter().try_fold(0u128, |total, row| {
        let amount: String = row.get("amount");
        let amount: u128 = amount
            .parse()
            .map_err(|e| eyre!("Corrupt ledger amount {:?}: {}", amount, e))?;
        total
            .checked_add(amount)
            .ok_or_else(|| eyre!("Ledger total overflows"))
    })
}

/// Relay and incentivization ledgers backed by SQLite
#[derive(Clone)]
pub struct SqlLedger {
    pool: SqlitePool,
}

impl SqlLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RelayLedger for SqlLedger {
    async fn record_relay(&self, record: &RelayRecord) -> Result<()> {
        let block_number = i64::try_from(record.block_number)
            .wrap_err("Block number does not fit the ledger")?;
        insert_relay_event(
            &self.pool,
            &NewRelayEvent {
                kind: record.kind.as_str().to_string(),
                event_tx_hash: record.event_tx_hash.clone(),
                block_number,
                deposit_tx_hash: record.deposit_tx_hash.clone(),
            },
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IncentivizationLedger for SqlLedger {
    async fn record_incentivization(&self, record: &IncentivizationRecord) -> Result<()> {
        insert_incentivization_event(
            &self.pool,
            &NewIncentivizationEvent {
                rule_id: record.rule_id.clone(),
                source_token: record.source_token.clone(),
                reward_token: record.reward_token.clone(),
                recipient: record.recipient.clone(),
                source_tx_hash: record.source_tx_hash.clone(),
                reward_tx_hash: record.reward_tx_hash.clone(),
                amount: record.amount.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    async fn total_spent(&self, rule_id: &str, source_token: &str, reward_token: &str) -> Result<u128> {
        get_total_incentivized(&self.pool, rule_id, source_token, reward_token).await
    }
}
