//! Reward payouts for relayed lock events
//!
//! Each rule converts the locked value into a reward-token amount through a
//! fiat pivot price, then pays it out unless the rule's total cap is used up.
//! Spend is tracked in an append-only ledger; a transfer that fails leaves no
//! ledger entry.

pub mod price;

use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::metrics;
use crate::types::{LockEvent, TokenMetadata};

pub use price::{BinancePriceSource, PriceSource};

/// Token metadata lookup on one chain
#[async_trait]
pub trait TokenMetadataSource: Send + Sync {
    async fn token_metadata(&self, token: &str) -> Result<TokenMetadata>;
}

/// Reward token operations performed by the relayer account
#[async_trait]
pub trait RewardTokens: TokenMetadataSource {
    async fn balance_of(&self, token: &str, account: &str) -> Result<u128>;

    /// Register `account` with the token's minimum storage deposit if it
    /// is not registered yet
    async fn ensure_registered(&self, token: &str, account: &str) -> Result<()>;

    /// Transfer `amount` raw units and return the transaction hash
    async fn transfer(&self, token: &str, receiver: &str, amount: u128) -> Result<String>;
}

/// One paid reward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncentivizationRecord {
    pub rule_id: String,
    pub source_token: String,
    pub reward_token: String,
    pub recipient: String,
    pub source_tx_hash: String,
    pub reward_tx_hash: String,
    pub amount: u128,
}

#[async_trait]
pub trait IncentivizationLedger: Send + Sync {
    async fn record_incentivization(&self, record: &IncentivizationRecord) -> Result<()>;

    /// Sum of rewards paid under a rule, in reward-token raw units
    async fn total_spent(&self, rule_id: &str, source_token: &str, reward_token: &str)
        -> Result<u128>;
}

/// Reward policy for one source token
#[derive(Debug, Clone, Deserialize)]
pub struct IncentivizationRule {
    pub rule_id: String,
    pub source_token: String,
    pub source_symbol: String,
    pub source_decimals: u8,
    pub reward_token: String,
    pub reward_symbol: String,
    pub reward_decimals: u8,
    pub fiat_symbol: String,
    pub reward_factor: BigDecimal,
    /// Flat amount added to every reward, in reward-token units
    #[serde(default)]
    pub base_amount: BigDecimal,
    /// Total spend allowed under this rule, in reward-token units
    pub total_cap: BigDecimal,
}

impl IncentivizationRule {
    pub fn total_cap_raw(&self) -> Result<u128> {
        to_raw_units(&round_half_away_from_zero(
            &(self.total_cap.clone() * pow10(self.reward_decimals)),
        ))
    }

    fn validate(&self) -> Result<()> {
        let zero = BigDecimal::from(0);
        if self.reward_factor < zero {
            return Err(eyre!("Rule {} has a negative reward factor", self.rule_id));
        }
        if self.base_amount < zero {
            return Err(eyre!("Rule {} has a negative base amount", self.rule_id));
        }
        if self.total_cap < zero {
            return Err(eyre!("Rule {} has a negative total cap", self.rule_id));
        }
        Ok(())
    }
}

/// Rules file contents
#[derive(Debug, Clone, Deserialize)]
pub struct IncentivizationConfig {
    pub rules: Vec<IncentivizationRule>,
}

impl IncentivizationConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read incentivization rules {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .wrap_err_with(|| format!("Invalid incentivization rules {}", path.display()))?;
        for rule in &config.rules {
            rule.validate()?;
        }
        Ok(config)
    }
}

fn pow10(decimals: u8) -> BigDecimal {
    (0..decimals).fold(BigDecimal::from(1), |acc, _| acc * BigDecimal::from(10))
}

/// Round to an integer, halves away from zero
fn round_half_away_from_zero(value: &BigDecimal) -> BigDecimal {
    let truncated = value.with_scale(0);
    let remainder = value.clone() - truncated.clone();
    if remainder.abs() * BigDecimal::from(2) >= BigDecimal::from(1) {
        if *value < BigDecimal::from(0) {
            truncated - BigDecimal::from(1)
        } else {
            truncated + BigDecimal::from(1)
        }
    } else {
        truncated
    }
}

fn to_raw_units(value: &BigDecimal) -> Result<u128> {
    if *value <= BigDecimal::from(0) {
        return Ok(0);
    }
    let (digits, _) = value.with_scale(0).into_bigint_and_exponent();
    digits
        .to_u128()
        .ok_or_else(|| eyre!("Amount {} does not fit raw units", value))
}

/// Reward for locking `amount_raw` source-token units, in reward-token raw
/// units
pub fn reward_amount_raw(
    rule: &IncentivizationRule,
    amount_raw: &BigDecimal,
    source_price: &BigDecimal,
    reward_price: &BigDecimal,
) -> Result<u128> {
    if *reward_price <= BigDecimal::from(0) {
        return Err(eyre!(
            "Reward token {} has non-positive price {}",
            rule.reward_symbol,
            reward_price
        ));
    }

    let locked = amount_raw.clone() / pow10(rule.source_decimals);
    let reward = locked * source_price.clone() * rule.reward_factor.clone() / reward_price.clone();
    let mut reward_raw = round_half_away_from_zero(&(reward * pow10(rule.reward_decimals)));

    if rule.base_amount > BigDecimal::from(0) {
        reward_raw += round_half_away_from_zero(
            &(rule.base_amount.clone() * pow10(rule.reward_decimals)),
        );
    }
    to_raw_units(&reward_raw)
}

pub struct Incentivizer {
    relayer_account: String,
    /// Rules keyed by lowercase source token address
    rules: HashMap<String, Vec<IncentivizationRule>>,
    prices: Arc<dyn PriceSource>,
    tokens: Arc<dyn RewardTokens>,
    ledger: Arc<dyn IncentivizationLedger>,
}

impl Incentivizer {
    pub fn new(
        relayer_account: &str,
        rules: Vec<IncentivizationRule>,
        prices: Arc<dyn PriceSource>,
        tokens: Arc<dyn RewardTokens>,
        ledger: Arc<dyn IncentivizationLedger>,
    ) -> Self {
        let mut by_token: HashMap<String, Vec<IncentivizationRule>> = HashMap::new();
        for rule in rules {
            by_token
                .entry(rule.source_token.to_lowercase())
                .or_default()
                .push(rule);
        }
        Self {
            relayer_account: relayer_account.to_string(),
            rules: by_token,
            prices,
            tokens,
            ledger,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    /// Check every rule's symbols and decimals against both chains
    pub async fn validate_rules(&self, source_tokens: &dyn TokenMetadataSource) -> Result<()> {
        for rule in self.rules.values().flatten() {
            let source = source_tokens
                .token_metadata(&rule.source_token)
                .await
                .wrap_err_with(|| format!("Failed to read metadata of {}", rule.source_token))?;
            check_metadata(rule, &rule.source_token, &source, &rule.source_symbol, rule.source_decimals)?;

            let reward = self
                .tokens
                .token_metadata(&rule.reward_token)
                .await
                .wrap_err_with(|| format!("Failed to read metadata of {}", rule.reward_token))?;
            check_metadata(rule, &rule.reward_token, &reward, &rule.reward_symbol, rule.reward_decimals)?;
        }
        info!(rules = self.rule_count(), "Incentivization rules validated");
        Ok(())
    }

    /// Apply every rule of the event's token; true if any paid out
    pub async fn incentivize(&self, event: &LockEvent) -> bool {
        let Some(rules) = self.rules.get(&event.source_contract_address.to_lowercase()) else {
            return false;
        };
        if event.destination_account_id == self.relayer_account {
            return false;
        }

        let mut paid = false;
        for rule in rules {
            match self.incentivize_by_rule(event, rule).await {
                Ok(true) => paid = true,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        rule_id = %rule.rule_id,
                        tx_hash = %event.source_tx_hash,
                        error = ?e,
                        "Incentivization failed"
                    );
                    metrics::record_incentivization_failure(&rule.rule_id);
                }
            }
        }
        paid
    }

    pub async fn incentivize_by_rule(
        &self,
        event: &LockEvent,
        rule: &IncentivizationRule,
    ) -> Result<bool> {
        let amount = BigDecimal::from_str(&event.amount)
            .map_err(|e| eyre!("Invalid locked amount {:?}: {}", event.amount, e))?;
        let source_price = self.prices.price(&rule.source_symbol, &rule.fiat_symbol).await?;
        let reward_price = self.prices.price(&rule.reward_symbol, &rule.fiat_symbol).await?;

        let mut reward = reward_amount_raw(rule, &amount, &source_price, &reward_price)?;
        if reward == 0 {
            info!(rule_id = %rule.rule_id, "Reward rounds to zero, skipping");
            metrics::record_incentivization_skipped(&rule.rule_id, "zero_reward");
            return Ok(false);
        }

        let source_token = rule.source_token.to_lowercase();
        let cap = rule.total_cap_raw()?;
        let spent = self
            .ledger
            .total_spent(&rule.rule_id, &source_token, &rule.reward_token)
            .await?;
        if spent >= cap {
            info!(rule_id = %rule.rule_id, spent, cap, "Incentivization cap exhausted");
            metrics::record_incentivization_skipped(&rule.rule_id, "cap_exhausted");
            return Ok(false);
        }
        let remaining = cap - spent;
        if reward > remaining {
            info!(rule_id = %rule.rule_id, reward, remaining, "Clamping reward to remaining cap");
            reward = remaining;
        }

        let balance = self
            .tokens
            .balance_of(&rule.reward_token, &self.relayer_account)
            .await?;
        if balance < reward {
            warn!(
                account = %self.relayer_account,
                token = %rule.reward_token,
                balance,
                reward,
                "Not enough reward tokens to pay incentive"
            );
            metrics::record_incentivization_skipped(&rule.rule_id, "insufficient_balance");
            return Ok(false);
        }

        self.tokens
            .ensure_registered(&rule.reward_token, &event.destination_account_id)
            .await?;
        info!(
            recipient = %event.destination_account_id,
            token = %rule.reward_token,
            amount = reward,
            "Paying incentive"
        );
        let reward_tx_hash = self
            .tokens
            .transfer(&rule.reward_token, &event.destination_account_id, reward)
            .await?;

        self.ledger
            .record_incentivization(&IncentivizationRecord {
                rule_id: rule.rule_id.clone(),
                source_token,
                reward_token: rule.reward_token.clone(),
                recipient: event.destination_account_id.clone(),
                source_tx_hash: event.source_tx_hash.clone(),
                reward_tx_hash,
                amount: reward,
            })
            .await?;
        metrics::record_incentivization_paid(&rule.rule_id);
        Ok(true)
    }
}

fn check_metadata(
    rule: &IncentivizationRule,
    token: &str,
    actual: &TokenMetadata,
    symbol: &str,
    decimals: u8,
) -> Result<()> {
    if actual.symbol != symbol || actual.decimals != decimals {
        return Err(eyre!(
            "Rule {}: token {} is {} with {} decimals, configured as {} with {} decimals",
            rule.rule_id,
            token,
            actual.symbol,
            actual.decimals,
            symbol,
            decimals
        ));
    }
    Ok(())
}
