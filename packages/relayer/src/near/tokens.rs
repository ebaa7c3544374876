//! NEP-141 fungible tokens used to pay incentives

use async_trait::async_trait;
use eyre::{eyre, Result};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::{NearClient, DEFAULT_GAS};
use crate::incentivizer::{RewardTokens, TokenMetadataSource};
use crate::types::TokenMetadata;

/// `ft_transfer` requires exactly one yoctoNEAR attached
const ONE_YOCTO: u128 = 1;

#[derive(Debug, Deserialize)]
struct StorageBalanceBounds {
    min: String,
}

#[derive(Debug, Deserialize)]
struct StorageBalance {
    total: String,
}

#[derive(Debug, Deserialize)]
struct FungibleTokenMetadata {
    symbol: String,
    decimals: u8,
}

fn parse_u128(value: &str, what: &str) -> Result<u128> {
    value
        .parse()
        .map_err(|e| eyre!("Invalid {} {:?}: {}", what, value, e))
}

pub struct NearFungibleTokens {
    near: Arc<NearClient>,
}

impl NearFungibleTokens {
    pub fn new(near: Arc<NearClient>) -> Self {
        Self { near }
    }
}

#[async_trait]
impl TokenMetadataSource for NearFungibleTokens {
    async fn token_metadata(&self, token: &str) -> Result<TokenMetadata> {
        let metadata: FungibleTokenMetadata =
            self.near.view_json(token, "ft_metadata", &json!({})).await?;
        Ok(TokenMetadata {
            symbol: metadata.symbol,
            decimals: metadata.decimals,
        })
    }
}

#[async_trait]
impl RewardTokens for NearFungibleTokens {
    async fn balance_of(&self, token: &str, account: &str) -> Result<u128> {
        let balance: String = self
            .near
            .view_json(token, "ft_balance_of", &json!({ "account_id": account }))
            .await?;
        parse_u128(&balance, "token balance")
    }

    async fn ensure_registered(&self, token: &str, account: &str) -> Result<()> {
        let bounds: Option<StorageBalanceBounds> = self
            .near
            .view_json(token, "storage_balance_bounds", &json!({}))
            .await?;
        let current: Option<StorageBalance> = self
            .near
            .view_json(token, "storage_balance_of", &json!({ "account_id": account }))
            .await?;

        let minimum = match bounds {
            Some(bounds) => parse_u128(&bounds.min, "storage minimum")?,
            None => 0,
        };
        let total = match current {
            Some(balance) => parse_u128(&balance.total, "storage balance")?,
            None => 0,
        };
        if total >= minimum {
            return Ok(());
        }

        info!(account, token, deposit = minimum, "Registering reward recipient");
        let args = serde_json::to_vec(&json!({
            "account_id": account,
            "registration_only": true,
        }))?;
        self.near
            .function_call(token, "storage_deposit", args, DEFAULT_GAS, minimum)
            .await?;
        Ok(())
    }

    async fn transfer(&self, token: &str, receiver: &str, amount: u128) -> Result<String> {
        let args = serde_json::to_vec(&json!({
            "receiver_id": receiver,
            "amount": amount.to_string(),
        }))?;
        self.near
            .function_call(token, "ft_transfer", args, DEFAULT_GAS, ONE_YOCTO)
            .await
    }
}
