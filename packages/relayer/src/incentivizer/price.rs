//! Token price quotes

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use eyre::{eyre, Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Price of one `symbol` expressed in `fiat`
    async fn price(&self, symbol: &str, fiat: &str) -> Result<BigDecimal>;
}

pub const BINANCE_API_URL: &str = "https://api.binance.com";

/// Spot prices from the Binance public ticker
pub struct BinancePriceSource {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

impl BinancePriceSource {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .wrap_err("Failed to create HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn pair(symbol: &str, fiat: &str) -> String {
        format!("{}{}", symbol, fiat).to_uppercase()
    }
}

fn parse_ticker(pair: &str, ticker: TickerPrice) -> Result<BigDecimal> {
    if ticker.symbol != pair {
        return Err(eyre!(
            "Price source answered for {} instead of {}",
            ticker.symbol,
            pair
        ));
    }
    let price = BigDecimal::from_str(&ticker.price)
        .map_err(|e| eyre!("Invalid price {:?} for {}: {}", ticker.price, pair, e))?;
    if price <= BigDecimal::from(0) {
        return Err(eyre!("Non-positive price {} for {}", price, pair));
    }
    Ok(price)
}

#[async_trait]
impl PriceSource for BinancePriceSource {
    async fn price(&self, symbol: &str, fiat: &str) -> Result<BigDecimal> {
        if symbol.eq_ignore_ascii_case(fiat) {
            return Ok(BigDecimal::from(1));
        }
        let pair = Self::pair(symbol, fiat);
        let ticker: TickerPrice = self
            .client
            .get(format!("{}/api/v3/ticker/price?symbol={}", self.base_url, pair))
            .send()
            .await
            .wrap_err_with(|| format!("Failed to query price of {}", pair))?
            .error_for_status()
            .wrap_err_with(|| format!("Price query for {} rejected", pair))?
            .json()
            .await
            .wrap_err_with(|| format!("Failed to decode price of {}", pair))?;

        parse_ticker(&pair, ticker)
    }
}
