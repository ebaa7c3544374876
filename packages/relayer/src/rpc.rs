//! Minimal JSON-RPC 2.0 transport shared by the source-chain client
//!
//! Supports single calls and batch calls (one HTTP request carrying an array
//! of calls), which the batched receipt retrieval strategy relies on.

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// JSON-RPC transport
#[async_trait]
pub trait JsonRpc: Send + Sync {
    /// Perform a single call and return its `result`
    async fn request(&self, method: &str, params: Value) -> Result<Value>;

    /// Perform several calls in one round trip.
    ///
    /// Results are returned in the order of `calls`.
    async fn batch_request(&self, calls: Vec<(String, Value)>) -> Result<Vec<Value>>;
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcResponse {
    fn into_result(self, method: &str) -> Result<Value> {
        if let Some(err) = self.error {
            // NEAR nodes put the useful part of the error in `data`
            return match err.data {
                Some(data) => Err(eyre!(
                    "RPC call {} failed with code {}: {} ({})",
                    method,
                    err.code,
                    err.message,
                    data
                )),
                None => Err(eyre!(
                    "RPC call {} failed with code {}: {}",
                    method,
                    err.code,
                    err.message
                )),
            };
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// HTTP JSON-RPC client
pub struct HttpJsonRpc {
    url: String,
    client: Client,
    next_id: AtomicU64,
}

impl HttpJsonRpc {
    pub fn new(url: &str) -> Result<Self> {
        if url.is_empty() {
            return Err(eyre!("RPC URL cannot be empty"));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .wrap_err("Failed to create HTTP client")?;

        Ok(Self {
            url: url.to_string(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl JsonRpc for HttpJsonRpc {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id(),
            method,
            params: &params,
        };

        let response: RpcResponse = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .wrap_err_with(|| format!("Failed to send {} request", method))?
            .error_for_status()
            .wrap_err_with(|| format!("{} request rejected", method))?
            .json()
            .await
            .wrap_err_with(|| format!("Failed to decode {} response", method))?;

        response.into_result(method)
    }

    async fn batch_request(&self, calls: Vec<(String, Value)>) -> Result<Vec<Value>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let first_id = self.next_id.fetch_add(calls.len() as u64, Ordering::Relaxed);
        let requests: Vec<RpcRequest<'_>> = calls
            .iter()
            .enumerate()
            .map(|(i, (method, params))| RpcRequest {
                jsonrpc: "2.0",
                id: first_id + i as u64,
                method,
                params,
            })
            .collect();

        let responses: Vec<RpcResponse> = self
            .client
            .post(&self.url)
            .json(&requests)
            .send()
            .await
            .wrap_err("Failed to send batch request")?
            .error_for_status()
            .wrap_err("Batch request rejected")?
            .json()
            .await
            .wrap_err("Failed to decode batch response")?;

        // Servers may answer a batch in any order
        let mut slots: Vec<Option<RpcResponse>> = calls.iter().map(|_| None).collect();
        for response in responses {
            let index = response
                .id
                .and_then(|id| id.checked_sub(first_id))
                .map(|i| i as usize)
                .filter(|i| *i < slots.len())
                .ok_or_else(|| eyre!("Batch response with unexpected id {:?}", response.id))?;
            slots[index] = Some(response);
        }

        slots
            .into_iter()
            .zip(calls.iter())
            .map(|(slot, (method, _))| {
                slot.ok_or_else(|| eyre!("Missing batch response for {}", method))?
                    .into_result(method)
            })
            .collect()
    }
}

/// Serde helpers for JSON-RPC quantities.
///
/// Providers disagree on how integers are rendered: hex strings (`"0x1a"`),
/// decimal strings, JSON numbers, and for receipt status even booleans.
pub mod quantity {
    use serde::de::{self, Deserializer};
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawQuantity {
        Bool(bool),
        Number(u64),
        Text(String),
    }

    impl RawQuantity {
        fn into_u64(self) -> Result<u64, String> {
            match self {
                RawQuantity::Bool(b) => Ok(b as u64),
                RawQuantity::Number(n) => Ok(n),
                RawQuantity::Text(s) => parse(&s),
            }
        }
    }

    /// Parse a hex (`0x`-prefixed) or decimal quantity
    pub fn parse(s: &str) -> Result<u64, String> {
        let s = s.trim();
        match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some("") => Ok(0),
            Some(hex) => u64::from_str_radix(hex, 16)
                .map_err(|e| format!("invalid hex quantity {:?}: {}", s, e)),
            None => s
                .parse()
                .map_err(|e| format!("invalid quantity {:?}: {}", s, e)),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawQuantity::deserialize(deserializer)?
            .into_u64()
            .map_err(de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<RawQuantity>::deserialize(deserializer)?
                .map(|raw| raw.into_u64().map_err(de::Error::custom))
                .transpose()
        }
    }
}

/// Format a block number as a JSON-RPC quantity
pub fn to_quantity(value: u64) -> String {
    format!("{:#x}", value)
}
