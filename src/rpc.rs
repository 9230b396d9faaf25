// src/rpc.rs
use alloy::primitives::{Address, B256};
use eyre::{eyre, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,

    #[serde(rename = "blockNumber")]
    pub block_number_hex: String,

    #[serde(rename = "transactionHash")]
    pub tx_hash: String,

    #[serde(rename = "logIndex")]
    pub log_index_hex: String,

    /// Set by the node when the log was dropped in a reorg.
    #[serde(default)]
    pub removed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RpcResponse<T> {
    Success { result: T },
    Error { error: RpcError },
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

pub fn parse_hex_u64(value: &str) -> Result<u64> {
    Ok(u64::from_str_radix(value.trim_start_matches("0x"), 16)?)
}

/// Thin JSON-RPC client over HTTP.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: Client,
    url: String,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self { client, url: url.into() })
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!("Sending {} → {}", method, self.url);

        let resp = self.client.post(&self.url).json(&payload).send().await?;
        if !resp.status().is_success() {
            return Err(eyre!("RPC error: HTTP {}", resp.status()));
        }

        match resp.json::<RpcResponse<T>>().await? {
            RpcResponse::Success { result } => Ok(result),
            RpcResponse::Error { error } => {
                Err(eyre!("{} failed ({}): {}", method, error.code, error.message))
            }
        }
    }

    /// Request with up to three attempts, two seconds apart.
    async fn request_with_retry<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let mut attempt = 1;
        loop {
            match self.request(method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < 3 => {
                    warn!("{} failed (attempt {}): {}. Retrying...", method, attempt, e);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.wrap_err(format!("{} failed after {} attempts", method, attempt))),
            }
        }
    }

    pub async fn get_chain_id(&self) -> Result<u64> {
        let hex: String = self.request_with_retry("eth_chainId", json!([])).await?;
        parse_hex_u64(&hex)
    }

    pub async fn get_block_number(&self) -> Result<u64> {
        let hex: String = self.request_with_retry("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&hex)
    }

    /// Fetch logs whose first topic is any of `topics`. An empty `addresses`
    /// slice matches every emitter.
    pub async fn get_logs(
        &self,
        addresses: &[Address],
        topics: &[B256],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>> {
        let mut filter = json!({
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
            "topics": [topics],
        });
        if !addresses.is_empty() {
            filter["address"] = json!(addresses);
        }

        debug!("Fetching logs {} → {} ({} emitters)", from_block, to_block, addresses.len());

        self.request("eth_getLogs", json!([filter])).await
    }
}
