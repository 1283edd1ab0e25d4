//! Ethereum JSON-RPC client over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy::primitives::B256;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::FetchError;
use crate::fetcher::NodeRpc;
use crate::types::{RawBlock, RawReceipt};

/// Ethereum RPC client wrapper.
pub struct RpcClient {
    client: Client,
    rpc_url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a new RPC client.
    ///
    /// # Arguments
    /// * `rpc_url` - HTTP/HTTPS JSON-RPC endpoint URL
    /// * `timeout` - Hard timeout applied to every request
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to build http client: {e}")))?;

        info!("Initialized RPC client for {}", rpc_url);

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call_rpc(&self, method: &str, params: Value) -> Result<Value, FetchError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed)
        });

        let response = self.client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(method, e))?;

        if !response.status().is_success() {
            return Err(FetchError::Transport(format!(
                "{method} failed with status: {}",
                response.status()
            )));
        }

        let body: Value = response.json().await.map_err(|e| transport_error(method, e))?;
        extract_result(method, body)
    }
}

#[async_trait]
impl NodeRpc for RpcClient {
    async fn block_number(&self) -> Result<u64, FetchError> {
        let result = self.call_rpc("eth_blockNumber", json!([])).await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| FetchError::Malformed(format!("eth_blockNumber returned {result}")))?;
        let block_num = u64::from_str_radix(hex_str.strip_prefix("0x").unwrap_or(hex_str), 16)
            .map_err(|e| FetchError::Malformed(format!("eth_blockNumber returned {hex_str}: {e}")))?;
        debug!(block_number = block_num, "Latest block number");
        Ok(block_num)
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<RawBlock>, FetchError> {
        let hex_block = format!("0x{:x}", number);
        let result = self.call_rpc("eth_getBlockByNumber", json!([hex_block, true])).await?;
        decode_optional("eth_getBlockByNumber", result)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<RawReceipt>, FetchError> {
        let result = self.call_rpc("eth_getTransactionReceipt", json!([hash])).await?;
        decode_optional("eth_getTransactionReceipt", result)
    }
}

fn transport_error(method: &str, err: reqwest::Error) -> FetchError {
    if err.is_decode() {
        FetchError::Malformed(format!("{method}: {err}"))
    } else {
        FetchError::Transport(format!("{method}: {err}"))
    }
}

/// Pull `result` out of a JSON-RPC response envelope.
fn extract_result(method: &str, mut body: Value) -> Result<Value, FetchError> {
    if let Some(error) = body.get("error") {
        return Err(FetchError::Transport(format!("{method} returned RPC error: {error}")));
    }
    match body.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(FetchError::Malformed(format!("{method} response has no result"))),
    }
}

/// Decode a nullable RPC result; `null` means the node has no such object.
fn decode_optional<T: DeserializeOwned>(method: &str, result: Value) -> Result<Option<T>, FetchError> {
    if result.is_null() {
        return Ok(None);
    }
    serde_json::from_value(result)
        .map(Some)
        .map_err(|e| FetchError::Malformed(format!("{method}: {e}")))
}
