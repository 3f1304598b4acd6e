//! Ethereum execution layer JSON-RPC client.
//!
//! Thin typed wrapper over the three methods the pipeline needs:
//! `eth_getBlockByNumber` (latest head and full block) and
//! `debug_executionWitness`. Block and witness payloads are returned as raw
//! JSON bytes; the input builder consumes them verbatim.
//!
//! Every terminal outcome is reported to the RPC health tracker. A JSON-RPC
//! application error counts as a healthy server; only transport failures,
//! timeouts and non-200 responses count against the endpoint.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

use crate::rpc_health::HealthEvent;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error surface of the RPC client. Returned to the caller, never raised.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The request exceeded the 30-second timeout.
    #[error("RPC request timed out")]
    Timeout,

    /// Transport failure or non-200 response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a JSON-RPC error object.
    #[error("JSON-RPC error: {0}")]
    JsonRpcError(serde_json::Value),

    /// The response did not have the expected shape.
    #[error("bad response: {0}")]
    BadResponse(String),
}

/// Block parameter accepted by `eth_getBlockByNumber`.
#[derive(Debug, Clone)]
pub enum BlockParam {
    Number(u64),
    Tag(String),
}

impl From<u64> for BlockParam {
    fn from(number: u64) -> Self {
        Self::Number(number)
    }
}

impl BlockParam {
    /// Normalize to the wire representation: integers become `0x` hex, the
    /// well-known tags pass through, anything else gains a `0x` prefix if
    /// missing.
    pub fn normalize(&self) -> String {
        match self {
            Self::Number(n) => format!("0x{n:x}"),
            Self::Tag(tag) => match tag.as_str() {
                "latest" | "pending" | "earliest" | "safe" | "finalized" => tag.clone(),
                other if other.starts_with("0x") => other.to_string(),
                other => format!("0x{other}"),
            },
        }
    }
}

/// Height and unix timestamp of a chain head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub number: u64,
    pub timestamp: u64,
}

/// Client for the upstream execution layer node.
#[derive(Debug, Clone)]
pub struct EthRpcClient {
    url: Url,
    client: reqwest::Client,
    health_tx: mpsc::Sender<HealthEvent>,
}

impl EthRpcClient {
    pub fn new(url: Url, health_tx: mpsc::Sender<HealthEvent>) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            health_tx,
        }
    }

    /// Height and timestamp of the latest block.
    pub async fn latest_block_info(&self) -> Result<BlockInfo, RpcError> {
        let result: serde_json::Value = self
            .call(
                "eth_getBlockByNumber",
                (BlockParam::Tag("latest".into()).normalize(), false),
            )
            .await?;

        let number = hex_field(&result, "number")?;
        let timestamp = hex_field(&result, "timestamp")?;
        Ok(BlockInfo { number, timestamp })
    }

    /// Full block (with transaction bodies) as raw JSON bytes.
    pub async fn block_json(&self, block: impl Into<BlockParam>) -> Result<Vec<u8>, RpcError> {
        let result: Box<RawValue> = self
            .call("eth_getBlockByNumber", (block.into().normalize(), true))
            .await?;
        Ok(result.get().as_bytes().to_vec())
    }

    /// Execution witness for a block as raw JSON bytes.
    pub async fn execution_witness(
        &self,
        block: impl Into<BlockParam>,
    ) -> Result<Vec<u8>, RpcError> {
        let result: Box<RawValue> = self
            .call("debug_executionWitness", (block.into().normalize(),))
            .await?;
        Ok(result.get().as_bytes().to_vec())
    }

    /// Make a JSON-RPC call and report the outcome to the health tracker.
    async fn call<P, R>(&self, method: &'static str, params: P) -> Result<R, RpcError>
    where
        P: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let result = self.call_inner(method, params).await;

        let event = match &result {
            // An application error still means the server answered.
            Ok(_) | Err(RpcError::JsonRpcError(_)) | Err(RpcError::BadResponse(_)) => {
                HealthEvent::Success
            }
            Err(e) => HealthEvent::Failure {
                reason: e.to_string(),
            },
        };
        let _ = self.health_tx.send(event).await;

        result
    }

    async fn call_inner<P, R>(&self, method: &'static str, params: P) -> Result<R, RpcError>
    where
        P: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: rand::thread_rng().gen_range(1..10_000_000),
        };

        let response = self
            .client
            .post(self.url.clone())
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout
                } else {
                    RpcError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Transport(format!("HTTP status {status}")));
        }

        let response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| RpcError::BadResponse(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(RpcError::JsonRpcError(error));
        }

        response
            .result
            .ok_or_else(|| RpcError::BadResponse("response has neither result nor error".into()))
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<P> {
    jsonrpc: &'static str,
    method: &'static str,
    params: P,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<R> {
    result: Option<R>,
    error: Option<serde_json::Value>,
}

fn hex_field(value: &serde_json::Value, field: &str) -> Result<u64, RpcError> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(crate::block_meta::parse_hex_u64)
        .ok_or_else(|| RpcError::BadResponse(format!("missing or invalid `{field}` field")))
}

/// The chain client used by the pipeline, with a mock variant for tests.
#[derive(Debug, Clone)]
pub enum ChainClient {
    Http(EthRpcClient),
    #[cfg(test)]
    Mock(mock::MockChain),
}

impl ChainClient {
    pub async fn latest_block_info(&self) -> Result<BlockInfo, RpcError> {
        match self {
            Self::Http(client) => client.latest_block_info().await,
            #[cfg(test)]
            Self::Mock(mock) => mock.latest_block_info(),
        }
    }

    pub async fn block_json(&self, block: u64) -> Result<Vec<u8>, RpcError> {
        match self {
            Self::Http(client) => client.block_json(block).await,
            #[cfg(test)]
            Self::Mock(mock) => mock.block_json(block),
        }
    }

    pub async fn execution_witness(&self, block: u64) -> Result<Vec<u8>, RpcError> {
        match self {
            Self::Http(client) => client.execution_witness(block).await,
            #[cfg(test)]
            Self::Mock(mock) => mock.execution_witness(block),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_normalize_to_hex() {
        assert_eq!(BlockParam::Number(21_500_100).normalize(), "0x14810c4");
        assert_eq!(BlockParam::Number(0).normalize(), "0x0");
    }

    #[test]
    fn tags_pass_through() {
        for tag in ["latest", "pending", "earliest", "safe", "finalized"] {
            assert_eq!(BlockParam::Tag(tag.into()).normalize(), tag);
        }
    }

    #[test]
    fn other_strings_gain_a_prefix() {
        assert_eq!(BlockParam::Tag("1b4".into()).normalize(), "0x1b4");
        assert_eq!(BlockParam::Tag("0x1b4".into()).normalize(), "0x1b4");
    }

    #[test]
    fn hex_field_errors_on_missing_field() {
        let value = serde_json::json!({"number": "0x10"});
        assert_eq!(hex_field(&value, "number").unwrap(), 16);
        assert!(matches!(
            hex_field(&value, "timestamp"),
            Err(RpcError::BadResponse(_))
        ));
    }
}
