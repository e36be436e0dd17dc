//! JSON-RPC Client Module
//!
//! This module provides a client for communicating with EVM-compatible
//! blockchain nodes via their JSON-RPC API. It exposes the typed subset of
//! eth_* methods the oracle consumes: log polling, read-only calls, account
//! and block queries, and raw transaction submission.
//!
//! Errors are classified so callers can apply the right policy: transient
//! transport failures are retried with backoff, unreachable endpoints fail
//! over immediately, and definitive node-side outcomes (reverts, unknown
//! blocks) are surfaced as negative results rather than retried.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

// ============================================================================
// ERROR CLASSIFICATION
// ============================================================================

/// Typed JSON-RPC failure.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Transient transport failure (timeout, interrupted body). Retried with
    /// backoff on the same endpoint before escalating.
    #[error("transport error from {url}: {reason}")]
    Transport { url: String, reason: String },
    /// Endpoint cannot be reached at all. Fails over immediately.
    #[error("endpoint {url} unavailable: {reason}")]
    Unavailable { url: String, reason: String },
    /// Definitive error returned by the node itself. Never retried.
    #[error("rpc error from {url}: {message} (code {code})")]
    Rpc {
        url: String,
        code: i64,
        message: String,
    },
    /// Response arrived but could not be interpreted.
    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

impl RpcError {
    /// True for failures worth retrying on the same endpoint.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transport { .. })
    }

    /// True when the endpoint should be skipped in favor of the next role.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RpcError::Unavailable { .. } | RpcError::Malformed { .. }
        )
    }

    /// True when the node reported an execution revert.
    pub fn is_revert(&self) -> bool {
        match self {
            RpcError::Rpc { code, message, .. } => {
                *code == 3 || message.to_lowercase().contains("revert")
            }
            _ => false,
        }
    }

    /// True when the node reported a block it does not know about
    /// (pruned, not yet produced, or bad range).
    pub fn is_unknown_block(&self) -> bool {
        match self {
            RpcError::Rpc { message, .. } => {
                let msg = message.to_lowercase();
                msg.contains("header not found")
                    || msg.contains("block not found")
                    || msg.contains("unknown block")
                    || msg.contains("missing trie node")
            }
            _ => false,
        }
    }
}

// ============================================================================
// WIRE STRUCTURES
// ============================================================================

/// JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<serde_json::Value>,
    id: u64,
}

/// JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

/// Event log entry returned by `eth_getLogs`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvmLog {
    /// Address of the contract that emitted the event
    pub address: String,
    /// Array of topics (indexed event parameters)
    pub topics: Vec<String>,
    /// Event data (non-indexed parameters)
    pub data: String,
    /// Block number (hex quantity), absent while the log is pending
    #[serde(rename = "blockNumber", default)]
    pub block_number: Option<String>,
    /// Transaction hash the log was emitted in
    #[serde(rename = "transactionHash", default)]
    pub transaction_hash: Option<String>,
}

/// Block header subset returned by `eth_getBlockByNumber` / `...ByHash`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvmBlock {
    /// Block number (hex quantity)
    pub number: String,
    /// Block hash
    pub hash: String,
    /// Block producer address
    pub miner: String,
}

/// Transaction details from `eth_getTransactionByHash`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvmTransaction {
    pub hash: String,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
    pub from: String,
    pub to: Option<String>,
    pub value: String,
    pub nonce: String,
    pub gas: String,
    #[serde(rename = "gasPrice")]
    pub gas_price: String,
    pub input: String,
}

/// Transaction receipt from `eth_getTransactionReceipt`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvmReceipt {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
    /// "0x1" on success, "0x0" on failure
    pub status: Option<String>,
    pub logs: Vec<EvmLog>,
}

/// Parameters for a read-only `eth_call`
#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    pub to: String,
    pub data: Vec<u8>,
    pub from: Option<String>,
    pub gas: Option<u64>,
}

/// Block reference for historical queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

impl BlockTag {
    fn as_param(&self) -> serde_json::Value {
        match self {
            BlockTag::Latest => serde_json::json!("latest"),
            BlockTag::Number(n) => serde_json::json!(format!("0x{:x}", n)),
        }
    }
}

/// Parses a 0x-prefixed hex quantity into u64.
pub fn parse_quantity(hex_value: &str) -> Result<u64, String> {
    let clean = hex_value.strip_prefix("0x").unwrap_or(hex_value);
    u64::from_str_radix(clean, 16).map_err(|e| format!("invalid hex quantity: {}", e))
}

/// Decodes 0x-prefixed hex data into bytes.
pub fn parse_hex_data(hex_value: &str) -> Result<Vec<u8>, String> {
    let clean = hex_value.strip_prefix("0x").unwrap_or(hex_value);
    hex::decode(clean).map_err(|e| format!("invalid hex data: {}", e))
}

// ============================================================================
// RPC CLIENT IMPLEMENTATION
// ============================================================================

/// Client for one JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: Client,
    url: String,
}

impl RpcClient {
    /// Creates a client for the given node URL with a bounded request timeout.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RpcError> {
        Url::parse(url).map_err(|e| RpcError::Unavailable {
            url: url.to_string(),
            reason: format!("invalid endpoint url: {}", e),
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Unavailable {
                url: url.to_string(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Returns the endpoint URL of this client.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends one JSON-RPC request and decodes the result, classifying
    /// failures into `RpcError` kinds.
    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<Option<T>, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&self.url, e))?;

        let body: JsonRpcResponse<T> =
            response.json().await.map_err(|e| RpcError::Malformed {
                url: self.url.clone(),
                reason: format!("failed to parse {} response: {}", method, e),
            })?;

        if let Some(error) = body.error {
            return Err(RpcError::Rpc {
                url: self.url.clone(),
                code: error.code,
                message: error.message,
            });
        }

        Ok(body.result)
    }

    /// Like `request`, but a null result is malformed.
    async fn request_required<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, RpcError> {
        self.request(method, params)
            .await?
            .ok_or_else(|| RpcError::Malformed {
                url: self.url.clone(),
                reason: format!("null result for {}", method),
            })
    }

    /// Current head block number.
    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let hex: String = self.request_required("eth_blockNumber", vec![]).await?;
        parse_quantity(&hex).map_err(|reason| RpcError::Malformed {
            url: self.url.clone(),
            reason,
        })
    }

    /// Logs emitted by the given contract within an inclusive block range.
    pub async fn get_logs(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EvmLog>, RpcError> {
        let filter = serde_json::json!({
            "address": address,
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
        });
        let logs: Option<Vec<EvmLog>> = self.request("eth_getLogs", vec![filter]).await?;
        Ok(logs.unwrap_or_default())
    }

    /// Read-only contract call at the given block. Returns raw return bytes.
    pub async fn call(&self, request: &CallRequest, block: BlockTag) -> Result<Vec<u8>, RpcError> {
        let mut call_obj = serde_json::json!({
            "to": request.to,
            "data": format!("0x{}", hex::encode(&request.data)),
        });
        if let Some(ref from) = request.from {
            call_obj["from"] = serde_json::json!(from);
        }
        if let Some(gas) = request.gas {
            call_obj["gas"] = serde_json::json!(format!("0x{:x}", gas));
        }

        let hex: String = self
            .request_required("eth_call", vec![call_obj, block.as_param()])
            .await?;
        parse_hex_data(&hex).map_err(|reason| RpcError::Malformed {
            url: self.url.clone(),
            reason,
        })
    }

    /// Block header by number, or the latest block.
    pub async fn get_block_by_number(
        &self,
        block: BlockTag,
    ) -> Result<Option<EvmBlock>, RpcError> {
        self.request(
            "eth_getBlockByNumber",
            vec![block.as_param(), serde_json::json!(false)],
        )
        .await
    }

    /// Block header by hash.
    pub async fn get_block_by_hash(&self, hash: &str) -> Result<Option<EvmBlock>, RpcError> {
        self.request(
            "eth_getBlockByHash",
            vec![serde_json::json!(hash), serde_json::json!(false)],
        )
        .await
    }

    /// Account balance at the given block, as the node's hex quantity.
    pub async fn get_balance(&self, address: &str, block: BlockTag) -> Result<String, RpcError> {
        self.request_required(
            "eth_getBalance",
            vec![serde_json::json!(address), block.as_param()],
        )
        .await
    }

    /// Account nonce at the given block.
    pub async fn get_transaction_count(
        &self,
        address: &str,
        block: BlockTag,
    ) -> Result<u64, RpcError> {
        let hex: String = self
            .request_required(
                "eth_getTransactionCount",
                vec![serde_json::json!(address), block.as_param()],
            )
            .await?;
        parse_quantity(&hex).map_err(|reason| RpcError::Malformed {
            url: self.url.clone(),
            reason,
        })
    }

    /// Transaction details by hash, if known to the node.
    pub async fn get_transaction_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<EvmTransaction>, RpcError> {
        self.request("eth_getTransactionByHash", vec![serde_json::json!(hash)])
            .await
    }

    /// Transaction receipt by hash, if mined.
    pub async fn get_transaction_receipt(
        &self,
        hash: &str,
    ) -> Result<Option<EvmReceipt>, RpcError> {
        self.request("eth_getTransactionReceipt", vec![serde_json::json!(hash)])
            .await
    }

    /// Raw 32-byte storage slot value at the given block.
    pub async fn get_storage_at(
        &self,
        address: &str,
        slot: &str,
        block: BlockTag,
    ) -> Result<String, RpcError> {
        self.request_required(
            "eth_getStorageAt",
            vec![
                serde_json::json!(address),
                serde_json::json!(slot),
                block.as_param(),
            ],
        )
        .await
    }

    /// Node's suggested gas price in wei.
    pub async fn gas_price(&self) -> Result<u128, RpcError> {
        let hex: String = self.request_required("eth_gasPrice", vec![]).await?;
        let clean = hex.strip_prefix("0x").unwrap_or(&hex);
        u128::from_str_radix(clean, 16).map_err(|e| RpcError::Malformed {
            url: self.url.clone(),
            reason: format!("invalid gas price quantity: {}", e),
        })
    }

    /// Broadcasts a raw signed transaction. Returns the transaction hash.
    pub async fn send_raw_transaction(&self, raw_hex: &str) -> Result<String, RpcError> {
        self.request_required("eth_sendRawTransaction", vec![serde_json::json!(raw_hex)])
            .await
    }
}

fn classify_reqwest_error(url: &str, error: reqwest::Error) -> RpcError {
    if error.is_connect() {
        RpcError::Unavailable {
            url: url.to_string(),
            reason: error.to_string(),
        }
    } else {
        RpcError::Transport {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x10").unwrap(), 16);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_revert_classification() {
        let err = RpcError::Rpc {
            url: "http://localhost".to_string(),
            code: -32000,
            message: "execution reverted: bad input".to_string(),
        };
        assert!(err.is_revert());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_unknown_block_classification() {
        let err = RpcError::Rpc {
            url: "http://localhost".to_string(),
            code: -32000,
            message: "header not found".to_string(),
        };
        assert!(err.is_unknown_block());
        assert!(!err.is_revert());
    }

    #[test]
    fn test_block_tag_params() {
        assert_eq!(BlockTag::Latest.as_param(), serde_json::json!("latest"));
        assert_eq!(
            BlockTag::Number(255).as_param(),
            serde_json::json!("0xff")
        );
    }
}
