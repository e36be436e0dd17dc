//! Async Call Executor Module
//!
//! Answers the restricted set of read-only cross-chain queries a request can
//! embed. Every query names a selector - the first 4 bytes of keccak256 over
//! a canonical method-signature string such as `"eth_call(address,bytes)"` -
//! and a selector must be explicitly enabled before any request using it is
//! honored. A disabled or unrecognized selector fails the call without the
//! destination chain ever being contacted.
//!
//! The response envelope is always `(status, data)`: `status=false` means the
//! query could not be serviced (disabled selector, malformed arguments,
//! unreachable or future block, execution revert), while `status=true` covers
//! every serviced query, including legitimately empty or zero results.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::abi::{self, Token};
use crate::crypto::method_selector;
use crate::provider::ProviderPool;
use crate::rpc::{parse_hex_data, parse_quantity, BlockTag, CallRequest, RpcError};

// ============================================================================
// SELECTOR SURFACE
// ============================================================================

/// Canonical method-signature strings of every supported query.
pub const SUPPORTED_METHODS: [&str; 15] = [
    "eth_call(address,bytes)",
    "eth_call(address,bytes,uint256)",
    "eth_call(address,address,uint256,bytes)",
    "eth_blockNumber()",
    "eth_getBlockByNumber()",
    "eth_getBlockByNumber(uint256)",
    "eth_getBlockByHash(bytes32)",
    "eth_getBalance(address)",
    "eth_getBalance(address,uint256)",
    "eth_getTransactionCount(address)",
    "eth_getTransactionCount(address,uint256)",
    "eth_getTransactionByHash(bytes32)",
    "eth_getTransactionReceipt(bytes32)",
    "eth_getStorageAt(address,bytes32)",
    "eth_getStorageAt(address,bytes32,uint256)",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Call2,
    Call3,
    Call4,
    BlockNumber,
    BlockByNumberLatest,
    BlockByNumber,
    BlockByHash,
    Balance,
    BalanceAt,
    TxCount,
    TxCountAt,
    TxByHash,
    TxReceipt,
    StorageAt,
    StorageAtBlock,
}

impl Method {
    fn all() -> [(&'static str, Method); 15] {
        [
            ("eth_call(address,bytes)", Method::Call2),
            ("eth_call(address,bytes,uint256)", Method::Call3),
            ("eth_call(address,address,uint256,bytes)", Method::Call4),
            ("eth_blockNumber()", Method::BlockNumber),
            ("eth_getBlockByNumber()", Method::BlockByNumberLatest),
            ("eth_getBlockByNumber(uint256)", Method::BlockByNumber),
            ("eth_getBlockByHash(bytes32)", Method::BlockByHash),
            ("eth_getBalance(address)", Method::Balance),
            ("eth_getBalance(address,uint256)", Method::BalanceAt),
            ("eth_getTransactionCount(address)", Method::TxCount),
            (
                "eth_getTransactionCount(address,uint256)",
                Method::TxCountAt,
            ),
            ("eth_getTransactionByHash(bytes32)", Method::TxByHash),
            ("eth_getTransactionReceipt(bytes32)", Method::TxReceipt),
            ("eth_getStorageAt(address,bytes32)", Method::StorageAt),
            (
                "eth_getStorageAt(address,bytes32,uint256)",
                Method::StorageAtBlock,
            ),
        ]
    }

    fn from_selector(selector: &[u8; 4]) -> Option<Method> {
        Method::all()
            .into_iter()
            .find(|(sig, _)| &method_selector(sig) == selector)
            .map(|(_, m)| m)
    }
}

// ============================================================================
// REQUEST / RESPONSE ENVELOPE
// ============================================================================

/// A selector-gated query embedded in a request payload:
/// 4 selector bytes followed by ABI-encoded arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncCallRequest {
    pub selector: [u8; 4],
    pub args: Vec<u8>,
}

impl AsyncCallRequest {
    /// Splits a request payload into selector and argument bytes.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 4 {
            return None;
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&payload[..4]);
        Some(Self {
            selector,
            args: payload[4..].to_vec(),
        })
    }
}

/// The `(status, data)` envelope delivered back to the requesting contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncCallResult {
    pub status: bool,
    pub data: Option<Vec<u8>>,
}

impl AsyncCallResult {
    fn ok(data: Vec<u8>) -> Self {
        Self {
            status: true,
            data: Some(data),
        }
    }

    fn failed() -> Self {
        Self {
            status: false,
            data: None,
        }
    }
}

// ============================================================================
// SELECTOR REGISTRY
// ============================================================================

/// Enablement map keyed by selector. Selectors are disabled by default and
/// only mutable through the administrative enable/disable operation.
#[derive(Default)]
pub struct SelectorRegistry {
    enabled: RwLock<HashMap<[u8; 4], bool>>,
}

impl SelectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables a selector for this destination.
    pub async fn set_enabled(&self, selector: [u8; 4], enabled: bool) {
        self.enabled.write().await.insert(selector, enabled);
    }

    pub async fn is_enabled(&self, selector: &[u8; 4]) -> bool {
        self.enabled
            .read()
            .await
            .get(selector)
            .copied()
            .unwrap_or(false)
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

/// Executes enabled queries against the target chain's provider pool.
pub struct AsyncCallExecutor {
    pool: Arc<ProviderPool>,
    registry: Arc<SelectorRegistry>,
}

impl AsyncCallExecutor {
    pub fn new(pool: Arc<ProviderPool>, registry: Arc<SelectorRegistry>) -> Self {
        Self { pool, registry }
    }

    /// Services one query. Infallible by construction: every failure mode is
    /// folded into the negative envelope.
    pub async fn execute(&self, request: &AsyncCallRequest) -> AsyncCallResult {
        if !self.registry.is_enabled(&request.selector).await {
            debug!(
                "async call rejected: selector 0x{} not enabled",
                hex::encode(request.selector)
            );
            return AsyncCallResult::failed();
        }

        let Some(method) = Method::from_selector(&request.selector) else {
            debug!(
                "async call rejected: selector 0x{} not recognized",
                hex::encode(request.selector)
            );
            return AsyncCallResult::failed();
        };

        let args = &request.args;
        match method {
            Method::Call2 => self.eth_call2(args).await,
            Method::Call3 => self.eth_call3(args).await,
            Method::Call4 => self.eth_call4(args).await,
            Method::BlockNumber => self.eth_block_number().await,
            Method::BlockByNumberLatest => self.block_header(BlockTag::Latest).await,
            Method::BlockByNumber => match decode_block_arg(args, 0) {
                Some(n) => self.block_header(BlockTag::Number(n)).await,
                None => AsyncCallResult::failed(),
            },
            Method::BlockByHash => self.eth_block_by_hash(args).await,
            Method::Balance => self.eth_balance(args, BlockTag::Latest).await,
            Method::BalanceAt => match decode_block_arg(args, 1) {
                Some(n) => self.eth_balance(args, BlockTag::Number(n)).await,
                None => AsyncCallResult::failed(),
            },
            Method::TxCount => self.eth_tx_count(args, BlockTag::Latest).await,
            Method::TxCountAt => match decode_block_arg(args, 1) {
                Some(n) => self.eth_tx_count(args, BlockTag::Number(n)).await,
                None => AsyncCallResult::failed(),
            },
            Method::TxByHash => self.eth_tx_by_hash(args).await,
            Method::TxReceipt => self.eth_tx_receipt(args).await,
            Method::StorageAt => self.eth_storage_at(args, None).await,
            Method::StorageAtBlock => match decode_block_arg(args, 2) {
                Some(n) => self.eth_storage_at(args, Some(n)).await,
                None => AsyncCallResult::failed(),
            },
        }
    }

    /// eth_call(address,bytes): read-only call at the latest block,
    /// raw return bytes.
    async fn eth_call2(&self, args: &[u8]) -> AsyncCallResult {
        let (Ok(target), Ok(data)) = (abi::address(args, 0), abi::dynamic_bytes(args, 1)) else {
            return AsyncCallResult::failed();
        };
        let request = CallRequest {
            to: target,
            data,
            from: None,
            gas: None,
        };
        self.run_call(request, BlockTag::Latest).await
    }

    /// eth_call(address,bytes,uint256): historical call. A block beyond the
    /// current head cannot be serviced.
    async fn eth_call3(&self, args: &[u8]) -> AsyncCallResult {
        let (Ok(target), Ok(data)) = (abi::address(args, 0), abi::dynamic_bytes(args, 1)) else {
            return AsyncCallResult::failed();
        };
        let Some(block) = decode_block_arg(args, 2) else {
            return AsyncCallResult::failed();
        };

        let head = match self.head_block().await {
            Some(head) => head,
            None => return AsyncCallResult::failed(),
        };
        if block > head {
            debug!("async eth_call for block {} beyond head {}", block, head);
            return AsyncCallResult::failed();
        }

        let request = CallRequest {
            to: target,
            data,
            from: None,
            gas: None,
        };
        self.run_call(request, BlockTag::Number(block)).await
    }

    /// eth_call(address,address,uint256,bytes): call with explicit caller and
    /// gas limit. Execution failure (e.g. insufficient gas) is a negative
    /// result, not an error.
    async fn eth_call4(&self, args: &[u8]) -> AsyncCallResult {
        let (Ok(target), Ok(from), Ok(gas), Ok(data)) = (
            abi::address(args, 0),
            abi::address(args, 1),
            abi::uint_u64(args, 2),
            abi::dynamic_bytes(args, 3),
        ) else {
            return AsyncCallResult::failed();
        };
        let request = CallRequest {
            to: target,
            data,
            from: Some(from),
            gas: Some(gas),
        };
        self.run_call(request, BlockTag::Latest).await
    }

    async fn run_call(&self, request: CallRequest, block: BlockTag) -> AsyncCallResult {
        let result = self
            .pool
            .with_failover("eth_call", |client| {
                let request = request.clone();
                async move { client.call(&request, block).await }
            })
            .await;

        match result {
            Ok(bytes) => AsyncCallResult::ok(bytes),
            Err(e) if e.is_revert() => {
                debug!("async eth_call reverted: {}", e);
                AsyncCallResult::failed()
            }
            Err(e) => {
                debug!("async eth_call could not be serviced: {}", e);
                AsyncCallResult::failed()
            }
        }
    }

    /// eth_blockNumber(): current head as a padded uint.
    async fn eth_block_number(&self) -> AsyncCallResult {
        match self.head_block().await {
            Some(head) => AsyncCallResult::ok(abi::uint_word(head).to_vec()),
            None => AsyncCallResult::failed(),
        }
    }

    /// eth_getBlockByNumber / eth_getBlockByHash result: (number, hash, miner).
    async fn block_header(&self, block: BlockTag) -> AsyncCallResult {
        let result = self
            .pool
            .with_failover("eth_getBlockByNumber", |client| async move {
                client.get_block_by_number(block).await
            })
            .await;
        self.encode_block(result)
    }

    async fn eth_block_by_hash(&self, args: &[u8]) -> AsyncCallResult {
        let Ok(hash) = abi::fixed_bytes32(args, 0) else {
            return AsyncCallResult::failed();
        };
        let result = self
            .pool
            .with_failover("eth_getBlockByHash", |client| {
                let hash = hash.clone();
                async move { client.get_block_by_hash(&hash).await }
            })
            .await;
        self.encode_block(result)
    }

    fn encode_block(
        &self,
        result: Result<Option<crate::rpc::EvmBlock>, RpcError>,
    ) -> AsyncCallResult {
        let block = match result {
            Ok(Some(block)) => block,
            Ok(None) => return AsyncCallResult::failed(),
            Err(e) => {
                debug!("block query could not be serviced: {}", e);
                return AsyncCallResult::failed();
            }
        };

        let (Ok(number), Ok(hash), Ok(miner)) = (
            parse_quantity(&block.number),
            Token::bytes32(&block.hash),
            Token::address(&block.miner),
        ) else {
            return AsyncCallResult::failed();
        };

        AsyncCallResult::ok(abi::encode(&[Token::uint(number), hash, miner]))
    }

    /// eth_getBalance(address[,uint256]): padded uint, historical if a block
    /// is given.
    async fn eth_balance(&self, args: &[u8], block: BlockTag) -> AsyncCallResult {
        let Ok(address) = abi::address(args, 0) else {
            return AsyncCallResult::failed();
        };
        let result = self
            .pool
            .with_failover("eth_getBalance", |client| {
                let address = address.clone();
                async move { client.get_balance(&address, block).await }
            })
            .await;

        match result {
            Ok(quantity) => match abi::quantity_to_word(&quantity) {
                Ok(word) => AsyncCallResult::ok(word.to_vec()),
                Err(_) => AsyncCallResult::failed(),
            },
            Err(e) => {
                debug!("balance query could not be serviced: {}", e);
                AsyncCallResult::failed()
            }
        }
    }

    /// eth_getTransactionCount(address[,uint256]): padded uint nonce.
    async fn eth_tx_count(&self, args: &[u8], block: BlockTag) -> AsyncCallResult {
        let Ok(address) = abi::address(args, 0) else {
            return AsyncCallResult::failed();
        };
        let result = self
            .pool
            .with_failover("eth_getTransactionCount", |client| {
                let address = address.clone();
                async move { client.get_transaction_count(&address, block).await }
            })
            .await;

        match result {
            Ok(nonce) => AsyncCallResult::ok(abi::uint_word(nonce).to_vec()),
            Err(e) => {
                debug!("nonce query could not be serviced: {}", e);
                AsyncCallResult::failed()
            }
        }
    }

    /// eth_getTransactionByHash(bytes32):
    /// (hash, blockNumber, from, to, value, nonce, gas, gasPrice, input).
    async fn eth_tx_by_hash(&self, args: &[u8]) -> AsyncCallResult {
        let Ok(hash) = abi::fixed_bytes32(args, 0) else {
            return AsyncCallResult::failed();
        };
        let result = self
            .pool
            .with_failover("eth_getTransactionByHash", |client| {
                let hash = hash.clone();
                async move { client.get_transaction_by_hash(&hash).await }
            })
            .await;

        let tx = match result {
            Ok(Some(tx)) => tx,
            Ok(None) => return AsyncCallResult::failed(),
            Err(e) => {
                debug!("transaction query could not be serviced: {}", e);
                return AsyncCallResult::failed();
            }
        };

        let block_number = tx
            .block_number
            .as_deref()
            .and_then(|n| parse_quantity(n).ok())
            .unwrap_or(0);

        let (Ok(hash_token), Ok(from), Ok(to), Ok(value), Ok(nonce), Ok(gas), Ok(gas_price), Ok(input)) = (
            Token::bytes32(&tx.hash),
            Token::address(&tx.from),
            Token::address(tx.to.as_deref().unwrap_or("0x0000000000000000000000000000000000000000")),
            abi::quantity_to_word(&tx.value),
            parse_quantity(&tx.nonce),
            parse_quantity(&tx.gas),
            abi::quantity_to_word(&tx.gas_price),
            parse_hex_data(&tx.input),
        ) else {
            return AsyncCallResult::failed();
        };

        AsyncCallResult::ok(abi::encode(&[
            hash_token,
            Token::uint(block_number),
            from,
            to,
            Token::Word(value),
            Token::uint(nonce),
            Token::uint(gas),
            Token::Word(gas_price),
            Token::Bytes(input),
        ]))
    }

    /// eth_getTransactionReceipt(bytes32):
    /// (hash, blockNumber, status, logs[(address, topics[], data)]).
    async fn eth_tx_receipt(&self, args: &[u8]) -> AsyncCallResult {
        let Ok(hash) = abi::fixed_bytes32(args, 0) else {
            return AsyncCallResult::failed();
        };
        let result = self
            .pool
            .with_failover("eth_getTransactionReceipt", |client| {
                let hash = hash.clone();
                async move { client.get_transaction_receipt(&hash).await }
            })
            .await;

        let receipt = match result {
            Ok(Some(receipt)) => receipt,
            Ok(None) => return AsyncCallResult::failed(),
            Err(e) => {
                debug!("receipt query could not be serviced: {}", e);
                return AsyncCallResult::failed();
            }
        };

        let block_number = receipt
            .block_number
            .as_deref()
            .and_then(|n| parse_quantity(n).ok())
            .unwrap_or(0);
        let success = receipt.status.as_deref() == Some("0x1");

        let mut log_tokens = Vec::with_capacity(receipt.logs.len());
        for log in &receipt.logs {
            let Ok(address) = Token::address(&log.address) else {
                return AsyncCallResult::failed();
            };
            let mut topics = Vec::with_capacity(log.topics.len());
            for topic in &log.topics {
                match Token::bytes32(topic) {
                    Ok(t) => topics.push(t),
                    Err(_) => return AsyncCallResult::failed(),
                }
            }
            let Ok(data) = parse_hex_data(&log.data) else {
                return AsyncCallResult::failed();
            };
            log_tokens.push(Token::Tuple(vec![
                address,
                Token::Array(topics),
                Token::Bytes(data),
            ]));
        }

        let Ok(hash_token) = Token::bytes32(&receipt.transaction_hash) else {
            return AsyncCallResult::failed();
        };

        AsyncCallResult::ok(abi::encode(&[
            hash_token,
            Token::uint(block_number),
            Token::boolean(success),
            Token::Array(log_tokens),
        ]))
    }

    /// eth_getStorageAt(address,bytes32[,uint256]): raw 32-byte slot value.
    /// A non-existent or out-of-range block yields the zero word with
    /// status=true, matching what an unset slot reads as.
    async fn eth_storage_at(&self, args: &[u8], block: Option<u64>) -> AsyncCallResult {
        let (Ok(address), Ok(slot)) = (abi::address(args, 0), abi::fixed_bytes32(args, 1)) else {
            return AsyncCallResult::failed();
        };

        let tag = match block {
            Some(number) => {
                let head = match self.head_block().await {
                    Some(head) => head,
                    None => return AsyncCallResult::failed(),
                };
                if number > head {
                    return AsyncCallResult::ok(vec![0u8; 32]);
                }
                BlockTag::Number(number)
            }
            None => BlockTag::Latest,
        };

        let result = self
            .pool
            .with_failover("eth_getStorageAt", |client| {
                let address = address.clone();
                let slot = slot.clone();
                async move { client.get_storage_at(&address, &slot, tag).await }
            })
            .await;

        match result {
            Ok(value) => match abi::quantity_to_word(&value) {
                Ok(word) => AsyncCallResult::ok(word.to_vec()),
                Err(_) => AsyncCallResult::failed(),
            },
            Err(e) if e.is_unknown_block() => AsyncCallResult::ok(vec![0u8; 32]),
            Err(e) => {
                debug!("storage query could not be serviced: {}", e);
                AsyncCallResult::failed()
            }
        }
    }

    async fn head_block(&self) -> Option<u64> {
        match self
            .pool
            .with_failover("eth_blockNumber", |client| async move {
                client.block_number().await
            })
            .await
        {
            Ok(head) => Some(head),
            Err(e) => {
                debug!("head block unavailable: {}", e);
                None
            }
        }
    }
}

/// Decodes a block-number argument. Values wider than u64 are by definition
/// beyond any reachable head and cannot be serviced.
fn decode_block_arg(args: &[u8], index: usize) -> Option<u64> {
    abi::word(args, index).ok().and_then(|w| abi::word_to_u64(&w))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_supported_method_resolves() {
        for sig in SUPPORTED_METHODS {
            let selector = method_selector(sig);
            assert!(
                Method::from_selector(&selector).is_some(),
                "no method for {}",
                sig
            );
        }
    }

    #[test]
    fn test_unknown_selector_does_not_resolve() {
        assert!(Method::from_selector(&[0, 1, 2, 3]).is_none());
    }

    #[test]
    fn test_request_parsing() {
        let selector = method_selector("eth_blockNumber()");
        let mut payload = selector.to_vec();
        payload.extend_from_slice(&[0xaa; 8]);

        let request = AsyncCallRequest::parse(&payload).unwrap();
        assert_eq!(request.selector, selector);
        assert_eq!(request.args, vec![0xaa; 8]);

        assert!(AsyncCallRequest::parse(&[1, 2]).is_none());
    }

    #[tokio::test]
    async fn test_registry_disabled_by_default() {
        let registry = SelectorRegistry::new();
        let selector = method_selector("eth_call(address,bytes)");
        assert!(!registry.is_enabled(&selector).await);

        registry.set_enabled(selector, true).await;
        assert!(registry.is_enabled(&selector).await);

        registry.set_enabled(selector, false).await;
        assert!(!registry.is_enabled(&selector).await);
    }
}
