//! Test fixtures: dummy constants, message builders, and wiremock helpers
//! for mocking JSON-RPC nodes.

use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use amb_oracle::aggregator::{Lane, Message, MessageKind, MessageStatus};
use amb_oracle::config::{
    ChainConfig, Config, OracleConfig, PolicyConfig, QueueConfig, ValidatorConfig,
};
use amb_oracle::provider::{ProviderPool, RetryPolicy};
use amb_oracle::watcher::RequestCreatedEvent;

// ============================================================================
// DUMMY CONSTANTS
// ============================================================================

#[allow(dead_code)]
pub const DUMMY_MESSAGE_ID: &str =
    "0x1111111111111111111111111111111111111111111111111111111111111111";
#[allow(dead_code)]
pub const DUMMY_SENDER_ADDR: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
#[allow(dead_code)]
pub const DUMMY_EXECUTOR_ADDR: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
#[allow(dead_code)]
pub const DUMMY_BRIDGE_ADDR: &str = "0xcccccccccccccccccccccccccccccccccccccccc";
#[allow(dead_code)]
pub const DUMMY_VALIDATOR_1: &str = "0x1111111111111111111111111111111111111111";
#[allow(dead_code)]
pub const DUMMY_VALIDATOR_2: &str = "0x2222222222222222222222222222222222222222";
#[allow(dead_code)]
pub const DUMMY_VALIDATOR_3: &str = "0x3333333333333333333333333333333333333333";
/// Well-known test key; its address is derivable and funded on dev chains.
#[allow(dead_code)]
pub const DUMMY_PRIVATE_KEY: &str =
    "0x4646464646464646464646464646464646464646464646464646464646464646";
#[allow(dead_code)]
pub const DUMMY_ORACLE_ADDR: &str = "0x9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f";

// ============================================================================
// FIXTURE BUILDERS
// ============================================================================

/// A signed automatic relay message with a quorum of one.
#[allow(dead_code)]
pub fn test_message(id: &str) -> Message {
    Message {
        id: id.to_string(),
        sender: DUMMY_SENDER_ADDR.to_string(),
        executor: DUMMY_EXECUTOR_ADDR.to_string(),
        payload: vec![0xc0, 0xff, 0xee],
        source_tx_hash: "0xfeedfeed".to_string(),
        required_signatures: 1,
        lane: Lane::Automatic,
        kind: MessageKind::Relay,
        status: MessageStatus::Signed,
    }
}

#[allow(dead_code)]
pub fn test_request_event(id: &str) -> RequestCreatedEvent {
    RequestCreatedEvent {
        message_id: id.to_string(),
        sender: DUMMY_SENDER_ADDR.to_string(),
        executor: DUMMY_EXECUTOR_ADDR.to_string(),
        payload: vec![0xc0, 0xff, 0xee],
        source_tx_hash: "0xfeedfeed".to_string(),
        block_number: 42,
        lane: Lane::Automatic,
        kind: MessageKind::Relay,
    }
}

/// 65-byte `r || s || v` signature filled with a marker byte.
#[allow(dead_code)]
pub fn test_signature(marker: u8) -> Vec<u8> {
    let mut sig = vec![marker; 64];
    sig.push(27);
    sig
}

#[allow(dead_code)]
pub fn test_chain_config(name: &str, rpc_url: &str, chain_id: u64, cursor_path: &str) -> ChainConfig {
    ChainConfig {
        name: name.to_string(),
        rpc_primary_url: rpc_url.to_string(),
        rpc_redundant_url: None,
        rpc_fallback_url: None,
        chain_id,
        bridge_address: DUMMY_BRIDGE_ADDR.to_string(),
        confirmations: 8,
        polling_interval_ms: 50,
        start_block: 0,
        max_blocks_per_scan: 1000,
        cursor_path: cursor_path.to_string(),
    }
}

#[allow(dead_code)]
pub fn build_test_config(home_url: &str, foreign_url: &str) -> Config {
    Config {
        home_chain: test_chain_config("home", home_url, 77, "data/home.cursor"),
        foreign_chain: test_chain_config("foreign", foreign_url, 42, "data/foreign.cursor"),
        oracle: OracleConfig {
            signer_key_env: "AMB_ORACLE_PRIVATE_KEY".to_string(),
            gas_limit: 2_000_000,
            gas_price_bump_percent: 10,
            resend_interval_ms: 50,
            max_resend_attempts: 3,
            rpc_timeout_ms: 1000,
            rpc_max_retries: 1,
        },
        policy: PolicyConfig::default(),
        queue: QueueConfig::default(),
        validators: ValidatorConfig {
            addresses: vec![
                DUMMY_VALIDATOR_1.to_string(),
                DUMMY_VALIDATOR_2.to_string(),
                DUMMY_VALIDATOR_3.to_string(),
            ],
            required_signatures: 2,
        },
    }
}

// ============================================================================
// MOCK SERVER SETUP HELPERS
// ============================================================================

/// Single-endpoint pool with no retries, pointing at a mock server.
#[allow(dead_code)]
pub fn test_pool(server: &MockServer) -> ProviderPool {
    ProviderPool::new(
        "test",
        &server.uri(),
        None,
        None,
        Duration::from_secs(5),
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
        },
    )
    .expect("pool construction")
}

/// Mounts a permanent successful response for one JSON-RPC method.
#[allow(dead_code)]
pub async fn mount_rpc_result(server: &MockServer, rpc_method: &str, result: serde_json::Value) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": result,
        })))
        .mount(server)
        .await;
}

/// Mounts a one-shot response that outranks any permanent mock for the
/// same method.
#[allow(dead_code)]
pub async fn mount_rpc_result_once(
    server: &MockServer,
    rpc_method: &str,
    result: serde_json::Value,
) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": result,
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;
}

/// Mounts a one-shot JSON-RPC error that outranks any permanent mock for
/// the same method.
#[allow(dead_code)]
pub async fn mount_rpc_error_once(server: &MockServer, rpc_method: &str, code: i64, message: &str) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": code, "message": message },
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;
}

/// Mounts a permanent JSON-RPC error for one method.
#[allow(dead_code)]
pub async fn mount_rpc_error(server: &MockServer, rpc_method: &str, code: i64, message: &str) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": code, "message": message },
        })))
        .mount(server)
        .await;
}

/// Number of requests the mock server received for one JSON-RPC method.
#[allow(dead_code)]
pub async fn requests_for_method(server: &MockServer, rpc_method: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| {
            serde_json::from_slice::<serde_json::Value>(&r.body)
                .map(|v| v["method"] == rpc_method)
                .unwrap_or(false)
        })
        .count()
}

/// Unique per-test scratch directory for cursor files.
#[allow(dead_code)]
pub fn scratch_dir(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("amb-oracle-{}-{}", tag, std::process::id()));
    std::fs::create_dir_all(&dir).expect("scratch dir");
    dir
}
