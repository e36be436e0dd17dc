//! Unit tests for transaction delivery
//!
//! These tests run the sender against a mock JSON-RPC node and verify
//! message-id-keyed confirmation, resend behavior, and the manual
//! intervention path.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

use amb_oracle::aggregator::{MessageStatus, MessageStore};
use amb_oracle::crypto::TxSigner;
use amb_oracle::executor::AsyncCallResult;
use amb_oracle::queue::{QueueItem, RelayQueue};
use amb_oracle::sender::{SenderConfig, TransactionSender};

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{
    mount_rpc_error, mount_rpc_error_once, mount_rpc_result, mount_rpc_result_once,
    requests_for_method, test_message, test_pool, test_signature, DUMMY_BRIDGE_ADDR,
    DUMMY_MESSAGE_ID, DUMMY_PRIVATE_KEY, DUMMY_VALIDATOR_1,
};

const ZERO_WORD: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";
const ONE_WORD: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";

fn sender_for(
    server: &MockServer,
    store: Arc<MessageStore>,
    queue: Arc<RelayQueue>,
    max_resend_attempts: u32,
) -> TransactionSender {
    TransactionSender::new(
        "test",
        Arc::new(test_pool(server)),
        TxSigner::from_hex_key(DUMMY_PRIVATE_KEY).unwrap(),
        DUMMY_BRIDGE_ADDR,
        SenderConfig {
            chain_id: 77,
            gas_limit: 2_000_000,
            gas_price_bump_percent: 10,
            resend_interval: Duration::from_millis(10),
            max_resend_attempts,
            idle_poll_interval: Duration::from_millis(10),
        },
        store,
        queue,
    )
}

fn item(message_id: &str) -> QueueItem {
    QueueItem {
        message_id: message_id.to_string(),
        lane: amb_oracle::aggregator::Lane::Automatic,
        priority: 0,
    }
}

/// Nonce byte of a signed legacy transaction. The nonce is the first RLP
/// field after the list header; a single-byte nonce encodes as itself.
fn nonce_byte(raw: &[u8]) -> u8 {
    match raw[0] {
        0xf8 => raw[2],
        0xf9 => raw[3],
        other => panic!("unexpected RLP list header 0x{:02x}", other),
    }
}

/// Raw transaction hex strings broadcast to the mock node, in order.
async fn broadcast_params(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter_map(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).ok()?;
            if body["method"] == "eth_sendRawTransaction" {
                Some(body["params"][0].as_str()?.to_string())
            } else {
                None
            }
        })
        .collect()
}

async fn store_with_signed_message() -> Arc<MessageStore> {
    let store = Arc::new(MessageStore::new());
    let mut message = test_message(DUMMY_MESSAGE_ID);
    message.status = MessageStatus::Pending;
    store.insert_message(message).await;
    store
        .add_signature(DUMMY_MESSAGE_ID, DUMMY_VALIDATOR_1, test_signature(0x01))
        .await;
    store
}

// ============================================================================
// DELIVERY TESTS
// ============================================================================

/// Test the happy path: broadcast once, bridge reports the message id as
/// relayed on the next confirmation poll.
#[tokio::test]
async fn test_delivery_confirms_by_message_id() {
    let server = MockServer::start().await;
    // First relayedMessages probe (pre-flight) sees "not relayed"
    mount_rpc_result_once(&server, "eth_call", json!(ZERO_WORD)).await;
    mount_rpc_result(&server, "eth_call", json!(ONE_WORD)).await;
    mount_rpc_result(&server, "eth_getTransactionCount", json!("0x5")).await;
    mount_rpc_result(&server, "eth_gasPrice", json!("0x3b9aca00")).await;
    mount_rpc_result(
        &server,
        "eth_sendRawTransaction",
        json!(format!("0x{}", hex::encode([0x11; 32]))),
    )
    .await;

    let store = store_with_signed_message().await;
    let queue = Arc::new(RelayQueue::new("home-prioritized", "home"));
    let sender = sender_for(&server, store.clone(), queue, 3);

    sender.process(&item(DUMMY_MESSAGE_ID)).await.unwrap();

    assert_eq!(
        store.get(DUMMY_MESSAGE_ID).await.unwrap().status,
        MessageStatus::Relayed
    );
    assert_eq!(requests_for_method(&server, "eth_sendRawTransaction").await, 1);
    assert!(sender.stalled_items().await.is_empty());
}

/// Test that an already-relayed message is skipped without broadcasting.
/// Why: queue replays after a restart must be harmless.
#[tokio::test]
async fn test_already_relayed_message_is_skipped() {
    let server = MockServer::start().await;
    mount_rpc_result(&server, "eth_call", json!(ONE_WORD)).await;

    let store = store_with_signed_message().await;
    let queue = Arc::new(RelayQueue::new("home-prioritized", "home"));
    let sender = sender_for(&server, store.clone(), queue, 3);

    sender.process(&item(DUMMY_MESSAGE_ID)).await.unwrap();

    assert_eq!(
        store.get(DUMMY_MESSAGE_ID).await.unwrap().status,
        MessageStatus::Relayed
    );
    assert_eq!(requests_for_method(&server, "eth_sendRawTransaction").await, 0);
    assert_eq!(requests_for_method(&server, "eth_getTransactionCount").await, 0);
}

/// Test that exhausting the resend ceiling parks the message for manual
/// intervention and marks it Failed.
#[tokio::test]
async fn test_resend_ceiling_parks_message() {
    let server = MockServer::start().await;
    mount_rpc_result(&server, "eth_call", json!(ZERO_WORD)).await;
    mount_rpc_result(&server, "eth_getTransactionCount", json!("0x5")).await;
    mount_rpc_result(&server, "eth_gasPrice", json!("0x3b9aca00")).await;
    mount_rpc_result(
        &server,
        "eth_sendRawTransaction",
        json!(format!("0x{}", hex::encode([0x11; 32]))),
    )
    .await;

    let store = store_with_signed_message().await;
    let queue = Arc::new(RelayQueue::new("home-prioritized", "home"));
    let sender = sender_for(&server, store.clone(), queue, 2);

    sender.process(&item(DUMMY_MESSAGE_ID)).await.unwrap();

    assert_eq!(
        store.get(DUMMY_MESSAGE_ID).await.unwrap().status,
        MessageStatus::Failed
    );
    // One broadcast per attempt, every one with the same nonce
    assert_eq!(requests_for_method(&server, "eth_sendRawTransaction").await, 2);

    let stalled = sender.stalled_items().await;
    assert_eq!(stalled.len(), 1);
    assert_eq!(stalled[0].message_id, DUMMY_MESSAGE_ID);
    assert_eq!(stalled[0].nonce, 5);
    assert_eq!(stalled[0].attempts, 2);
}

/// Test that a resend reuses the original nonce with identical calldata.
/// Why: two nonces for one message could double-deliver it.
#[tokio::test]
async fn test_resend_reuses_nonce() {
    let server = MockServer::start().await;
    mount_rpc_result(&server, "eth_call", json!(ZERO_WORD)).await;
    mount_rpc_result(&server, "eth_getTransactionCount", json!("0x5")).await;
    mount_rpc_result(&server, "eth_gasPrice", json!("0x3b9aca00")).await;
    mount_rpc_result(
        &server,
        "eth_sendRawTransaction",
        json!(format!("0x{}", hex::encode([0x11; 32]))),
    )
    .await;

    let store = store_with_signed_message().await;
    let queue = Arc::new(RelayQueue::new("home-prioritized", "home"));
    let sender = sender_for(&server, store.clone(), queue, 2);
    sender.process(&item(DUMMY_MESSAGE_ID)).await.unwrap();

    let raw_params = broadcast_params(&server).await;
    assert_eq!(raw_params.len(), 2);
    // The gas price bump changes the bytes, but both decode to nonce 5.
    let first = hex::decode(&raw_params[0][2..]).unwrap();
    let second = hex::decode(&raw_params[1][2..]).unwrap();
    assert_ne!(first, second, "the resend must carry a higher gas price");
    assert_eq!(nonce_byte(&first), 0x05, "first broadcast uses nonce 5");
    assert_eq!(nonce_byte(&second), 0x05, "resend reuses nonce 5");
}

/// Test that a failed delivery puts the item back on the queue instead of
/// dropping it. Why: a signed message must survive provider outages.
#[tokio::test]
async fn test_failed_delivery_requeues_item() {
    let server = MockServer::start().await;
    // Every confirmation poll fails, so delivery cannot even start
    mount_rpc_error(&server, "eth_call", -32000, "upstream timeout").await;

    let store = store_with_signed_message().await;
    let queue = Arc::new(RelayQueue::new("home-prioritized", "home"));
    let sender = sender_for(&server, store.clone(), queue.clone(), 3);

    sender.deliver(item(DUMMY_MESSAGE_ID)).await;

    let recovered = queue.dequeue().await.expect("item must be recoverable");
    assert_eq!(recovered.message_id, DUMMY_MESSAGE_ID);
    assert!(sender.stalled_items().await.is_empty());
    assert_eq!(
        store.get(DUMMY_MESSAGE_ID).await.unwrap().status,
        MessageStatus::Signed
    );
    assert_eq!(requests_for_method(&server, "eth_sendRawTransaction").await, 0);
}

/// Test that a broadcast rejection does not consume the nonce: the retried
/// delivery of the same item must broadcast with the original nonce.
/// Why: a gap in the nonce sequence blocks every later submission.
#[tokio::test]
async fn test_failed_broadcast_leaves_no_nonce_gap() {
    let server = MockServer::start().await;
    // Pre-flight polls of both deliveries see "not relayed", the
    // confirmation poll after the successful broadcast sees "relayed"
    mount_rpc_result_once(&server, "eth_call", json!(ZERO_WORD)).await;
    mount_rpc_result_once(&server, "eth_call", json!(ZERO_WORD)).await;
    mount_rpc_result(&server, "eth_call", json!(ONE_WORD)).await;
    mount_rpc_result(&server, "eth_getTransactionCount", json!("0x5")).await;
    mount_rpc_result(&server, "eth_gasPrice", json!("0x3b9aca00")).await;
    // First broadcast is rejected outright, the retry is accepted
    mount_rpc_error_once(
        &server,
        "eth_sendRawTransaction",
        -32010,
        "insufficient funds for gas * price + value",
    )
    .await;
    mount_rpc_result(
        &server,
        "eth_sendRawTransaction",
        json!(format!("0x{}", hex::encode([0x33; 32]))),
    )
    .await;

    let store = store_with_signed_message().await;
    let queue = Arc::new(RelayQueue::new("home-prioritized", "home"));
    let sender = sender_for(&server, store.clone(), queue.clone(), 3);

    sender.deliver(item(DUMMY_MESSAGE_ID)).await;
    let retry = queue.dequeue().await.expect("failed item must be requeued");
    sender.deliver(retry).await;

    assert_eq!(
        store.get(DUMMY_MESSAGE_ID).await.unwrap().status,
        MessageStatus::Relayed
    );
    assert!(queue.is_empty().await);

    let raw_params = broadcast_params(&server).await;
    assert_eq!(raw_params.len(), 2);
    let rejected = hex::decode(&raw_params[0][2..]).unwrap();
    let accepted = hex::decode(&raw_params[1][2..]).unwrap();
    assert_eq!(nonce_byte(&rejected), 0x05);
    assert_eq!(nonce_byte(&accepted), 0x05, "rejected broadcast must not consume the nonce");
    // The chain nonce is read once; the retry reuses the local counter
    assert_eq!(requests_for_method(&server, "eth_getTransactionCount").await, 1);
}

/// Test delivery of an async call response via confirmInformation.
#[tokio::test]
async fn test_async_response_delivery() {
    let server = MockServer::start().await;
    mount_rpc_result_once(&server, "eth_call", json!(ZERO_WORD)).await;
    mount_rpc_result(&server, "eth_call", json!(ONE_WORD)).await;
    mount_rpc_result(&server, "eth_getTransactionCount", json!("0x0")).await;
    mount_rpc_result(&server, "eth_gasPrice", json!("0x3b9aca00")).await;
    mount_rpc_result(
        &server,
        "eth_sendRawTransaction",
        json!(format!("0x{}", hex::encode([0x22; 32]))),
    )
    .await;

    let store = Arc::new(MessageStore::new());
    let mut message = test_message(DUMMY_MESSAGE_ID);
    message.kind = amb_oracle::aggregator::MessageKind::AsyncCall;
    message.required_signatures = 0;
    store.insert_message(message).await;
    store
        .set_async_result(
            DUMMY_MESSAGE_ID,
            AsyncCallResult {
                status: true,
                data: Some(vec![0x42; 32]),
            },
        )
        .await;

    let queue = Arc::new(RelayQueue::new("home-prioritized", "home"));
    let sender = sender_for(&server, store.clone(), queue, 3);
    sender.process(&item(DUMMY_MESSAGE_ID)).await.unwrap();

    assert_eq!(
        store.get(DUMMY_MESSAGE_ID).await.unwrap().status,
        MessageStatus::Relayed
    );
    assert_eq!(requests_for_method(&server, "eth_sendRawTransaction").await, 1);
}
