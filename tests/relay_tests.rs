//! Integration tests for the message pipeline
//!
//! These tests drive decoded bridge events through the full pipeline:
//! aggregation and routing for relay requests, immediate execution and
//! response queueing for async call requests.

use serde_json::json;
use std::sync::Arc;
use wiremock::MockServer;

use amb_oracle::abi;
use amb_oracle::aggregator::{
    Lane, MessageKind, MessageStatus, MessageStore, SignatureAggregator, ValidatorSet,
};
use amb_oracle::crypto::method_selector;
use amb_oracle::executor::{AsyncCallExecutor, SelectorRegistry};
use amb_oracle::queue::RelayQueue;
use amb_oracle::relay::MessagePipeline;
use amb_oracle::router::{AllowBlockPolicy, LaneRouter};
use amb_oracle::watcher::{BridgeEvent, SignatureSubmittedEvent};

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{
    mount_rpc_result, test_pool, test_request_event, test_signature, DUMMY_MESSAGE_ID,
    DUMMY_SENDER_ADDR, DUMMY_VALIDATOR_1,
};

struct Fixture {
    store: Arc<MessageStore>,
    counterpart_queue: Arc<RelayQueue>,
    response_queue: Arc<RelayQueue>,
    pipeline: MessagePipeline,
}

async fn fixture(server: &MockServer, blocked: &[String]) -> Fixture {
    let store = Arc::new(MessageStore::new());
    let aggregator = Arc::new(SignatureAggregator::new(
        store.clone(),
        ValidatorSet {
            validators: vec![DUMMY_VALIDATOR_1.to_string()],
            threshold: 1,
        },
    ));
    let policy = AllowBlockPolicy::new(blocked);
    let counterpart_queue = Arc::new(RelayQueue::new("foreign-prioritized", "foreign"));
    let response_queue = Arc::new(RelayQueue::new("home-prioritized", "home"));
    let router = Arc::new(LaneRouter::new(
        policy.clone(),
        store.clone(),
        counterpart_queue.clone(),
    ));
    let registry = Arc::new(SelectorRegistry::new());
    registry
        .set_enabled(method_selector("eth_blockNumber()"), true)
        .await;
    let executor = Arc::new(AsyncCallExecutor::new(Arc::new(test_pool(server)), registry));

    let pipeline = MessagePipeline::new(
        "home",
        aggregator,
        router,
        executor,
        policy,
        store.clone(),
        response_queue.clone(),
    );
    Fixture {
        store,
        counterpart_queue,
        response_queue,
        pipeline,
    }
}

/// Test the relay flow: request event, then the quorum-completing signature
/// event, lands the message on the counterpart-bound queue.
#[tokio::test]
async fn test_relay_request_reaches_counterpart_queue() {
    let server = MockServer::start().await;
    let fx = fixture(&server, &[]).await;

    fx.pipeline
        .handle_event(BridgeEvent::RequestCreated(test_request_event(
            DUMMY_MESSAGE_ID,
        )))
        .await
        .unwrap();
    assert!(fx.counterpart_queue.is_empty().await);

    fx.pipeline
        .handle_event(BridgeEvent::SignatureSubmitted(SignatureSubmittedEvent {
            message_id: DUMMY_MESSAGE_ID.to_string(),
            validator: DUMMY_VALIDATOR_1.to_string(),
            signature: test_signature(0x01),
            block_number: 43,
        }))
        .await
        .unwrap();

    assert_eq!(fx.counterpart_queue.len().await, 1);
    assert!(fx.response_queue.is_empty().await);
    assert_eq!(
        fx.store.get(DUMMY_MESSAGE_ID).await.unwrap().status,
        MessageStatus::Signed
    );
}

/// Test the async call flow: the query runs immediately against the
/// counterpart chain and the response is queued back toward the source.
#[tokio::test]
async fn test_async_call_is_executed_and_queued_back() {
    let server = MockServer::start().await;
    mount_rpc_result(&server, "eth_blockNumber", json!("0x10")).await;
    let fx = fixture(&server, &[]).await;

    let mut event = test_request_event(DUMMY_MESSAGE_ID);
    event.kind = MessageKind::AsyncCall;
    event.payload = method_selector("eth_blockNumber()").to_vec();
    fx.pipeline
        .handle_event(BridgeEvent::RequestCreated(event))
        .await
        .unwrap();

    // No quorum involved: result and response queue entry exist already
    let result = fx.store.async_result(DUMMY_MESSAGE_ID).await.unwrap();
    assert!(result.status);
    assert_eq!(result.data, Some(abi::uint_word(16).to_vec()));
    assert_eq!(fx.response_queue.len().await, 1);
    assert!(fx.counterpart_queue.is_empty().await);
}

/// Test that a malformed async call payload still produces a negative
/// response envelope instead of being dropped.
#[tokio::test]
async fn test_malformed_async_call_gets_negative_envelope() {
    let server = MockServer::start().await;
    let fx = fixture(&server, &[]).await;

    let mut event = test_request_event(DUMMY_MESSAGE_ID);
    event.kind = MessageKind::AsyncCall;
    event.payload = vec![0x01]; // shorter than a selector
    fx.pipeline
        .handle_event(BridgeEvent::RequestCreated(event))
        .await
        .unwrap();

    let result = fx.store.async_result(DUMMY_MESSAGE_ID).await.unwrap();
    assert!(!result.status);
    assert_eq!(fx.response_queue.len().await, 1);
}

/// Test that async calls from blocked senders are suppressed without
/// touching the node or the response queue.
#[tokio::test]
async fn test_blocked_async_call_is_suppressed() {
    let server = MockServer::start().await;
    mount_rpc_result(&server, "eth_blockNumber", json!("0x10")).await;
    let fx = fixture(&server, &[DUMMY_SENDER_ADDR.to_string()]).await;

    let mut event = test_request_event(DUMMY_MESSAGE_ID);
    event.kind = MessageKind::AsyncCall;
    event.payload = method_selector("eth_blockNumber()").to_vec();
    fx.pipeline
        .handle_event(BridgeEvent::RequestCreated(event))
        .await
        .unwrap();

    assert!(fx.response_queue.is_empty().await);
    assert!(server.received_requests().await.unwrap().is_empty());
    assert_eq!(
        fx.store.get(DUMMY_MESSAGE_ID).await.unwrap().status,
        MessageStatus::Suppressed
    );
}

/// Test that a manual-lane relay never reaches the queue even with quorum.
#[tokio::test]
async fn test_manual_relay_is_held() {
    let server = MockServer::start().await;
    let fx = fixture(&server, &[]).await;

    let mut event = test_request_event(DUMMY_MESSAGE_ID);
    event.lane = Lane::Manual;
    fx.pipeline
        .handle_event(BridgeEvent::RequestCreated(event))
        .await
        .unwrap();
    fx.pipeline
        .handle_event(BridgeEvent::SignatureSubmitted(SignatureSubmittedEvent {
            message_id: DUMMY_MESSAGE_ID.to_string(),
            validator: DUMMY_VALIDATOR_1.to_string(),
            signature: test_signature(0x01),
            block_number: 43,
        }))
        .await
        .unwrap();

    assert!(fx.counterpart_queue.is_empty().await);
    assert_eq!(
        fx.store.get(DUMMY_MESSAGE_ID).await.unwrap().status,
        MessageStatus::Signed
    );
}
