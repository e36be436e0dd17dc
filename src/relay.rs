//! Relay Orchestration Module
//!
//! Wires the per-chain components into a bidirectional service: each chain
//! runs an event watcher feeding a message pipeline, and a transaction sender
//! draining the queue of messages bound for that chain. Both directions share
//! one message store and one signature aggregator, since message ids are
//! globally unique.
//!
//! Direction wiring for events observed on a chain:
//! - relay requests that reach quorum are routed onto the queue bound for the
//!   counterpart chain
//! - async call requests are executed against the counterpart chain and their
//!   response is queued back to the chain the request came from

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::aggregator::{
    Message, MessageKind, MessageStatus, MessageStore, SignatureAggregator, ValidatorSet,
};
use crate::config::{ChainConfig, Config};
use crate::crypto::{normalize_address, TxSigner};
use crate::executor::{AsyncCallExecutor, AsyncCallRequest, AsyncCallResult, SelectorRegistry};
use crate::provider::{ProviderPool, RetryPolicy};
use crate::queue::{QueueItem, RelayQueue};
use crate::router::{AllowBlockPolicy, LaneRouter};
use crate::sender::{SenderConfig, TransactionSender};
use crate::watcher::{BridgeEvent, EventWatcher, FileCursorStore, RequestCreatedEvent};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// MESSAGE PIPELINE
// ============================================================================

/// Handles the decoded events observed on one chain.
pub struct MessagePipeline {
    chain_name: String,
    aggregator: Arc<SignatureAggregator>,
    router: Arc<LaneRouter>,
    executor: Arc<AsyncCallExecutor>,
    policy: AllowBlockPolicy,
    store: Arc<MessageStore>,
    /// Queue bound for the chain the events came from; carries async call
    /// responses.
    response_queue: Arc<RelayQueue>,
}

impl MessagePipeline {
    pub fn new(
        chain_name: impl Into<String>,
        aggregator: Arc<SignatureAggregator>,
        router: Arc<LaneRouter>,
        executor: Arc<AsyncCallExecutor>,
        policy: AllowBlockPolicy,
        store: Arc<MessageStore>,
        response_queue: Arc<RelayQueue>,
    ) -> Self {
        Self {
            chain_name: chain_name.into(),
            aggregator,
            router,
            executor,
            policy,
            store,
            response_queue,
        }
    }

    pub async fn handle_event(&self, event: BridgeEvent) -> Result<()> {
        match event {
            BridgeEvent::RequestCreated(request) if request.kind == MessageKind::AsyncCall => {
                self.handle_async_call(request).await
            }
            BridgeEvent::RequestCreated(request) => {
                if let Some(message) = self.aggregator.handle_request(&request).await {
                    self.router.route(&message).await;
                }
                Ok(())
            }
            BridgeEvent::SignatureSubmitted(event) => {
                let quorum = self
                    .aggregator
                    .handle_signature(&event.message_id, &event.validator, event.signature)
                    .await;
                if let Some(message) = quorum {
                    self.router.route(&message).await;
                }
                Ok(())
            }
        }
    }

    /// Async call requests are quorum-independent: the query runs against
    /// the counterpart chain right away and the envelope goes straight onto
    /// the response queue.
    async fn handle_async_call(&self, request: RequestCreatedEvent) -> Result<()> {
        let message = Message {
            id: request.message_id.clone(),
            sender: request.sender.clone(),
            executor: request.executor.clone(),
            payload: request.payload.clone(),
            source_tx_hash: request.source_tx_hash.clone(),
            required_signatures: 0,
            lane: request.lane,
            kind: MessageKind::AsyncCall,
            status: MessageStatus::Signed,
        };
        if !self.store.insert_message(message).await {
            debug!(
                "{}: duplicate async call request {}",
                self.chain_name, request.message_id
            );
            return Ok(());
        }

        if self.policy.is_blocked(&request.sender) {
            info!(
                "{}: suppressing async call {} from blocked sender {}",
                self.chain_name, request.message_id, request.sender
            );
            self.store
                .set_status(&request.message_id, MessageStatus::Suppressed)
                .await;
            return Ok(());
        }

        let result = match AsyncCallRequest::parse(&request.payload) {
            Some(call) => self.executor.execute(&call).await,
            None => {
                warn!(
                    "{}: async call {} has a malformed payload",
                    self.chain_name, request.message_id
                );
                AsyncCallResult {
                    status: false,
                    data: None,
                }
            }
        };

        info!(
            "{}: async call {} executed (status {})",
            self.chain_name, request.message_id, result.status
        );
        self.store
            .set_async_result(&request.message_id, result)
            .await;
        self.response_queue
            .enqueue(QueueItem {
                message_id: request.message_id,
                lane: request.lane,
                priority: 0,
            })
            .await;
        Ok(())
    }
}

// ============================================================================
// SERVICE
// ============================================================================

struct ChainSide {
    watcher: Arc<EventWatcher>,
    pipeline: Arc<MessagePipeline>,
    sender: Arc<TransactionSender>,
    pool: Arc<ProviderPool>,
}

/// The assembled bidirectional relay service.
pub struct RelayService {
    home: ChainSide,
    foreign: ChainSide,
    registry: Arc<SelectorRegistry>,
    store: Arc<MessageStore>,
}

impl RelayService {
    /// Builds every component from the loaded configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let signer = TxSigner::from_hex_key(&config.oracle.get_signer_key()?)?;

        let timeout = Duration::from_millis(config.oracle.rpc_timeout_ms);
        let retry = RetryPolicy {
            max_attempts: config.oracle.rpc_max_retries,
            ..RetryPolicy::default()
        };
        let home_pool = Arc::new(build_pool(&config.home_chain, timeout, retry.clone())?);
        let foreign_pool = Arc::new(build_pool(&config.foreign_chain, timeout, retry)?);

        let store = Arc::new(MessageStore::new());
        let aggregator = Arc::new(SignatureAggregator::new(
            store.clone(),
            ValidatorSet {
                validators: config
                    .validators
                    .addresses
                    .iter()
                    .map(|a| normalize_address(a))
                    .collect(),
                threshold: config.validators.required_signatures,
            },
        ));
        let registry = Arc::new(SelectorRegistry::new());
        let policy = AllowBlockPolicy::new(&config.policy.blocked_addresses);

        // Queues are named after the chain their sender delivers to.
        let home_queue = Arc::new(RelayQueue::new(
            &config.queue.home_lane,
            &config.queue.home_legacy_lane,
        ));
        let foreign_queue = Arc::new(RelayQueue::new(
            &config.queue.foreign_lane,
            &config.queue.foreign_legacy_lane,
        ));

        let home = build_side(
            &config.home_chain,
            config,
            home_pool.clone(),
            foreign_pool.clone(),
            store.clone(),
            aggregator.clone(),
            registry.clone(),
            policy.clone(),
            signer.clone(),
            home_queue.clone(),
            foreign_queue.clone(),
        )?;
        let foreign = build_side(
            &config.foreign_chain,
            config,
            foreign_pool,
            home_pool,
            store.clone(),
            aggregator,
            registry.clone(),
            policy,
            signer,
            foreign_queue,
            home_queue,
        )?;

        Ok(Self {
            home,
            foreign,
            registry,
            store,
        })
    }

    /// Administrative enable/disable for an async call selector.
    pub fn selector_registry(&self) -> Arc<SelectorRegistry> {
        self.registry.clone()
    }

    pub fn message_store(&self) -> Arc<MessageStore> {
        self.store.clone()
    }

    /// Runs watchers, senders, and the endpoint health loop until one of
    /// them fails.
    pub async fn run(self) -> Result<()> {
        info!(
            "relay service starting: {} <-> {}",
            self.home.watcher.chain_name(),
            self.foreign.watcher.chain_name()
        );

        let home_pipeline = self.home.pipeline.clone();
        let home_watch = tokio::spawn(
            self.home
                .watcher
                .clone()
                .run(move |event| {
                    let pipeline = home_pipeline.clone();
                    async move { pipeline.handle_event(event).await }
                }),
        );
        let foreign_pipeline = self.foreign.pipeline.clone();
        let foreign_watch = tokio::spawn(
            self.foreign
                .watcher
                .clone()
                .run(move |event| {
                    let pipeline = foreign_pipeline.clone();
                    async move { pipeline.handle_event(event).await }
                }),
        );
        let home_send = tokio::spawn(self.home.sender.clone().run());
        let foreign_send = tokio::spawn(self.foreign.sender.clone().run());

        let home_pool = self.home.pool.clone();
        let foreign_pool = self.foreign.pool.clone();
        let health = tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEALTH_CHECK_INTERVAL).await;
                home_pool.health_check().await;
                foreign_pool.health_check().await;
            }
        });

        let handles = vec![home_watch, foreign_watch, home_send, foreign_send, health];
        let results = futures::future::try_join_all(handles)
            .await
            .context("relay task panicked")?;
        for result in results {
            result?;
        }
        Ok(())
    }
}

fn build_pool(chain: &ChainConfig, timeout: Duration, retry: RetryPolicy) -> Result<ProviderPool> {
    ProviderPool::new(
        &chain.name,
        &chain.rpc_primary_url,
        chain.rpc_redundant_url.as_deref(),
        chain.rpc_fallback_url.as_deref(),
        timeout,
        retry,
    )
    .map_err(|e| anyhow::anyhow!("provider pool for '{}': {}", chain.name, e))
}

#[allow(clippy::too_many_arguments)]
fn build_side(
    chain: &ChainConfig,
    config: &Config,
    own_pool: Arc<ProviderPool>,
    counterpart_pool: Arc<ProviderPool>,
    store: Arc<MessageStore>,
    aggregator: Arc<SignatureAggregator>,
    registry: Arc<SelectorRegistry>,
    policy: AllowBlockPolicy,
    signer: TxSigner,
    own_queue: Arc<RelayQueue>,
    counterpart_queue: Arc<RelayQueue>,
) -> Result<ChainSide> {
    let watcher = Arc::new(EventWatcher::new(
        chain.name.clone(),
        chain.bridge_address.clone(),
        own_pool.clone(),
        Box::new(FileCursorStore::new(&chain.cursor_path)),
        chain.confirmations,
        chain.max_blocks_per_scan,
        Duration::from_millis(chain.polling_interval_ms),
        chain.start_block,
    )?);

    let router = Arc::new(LaneRouter::new(
        policy.clone(),
        store.clone(),
        counterpart_queue,
    ));
    let executor = Arc::new(AsyncCallExecutor::new(counterpart_pool, registry));
    let pipeline = Arc::new(MessagePipeline::new(
        chain.name.clone(),
        aggregator,
        router,
        executor,
        policy,
        store.clone(),
        own_queue.clone(),
    ));

    let sender = Arc::new(TransactionSender::new(
        chain.name.clone(),
        own_pool.clone(),
        signer,
        chain.bridge_address.clone(),
        SenderConfig {
            chain_id: chain.chain_id,
            gas_limit: config.oracle.gas_limit,
            gas_price_bump_percent: u128::from(config.oracle.gas_price_bump_percent),
            resend_interval: Duration::from_millis(config.oracle.resend_interval_ms),
            max_resend_attempts: config.oracle.max_resend_attempts,
            idle_poll_interval: Duration::from_millis(chain.polling_interval_ms),
        },
        store,
        own_queue,
    ));

    Ok(ChainSide {
        watcher,
        pipeline,
        sender,
        pool: own_pool,
    })
}
