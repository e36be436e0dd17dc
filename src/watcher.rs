//! Event Watcher Module
//!
//! Polls a bridge contract for request and signature events, staying a fixed
//! number of confirmation blocks behind the chain head so that reorged blocks
//! are never acted on. Progress is tracked by a durable cursor that is only
//! advanced after a scanned range has been fully handed off, giving
//! at-least-once delivery across restarts.
//!
//! ## Security Requirements
//!
//! - Only logs emitted by the configured bridge address are considered.
//! - Blocks above `head - confirmations` are never scanned.
//! - The cursor must not advance past a block whose events failed dispatch.

use anyhow::{Context, Result};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::abi;
use crate::aggregator::{Lane, MessageKind};
use crate::crypto::{event_topic, normalize_address};
use crate::provider::ProviderPool;
use crate::rpc::{parse_hex_data, parse_quantity, EvmLog};

/// Emitted by the bridge when a user submits a message for relay.
pub const REQUEST_EVENT_SIGNATURE: &str = "UserRequestForSignature(bytes32,bytes)";

/// Emitted by the bridge when a validator submits its signature.
pub const SIGNATURE_EVENT_SIGNATURE: &str = "SignedForUserRequest(address,bytes32,bytes)";

const MANUAL_LANE_FLAG: u8 = 0x01;
const ASYNC_CALL_FLAG: u8 = 0x02;

// ============================================================================
// DECODED EVENTS
// ============================================================================

/// A new relay request observed on the source bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCreatedEvent {
    pub message_id: String,
    pub sender: String,
    pub executor: String,
    pub payload: Vec<u8>,
    pub source_tx_hash: String,
    pub block_number: u64,
    pub lane: Lane,
    pub kind: MessageKind,
}

/// A validator signature observed on the source bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureSubmittedEvent {
    pub message_id: String,
    pub validator: String,
    pub signature: Vec<u8>,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    RequestCreated(RequestCreatedEvent),
    SignatureSubmitted(SignatureSubmittedEvent),
}

/// Decodes one bridge log. Returns `None` for event signatures this service
/// does not track.
///
/// # Arguments
/// * `log` - Raw log entry from `eth_getLogs`
pub fn decode_bridge_event(log: &EvmLog) -> Result<Option<BridgeEvent>> {
    let Some(topic0) = log.topics.first() else {
        return Ok(None);
    };

    if *topic0 == event_topic(REQUEST_EVENT_SIGNATURE) {
        return decode_request_event(log).map(Some);
    }
    if *topic0 == event_topic(SIGNATURE_EVENT_SIGNATURE) {
        return decode_signature_event(log).map(Some);
    }
    Ok(None)
}

fn decode_request_event(log: &EvmLog) -> Result<BridgeEvent> {
    let message_id = log
        .topics
        .get(1)
        .context("request event missing message id topic")?
        .clone();
    let data = parse_hex_data(&log.data)
        .map_err(|reason| anyhow::anyhow!("request event data is not hex: {}", reason))?;
    let encoded = abi::dynamic_bytes(&data, 0).context("request event data is not ABI bytes")?;

    // sender (20) || executor (20) || flags (1) || payload
    if encoded.len() < 41 {
        anyhow::bail!(
            "request payload for {} is {} bytes, expected at least 41",
            message_id,
            encoded.len()
        );
    }
    let sender = format!("0x{}", hex::encode(&encoded[..20]));
    let executor = format!("0x{}", hex::encode(&encoded[20..40]));
    let flags = encoded[40];
    let payload = encoded[41..].to_vec();

    let lane = if flags & MANUAL_LANE_FLAG != 0 {
        Lane::Manual
    } else {
        Lane::Automatic
    };
    let kind = if flags & ASYNC_CALL_FLAG != 0 {
        MessageKind::AsyncCall
    } else {
        MessageKind::Relay
    };

    let block_number = log
        .block_number
        .as_deref()
        .map(parse_quantity)
        .transpose()
        .map_err(|reason| anyhow::anyhow!("bad block number on request event: {}", reason))?
        .unwrap_or(0);

    Ok(BridgeEvent::RequestCreated(RequestCreatedEvent {
        message_id,
        sender,
        executor,
        payload,
        source_tx_hash: log.transaction_hash.clone().unwrap_or_default(),
        block_number,
        lane,
        kind,
    }))
}

fn decode_signature_event(log: &EvmLog) -> Result<BridgeEvent> {
    let validator_topic = log
        .topics
        .get(1)
        .context("signature event missing validator topic")?;
    let message_id = log
        .topics
        .get(2)
        .context("signature event missing message id topic")?
        .clone();

    let topic_bytes = parse_hex_data(validator_topic)
        .map_err(|reason| anyhow::anyhow!("validator topic is not hex: {}", reason))?;
    if topic_bytes.len() != 32 {
        anyhow::bail!("validator topic is {} bytes, expected 32", topic_bytes.len());
    }
    let validator = normalize_address(&format!("0x{}", hex::encode(&topic_bytes[12..])));

    let data = parse_hex_data(&log.data)
        .map_err(|reason| anyhow::anyhow!("signature event data is not hex: {}", reason))?;
    let signature =
        abi::dynamic_bytes(&data, 0).context("signature event data is not ABI bytes")?;

    let block_number = log
        .block_number
        .as_deref()
        .map(parse_quantity)
        .transpose()
        .map_err(|reason| anyhow::anyhow!("bad block number on signature event: {}", reason))?
        .unwrap_or(0);

    Ok(BridgeEvent::SignatureSubmitted(SignatureSubmittedEvent {
        message_id,
        validator,
        signature,
        block_number,
    }))
}

// ============================================================================
// DURABLE CURSOR
// ============================================================================

/// Persistence for the next block to scan.
pub trait CursorStore: Send + Sync {
    fn load(&self) -> Result<Option<u64>>;
    fn save(&self, block: u64) -> Result<()>;
}

/// Stores the cursor as a decimal block number in a plain file.
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self) -> Result<Option<u64>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading cursor {}", self.path.display()))
            }
        };
        let block = raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("cursor file {} is not a block number", self.path.display()))?;
        Ok(Some(block))
    }

    fn save(&self, block: u64) -> Result<()> {
        std::fs::write(&self.path, block.to_string())
            .with_context(|| format!("writing cursor {}", self.path.display()))
    }
}

// ============================================================================
// WATCHER
// ============================================================================

/// One scanned range of confirmed blocks, with its decoded events.
#[derive(Debug)]
pub struct ScanBatch {
    pub events: Vec<BridgeEvent>,
    /// First block of the next scan once this batch is fully dispatched.
    pub next_block: u64,
}

pub struct EventWatcher {
    chain_name: String,
    bridge_address: String,
    pool: Arc<ProviderPool>,
    cursor: Box<dyn CursorStore>,
    confirmations: u64,
    chunk_size: u64,
    poll_interval: Duration,
    next_block: Mutex<u64>,
}

impl EventWatcher {
    /// # Arguments
    /// * `start_block` - First block to scan when no cursor has been saved yet
    pub fn new(
        chain_name: impl Into<String>,
        bridge_address: impl Into<String>,
        pool: Arc<ProviderPool>,
        cursor: Box<dyn CursorStore>,
        confirmations: u64,
        chunk_size: u64,
        poll_interval: Duration,
        start_block: u64,
    ) -> Result<Self> {
        let chain_name = chain_name.into();
        let resume = cursor.load()?;
        let first = resume.unwrap_or(start_block);
        match resume {
            Some(block) => info!("{} watcher resuming from block {}", chain_name, block),
            None => info!("{} watcher starting from block {}", chain_name, first),
        }
        Ok(Self {
            chain_name,
            bridge_address: normalize_address(&bridge_address.into()),
            pool,
            cursor,
            confirmations,
            chunk_size: chunk_size.max(1),
            poll_interval,
            next_block: Mutex::new(first),
        })
    }

    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    /// Scans the next confirmed chunk. Returns `None` when no confirmed
    /// blocks are pending. The cursor is not advanced here; callers commit
    /// the batch with [`commit`](Self::commit) once every event is dispatched.
    pub async fn scan(&self) -> Result<Option<ScanBatch>> {
        let from = *self.next_block.lock().await;

        let head = self
            .pool
            .with_failover("eth_blockNumber", |client| async move {
                client.block_number().await
            })
            .await
            .context("fetching chain head")?;

        let confirmed = head.saturating_sub(self.confirmations);
        if from > confirmed {
            debug!(
                "{}: no confirmed blocks to scan (next {}, confirmed head {})",
                self.chain_name, from, confirmed
            );
            return Ok(None);
        }

        let to = confirmed.min(from + self.chunk_size - 1);
        let address = self.bridge_address.clone();
        let logs = self
            .pool
            .with_failover("eth_getLogs", |client| {
                let address = address.clone();
                async move { client.get_logs(&address, from, to).await }
            })
            .await
            .with_context(|| format!("scanning blocks {}..={}", from, to))?;

        let mut events = Vec::new();
        for log in &logs {
            match decode_bridge_event(log) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => warn!(
                    "{}: skipping undecodable log in tx {:?}: {:#}",
                    self.chain_name, log.transaction_hash, e
                ),
            }
        }

        debug!(
            "{}: scanned blocks {}..={}, {} events",
            self.chain_name,
            from,
            to,
            events.len()
        );
        Ok(Some(ScanBatch {
            events,
            next_block: to + 1,
        }))
    }

    /// Durably records that all events up to `next_block` were dispatched.
    pub async fn commit(&self, next_block: u64) -> Result<()> {
        self.cursor.save(next_block)?;
        *self.next_block.lock().await = next_block;
        Ok(())
    }

    /// Polling loop. Each batch is handed to `handler` event by event and
    /// committed only after every event succeeded, so a crash mid-batch
    /// replays the whole range.
    pub async fn run<F, Fut>(self: Arc<Self>, handler: F) -> Result<()>
    where
        F: Fn(BridgeEvent) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        info!(
            "{} watcher running ({} confirmations, {} block chunks)",
            self.chain_name, self.confirmations, self.chunk_size
        );
        loop {
            match self.scan().await {
                Ok(Some(batch)) => {
                    let mut failed = false;
                    for event in batch.events {
                        if let Err(e) = handler(event).await {
                            warn!("{}: event dispatch failed: {:#}", self.chain_name, e);
                            failed = true;
                            break;
                        }
                    }
                    if !failed {
                        self.commit(batch.next_block).await?;
                        // More confirmed blocks may be waiting behind the
                        // chunk limit.
                        continue;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("{}: scan failed: {:#}", self.chain_name, e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
