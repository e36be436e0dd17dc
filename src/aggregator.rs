//! Signature Aggregator Module
//!
//! Tracks every relay message observed on the source chain together with the
//! validator signatures attesting to it, and detects the moment a message
//! first reaches its signature quorum.
//!
//! The signature set is an explicit deduplicating map keyed by validator
//! address: a validator submitting the same signature twice is a no-op, and
//! membership checks are race-free because all store mutations happen under
//! one async mutex (per-message serialization).
//!
//! A message's required signature count is frozen at creation time. Raising
//! or lowering the global threshold afterwards only affects messages created
//! after the change, which isolates in-flight consensus from configuration
//! drift. Removing a validator from the active set never retracts a
//! signature it already submitted.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::executor::AsyncCallResult;
use crate::watcher::RequestCreatedEvent;

// ============================================================================
// MESSAGE MODEL
// ============================================================================

/// Message identifier: 32-byte hash, lowercase hex with 0x prefix,
/// unique per source chain and transaction.
pub type MessageId = String;

/// Routing mode of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lane {
    /// Eligible for unattended relay once quorum and policy pass
    Automatic,
    /// Requires an operator action; never auto-relayed
    Manual,
}

/// Whether the request asks for a message relay or a cross-chain read query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Relay,
    AsyncCall,
}

/// Lifecycle state of a message. Transitions are monotonic: a message never
/// regresses to an earlier state, and terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    Signed,
    Relayed,
    Suppressed,
    Failed,
}

impl MessageStatus {
    fn rank(&self) -> u8 {
        match self {
            MessageStatus::Pending => 0,
            MessageStatus::Signed => 1,
            MessageStatus::Relayed | MessageStatus::Suppressed | MessageStatus::Failed => 2,
        }
    }
}

/// A user-initiated relay request observed on the source chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Source-chain address that initiated the request
    pub sender: String,
    /// Destination-chain contract the message targets
    pub executor: String,
    /// Opaque message payload carried to the destination
    pub payload: Vec<u8>,
    /// Source-chain transaction the request was emitted in
    pub source_tx_hash: String,
    /// Signature quorum frozen at creation; later threshold changes
    /// never affect this message
    pub required_signatures: usize,
    pub lane: Lane,
    pub kind: MessageKind,
    pub status: MessageStatus,
}

/// The active validator set and its current threshold. Mutable over time;
/// only consulted when a message is created.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    pub validators: Vec<String>,
    pub threshold: usize,
}

// ============================================================================
// MESSAGE STORE
// ============================================================================

struct MessageEntry {
    message: Message,
    /// Deduplicating signature set keyed by validator address
    signatures: BTreeMap<String, Vec<u8>>,
    /// Response envelope for async-call messages
    async_result: Option<AsyncCallResult>,
    /// Set once quorum has been announced, so Pending -> Signed fires
    /// exactly once per message
    quorum_announced: bool,
}

struct StoreInner {
    messages: HashMap<MessageId, MessageEntry>,
    /// Signatures seen before their request event (events can interleave
    /// across poll rounds); applied when the request arrives
    early_signatures: HashMap<MessageId, BTreeMap<String, Vec<u8>>>,
}

/// Outcome of recording a signature.
#[derive(Debug)]
pub enum SignatureOutcome {
    /// Signature stored; quorum not reached yet
    Added { count: usize, required: usize },
    /// Same validator already signed this message
    Duplicate,
    /// Message unknown so far; signature buffered
    Buffered,
    /// This signature completed the quorum; message is now Signed
    QuorumReached(Message),
}

/// Shared store of messages, their signature sets, and async-call results.
pub struct MessageStore {
    inner: Mutex<StoreInner>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                messages: HashMap::new(),
                early_signatures: HashMap::new(),
            }),
        }
    }

    /// Inserts a newly observed message. Returns false if the id was already
    /// known (duplicate request event within at-least-once bounds).
    pub async fn insert_message(&self, message: Message) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.messages.contains_key(&message.id) {
            return false;
        }
        let buffered = inner.early_signatures.remove(&message.id).unwrap_or_default();
        inner.messages.insert(
            message.id.clone(),
            MessageEntry {
                message,
                signatures: buffered,
                async_result: None,
                quorum_announced: false,
            },
        );
        true
    }

    /// Records one validator signature for a message. Idempotent per
    /// (message, validator) pair.
    pub async fn add_signature(
        &self,
        message_id: &str,
        validator: &str,
        signature: Vec<u8>,
    ) -> SignatureOutcome {
        let mut inner = self.inner.lock().await;

        let Some(entry) = inner.messages.get_mut(message_id) else {
            inner
                .early_signatures
                .entry(message_id.to_string())
                .or_default()
                .entry(validator.to_string())
                .or_insert(signature);
            return SignatureOutcome::Buffered;
        };

        if entry.signatures.contains_key(validator) {
            return SignatureOutcome::Duplicate;
        }
        entry.signatures.insert(validator.to_string(), signature);

        Self::quorum_outcome(entry)
    }

    /// Re-evaluates quorum for a message, used after buffered signatures are
    /// attached at insert time.
    pub async fn check_quorum(&self, message_id: &str) -> Option<Message> {
        let mut inner = self.inner.lock().await;
        let entry = inner.messages.get_mut(message_id)?;
        match Self::quorum_outcome(entry) {
            SignatureOutcome::QuorumReached(message) => Some(message),
            _ => None,
        }
    }

    fn quorum_outcome(entry: &mut MessageEntry) -> SignatureOutcome {
        let count = entry.signatures.len();
        let required = entry.message.required_signatures;

        if count >= required
            && !entry.quorum_announced
            && entry.message.status == MessageStatus::Pending
        {
            entry.quorum_announced = true;
            entry.message.status = MessageStatus::Signed;
            return SignatureOutcome::QuorumReached(entry.message.clone());
        }
        SignatureOutcome::Added { count, required }
    }

    /// Applies a monotonic status transition. Regressions are ignored and
    /// logged; returns whether the status actually changed.
    pub async fn set_status(&self, message_id: &str, status: MessageStatus) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.messages.get_mut(message_id) else {
            warn!("status update for unknown message {}", message_id);
            return false;
        };
        if status.rank() < entry.message.status.rank() || entry.message.status.rank() == 2 {
            warn!(
                "ignoring status regression for {}: {:?} -> {:?}",
                message_id, entry.message.status, status
            );
            return false;
        }
        if entry.message.status == status {
            return false;
        }
        entry.message.status = status;
        true
    }

    pub async fn get(&self, message_id: &str) -> Option<Message> {
        let inner = self.inner.lock().await;
        inner.messages.get(message_id).map(|e| e.message.clone())
    }

    /// Signatures collected for a message, in deterministic (address) order.
    pub async fn signatures(&self, message_id: &str) -> Vec<(String, Vec<u8>)> {
        let inner = self.inner.lock().await;
        inner
            .messages
            .get(message_id)
            .map(|e| {
                e.signatures
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of distinct validators that signed a message.
    pub async fn signature_count(&self, message_id: &str) -> usize {
        let inner = self.inner.lock().await;
        inner
            .messages
            .get(message_id)
            .map(|e| e.signatures.len())
            .unwrap_or(0)
    }

    pub async fn set_async_result(&self, message_id: &str, result: AsyncCallResult) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.messages.get_mut(message_id) {
            entry.async_result = Some(result);
        }
    }

    pub async fn async_result(&self, message_id: &str) -> Option<AsyncCallResult> {
        let inner = self.inner.lock().await;
        inner
            .messages
            .get(message_id)
            .and_then(|e| e.async_result.clone())
    }
}

// ============================================================================
// SIGNATURE AGGREGATOR
// ============================================================================

/// Aggregates validator signatures per message and detects quorum.
pub struct SignatureAggregator {
    store: Arc<MessageStore>,
    validators: Mutex<ValidatorSet>,
}

impl SignatureAggregator {
    pub fn new(store: Arc<MessageStore>, validators: ValidatorSet) -> Self {
        Self {
            store,
            validators: Mutex::new(validators),
        }
    }

    /// Replaces the active validator set. Affects only messages created
    /// afterwards; in-flight messages keep their frozen quorum.
    pub async fn set_validator_set(&self, validators: ValidatorSet) {
        let mut current = self.validators.lock().await;
        info!(
            "validator set updated: {} validators, threshold {} -> {}",
            validators.validators.len(),
            current.threshold,
            validators.threshold
        );
        *current = validators;
    }

    /// Current threshold, as it would be frozen into a new message.
    pub async fn current_threshold(&self) -> usize {
        self.validators.lock().await.threshold
    }

    /// Creates the message for a newly observed request event. Returns the
    /// message if buffered signatures already completed its quorum.
    pub async fn handle_request(&self, event: &RequestCreatedEvent) -> Option<Message> {
        let required = self.current_threshold().await;
        let message = Message {
            id: event.message_id.clone(),
            sender: event.sender.clone(),
            executor: event.executor.clone(),
            payload: event.payload.clone(),
            source_tx_hash: event.source_tx_hash.clone(),
            required_signatures: required,
            lane: event.lane,
            kind: event.kind,
            status: MessageStatus::Pending,
        };

        if !self.store.insert_message(message).await {
            debug!("duplicate request event for message {}", event.message_id);
            return None;
        }
        info!(
            "message {} created (lane {:?}, {} signatures required)",
            event.message_id, event.lane, required
        );

        // Signatures may have arrived ahead of the request event
        self.store.check_quorum(&event.message_id).await
    }

    /// Records a signature-submitted event. Returns the message exactly once,
    /// at the moment its quorum is first reached.
    pub async fn handle_signature(
        &self,
        message_id: &str,
        validator: &str,
        signature: Vec<u8>,
    ) -> Option<Message> {
        let active = {
            let set = self.validators.lock().await;
            set.validators.iter().any(|v| v == validator)
        };
        if !active {
            debug!(
                "signature from {} for {} is outside the current validator set",
                validator, message_id
            );
        }

        match self
            .store
            .add_signature(message_id, validator, signature)
            .await
        {
            SignatureOutcome::QuorumReached(message) => {
                info!(
                    "message {} reached quorum ({} signatures)",
                    message_id, message.required_signatures
                );
                Some(message)
            }
            SignatureOutcome::Added { count, required } => {
                debug!(
                    "signature {}/{} recorded for message {}",
                    count, required, message_id
                );
                None
            }
            SignatureOutcome::Duplicate => {
                debug!(
                    "duplicate signature from {} for message {}",
                    validator, message_id
                );
                None
            }
            SignatureOutcome::Buffered => {
                debug!(
                    "buffered early signature from {} for message {}",
                    validator, message_id
                );
                None
            }
        }
    }
}
