//! Transaction Sender Module
//!
//! Drains the relay queue and lands each message on the destination bridge.
//! The sender owns its account nonce: it is read from the chain once at
//! startup and allocated locally afterwards, so a resend always reuses the
//! original nonce with a bumped gas price and an identical payload. Whether a
//! transaction took effect is decided by asking the bridge about the message
//! id, never by matching transaction hashes, so a confirmation from any
//! broadcast attempt counts.
//!
//! ## Security Requirements
//!
//! - The broadcast payload must be byte-identical across every endpoint and
//!   resend attempt; only the gas price may change between attempts.
//! - A message that exhausts its resend attempts is parked for manual
//!   intervention and never silently dropped.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::abi::{self, Token};
use crate::aggregator::{MessageKind, MessageStore, MessageStatus};
use crate::crypto::{method_selector, TxSigner};
use crate::provider::ProviderPool;
use crate::queue::{QueueItem, RelayQueue};
use crate::rpc::{BlockTag, CallRequest, RpcError};
use crate::tx::LegacyTransaction;

/// Bridge method executing a quorum of validator signatures.
const EXECUTE_SIGNATURES: &str = "executeSignatures(bytes,bytes)";

/// Bridge method delivering an async call response.
const CONFIRM_INFORMATION: &str = "confirmInformation(bytes32,bool,bytes)";

/// Bridge view reporting whether a message id has been processed.
const RELAYED_MESSAGES: &str = "relayedMessages(bytes32)";

/// A message that exhausted its resend attempts and needs an operator.
#[derive(Debug, Clone)]
pub struct StalledItem {
    pub message_id: String,
    pub nonce: u64,
    pub last_gas_price: u128,
    pub attempts: u32,
    pub stalled_at: u64,
}

pub struct SenderConfig {
    pub chain_id: u64,
    pub gas_limit: u64,
    /// Percentage added to the gas price on every resend.
    pub gas_price_bump_percent: u128,
    pub resend_interval: Duration,
    pub max_resend_attempts: u32,
    pub idle_poll_interval: Duration,
}

pub struct TransactionSender {
    chain_name: String,
    pool: Arc<ProviderPool>,
    signer: TxSigner,
    bridge_address: String,
    config: SenderConfig,
    store: Arc<MessageStore>,
    queue: Arc<RelayQueue>,
    nonce: Mutex<Option<u64>>,
    stalled: Mutex<Vec<StalledItem>>,
}

impl TransactionSender {
    pub fn new(
        chain_name: impl Into<String>,
        pool: Arc<ProviderPool>,
        signer: TxSigner,
        bridge_address: impl Into<String>,
        config: SenderConfig,
        store: Arc<MessageStore>,
        queue: Arc<RelayQueue>,
    ) -> Self {
        Self {
            chain_name: chain_name.into(),
            pool,
            signer,
            bridge_address: bridge_address.into(),
            config,
            store,
            queue,
            nonce: Mutex::new(None),
            stalled: Mutex::new(Vec::new()),
        }
    }

    /// Messages currently parked for manual intervention.
    pub async fn stalled_items(&self) -> Vec<StalledItem> {
        self.stalled.lock().await.clone()
    }

    /// Queue-draining loop.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(
            "{} sender running as {} against bridge {}",
            self.chain_name,
            self.signer.address(),
            self.bridge_address
        );
        loop {
            match self.queue.dequeue().await {
                Some(item) => self.deliver(item).await,
                None => tokio::time::sleep(self.config.idle_poll_interval).await,
            }
        }
    }

    /// Processes one dequeued item. A failed delivery puts the item back on
    /// the queue (at-least-once) and backs off before the next dequeue.
    pub async fn deliver(&self, item: QueueItem) {
        if let Err(e) = self.process(&item).await {
            warn!(
                "{}: delivery of message {} failed, requeueing: {:#}",
                self.chain_name, item.message_id, e
            );
            self.queue.requeue(item).await;
            tokio::time::sleep(self.config.resend_interval).await;
        }
    }

    /// Delivers one queued message: build calldata, broadcast, and resend
    /// with the same nonce and a bumped gas price until the bridge reports
    /// the message id as relayed or the attempt ceiling is hit.
    pub async fn process(&self, item: &QueueItem) -> Result<()> {
        let message = self
            .store
            .get(&item.message_id)
            .await
            .with_context(|| format!("message {} not in store", item.message_id))?;

        // A restart may replay an already-delivered message.
        if self.is_relayed(&message.id).await? {
            info!(
                "{}: message {} already relayed, skipping",
                self.chain_name, message.id
            );
            self.store.set_status(&message.id, MessageStatus::Relayed).await;
            return Ok(());
        }

        let calldata = self.build_calldata(&message.id, message.kind).await?;
        let nonce = self.current_nonce().await?;
        let mut gas_price = self
            .pool
            .with_failover("eth_gasPrice", |client| async move {
                client.gas_price().await
            })
            .await
            .context("fetching gas price")?;

        for attempt in 1..=self.config.max_resend_attempts {
            let tx = LegacyTransaction {
                nonce,
                gas_price,
                gas_limit: self.config.gas_limit,
                to: parse_address(&self.bridge_address)?,
                value: 0,
                data: calldata.clone(),
            };
            let signed = tx
                .sign(self.config.chain_id, &self.signer)
                .context("signing relay transaction")?;

            debug!(
                "{}: broadcasting message {} (attempt {}, nonce {}, gas price {}) as {}",
                self.chain_name,
                message.id,
                attempt,
                nonce,
                gas_price,
                signed.hash_hex()
            );
            self.broadcast(signed.raw_hex()).await?;
            // The nonce is occupied only once a node has accepted the bytes.
            self.commit_nonce(nonce).await;

            tokio::time::sleep(self.config.resend_interval).await;

            if self.is_relayed(&message.id).await? {
                info!(
                    "{}: message {} relayed after {} attempt(s)",
                    self.chain_name, message.id, attempt
                );
                self.store.set_status(&message.id, MessageStatus::Relayed).await;
                return Ok(());
            }

            gas_price += gas_price * self.config.gas_price_bump_percent / 100;
        }

        error!(
            "{}: message {} unconfirmed after {} attempts (nonce {}), manual intervention required",
            self.chain_name, message.id, self.config.max_resend_attempts, nonce
        );
        self.stalled.lock().await.push(StalledItem {
            message_id: message.id.clone(),
            nonce,
            last_gas_price: gas_price,
            attempts: self.config.max_resend_attempts,
            stalled_at: chrono::Utc::now().timestamp() as u64,
        });
        self.store.set_status(&message.id, MessageStatus::Failed).await;
        Ok(())
    }

    /// Builds the bridge calldata for a message.
    async fn build_calldata(&self, message_id: &str, kind: MessageKind) -> Result<Vec<u8>> {
        match kind {
            MessageKind::Relay => {
                let message = self
                    .store
                    .get(message_id)
                    .await
                    .with_context(|| format!("message {} not in store", message_id))?;
                let signatures: Vec<Vec<u8>> = self
                    .store
                    .signatures(message_id)
                    .await
                    .into_iter()
                    .map(|(_, sig)| sig)
                    .collect();
                if signatures.len() < message.required_signatures {
                    bail!(
                        "message {} has {} of {} required signatures",
                        message_id,
                        signatures.len(),
                        message.required_signatures
                    );
                }
                let packed = pack_signatures(&signatures)?;
                let mut calldata = method_selector(EXECUTE_SIGNATURES).to_vec();
                calldata.extend_from_slice(&abi::encode(&[
                    Token::Bytes(message.payload.clone()),
                    Token::Bytes(packed),
                ]));
                Ok(calldata)
            }
            MessageKind::AsyncCall => {
                let result = self
                    .store
                    .async_result(message_id)
                    .await
                    .with_context(|| format!("message {} has no call result", message_id))?;
                let id_token = Token::bytes32(message_id)
                    .map_err(|e| anyhow::anyhow!("bad message id {}: {}", message_id, e))?;
                let mut calldata = method_selector(CONFIRM_INFORMATION).to_vec();
                calldata.extend_from_slice(&abi::encode(&[
                    id_token,
                    Token::boolean(result.status),
                    Token::Bytes(result.data.unwrap_or_default()),
                ]));
                Ok(calldata)
            }
        }
    }

    /// Broadcasts raw bytes across the provider pool. Node responses that
    /// only mean "this exact transaction is already in flight" are not
    /// failures; the confirmation poll decides the outcome.
    async fn broadcast(&self, raw_hex: String) -> Result<()> {
        let result = self
            .pool
            .with_failover("eth_sendRawTransaction", |client| {
                let raw = raw_hex.clone();
                async move { client.send_raw_transaction(&raw).await }
            })
            .await;

        match result {
            Ok(hash) => {
                debug!("{}: broadcast accepted as {}", self.chain_name, hash);
                Ok(())
            }
            Err(e) if is_benign_broadcast_error(&e) => {
                debug!("{}: broadcast already in flight: {}", self.chain_name, e);
                Ok(())
            }
            Err(e) => Err(e).context("broadcasting transaction"),
        }
    }

    /// Asks the destination bridge whether the message id was processed.
    async fn is_relayed(&self, message_id: &str) -> Result<bool> {
        let id_word = abi::quantity_to_word(message_id)
            .map_err(|e| anyhow::anyhow!("bad message id {}: {}", message_id, e))?;
        let mut data = method_selector(RELAYED_MESSAGES).to_vec();
        data.extend_from_slice(&id_word);

        let request = CallRequest {
            to: self.bridge_address.clone(),
            data,
            from: None,
            gas: None,
        };
        let result = self
            .pool
            .with_failover("eth_call", |client| {
                let request = request.clone();
                async move { client.call(&request, BlockTag::Latest).await }
            })
            .await
            .context("querying relayedMessages")?;

        Ok(result.iter().any(|b| *b != 0))
    }

    /// Nonce the next transaction will use, reading the chain only on first
    /// use. Not consumed until a broadcast is accepted (`commit_nonce`), so a
    /// delivery that never reaches a node leaves no gap behind it.
    async fn current_nonce(&self) -> Result<u64> {
        let mut guard = self.nonce.lock().await;
        let current = match *guard {
            Some(current) => current,
            None => {
                let address = self.signer.address().to_string();
                let onchain = self
                    .pool
                    .with_failover("eth_getTransactionCount", |client| {
                        let address = address.clone();
                        async move {
                            client.get_transaction_count(&address, BlockTag::Latest).await
                        }
                    })
                    .await
                    .context("reading initial nonce")?;
                info!("{}: starting nonce {}", self.chain_name, onchain);
                *guard = Some(onchain);
                onchain
            }
        };
        Ok(current)
    }

    /// Marks a nonce as occupied by an accepted broadcast.
    async fn commit_nonce(&self, used: u64) {
        let mut guard = self.nonce.lock().await;
        *guard = Some(used + 1);
    }
}

/// Packs quorum signatures into the bridge's compact layout:
/// one count byte, then all v bytes, all r words, all s words.
///
/// # Arguments
/// * `signatures` - 65-byte `r || s || v` signatures in validator order
pub fn pack_signatures(signatures: &[Vec<u8>]) -> Result<Vec<u8>> {
    if signatures.is_empty() || signatures.len() > u8::MAX as usize {
        bail!("cannot pack {} signatures", signatures.len());
    }
    for (i, sig) in signatures.iter().enumerate() {
        if sig.len() != 65 {
            bail!("signature {} is {} bytes, expected 65", i, sig.len());
        }
    }

    let mut packed = Vec::with_capacity(1 + signatures.len() * 65);
    packed.push(signatures.len() as u8);
    for sig in signatures {
        packed.push(sig[64]);
    }
    for sig in signatures {
        packed.extend_from_slice(&sig[..32]);
    }
    for sig in signatures {
        packed.extend_from_slice(&sig[32..64]);
    }
    Ok(packed)
}

fn parse_address(address: &str) -> Result<[u8; 20]> {
    let clean = address.strip_prefix("0x").unwrap_or(address);
    let bytes = hex::decode(clean).with_context(|| format!("bad address {}", address))?;
    let array: [u8; 20] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("address {} is not 20 bytes", address))?;
    Ok(array)
}

fn is_benign_broadcast_error(error: &RpcError) -> bool {
    match error {
        RpcError::Rpc { message, .. } => {
            let lower = message.to_lowercase();
            lower.contains("already known")
                || lower.contains("known transaction")
                || lower.contains("nonce too low")
                || lower.contains("replacement transaction underpriced")
        }
        _ => false,
    }
}

// ============================================================================
// TESTS
// ============================================================================
