//! Lane Router Module
//!
//! Decides what happens to a message once its signature quorum is complete.
//! Automatic relay is a privilege, not a right: a message that collected its
//! signatures can still be held on the manual lane (operator action required)
//! or suppressed by the allow/block policy. Signature collection itself is
//! never gated here - a blocked or manual message keeps its recorded
//! signatures.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregator::{Lane, Message, MessageStatus, MessageStore};
use crate::crypto::normalize_address;
use crate::queue::{QueueItem, RelayQueue};

/// Read-only block policy: an address present in the set must never trigger
/// an automatic relay, whether it appears as sender or executor. Absence
/// means "not blocked".
#[derive(Debug, Clone, Default)]
pub struct AllowBlockPolicy {
    blocked: HashSet<String>,
}

impl AllowBlockPolicy {
    /// Builds the policy from externally supplied addresses, normalizing so
    /// lookups are case-insensitive.
    pub fn new(blocked_addresses: &[String]) -> Self {
        Self {
            blocked: blocked_addresses
                .iter()
                .map(|a| normalize_address(a))
                .collect(),
        }
    }

    pub fn is_blocked(&self, address: &str) -> bool {
        self.blocked.contains(&normalize_address(address))
    }
}

/// Routing outcome for a quorum-complete message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Manual lane: stays Signed until an operator acts
    HeldForOperator,
    /// Sender or executor is blocked; message suppressed
    Suppressed,
    /// Enqueued for automatic submission
    Enqueued,
}

/// Routes Signed messages to the submission queue, the manual-lane hold, or
/// suppression.
pub struct LaneRouter {
    policy: AllowBlockPolicy,
    store: Arc<MessageStore>,
    queue: Arc<RelayQueue>,
}

impl LaneRouter {
    pub fn new(policy: AllowBlockPolicy, store: Arc<MessageStore>, queue: Arc<RelayQueue>) -> Self {
        Self {
            policy,
            store,
            queue,
        }
    }

    /// Classifies a message that just reached quorum.
    pub async fn route(&self, message: &Message) -> RoutingDecision {
        if message.lane == Lane::Manual {
            info!(
                "message {} is on the manual lane; waiting for operator action",
                message.id
            );
            return RoutingDecision::HeldForOperator;
        }

        if self.policy.is_blocked(&message.sender) || self.policy.is_blocked(&message.executor) {
            warn!(
                "message {} suppressed: sender {} or executor {} is blocked",
                message.id, message.sender, message.executor
            );
            self.store
                .set_status(&message.id, MessageStatus::Suppressed)
                .await;
            return RoutingDecision::Suppressed;
        }

        self.queue
            .enqueue(QueueItem {
                message_id: message.id.clone(),
                lane: message.lane,
                priority: 0,
            })
            .await;
        info!("message {} enqueued for submission", message.id);
        RoutingDecision::Enqueued
    }
}
