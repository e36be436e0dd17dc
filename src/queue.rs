//! Relay Queue Module
//!
//! At-least-once delivery channel between message detection and transaction
//! submission. Two named lanes exist per direction: the prioritized lane all
//! new items land on, and a legacy lane retained only to drain items enqueued
//! before the prioritized migration. Consumption drains the legacy lane
//! first (its items are older), then the prioritized lane in priority order.
//!
//! Items are never dropped: a consumer that fails to process an item puts it
//! back at the front of its lane.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::debug;

use crate::aggregator::Lane;

/// One unit of submission work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub message_id: String,
    pub lane: Lane,
    /// Lower value dequeues first within the prioritized lane
    pub priority: u8,
}

struct Lanes {
    prioritized: VecDeque<QueueItem>,
    legacy: VecDeque<QueueItem>,
}

/// Prioritized + legacy delivery lanes for one direction.
pub struct RelayQueue {
    /// Name of the prioritized lane (e.g. "home-prioritized")
    name: String,
    /// Name of the pre-migration lane (e.g. "home")
    legacy_name: String,
    lanes: Mutex<Lanes>,
}

impl RelayQueue {
    pub fn new(name: &str, legacy_name: &str) -> Self {
        Self {
            name: name.to_string(),
            legacy_name: legacy_name.to_string(),
            lanes: Mutex::new(Lanes {
                prioritized: VecDeque::new(),
                legacy: VecDeque::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn legacy_name(&self) -> &str {
        &self.legacy_name
    }

    /// Enqueues onto the prioritized lane, keeping it ordered by priority.
    pub async fn enqueue(&self, item: QueueItem) {
        let mut lanes = self.lanes.lock().await;
        debug!(
            "enqueue message {} onto {} (priority {})",
            item.message_id, self.name, item.priority
        );
        let pos = lanes
            .prioritized
            .iter()
            .position(|existing| existing.priority > item.priority)
            .unwrap_or(lanes.prioritized.len());
        lanes.prioritized.insert(pos, item);
    }

    /// Seeds the legacy lane. Only used when draining items that were
    /// enqueued before the prioritized migration point.
    pub async fn enqueue_legacy(&self, item: QueueItem) {
        let mut lanes = self.lanes.lock().await;
        debug!(
            "enqueue message {} onto legacy {}",
            item.message_id, self.legacy_name
        );
        lanes.legacy.push_back(item);
    }

    /// Takes the next item: legacy lane first, then prioritized.
    pub async fn dequeue(&self) -> Option<QueueItem> {
        let mut lanes = self.lanes.lock().await;
        lanes
            .legacy
            .pop_front()
            .or_else(|| lanes.prioritized.pop_front())
    }

    /// Returns an item to the front of the prioritized lane after a
    /// processing failure (at-least-once delivery).
    pub async fn requeue(&self, item: QueueItem) {
        let mut lanes = self.lanes.lock().await;
        debug!("requeue message {} onto {}", item.message_id, self.name);
        lanes.prioritized.push_front(item);
    }

    pub async fn len(&self) -> usize {
        let lanes = self.lanes.lock().await;
        lanes.prioritized.len() + lanes.legacy.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// ============================================================================
// TESTS
// ============================================================================
