//! AMB Oracle Service Library
//!
//! This crate provides a cross-chain message relay oracle. It watches bridge
//! contract events, aggregates validator signatures into quorums, answers
//! selector-gated read-only queries, and delivers transactions to the
//! destination bridge with nonce-owned resend and provider failover.

pub mod abi;
pub mod aggregator;
pub mod config;
pub mod crypto;
pub mod executor;
pub mod provider;
pub mod queue;
pub mod relay;
pub mod router;
pub mod rpc;
pub mod sender;
pub mod tx;
pub mod watcher;

// Re-export commonly used types
pub use aggregator::{
    Lane, Message, MessageKind, MessageStatus, MessageStore, SignatureAggregator, ValidatorSet,
};
pub use config::{ChainConfig, Config, OracleConfig, PolicyConfig, QueueConfig, ValidatorConfig};
pub use executor::{AsyncCallExecutor, AsyncCallRequest, AsyncCallResult, SelectorRegistry};
pub use provider::{ProviderPool, ProviderRole, RetryPolicy};
pub use queue::{QueueItem, RelayQueue};
pub use relay::{MessagePipeline, RelayService};
pub use router::{AllowBlockPolicy, LaneRouter, RoutingDecision};
pub use sender::{SenderConfig, TransactionSender};
pub use watcher::{BridgeEvent, CursorStore, EventWatcher, FileCursorStore};
