//! Provider Pool Module
//!
//! Each chain is reached through a pool of JSON-RPC endpoints tagged with one
//! of three roles: primary, redundant, fallback. Operations run against the
//! primary first; transient failures are retried on the same endpoint with
//! exponential backoff before escalating to the next role, while unreachable
//! endpoints are skipped immediately. Definitive node-side errors (reverts,
//! unknown blocks) are returned to the caller without failover.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::rpc::{RpcClient, RpcError};

// ============================================================================
// ENDPOINT ROLES
// ============================================================================

/// Failover position of an endpoint. Order is fixed:
/// primary, then redundant, then fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProviderRole {
    Primary,
    Redundant,
    Fallback,
}

impl ProviderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderRole::Primary => "primary",
            ProviderRole::Redundant => "redundant",
            ProviderRole::Fallback => "fallback",
        }
    }
}

/// One JSON-RPC endpoint with its role and last observed health.
pub struct ProviderEndpoint {
    pub url: String,
    pub role: ProviderRole,
    client: RpcClient,
    healthy: AtomicBool,
}

impl ProviderEndpoint {
    /// Last recorded health-check outcome.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Same-endpoint retry parameters for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per endpoint before escalating to the next role
    pub max_attempts: u32,
    /// Initial backoff delay; doubles per retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

// ============================================================================
// PROVIDER POOL
// ============================================================================

/// Role-ordered pool of endpoints for one chain.
pub struct ProviderPool {
    chain_name: String,
    endpoints: Vec<ProviderEndpoint>,
    retry: RetryPolicy,
}

impl ProviderPool {
    /// Builds a pool from role-tagged URLs. At least the primary URL is
    /// required; endpoints are kept in failover order.
    pub fn new(
        chain_name: &str,
        primary: &str,
        redundant: Option<&str>,
        fallback: Option<&str>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, RpcError> {
        let mut endpoints = vec![ProviderEndpoint {
            url: primary.to_string(),
            role: ProviderRole::Primary,
            client: RpcClient::new(primary, timeout)?,
            healthy: AtomicBool::new(true),
        }];
        if let Some(url) = redundant {
            endpoints.push(ProviderEndpoint {
                url: url.to_string(),
                role: ProviderRole::Redundant,
                client: RpcClient::new(url, timeout)?,
                healthy: AtomicBool::new(true),
            });
        }
        if let Some(url) = fallback {
            endpoints.push(ProviderEndpoint {
                url: url.to_string(),
                role: ProviderRole::Fallback,
                client: RpcClient::new(url, timeout)?,
                healthy: AtomicBool::new(true),
            });
        }

        Ok(Self {
            chain_name: chain_name.to_string(),
            endpoints,
            retry,
        })
    }

    /// Chain this pool serves.
    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    /// Endpoints in failover order.
    pub fn endpoints(&self) -> &[ProviderEndpoint] {
        &self.endpoints
    }

    /// Runs an operation with same-endpoint backoff for transient errors and
    /// role-order failover for endpoint failures. Definitive node-side errors
    /// are returned immediately without trying other endpoints: a revert on
    /// the primary would revert everywhere.
    pub async fn with_failover<T, F, Fut>(&self, op: &str, f: F) -> Result<T, RpcError>
    where
        F: Fn(RpcClient) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut last_error: Option<RpcError> = None;

        for endpoint in &self.endpoints {
            let mut delay = self.retry.base_delay;

            for attempt in 1..=self.retry.max_attempts {
                match f(endpoint.client.clone()).await {
                    Ok(value) => {
                        endpoint.healthy.store(true, Ordering::Relaxed);
                        return Ok(value);
                    }
                    Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                        debug!(
                            "{}: transient {} failure on {} endpoint (attempt {}): {}",
                            self.chain_name,
                            op,
                            endpoint.role.as_str(),
                            attempt,
                            e
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                    Err(e) if e.is_transient() || e.is_unavailable() => {
                        warn!(
                            "{}: {} endpoint {} failed for {}, escalating: {}",
                            self.chain_name,
                            endpoint.role.as_str(),
                            endpoint.url,
                            op,
                            e
                        );
                        endpoint.healthy.store(false, Ordering::Relaxed);
                        last_error = Some(e);
                        break;
                    }
                    // Definitive node-side outcome
                    Err(e) => return Err(e),
                }
            }
        }

        Err(last_error.unwrap_or(RpcError::Unavailable {
            url: String::new(),
            reason: format!("no endpoints configured for {}", self.chain_name),
        }))
    }

    /// Pings every endpoint with `eth_blockNumber` and records its health.
    pub async fn health_check(&self) -> Vec<(String, bool)> {
        let mut results = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            let ok = endpoint.client.block_number().await.is_ok();
            endpoint.healthy.store(ok, Ordering::Relaxed);
            if !ok {
                warn!(
                    "{}: {} endpoint {} failed health check",
                    self.chain_name,
                    endpoint.role.as_str(),
                    endpoint.url
                );
            }
            results.push((endpoint.url.clone(), ok));
        }
        results
    }
}
