//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the oracle
//! service. Configuration includes chain endpoints, bridge addresses,
//! delivery tuning, the address policy, and the validator set.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::crypto::normalize_address;

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
///
/// This structure holds configuration for:
/// - The home chain (where requests and validator signatures are observed)
/// - The foreign chain (the counterpart the oracle relays to and from)
/// - Oracle account, delivery, and RPC settings
/// - Address policy and validator set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Home chain configuration
    pub home_chain: ChainConfig,
    /// Foreign chain configuration
    pub foreign_chain: ChainConfig,
    /// Oracle account and delivery settings
    pub oracle: OracleConfig,
    /// Sender allow/block policy
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Relay queue lane names
    #[serde(default)]
    pub queue: QueueConfig,
    /// Validator set the signature quorum is drawn from
    pub validators: ValidatorConfig,
}

/// Configuration for one watched chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// Primary RPC endpoint URL
    pub rpc_primary_url: String,
    /// Redundant RPC endpoint, tried when the primary is unreachable
    #[serde(default)]
    pub rpc_redundant_url: Option<String>,
    /// Fallback RPC endpoint, tried last
    #[serde(default)]
    pub rpc_fallback_url: Option<String>,
    /// Unique chain identifier used for transaction signing
    pub chain_id: u64,
    /// Address of the bridge contract
    pub bridge_address: String,
    /// Blocks to stay behind the head before acting on an event
    pub confirmations: u64,
    /// Polling interval for event monitoring in milliseconds
    pub polling_interval_ms: u64,
    /// First block to scan when no cursor has been saved yet
    #[serde(default)]
    pub start_block: u64,
    /// Maximum blocks per `eth_getLogs` scan
    #[serde(default = "default_chunk_size")]
    pub max_blocks_per_scan: u64,
    /// File the block cursor is persisted in
    pub cursor_path: String,
}

fn default_chunk_size() -> u64 {
    1000
}

/// Oracle configuration including the signing key and delivery tuning.
///
/// Keys are loaded from an environment variable at runtime for security.
/// The config file contains the environment variable name, not the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Environment variable name containing the hex-encoded ECDSA private key
    /// Default: "AMB_ORACLE_PRIVATE_KEY"
    #[serde(default = "default_signer_key_env")]
    pub signer_key_env: String,
    /// Gas limit for relay transactions
    pub gas_limit: u64,
    /// Percentage added to the gas price on every resend
    #[serde(default = "default_gas_price_bump_percent")]
    pub gas_price_bump_percent: u64,
    /// Time to wait for confirmation before resending, in milliseconds
    pub resend_interval_ms: u64,
    /// Resend attempts before a message is parked for manual intervention
    #[serde(default = "default_max_resend_attempts")]
    pub max_resend_attempts: u32,
    /// Timeout for a single RPC request in milliseconds
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    /// Attempts per endpoint before failing over for transient errors
    #[serde(default = "default_rpc_max_retries")]
    pub rpc_max_retries: u32,
}

fn default_signer_key_env() -> String {
    "AMB_ORACLE_PRIVATE_KEY".to_string()
}

fn default_gas_price_bump_percent() -> u64 {
    10
}

fn default_max_resend_attempts() -> u32 {
    5
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

fn default_rpc_max_retries() -> u32 {
    3
}

impl OracleConfig {
    /// Loads the signing key from the environment variable.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The private key (hex encoded)
    /// * `Err(anyhow::Error)` - Failed to load from environment
    pub fn get_signer_key(&self) -> anyhow::Result<String> {
        std::env::var(&self.signer_key_env).map_err(|_| {
            anyhow::anyhow!(
                "Environment variable '{}' not set. Please set it with your ECDSA private key (hex encoded).",
                self.signer_key_env
            )
        })
    }
}

/// Addresses whose messages the router suppresses instead of relaying.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub blocked_addresses: Vec<String>,
}

/// Names of the durable relay queue lanes, one pair per direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_home_lane")]
    pub home_lane: String,
    #[serde(default = "default_home_legacy_lane")]
    pub home_legacy_lane: String,
    #[serde(default = "default_foreign_lane")]
    pub foreign_lane: String,
    #[serde(default = "default_foreign_legacy_lane")]
    pub foreign_legacy_lane: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            home_lane: default_home_lane(),
            home_legacy_lane: default_home_legacy_lane(),
            foreign_lane: default_foreign_lane(),
            foreign_legacy_lane: default_foreign_legacy_lane(),
        }
    }
}

fn default_home_lane() -> String {
    "home-prioritized".to_string()
}

fn default_home_legacy_lane() -> String {
    "home".to_string()
}

fn default_foreign_lane() -> String {
    "foreign-prioritized".to_string()
}

fn default_foreign_legacy_lane() -> String {
    "foreign".to_string()
}

/// The validator set signatures are accepted from, with the quorum size
/// frozen into each message at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Validator addresses (hex, 20 bytes each)
    pub addresses: Vec<String>,
    /// Signatures required before a message is relayed
    pub required_signatures: usize,
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Validates the configuration.
    ///
    /// This function ensures that:
    /// - Home and foreign chains have distinct chain IDs
    /// - Bridge, validator, and blocked addresses are well-formed
    /// - The required quorum is satisfiable by the validator set
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(anyhow::Error)` - Validation failed
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.home_chain.chain_id == self.foreign_chain.chain_id {
            return Err(anyhow::anyhow!(
                "Configuration error: home and foreign chain have the same chain ID {}. Each chain must have a unique chain ID.",
                self.home_chain.chain_id
            ));
        }

        for chain in [&self.home_chain, &self.foreign_chain] {
            validate_address(&chain.bridge_address)
                .map_err(|e| anyhow::anyhow!("bridge address for '{}': {}", chain.name, e))?;
        }

        if self.validators.addresses.is_empty() {
            return Err(anyhow::anyhow!(
                "Configuration error: the validator set is empty."
            ));
        }
        if self.validators.required_signatures == 0
            || self.validators.required_signatures > self.validators.addresses.len()
        {
            return Err(anyhow::anyhow!(
                "Configuration error: required_signatures is {} but the validator set has {} members.",
                self.validators.required_signatures,
                self.validators.addresses.len()
            ));
        }

        let mut seen = HashSet::new();
        for address in &self.validators.addresses {
            validate_address(address)
                .map_err(|e| anyhow::anyhow!("validator address: {}", e))?;
            if !seen.insert(normalize_address(address)) {
                return Err(anyhow::anyhow!(
                    "Configuration error: duplicate validator address {}.",
                    address
                ));
            }
        }

        for address in &self.policy.blocked_addresses {
            validate_address(address)
                .map_err(|e| anyhow::anyhow!("blocked address: {}", e))?;
        }

        if self.oracle.max_resend_attempts == 0 {
            return Err(anyhow::anyhow!(
                "Configuration error: max_resend_attempts must be at least 1."
            ));
        }

        Ok(())
    }

    /// Loads configuration from the TOML file.
    ///
    /// This function:
    /// 1. Checks if config/amb-oracle.toml exists (or the path in
    ///    AMB_ORACLE_CONFIG_PATH)
    /// 2. If it exists, loads and parses the configuration
    /// 3. Validates the configuration
    /// 4. If it doesn't exist, returns an error asking user to copy template
    ///
    /// # Returns
    ///
    /// - `Ok(Config)` - Successfully loaded and validated configuration
    /// - `Err(anyhow::Error)` - Failed to load configuration, file doesn't exist, or validation failed
    pub fn load() -> anyhow::Result<Self> {
        // Check for custom config path via environment variable (for tests)
        let config_path = std::env::var("AMB_ORACLE_CONFIG_PATH")
            .unwrap_or_else(|_| "config/amb-oracle.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/amb-oracle.template.toml config/amb-oracle.toml\n\
                Then edit config/amb-oracle.toml with your actual values.",
                config_path
            ))
        }
    }
}

fn validate_address(address: &str) -> anyhow::Result<()> {
    let clean = address.strip_prefix("0x").unwrap_or(address);
    let bytes = hex::decode(clean)
        .map_err(|_| anyhow::anyhow!("'{}' is not valid hex", address))?;
    if bytes.len() != 20 {
        return Err(anyhow::anyhow!(
            "'{}' is {} bytes, expected 20",
            address,
            bytes.len()
        ));
    }
    Ok(())
}
