//! AMB Oracle Service
//!
//! A cross-chain message relay oracle that watches bridge events on two
//! chains, collects validator signatures into quorums, and delivers the
//! resulting transactions to the counterpart bridge.
//!
//! ## Overview
//!
//! The oracle:
//! 1. Watches for request and signature events on both bridge contracts
//! 2. Relays messages once their frozen signature quorum is reached
//! 3. Answers selector-gated read-only queries from async call requests
//! 4. Resends unconfirmed transactions with the same nonce and a bumped
//!    gas price, failing over across redundant RPC endpoints
//!
//! ## Security Requirements
//!
//! **CRITICAL**: This service holds the oracle account key and submits
//! transactions on both chains. Ensure proper key management and access
//! controls for production use.

use anyhow::Result;
use tracing::info;

use amb_oracle::config::Config;
use amb_oracle::relay::RelayService;

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

/// Main application entry point that initializes and runs the oracle.
///
/// This function:
/// 1. Initializes logging and tracing
/// 2. Loads configuration from TOML file
/// 3. Initializes the relay service
/// 4. Runs the service until shutdown
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging for debugging and monitoring
    tracing_subscriber::fmt::init();

    info!("Starting AMB Oracle Service");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("AMB Oracle Service");
        println!();
        println!("Usage: amb-oracle [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --config <path>   Use custom config file path");
        println!("  --help, -h        Show this help message");
        println!();
        println!("Environment variables:");
        println!("  AMB_ORACLE_CONFIG_PATH    Path to config file (overrides --config)");
        println!("  AMB_ORACLE_PRIVATE_KEY    Oracle account key (hex), unless renamed in config");
        return Ok(());
    }

    let mut config_path = None;
    let mut i = 1; // Skip program name
    while i < args.len() {
        if args[i] == "--config" && i + 1 < args.len() {
            config_path = Some(args[i + 1].clone());
            i += 1;
        }
        i += 1;
    }
    if let Some(path) = config_path {
        if std::env::var("AMB_ORACLE_CONFIG_PATH").is_err() {
            std::env::set_var("AMB_ORACLE_CONFIG_PATH", &path);
            info!("Using custom config: {}", path);
        }
    }

    // Load configuration from config/amb-oracle.toml (or AMB_ORACLE_CONFIG_PATH)
    let config = Config::load()?;
    info!("Configuration loaded successfully");

    let service = RelayService::new(&config)?;
    info!("Relay service initialized successfully");

    // Run the service (this blocks until shutdown)
    service.run().await
}
