//! ECDSA Key Generation Utility
//!
//! This binary generates a new secp256k1 key pair for the oracle account.
//!
//! ## Usage
//!
//! ```bash
//! # Generate a new key
//! cargo run --bin generate_keys
//!
//! # Export the private key before starting the service
//! export AMB_ORACLE_PRIVATE_KEY=<private key>
//! ```
//!
//! ## Output
//!
//! The script outputs:
//! - Private key (hex encoded) - for transaction signing
//! - Ethereum address - fund this account on both chains

use k256::ecdsa::SigningKey;
use rand::Rng;

use amb_oracle::crypto::derive_ethereum_address;

fn main() -> anyhow::Result<()> {
    let mut rng = rand::rngs::OsRng;
    let mut secret_key_bytes = [0u8; 32];
    rng.fill(&mut secret_key_bytes);
    let signing_key = SigningKey::from_bytes(&secret_key_bytes.into())
        .map_err(|e| anyhow::anyhow!("Failed to create ECDSA signing key: {}", e))?;
    let address = derive_ethereum_address(signing_key.verifying_key())?;

    println!("Generated secp256k1 Key Pair:");
    println!("Private Key (hex): 0x{}", hex::encode(secret_key_bytes));
    println!("Oracle Address: {}", address);
    println!();
    println!("Export the private key as AMB_ORACLE_PRIVATE_KEY before starting the service.");
    Ok(())
}
