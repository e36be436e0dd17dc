//! Cryptographic Operations Module
//!
//! This module handles the cryptographic operations needed by the oracle:
//! keccak256 hashing, method/event selector derivation, secp256k1 transaction
//! signing with recovery ids, and Ethereum address derivation.
//!
//! ## Security Requirements
//!
//! **CRITICAL**: The signing key authorizes relay transactions on the
//! destination chain. Private keys must never be exposed or logged.

use anyhow::{Context, Result};
use k256::ecdsa::{
    RecoveryId, Signature as EcdsaSignature, SigningKey as EcdsaSigningKey,
    VerifyingKey as EcdsaVerifyingKey,
};
use sha3::{Digest, Keccak256};
use tracing::info;

// ============================================================================
// HASHING HELPERS
// ============================================================================

/// Computes keccak256 of the given bytes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derives the 4-byte method selector from a canonical method-signature
/// string, e.g. `"eth_call(address,bytes)"`.
///
/// The selector is the first 4 bytes of keccak256 over the signature string.
pub fn method_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Derives the full 32-byte event topic from a canonical event-signature
/// string, hex encoded with 0x prefix (as it appears in `eth_getLogs` topics).
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

// ============================================================================
// TRANSACTION SIGNER
// ============================================================================

/// ECDSA signer for destination-chain transactions.
///
/// Holds the secp256k1 signing key for the oracle's signing account and the
/// Ethereum address derived from it.
#[derive(Clone)]
pub struct TxSigner {
    signing_key: EcdsaSigningKey,
    /// Ethereum address of the signing account (lowercase, 0x prefixed)
    address: String,
}

impl TxSigner {
    /// Creates a signer from a hex-encoded 32-byte private key
    /// (with or without 0x prefix).
    pub fn from_hex_key(hex_key: &str) -> Result<Self> {
        let key_clean = hex_key.strip_prefix("0x").unwrap_or(hex_key);
        let key_bytes = hex::decode(key_clean).context("Invalid private key hex")?;

        if key_bytes.len() != 32 {
            return Err(anyhow::anyhow!(
                "Invalid private key length: expected 32 bytes, got {}",
                key_bytes.len()
            ));
        }

        let key_array: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Failed to convert private key to array"))?;

        let signing_key = EcdsaSigningKey::from_bytes(&key_array.into())
            .map_err(|e| anyhow::anyhow!("Failed to create ECDSA signing key: {}", e))?;

        let address = derive_ethereum_address(signing_key.verifying_key())?;

        info!("Transaction signer initialized for account {}", address);

        Ok(Self {
            signing_key,
            address,
        })
    }

    /// Returns the Ethereum address of the signing account.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Signs a precomputed 32-byte hash and returns `(r, s, recovery_id)`.
    ///
    /// The recovery id is determined by recovering the public key from the
    /// signature with both candidate ids and comparing against our own key.
    pub fn sign_prehash(&self, hash: &[u8; 32]) -> Result<([u8; 32], [u8; 32], u8)> {
        use k256::ecdsa::signature::hazmat::PrehashSigner;

        let signature: EcdsaSignature = self
            .signing_key
            .sign_prehash(hash)
            .map_err(|e| anyhow::anyhow!("Failed to sign precomputed hash: {}", e))?;

        let sig_bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&sig_bytes[..32]);
        s.copy_from_slice(&sig_bytes[32..64]);

        let own_key = self.signing_key.verifying_key().to_encoded_point(false);

        for candidate in 0u8..=1 {
            let recid = RecoveryId::try_from(candidate)
                .map_err(|e| anyhow::anyhow!("Invalid recovery id candidate: {}", e))?;
            if let Ok(recovered) =
                EcdsaVerifyingKey::recover_from_prehash(hash, &signature, recid)
            {
                if recovered.to_encoded_point(false) == own_key {
                    return Ok((r, s, candidate));
                }
            }
        }

        Err(anyhow::anyhow!(
            "Failed to determine recovery id for signature"
        ))
    }
}

/// Derives the Ethereum address from a secp256k1 public key:
/// keccak256(uncompressed_public_key)[12..32].
pub fn derive_ethereum_address(verifying_key: &EcdsaVerifyingKey) -> Result<String> {
    let public_key_point = verifying_key.to_encoded_point(false);
    let public_key_bytes = public_key_point.as_bytes();

    // Uncompressed format: 0x04 || x (32 bytes) || y (32 bytes)
    if public_key_bytes.len() != 65 || public_key_bytes[0] != 0x04 {
        return Err(anyhow::anyhow!(
            "Invalid public key format: expected 65 bytes with 0x04 prefix"
        ));
    }

    let hash = keccak256(&public_key_bytes[1..]);
    Ok(format!("0x{}", hex::encode(&hash[12..32])))
}

/// Normalizes an address or message id to lowercase with 0x prefix so that
/// values from different sources compare equal.
pub fn normalize_address(addr: &str) -> String {
    let clean = addr.strip_prefix("0x").unwrap_or(addr);
    format!("0x{}", clean.to_lowercase())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Private key from the EIP-155 example transaction
    const EIP155_KEY: &str = "0x4646464646464646464646464646464646464646464646464646464646464646";

    #[test]
    fn test_method_selector_known_value() {
        // keccak256("transfer(address,uint256)")[..4] == a9059cbb
        assert_eq!(
            method_selector("transfer(address,uint256)"),
            [0xa9, 0x05, 0x9c, 0xbb]
        );
    }

    #[test]
    fn test_event_topic_known_value() {
        assert_eq!(
            event_topic("Transfer(address,address,uint256)"),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_address_derivation() {
        let signer = TxSigner::from_hex_key(EIP155_KEY).unwrap();
        assert_eq!(
            signer.address(),
            "0x9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f"
        );
    }

    #[test]
    fn test_from_hex_key_rejects_bad_length() {
        assert!(TxSigner::from_hex_key("0xabcd").is_err());
    }

    #[test]
    fn test_sign_prehash_recovers_own_key() {
        let signer = TxSigner::from_hex_key(EIP155_KEY).unwrap();
        let hash = keccak256(b"message");
        let (_r, _s, recid) = signer.sign_prehash(&hash).unwrap();
        assert!(recid <= 1);
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("0xABCdef"), "0xabcdef");
        assert_eq!(normalize_address("ABCdef"), "0xabcdef");
    }
}
