//! Transaction Building Module
//!
//! Legacy (pre-EIP-1559) transaction construction: RLP encoding, EIP-155
//! signing hashes, and raw signed bytes ready for `eth_sendRawTransaction`.
//!
//! Resend-on-stall rebuilds the same calldata with a higher gas price, so the
//! calldata is kept separate from fee parameters here: only `gas_price`
//! changes between attempts.

use anyhow::{Context, Result};

use crate::crypto::{keccak256, TxSigner};

// ============================================================================
// RLP ENCODING
// ============================================================================

/// RLP-encodes a byte string.
fn rlp_bytes(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        return data.to_vec();
    }
    let mut out = rlp_length_prefix(data.len(), 0x80);
    out.extend_from_slice(data);
    out
}

/// RLP-encodes an unsigned integer as a minimal big-endian byte string.
fn rlp_uint(value: u128) -> Vec<u8> {
    if value == 0 {
        return vec![0x80];
    }
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(15);
    rlp_bytes(&bytes[first..])
}

/// RLP-encodes a list from already-encoded items.
fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload: Vec<u8> = items.iter().flatten().copied().collect();
    let mut out = rlp_length_prefix(payload.len(), 0xc0);
    out.extend_from_slice(&payload);
    out
}

fn rlp_length_prefix(len: usize, base: u8) -> Vec<u8> {
    if len <= 55 {
        vec![base + len as u8]
    } else {
        let len_bytes = (len as u64).to_be_bytes();
        let first = len_bytes.iter().position(|b| *b != 0).unwrap_or(7);
        let mut out = vec![base + 55 + (8 - first) as u8];
        out.extend_from_slice(&len_bytes[first..]);
        out
    }
}

// ============================================================================
// LEGACY TRANSACTION
// ============================================================================

/// A legacy destination-chain transaction prior to signing.
#[derive(Debug, Clone)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    /// Recipient contract address (20 bytes)
    pub to: [u8; 20],
    pub value: u128,
    pub data: Vec<u8>,
}

/// A signed transaction ready for broadcast.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    /// Raw RLP bytes for `eth_sendRawTransaction`
    pub raw: Vec<u8>,
    /// Transaction hash (keccak256 of the raw bytes)
    pub hash: [u8; 32],
}

impl SignedTransaction {
    /// Raw bytes as a 0x-prefixed hex string.
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }

    /// Transaction hash as a 0x-prefixed hex string.
    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.hash))
    }
}

impl LegacyTransaction {
    /// Computes the EIP-155 signing hash:
    /// keccak256(rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0])).
    pub fn signing_hash(&self, chain_id: u64) -> [u8; 32] {
        let items = vec![
            rlp_uint(self.nonce as u128),
            rlp_uint(self.gas_price),
            rlp_uint(self.gas_limit as u128),
            rlp_bytes(&self.to),
            rlp_uint(self.value),
            rlp_bytes(&self.data),
            rlp_uint(chain_id as u128),
            rlp_uint(0),
            rlp_uint(0),
        ];
        keccak256(&rlp_list(&items))
    }

    /// Signs the transaction with EIP-155 replay protection and returns the
    /// raw bytes plus the resulting transaction hash.
    pub fn sign(&self, chain_id: u64, signer: &TxSigner) -> Result<SignedTransaction> {
        let hash = self.signing_hash(chain_id);
        let (r, s, recovery_id) = signer
            .sign_prehash(&hash)
            .context("Failed to sign transaction hash")?;

        let v = u64::from(recovery_id) + 35 + 2 * chain_id;

        let r_trimmed = trim_leading_zeros(&r);
        let s_trimmed = trim_leading_zeros(&s);

        let items = vec![
            rlp_uint(self.nonce as u128),
            rlp_uint(self.gas_price),
            rlp_uint(self.gas_limit as u128),
            rlp_bytes(&self.to),
            rlp_uint(self.value),
            rlp_bytes(&self.data),
            rlp_uint(v as u128),
            rlp_bytes(r_trimmed),
            rlp_bytes(s_trimmed),
        ];
        let raw = rlp_list(&items);
        let tx_hash = keccak256(&raw);

        Ok(SignedTransaction { raw, hash: tx_hash })
    }
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

// ============================================================================
// TESTS
// ============================================================================
