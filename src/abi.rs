//! Minimal ABI Codec Module
//!
//! Encoding and decoding for the ABI shapes the oracle actually exchanges
//! with bridge contracts: 32-byte static words (uint/address/bytes32/bool),
//! dynamic `bytes`, and the nested tuple/array envelopes returned by the
//! async-call executor (transaction and receipt results).
//!
//! Decoding is strict: out-of-bounds offsets and truncated words are reported
//! as errors so malformed request arguments fail before any chain contact.

use thiserror::Error;

/// Decoding failure for ABI-encoded argument bytes.
#[derive(Debug, Error)]
pub enum AbiError {
    #[error("data too short: need word {index} but data is {len} bytes")]
    OutOfBounds { index: usize, len: usize },
    #[error("invalid offset {offset} for dynamic value")]
    InvalidOffset { offset: usize },
    #[error("value at word {index} does not fit the expected type")]
    TypeMismatch { index: usize },
}

// ============================================================================
// DECODING
// ============================================================================

/// Reads the 32-byte word at the given word index.
pub fn word(data: &[u8], index: usize) -> Result<[u8; 32], AbiError> {
    let start = index * 32;
    let end = start + 32;
    if data.len() < end {
        return Err(AbiError::OutOfBounds {
            index,
            len: data.len(),
        });
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&data[start..end]);
    Ok(out)
}

/// Converts a 32-byte word to u64, rejecting values with high bits set.
pub fn word_to_u64(w: &[u8; 32]) -> Option<u64> {
    if w[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&w[24..]);
    Some(u64::from_be_bytes(buf))
}

/// Decodes a uint word at the given index into u64.
pub fn uint_u64(data: &[u8], index: usize) -> Result<u64, AbiError> {
    let w = word(data, index)?;
    word_to_u64(&w).ok_or(AbiError::TypeMismatch { index })
}

/// Decodes an address word at the given index into a normalized hex string.
/// The upper 12 bytes of the word must be zero.
pub fn address(data: &[u8], index: usize) -> Result<String, AbiError> {
    let w = word(data, index)?;
    if w[..12].iter().any(|b| *b != 0) {
        return Err(AbiError::TypeMismatch { index });
    }
    Ok(format!("0x{}", hex::encode(&w[12..])))
}

/// Decodes a bytes32 word at the given index as a hex string.
pub fn fixed_bytes32(data: &[u8], index: usize) -> Result<String, AbiError> {
    let w = word(data, index)?;
    Ok(format!("0x{}", hex::encode(w)))
}

/// Decodes a dynamic `bytes` value whose offset word sits at the given index.
pub fn dynamic_bytes(data: &[u8], index: usize) -> Result<Vec<u8>, AbiError> {
    let offset_word = word(data, index)?;
    let offset = word_to_u64(&offset_word).ok_or(AbiError::TypeMismatch { index })? as usize;

    if offset + 32 > data.len() {
        return Err(AbiError::InvalidOffset { offset });
    }
    let mut len_word = [0u8; 32];
    len_word.copy_from_slice(&data[offset..offset + 32]);
    let len = word_to_u64(&len_word).ok_or(AbiError::InvalidOffset { offset })? as usize;

    let start = offset + 32;
    if start + len > data.len() {
        return Err(AbiError::InvalidOffset { offset });
    }
    Ok(data[start..start + len].to_vec())
}

// ============================================================================
// ENCODING
// ============================================================================

/// An ABI value to encode. Covers the shapes used by the oracle's response
/// envelopes and relay payloads.
#[derive(Debug, Clone)]
pub enum Token {
    /// A single 32-byte static word (uint256/address/bytes32/bool)
    Word([u8; 32]),
    /// Dynamic byte string
    Bytes(Vec<u8>),
    /// Dynamic array of values
    Array(Vec<Token>),
    /// Tuple of values (static if all members are static)
    Tuple(Vec<Token>),
}

impl Token {
    /// Builds a uint256 word from a u64.
    pub fn uint(value: u64) -> Self {
        let mut w = [0u8; 32];
        w[24..].copy_from_slice(&value.to_be_bytes());
        Token::Word(w)
    }

    /// Builds a bool word.
    pub fn boolean(value: bool) -> Self {
        Token::uint(u64::from(value))
    }

    /// Builds an address word from a 0x-prefixed hex address.
    pub fn address(addr: &str) -> Result<Self, AbiError> {
        let clean = addr.strip_prefix("0x").unwrap_or(addr);
        let bytes = hex::decode(clean).map_err(|_| AbiError::TypeMismatch { index: 0 })?;
        if bytes.len() != 20 {
            return Err(AbiError::TypeMismatch { index: 0 });
        }
        let mut w = [0u8; 32];
        w[12..].copy_from_slice(&bytes);
        Ok(Token::Word(w))
    }

    /// Builds a bytes32 word from a 0x-prefixed hex string. Fixed bytes have
    /// no canonical padding for short input, so exactly 32 bytes are required.
    pub fn bytes32(hex_value: &str) -> Result<Self, AbiError> {
        let clean = hex_value.strip_prefix("0x").unwrap_or(hex_value);
        let bytes = hex::decode(clean).map_err(|_| AbiError::TypeMismatch { index: 0 })?;
        let word: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AbiError::TypeMismatch { index: 0 })?;
        Ok(Token::Word(word))
    }

    fn is_dynamic(&self) -> bool {
        match self {
            Token::Word(_) => false,
            Token::Bytes(_) | Token::Array(_) => true,
            Token::Tuple(members) => members.iter().any(Token::is_dynamic),
        }
    }

    fn head_size(&self) -> usize {
        if self.is_dynamic() {
            32
        } else {
            match self {
                Token::Word(_) => 32,
                Token::Tuple(members) => members.iter().map(Token::head_size).sum(),
                _ => 32,
            }
        }
    }

    fn encode_static(&self, out: &mut Vec<u8>) {
        match self {
            Token::Word(w) => out.extend_from_slice(w),
            Token::Tuple(members) => {
                for m in members {
                    m.encode_static(out);
                }
            }
            // Dynamic tokens never reach here
            _ => {}
        }
    }

    fn encode_tail(&self) -> Vec<u8> {
        match self {
            Token::Bytes(bytes) => {
                let mut out = Vec::with_capacity(32 + pad32(bytes.len()));
                out.extend_from_slice(&uint_word(bytes.len() as u64));
                out.extend_from_slice(bytes);
                out.resize(32 + pad32(bytes.len()), 0);
                out
            }
            Token::Array(items) => {
                let mut out = uint_word(items.len() as u64).to_vec();
                out.extend_from_slice(&encode(items));
                out
            }
            Token::Tuple(members) => encode(members),
            Token::Word(_) => Vec::new(),
        }
    }
}

/// Standard ABI head/tail encoding of a token sequence.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_size: usize = tokens.iter().map(Token::head_size).sum();
    let mut head = Vec::with_capacity(head_size);
    let mut tail: Vec<u8> = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&uint_word((head_size + tail.len()) as u64));
            tail.extend_from_slice(&token.encode_tail());
        } else {
            token.encode_static(&mut head);
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// Builds a uint256 word from a u64.
pub fn uint_word(value: u64) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[24..].copy_from_slice(&value.to_be_bytes());
    w
}

/// Converts a 0x-prefixed hex quantity (arbitrary width up to 32 bytes, odd
/// nibble counts allowed) into a left-padded 32-byte word. This is how node
/// quantities like balances pass through the executor without precision loss.
pub fn quantity_to_word(hex_value: &str) -> Result<[u8; 32], AbiError> {
    let clean = hex_value.strip_prefix("0x").unwrap_or(hex_value);
    let padded = if clean.len() % 2 == 1 {
        format!("0{}", clean)
    } else {
        clean.to_string()
    };
    let bytes = hex::decode(&padded).map_err(|_| AbiError::TypeMismatch { index: 0 })?;
    if bytes.len() > 32 {
        return Err(AbiError::TypeMismatch { index: 0 });
    }
    let mut w = [0u8; 32];
    w[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(w)
}

fn pad32(len: usize) -> usize {
    len.div_ceil(32) * 32
}

// ============================================================================
// TESTS
// ============================================================================
