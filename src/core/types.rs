//! Fixed-size Neo identifiers
//!
//! `ScriptHash` (UInt160) identifies accounts and contracts, `TxHash`
//! (UInt256) identifies transactions. Both are stored in serialized
//! (little-endian) order and displayed as `0x`-prefixed big-endian hex.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::codec::CodecError;
use crate::crypto::hash::{double_sha256, hash160, sha256};

// =============================================================================
// Constants
// =============================================================================

/// Neo N3 address version byte
pub const ADDRESS_VERSION: u8 = 0x35;

/// Length of a Base58Check address payload (version + hash + checksum)
const ADDRESS_PAYLOAD_LEN: usize = 1 + 20 + 4;

fn parse_reversed_hex<const N: usize>(input: &str) -> Result<[u8; N], CodecError> {
    let trimmed = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    if trimmed.len() != N * 2 {
        return Err(CodecError::InvalidHash(input.to_string()));
    }
    let bytes = hex::decode(trimmed).map_err(|_| CodecError::InvalidHash(input.to_string()))?;
    let mut out = [0u8; N];
    for (dst, src) in out.iter_mut().zip(bytes.iter().rev()) {
        *dst = *src;
    }
    Ok(out)
}

fn reversed_hex(bytes: &[u8]) -> String {
    let mut reversed = bytes.to_vec();
    reversed.reverse();
    format!("0x{}", hex::encode(reversed))
}

// =============================================================================
// ScriptHash
// =============================================================================

/// 20-byte script hash (UInt160)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScriptHash([u8; 20]);

impl ScriptHash {
    pub const ZERO: ScriptHash = ScriptHash([0u8; 20]);

    /// Wrap bytes already in serialized order
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// RIPEMD160(SHA256(script))
    pub fn from_script(script: &[u8]) -> Self {
        Self(hash160(script))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Base58Check address: `version || hash || checksum`
    pub fn to_address(&self) -> String {
        let mut payload = Vec::with_capacity(ADDRESS_PAYLOAD_LEN);
        payload.push(ADDRESS_VERSION);
        payload.extend_from_slice(&self.0);
        let checksum = double_sha256(&payload);
        payload.extend_from_slice(&checksum[..4]);
        bs58::encode(payload).into_string()
    }

    /// Decode and checksum-verify a Neo N3 address
    pub fn from_address(address: &str) -> Result<Self, CodecError> {
        let payload = bs58::decode(address)
            .into_vec()
            .map_err(|_| CodecError::InvalidAddress(address.to_string()))?;
        if payload.len() != ADDRESS_PAYLOAD_LEN || payload[0] != ADDRESS_VERSION {
            return Err(CodecError::InvalidAddress(address.to_string()));
        }
        let checksum = double_sha256(&payload[..21]);
        if checksum[..4] != payload[21..] {
            return Err(CodecError::InvalidAddress(address.to_string()));
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..21]);
        Ok(Self(hash))
    }

    /// Accepts either an address or `0x`-prefixed hex
    pub fn parse_any(input: &str) -> Result<Self, CodecError> {
        if input.starts_with('N') && input.len() == 34 {
            Self::from_address(input)
        } else {
            input.parse()
        }
    }
}

impl fmt::Display for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&reversed_hex(&self.0))
    }
}

impl fmt::Debug for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptHash({})", self)
    }
}

impl FromStr for ScriptHash {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_reversed_hex(s).map(Self)
    }
}

impl TryFrom<String> for ScriptHash {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ScriptHash> for String {
    fn from(hash: ScriptHash) -> Self {
        hash.to_string()
    }
}

// =============================================================================
// TxHash
// =============================================================================

/// 32-byte transaction hash (UInt256)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash([u8; 32]);

impl TxHash {
    /// Wrap bytes already in serialized order
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Single SHA-256 of the given payload
    pub fn digest(payload: &[u8]) -> Self {
        Self(sha256(payload))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&reversed_hex(&self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self)
    }
}

impl FromStr for TxHash {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_reversed_hex(s).map(Self)
    }
}

impl TryFrom<String> for TxHash {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TxHash> for String {
    fn from(hash: TxHash) -> Self {
        hash.to_string()
    }
}
