//! ECDSA key management for Neo accounts
//!
//! Provides key pair generation, signing, and public key handling using
//! the NIST P-256 (secp256r1) elliptic curve, as used by Neo N3.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::core::script::Contract;

/// Length of a compressed SEC1 public key
pub const COMPRESSED_KEY_LEN: usize = 33;

/// Length of a raw `r || s` signature
pub const SIGNATURE_LEN: usize = 64;

/// Errors that can occur during key operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Invalid signature")]
    InvalidSignature,
}

/// Checks the textual shape of a compressed public key:
/// 66 lowercase hex characters starting with `02` or `03`.
pub fn is_valid_public_key_hex(input: &str) -> bool {
    input.len() == COMPRESSED_KEY_LEN * 2
        && (input.starts_with("02") || input.starts_with("03"))
        && input
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// A validated compressed P-256 public key
///
/// Keys are ordered by their uncompressed encoding, i.e. by X coordinate
/// and then by Y coordinate. Multi-signature contracts and the signatures
/// that satisfy them both follow this order.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey {
    compressed: [u8; 33],
    uncompressed: [u8; 65],
}

impl PublicKey {
    /// Parse a public key from its compressed hex form
    pub fn from_hex(hex_key: &str) -> Result<Self, KeyError> {
        if !is_valid_public_key_hex(hex_key) {
            return Err(KeyError::InvalidPublicKey(hex_key.to_string()));
        }
        let bytes =
            hex::decode(hex_key).map_err(|_| KeyError::InvalidPublicKey(hex_key.to_string()))?;
        let key = VerifyingKey::from_sec1_bytes(&bytes)
            .map_err(|_| KeyError::InvalidPublicKey(hex_key.to_string()))?;
        Ok(Self::from_verifying_key(&key))
    }

    /// Build from a p256 verifying key
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let mut compressed = [0u8; 33];
        compressed.copy_from_slice(key.to_encoded_point(true).as_bytes());
        let mut uncompressed = [0u8; 65];
        uncompressed.copy_from_slice(key.to_encoded_point(false).as_bytes());
        Self {
            compressed,
            uncompressed,
        }
    }

    /// Compressed SEC1 encoding (33 bytes)
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.compressed
    }

    /// Compressed encoding as lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.compressed)
    }

    /// Recover the p256 verifying key
    pub fn verifying_key(&self) -> Result<VerifyingKey, KeyError> {
        VerifyingKey::from_sec1_bytes(&self.uncompressed)
            .map_err(|_| KeyError::InvalidPublicKey(self.to_hex()))
    }

    /// Neo address of the single-signature contract for this key
    pub fn address(&self) -> String {
        Contract::signature(self).address()
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uncompressed.cmp(&other.uncompressed)
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for PublicKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.to_hex()
    }
}

/// A key pair consisting of a private key and its corresponding public key
///
/// The settlement service never holds owner keys; key pairs exist for
/// tooling and tests that need to produce owner signatures.
#[derive(Clone)]
pub struct KeyPair {
    pub signing_key: SigningKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Create a key pair from an existing signing key
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = PublicKey::from_verifying_key(signing_key.verifying_key());
        Self {
            signing_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPrivateKey)?;
        let signing_key = SigningKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Get the public key as a hex string (compressed format)
    pub fn public_key_hex(&self) -> String {
        self.public_key.to_hex()
    }

    /// Neo address of this key's signature contract
    pub fn address(&self) -> String {
        self.public_key.address()
    }

    /// Sign a message; the message is hashed with SHA-256 before signing
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        let signature: Signature = self.signing_key.sign(message);
        let mut out = [0u8; SIGNATURE_LEN];
        out.copy_from_slice(&signature.to_bytes());
        out
    }

    /// Sign a message and return the signature as hex
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.sign(message))
    }

    /// Verify a signature against this key pair's public key
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool, KeyError> {
        let sig = Signature::from_slice(signature).map_err(|_| KeyError::InvalidSignature)?;
        Ok(self.signing_key.verifying_key().verify(message, &sig).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_pair_generation() {
        let kp = KeyPair::generate();
        assert_eq!(kp.private_key_hex().len(), 64);
        assert!(is_valid_public_key_hex(&kp.public_key_hex()));
        assert!(kp.address().starts_with('N'));
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let message = b"Hello, Neo!";

        let signature = kp.sign(message);
        assert!(kp.verify(message, &signature).unwrap());
        assert!(!kp.verify(b"other message", &signature).unwrap());
    }

    #[test]
    fn test_key_pair_from_hex() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::from_private_key_hex(&kp1.private_key_hex()).unwrap();
        assert_eq!(kp1.public_key_hex(), kp2.public_key_hex());
        assert_eq!(kp1.address(), kp2.address());
    }

    #[test]
    fn test_public_key_format_checks() {
        let kp = KeyPair::generate();
        let hex_key = kp.public_key_hex();

        assert!(PublicKey::from_hex(&hex_key).is_ok());
        assert!(PublicKey::from_hex(&hex_key.to_uppercase()).is_err());
        assert!(PublicKey::from_hex(&format!("04{}", &hex_key[2..])).is_err());
        assert!(PublicKey::from_hex(&hex_key[..64]).is_err());
        assert!(PublicKey::from_hex("not a key").is_err());
    }

    #[test]
    fn test_known_address() {
        // Signature contract 0x94611499d5b3f1501569ecae0ac6e782d49e9496
        let key = PublicKey::from_hex(
            "03b209fd4f53a7170ea4444e0cb0a6bb6a53c2bd016926989cf85f9b0fba17a70c",
        )
        .unwrap();
        assert_eq!(key.address(), "NZeAarn3UMCqNsTymTMF2Pn6X7Yw3GhqDv");
    }

    #[test]
    fn test_ordering_follows_x_coordinate() {
        let mut keys: Vec<PublicKey> = (0..8).map(|_| KeyPair::generate().public_key).collect();
        keys.sort();
        for pair in keys.windows(2) {
            assert!(pair[0].as_bytes()[1..] <= pair[1].as_bytes()[1..]);
        }
    }

    #[test]
    fn test_serde_roundtrip_as_hex() {
        let key = KeyPair::generate().public_key;
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.to_hex()));
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
