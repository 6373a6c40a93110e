//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 / RIPEMD-160 hashing
//! - ECDSA key management (secp256r1)
//! - Canonical signed-message layouts
//! - Fail-closed signature verification

pub mod hash;
pub mod keys;
pub mod message;
pub mod verify;

pub use hash::{double_sha256, hash160, sha256, sha256_hex};
pub use keys::{is_valid_public_key_hex, KeyError, KeyPair, PublicKey};
pub use message::{
    sign_message_v1, sign_message_v2, transaction_sign_data, MAINNET_MAGIC, TESTNET_MAGIC,
};
pub use verify::{is_valid_signature_hex, verify, verify_with_key};
