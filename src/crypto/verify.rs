//! Signature verification
//!
//! ECDSA over secp256r1 with a SHA-256 digest of the exact message bytes.
//! Every malformed input fails closed: the verifier answers `false` and
//! never returns an error to the caller.

use p256::ecdsa::signature::Verifier;
use p256::ecdsa::Signature;

use super::keys::{PublicKey, SIGNATURE_LEN};

/// Checks that a signature is non-empty, even-length hex
pub fn is_valid_signature_hex(input: &str) -> bool {
    !input.is_empty() && input.len() % 2 == 0 && input.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Verify `signature_hex` (raw 64-byte `r || s`) over `message` for the
/// compressed `public_key` hex.
pub fn verify(message: &[u8], public_key: &str, signature_hex: &str) -> bool {
    let key = match PublicKey::from_hex(public_key) {
        Ok(key) => key,
        Err(_) => return false,
    };
    verify_with_key(message, &key, signature_hex)
}

/// Same as [`verify`] for an already parsed key
pub fn verify_with_key(message: &[u8], key: &PublicKey, signature_hex: &str) -> bool {
    if !is_valid_signature_hex(signature_hex) {
        return false;
    }
    let bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    if bytes.len() != SIGNATURE_LEN {
        return false;
    }
    let signature = match Signature::from_slice(&bytes) {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    match key.verifying_key() {
        Ok(verifying_key) => verifying_key.verify(message, &signature).is_ok(),
        Err(_) => false,
    }
}
