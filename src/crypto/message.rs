//! Canonical signed-message byte layouts
//!
//! Owners sign off-line with external wallet software, so the bytes handed
//! to the verifier must match what those wallets sign bit for bit.

use super::hash::sha256;
use crate::core::codec::BinWriter;

/// Neo N3 MainNet network magic
pub const MAINNET_MAGIC: u32 = 0x334F_454E;

/// Neo N3 TestNet (T5) network magic
pub const TESTNET_MAGIC: u32 = 0x3554_334E;

/// Prefix of the browser-extension "sign message" v1 envelope
pub const SIGN_MESSAGE_V1_PREFIX: [u8; 4] = [0x01, 0x00, 0x01, 0xf0];

/// Suffix of the browser-extension "sign message" v1 envelope
pub const SIGN_MESSAGE_V1_SUFFIX: [u8; 2] = [0x00, 0x00];

/// Fixed header hashed in front of a "sign message" v2 payload
///
/// Only the length is pinned down; the all-zero content has not been
/// checked against a wallet-produced signature. Callers that need v2
/// interoperability should confirm it with a known signature first.
pub const SIGN_MESSAGE_V2_HEADER: [u8; 50] = [0u8; 50];

/// Bytes signed to authorize a transaction:
/// 4-byte little-endian network magic followed by the 32-byte hash
/// in its serialized (little-endian) order.
pub fn transaction_sign_data(network: u32, hash: &[u8; 32]) -> Vec<u8> {
    let mut writer = BinWriter::with_capacity(36);
    writer.write_u32(network);
    writer.write_bytes(hash);
    writer.into_bytes()
}

/// Browser-extension "sign message" v1 envelope:
/// `01 00 01 f0 || varint(len) || utf8 || 00 00`
pub fn sign_message_v1(message: &str) -> Vec<u8> {
    let payload = message.as_bytes();
    let mut writer = BinWriter::with_capacity(payload.len() + 16);
    writer.write_bytes(&SIGN_MESSAGE_V1_PREFIX);
    writer.write_var_bytes(payload);
    writer.write_bytes(&SIGN_MESSAGE_V1_SUFFIX);
    writer.into_bytes()
}

/// Browser-extension "sign message" v2 envelope:
/// `00 00 00 00 || SHA256(header || varint(len) || utf8)`
pub fn sign_message_v2(message: &str) -> Vec<u8> {
    let payload = message.as_bytes();
    let mut inner = BinWriter::with_capacity(SIGN_MESSAGE_V2_HEADER.len() + payload.len() + 9);
    inner.write_bytes(&SIGN_MESSAGE_V2_HEADER);
    inner.write_var_bytes(payload);

    let mut writer = BinWriter::with_capacity(36);
    writer.write_u32(0);
    writer.write_bytes(&sha256(inner.as_bytes()));
    writer.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_sign_data_layout() {
        let mut hash = [0u8; 32];
        hash[0] = 0xaa;
        hash[31] = 0xbb;

        let data = transaction_sign_data(MAINNET_MAGIC, &hash);
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &[0x4e, 0x45, 0x4f, 0x33]);
        assert_eq!(data[4], 0xaa);
        assert_eq!(data[35], 0xbb);
    }

    #[test]
    fn test_sign_message_v1_layout() {
        let data = sign_message_v1("hello");
        assert_eq!(hex::encode(&data), "010001f00568656c6c6f0000");
    }

    #[test]
    fn test_sign_message_v1_long_message_uses_prefixed_length() {
        let message = "x".repeat(300);
        let data = sign_message_v1(&message);
        assert_eq!(&data[4..7], &[0xfd, 0x2c, 0x01]);
        assert_eq!(data.len(), 4 + 3 + 300 + 2);
    }

    #[test]
    fn test_sign_message_v2_layout() {
        let data = sign_message_v2("hello");
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &[0, 0, 0, 0]);

        let mut inner = SIGN_MESSAGE_V2_HEADER.to_vec();
        inner.push(5);
        inner.extend_from_slice(b"hello");
        assert_eq!(&data[4..], &sha256(&inner));
    }

    #[test]
    fn test_sign_message_v2_known_answer() {
        assert_eq!(
            hex::encode(sign_message_v2("hello")),
            "00000000129cdb17e4f3183b8360703deec1e3add320752359d92e72e6d460a330dda0d8"
        );
    }
}
