//! Key codec
//!
//! Every binary value that leaves the process (store columns, RPC fields)
//! is standard base64 with padding. Nothing outside this module should call
//! into `base64` directly.
//!
//! Public keys and curve points are X25519 u-coordinates, always 32 bytes.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD.decode(s).map_err(CryptoError::Base64Decode)
}

/// Decode into a fixed-size array, rejecting any other length.
pub fn decode_array<const N: usize>(s: &str) -> Result<[u8; N], CryptoError> {
    let bytes = decode(s)?;
    let actual = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidLength { expected: N, actual })
}

/// Constant-time equality. Lengths are not secret; unequal lengths are
/// rejected up front.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    bool::from(a.ct_eq(b))
}

// ── Newtype wrappers ──────────────────────────────────────────────────────────

/// 32-byte X25519 public key (or curve point), base64 on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKeyBytes(pub [u8; KEY_LEN]);

impl PublicKeyBytes {
    pub fn to_b64(&self) -> String {
        encode(&self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        decode_array::<KEY_LEN>(s).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Human-readable fingerprint: BLAKE3 of the public key, truncated to
    /// 20 bytes (160 bits), hex-encoded in groups of 4 for display.
    ///
    /// Log lines carry this instead of the key itself.
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        let hex = hex::encode(&hash.as_bytes()[..20]);
        hex.as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Constant-time comparison of the raw bytes.
    pub fn ct_matches(&self, other: &PublicKeyBytes) -> bool {
        ct_eq(&self.0, &other.0)
    }
}

impl From<[u8; KEY_LEN]> for PublicKeyBytes {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<x25519_dalek::PublicKey> for PublicKeyBytes {
    fn from(key: x25519_dalek::PublicKey) -> Self {
        Self(key.to_bytes())
    }
}

impl From<PublicKeyBytes> for x25519_dalek::PublicKey {
    fn from(key: PublicKeyBytes) -> Self {
        x25519_dalek::PublicKey::from(key.0)
    }
}

impl TryFrom<String> for PublicKeyBytes {
    type Error = CryptoError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_b64(&s)
    }
}

impl From<PublicKeyBytes> for String {
    fn from(key: PublicKeyBytes) -> Self {
        key.to_b64()
    }
}

impl fmt::Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKeyBytes").field(&self.to_b64()).finish()
    }
}

impl fmt::Display for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_b64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_array_rejects_wrong_length() {
        let short = encode(&[7u8; 31]);
        match decode_array::<32>(&short) {
            Err(CryptoError::InvalidLength { expected: 32, actual: 31 }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode("not base64 !!").is_err());
    }

    #[test]
    fn public_key_serializes_as_base64_text() {
        let key = PublicKeyBytes([0xAB; 32]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.to_b64()));
        let back: PublicKeyBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn ct_eq_handles_length_mismatch() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"abcd"));
    }

    #[test]
    fn fingerprint_is_grouped_hex() {
        let fp = PublicKeyBytes([1u8; 32]).fingerprint();
        let groups: Vec<&str> = fp.split(' ').collect();
        assert_eq!(groups.len(), 10);
        assert!(groups.iter().all(|g| g.len() == 4));
    }
}
