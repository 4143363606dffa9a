use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("sealing failed")]
    AeadEncrypt,

    /// Wrong key, wrong associated data, or modified ciphertext.
    #[error("ciphertext did not authenticate")]
    AeadDecrypt,

    #[error("key derivation: {0}")]
    KeyDerivation(String),

    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The peer point has small order, so the shared secret is all zeroes.
    #[error("non-contributory Diffie-Hellman result")]
    NonContributory,

    #[error("invalid base64: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
