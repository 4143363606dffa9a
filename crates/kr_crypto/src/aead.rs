//! XChaCha20-Poly1305 with a 32-byte key.
//!
//! Values at rest are laid out as `nonce(24) ‖ ciphertext ‖ tag(16)`. The
//! `*_with_nonce` variants leave nonce placement to the caller; the
//! challenge box uses them to bind the ciphertext to a nonce it chose.

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const NONCE_LEN: usize = 24;

/// Seal under a fresh random nonce, which is prepended to the output.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);
    let ciphertext = encrypt_with_nonce(key, nonce.as_ref(), plaintext, aad)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a value produced by [`encrypt`].
pub fn decrypt(key: &[u8; 32], data: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if data.len() < NONCE_LEN {
        return Err(CryptoError::AeadDecrypt);
    }
    let (nonce, ct) = data.split_at(NONCE_LEN);
    decrypt_with_nonce(key, nonce, ct, aad)
}

/// Encrypt under a caller-supplied nonce. The caller owns nonce uniqueness.
pub fn encrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidLength { expected: NONCE_LEN, actual: nonce.len() });
    }
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::AeadEncrypt)?;
    cipher
        .encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)
}

pub fn decrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::AeadDecrypt);
    }
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::AeadDecrypt)?;
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AeadDecrypt)?;
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_aad_fails() {
        let key = [9u8; 32];
        let ct = encrypt(&key, b"scalar", b"ctx-a").unwrap();
        assert!(decrypt(&key, &ct, b"ctx-b").is_err());
        assert_eq!(decrypt(&key, &ct, b"ctx-a").unwrap().as_slice(), b"scalar");
    }

    #[test]
    fn truncated_input_fails() {
        assert!(decrypt(&[0u8; 32], &[0u8; 10], b"").is_err());
    }
}
