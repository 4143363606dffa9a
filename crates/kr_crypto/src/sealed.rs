//! Authenticated public-key box.
//!
//! Both parties derive the same symmetric key from their own X25519 secret
//! and the peer's public key:
//!
//!   K = HKDF-SHA256(ikm = X25519(sk_self, pk_peer), salt = "kr-box-v1",
//!                   info = min(pk_a, pk_b) || max(pk_a, pk_b))
//!
//! and encrypt with XChaCha20-Poly1305 under an explicit 24-byte nonce.
//! Unlike `aead::encrypt` the nonce is NOT prepended: box nonces travel as
//! their own field (or are recovered from a stored record), because the
//! challenge protocol depends on the exact nonce being carried separately.

use rand::RngCore;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::{aead, encoding::PublicKeyBytes, error::CryptoError, kdf};

pub const BOX_NONCE_LEN: usize = aead::NONCE_LEN;

const BOX_SALT: &[u8] = b"kr-box-v1";

/// Fresh random box nonce.
pub fn random_nonce() -> [u8; BOX_NONCE_LEN] {
    let mut nonce = [0u8; BOX_NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

fn box_key(own: &StaticSecret, peer: &PublicKeyBytes) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let own_pub = X25519Public::from(own);
    let peer_pub = X25519Public::from(peer.0);

    let shared = own.diffie_hellman(&peer_pub);
    if !shared.was_contributory() {
        return Err(CryptoError::NonContributory);
    }

    // Order-independent so both directions agree on the key.
    let (lo, hi) = if own_pub.as_bytes() <= peer_pub.as_bytes() {
        (own_pub.to_bytes(), peer_pub.to_bytes())
    } else {
        (peer_pub.to_bytes(), own_pub.to_bytes())
    };
    let mut info = [0u8; 64];
    info[..32].copy_from_slice(&lo);
    info[32..].copy_from_slice(&hi);

    let mut key = Zeroizing::new([0u8; 32]);
    kdf::hkdf_expand(shared.as_bytes(), Some(BOX_SALT), &info, &mut key[..])?;
    Ok(key)
}

/// Encrypt `plaintext` from `own` to `peer` under `nonce`.
pub fn seal(
    own: &StaticSecret,
    peer: &PublicKeyBytes,
    nonce: &[u8; BOX_NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let key = box_key(own, peer)?;
    aead::encrypt_with_nonce(&key, nonce, plaintext, aad)
}

/// Decrypt a box sealed by `peer` to `own` under `nonce`.
pub fn open(
    own: &StaticSecret,
    peer: &PublicKeyBytes,
    nonce: &[u8; BOX_NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let key = box_key(own, peer)?;
    aead::decrypt_with_nonce(&key, nonce, ciphertext, aad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn keypair() -> (StaticSecret, PublicKeyBytes) {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKeyBytes::from(X25519Public::from(&secret));
        (secret, public)
    }

    #[test]
    fn both_directions_share_a_key() {
        let (a_sk, a_pk) = keypair();
        let (b_sk, b_pk) = keypair();
        let nonce = random_nonce();

        let ct = seal(&a_sk, &b_pk, &nonce, b"hello", b"ctx").unwrap();
        let pt = open(&b_sk, &a_pk, &nonce, &ct, b"ctx").unwrap();
        assert_eq!(pt.as_slice(), b"hello");
    }

    #[test]
    fn wrong_nonce_fails() {
        let (a_sk, a_pk) = keypair();
        let (b_sk, b_pk) = keypair();
        let ct = seal(&a_sk, &b_pk, &random_nonce(), b"hello", b"").unwrap();
        assert!(open(&b_sk, &a_pk, &random_nonce(), &ct, b"").is_err());
    }

    #[test]
    fn third_party_cannot_open() {
        let (a_sk, a_pk) = keypair();
        let (_b_sk, b_pk) = keypair();
        let (eve_sk, _) = keypair();
        let nonce = random_nonce();
        let ct = seal(&a_sk, &b_pk, &nonce, b"hello", b"").unwrap();
        assert!(open(&eve_sk, &a_pk, &nonce, &ct, b"").is_err());
    }

    #[test]
    fn low_order_peer_rejected() {
        let (a_sk, _) = keypair();
        let zero = PublicKeyBytes([0u8; 32]);
        assert!(matches!(
            seal(&a_sk, &zero, &random_nonce(), b"x", b""),
            Err(CryptoError::NonContributory)
        ));
    }
}
