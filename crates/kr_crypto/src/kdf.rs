//! Passphrase stretching for the store vault, and the HKDF step shared by
//! the box and X3DH derivations.

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

pub const VAULT_SALT_LEN: usize = 16;

const VAULT_MEMORY_KIB: u32 = 64 * 1024;
const VAULT_PASSES: u32 = 3;
const VAULT_LANES: u32 = 1;

/// Column encryption key for the relay store.
#[derive(ZeroizeOnDrop)]
pub struct VaultKey(pub [u8; 32]);

impl VaultKey {
    /// Argon2id over the operator passphrase. The salt lives in the
    /// database next to the ciphertext it protects.
    pub fn derive(passphrase: &[u8], salt: &[u8; VAULT_SALT_LEN]) -> Result<Self, CryptoError> {
        let params = Params::new(VAULT_MEMORY_KIB, VAULT_PASSES, VAULT_LANES, Some(32))
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        let mut key = VaultKey([0u8; 32]);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(passphrase, salt, &mut key.0)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }
}

pub fn generate_salt() -> [u8; VAULT_SALT_LEN] {
    let mut salt = [0u8; VAULT_SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// HKDF-SHA256 extract-then-expand, filling all of `okm`.
pub fn hkdf_expand(ikm: &[u8], salt: Option<&[u8]>, info: &[u8], okm: &mut [u8]) -> Result<(), CryptoError> {
    Hkdf::<Sha256>::new(salt, ikm)
        .expand(info, okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hkdf_is_deterministic_and_info_separated() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        let mut c = [0u8; 32];
        hkdf_expand(b"ikm", Some(b"salt"), b"one", &mut a).unwrap();
        hkdf_expand(b"ikm", Some(b"salt"), b"one", &mut b).unwrap();
        hkdf_expand(b"ikm", Some(b"salt"), b"two", &mut c).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn vault_key_depends_on_salt() {
        let k1 = VaultKey::derive(b"hunter2", &[1u8; 16]).unwrap();
        let k2 = VaultKey::derive(b"hunter2", &[2u8; 16]).unwrap();
        assert_ne!(k1.0, k2.0);
    }

    #[test]
    fn oversized_hkdf_output_is_rejected() {
        let mut huge = vec![0u8; 255 * 32 + 1];
        assert!(hkdf_expand(b"ikm", None, b"info", &mut huge).is_err());
    }
}
