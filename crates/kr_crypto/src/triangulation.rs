//! Scalar / point arithmetic for the three-hop Diffie–Hellman check.
//!
//! Points are Curve25519 Montgomery u-coordinates (`PublicKeyBytes`);
//! scalars are clamped exactly as X25519 clamps them, so
//!
//!   y·(x·P) == x·(y·P)
//!
//! for any base point P in the prime-order subgroup. The relay holds `y`,
//! the participant holds `x`, and neither learns the other's scalar.

use rand::RngCore;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{encoding::PublicKeyBytes, error::CryptoError};

#[derive(Clone, ZeroizeOnDrop)]
pub struct Scalar([u8; 32]);

impl Scalar {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidLength { expected: 32, actual: bytes.len() })?;
        Ok(Self(arr))
    }

    /// Raw scalar bytes, for encrypted persistence only.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `self · point`. Rejects low-order inputs whose product is the identity.
    pub fn mul(&self, point: &PublicKeyBytes) -> Result<PublicKeyBytes, CryptoError> {
        let secret = StaticSecret::from(self.0);
        let shared = secret.diffie_hellman(&X25519Public::from(point.0));
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }
        let mut out = shared.to_bytes();
        let product = PublicKeyBytes(out);
        out.zeroize();
        Ok(product)
    }

    /// `self · G`.
    pub fn public_point(&self) -> PublicKeyBytes {
        PublicKeyBytes::from(X25519Public::from(&StaticSecret::from(self.0)))
    }
}
