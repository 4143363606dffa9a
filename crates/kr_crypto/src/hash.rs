//! Hash utilities
//!
//! SHA-512 digests of challenge nonces (the stored `nonceDigest`).

use sha2::{Digest, Sha512};

pub const DIGEST_LEN: usize = 64;

/// One-way digest of a challenge nonce. The verifier keeps this so that a
/// response can be checked without trusting the plaintext column alone.
pub fn nonce_digest(nonce: &[u8]) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&Sha512::digest(nonce));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_digest_is_sha512() {
        let d = nonce_digest(b"");
        assert_eq!(
            hex::encode(&d[..8]),
            "cf83e1357eefb8bd",
            "SHA-512 of the empty string"
        );
    }

    #[test]
    fn distinct_nonces_distinct_digests() {
        assert_ne!(nonce_digest(&[0u8; 24]), nonce_digest(&[1u8; 24]));
    }
}
