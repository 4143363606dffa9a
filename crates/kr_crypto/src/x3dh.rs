//! X3DH-like asynchronous key agreement over a relayed key bundle.
//!
//! References:
//!   - Signal X3DH spec: <https://signal.org/docs/specifications/x3dh/>
//!   - RFC 7748 (X25519): <https://datatracker.ietf.org/doc/html/rfc7748>
//!   - RFC 5869 (HKDF):  <https://datatracker.ietf.org/doc/html/rfc5869>
//!
//! The relay never sees any secret here. It hands the initiator (Alice) the
//! recipient's bundle and stores Alice's public material in a pending session
//! for the recipient (Bob) to collect later. Both ends then run this module:
//!
//!   Bob's bundle: IK_B (identity, X25519), SPK_B (signed prekey), OPK_B (one-time)
//!   Alice posts:  IK_A (identity, X25519), EK_A (ephemeral)
//!
//!   DH1 = DH(IK_A, SPK_B)   - mutual authentication
//!   DH2 = DH(EK_A, IK_B)    - forward secrecy
//!   DH3 = DH(EK_A, SPK_B)   - replay protection
//!   DH4 = DH(EK_A, OPK_B)   - one-time forward secrecy [when an OPK was reserved]
//!
//!   SK = HKDF(salt=0, ikm = 0xFF*32 || DH1 || DH2 || DH3 [|| DH4], info="kr-x3dh-v1")

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{encoding::PublicKeyBytes, error::CryptoError, kdf};

const X3DH_INFO: &[u8] = b"kr-x3dh-v1";

// ── Key material ─────────────────────────────────────────────────────────────

/// Generate an X25519 keypair (identity, signed prekey or ephemeral).
pub fn generate_keypair() -> (StaticSecret, PublicKeyBytes) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKeyBytes::from(X25519Public::from(&secret));
    (secret, public)
}

/// Generate a batch of one-time prekeys (X25519).
pub fn generate_one_time_prekeys(count: usize) -> Vec<(StaticSecret, PublicKeyBytes)> {
    (0..count).map(|_| generate_keypair()).collect()
}

/// The recipient's public keys as handed out by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientBundle {
    pub identity_key: PublicKeyBytes,
    pub signed_pre_key: PublicKeyBytes,
    pub one_time_pre_key: Option<PublicKeyBytes>,
}

/// 32-byte shared secret; feeds the message layer as its root key.
#[derive(ZeroizeOnDrop)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

fn dh(secret: &StaticSecret, public: &PublicKeyBytes) -> Result<[u8; 32], CryptoError> {
    let shared = secret.diffie_hellman(&X25519Public::from(public.0));
    if !shared.was_contributory() {
        return Err(CryptoError::NonContributory);
    }
    Ok(shared.to_bytes())
}

fn derive(parts: &mut [[u8; 32]]) -> Result<SharedKey, CryptoError> {
    let mut ikm = vec![0xFFu8; 32]; // domain separation pad
    for part in parts.iter_mut() {
        ikm.extend_from_slice(part);
        part.zeroize();
    }
    let mut sk = [0u8; 32];
    let result = kdf::hkdf_expand(&ikm, Some(&[0u8; 32]), X3DH_INFO, &mut sk);
    ikm.zeroize();
    result?;
    Ok(SharedKey(sk))
}

// ── Initiator (Alice) ────────────────────────────────────────────────────────

/// Alice derives SK from the bundle the relay returned for her request.
/// `my_ephemeral` is the secret half of the ephemeral key she posted.
pub fn initiator_secret(
    my_identity: &StaticSecret,
    my_ephemeral: &StaticSecret,
    bundle: &RecipientBundle,
) -> Result<SharedKey, CryptoError> {
    let mut parts = vec![
        dh(my_identity, &bundle.signed_pre_key)?,  // IK_A × SPK_B
        dh(my_ephemeral, &bundle.identity_key)?,   // EK_A × IK_B
        dh(my_ephemeral, &bundle.signed_pre_key)?, // EK_A × SPK_B
    ];
    if let Some(opk) = &bundle.one_time_pre_key {
        parts.push(dh(my_ephemeral, opk)?); // EK_A × OPK_B
    }
    derive(&mut parts)
}

// ── Responder (Bob) ──────────────────────────────────────────────────────────

/// Bob reconstructs SK from a collected pending session.
///
/// `my_one_time` - the secret for the one-time prekey index recorded in the
/// pending session, if one was consumed.
pub fn responder_secret(
    my_identity: &StaticSecret,
    my_signed_pre_key: &StaticSecret,
    my_one_time: Option<&StaticSecret>,
    sender_identity: &PublicKeyBytes,
    sender_ephemeral: &PublicKeyBytes,
) -> Result<SharedKey, CryptoError> {
    // Mirror Alice's DH order exactly (DH is commutative).
    let mut parts = vec![
        dh(my_signed_pre_key, sender_identity)?,
        dh(my_identity, sender_ephemeral)?,
        dh(my_signed_pre_key, sender_ephemeral)?,
    ];
    if let Some(opk) = my_one_time {
        parts.push(dh(opk, sender_ephemeral)?);
    }
    derive(&mut parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x3dh_roundtrip_with_opk() {
        let (alice_ik, alice_ik_pub) = generate_keypair();
        let (alice_ek, alice_ek_pub) = generate_keypair();
        let (bob_ik, bob_ik_pub) = generate_keypair();
        let (bob_spk, bob_spk_pub) = generate_keypair();
        let opks = generate_one_time_prekeys(1);
        let (ref bob_opk, bob_opk_pub) = opks[0];

        let bundle = RecipientBundle {
            identity_key: bob_ik_pub,
            signed_pre_key: bob_spk_pub,
            one_time_pre_key: Some(bob_opk_pub),
        };

        let alice_sk = initiator_secret(&alice_ik, &alice_ek, &bundle).unwrap();
        let bob_sk =
            responder_secret(&bob_ik, &bob_spk, Some(bob_opk), &alice_ik_pub, &alice_ek_pub)
                .unwrap();

        assert_eq!(alice_sk.as_bytes(), bob_sk.as_bytes(), "Alice and Bob must derive the same SK");
    }

    #[test]
    fn x3dh_roundtrip_without_opk() {
        let (alice_ik, alice_ik_pub) = generate_keypair();
        let (alice_ek, alice_ek_pub) = generate_keypair();
        let (bob_ik, bob_ik_pub) = generate_keypair();
        let (bob_spk, bob_spk_pub) = generate_keypair();

        let bundle = RecipientBundle {
            identity_key: bob_ik_pub,
            signed_pre_key: bob_spk_pub,
            one_time_pre_key: None,
        };

        let alice_sk = initiator_secret(&alice_ik, &alice_ek, &bundle).unwrap();
        let bob_sk =
            responder_secret(&bob_ik, &bob_spk, None, &alice_ik_pub, &alice_ek_pub).unwrap();
        assert_eq!(alice_sk.as_bytes(), bob_sk.as_bytes());
    }

    #[test]
    fn wrong_one_time_key_diverges() {
        let (alice_ik, alice_ik_pub) = generate_keypair();
        let (alice_ek, alice_ek_pub) = generate_keypair();
        let (bob_ik, bob_ik_pub) = generate_keypair();
        let (bob_spk, bob_spk_pub) = generate_keypair();
        let opks = generate_one_time_prekeys(2);

        let bundle = RecipientBundle {
            identity_key: bob_ik_pub,
            signed_pre_key: bob_spk_pub,
            one_time_pre_key: Some(opks[0].1),
        };

        let alice_sk = initiator_secret(&alice_ik, &alice_ek, &bundle).unwrap();
        let bob_sk =
            responder_secret(&bob_ik, &bob_spk, Some(&opks[1].0), &alice_ik_pub, &alice_ek_pub)
                .unwrap();
        assert_ne!(alice_sk.as_bytes(), bob_sk.as_bytes());
    }
}
