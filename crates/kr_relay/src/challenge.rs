//! Ownership-proof challenge-response.
//!
//! Issue seals `N || participant_id || server_id` from the current server
//! key to the participant's identity key under a fresh box nonce, and
//! records `{N, SHA-512(N), keyring version}`. The participant proves
//! possession of its secret key by opening the challenge and sealing the
//! same payload back to the server key using `N` itself as the box nonce.
//! Verify opens that response with the stored `N` and the stored keyring
//! version, so neither a restart nor a rotation invalidates an outstanding
//! challenge, including a rotation made by another relay on the same store.

use std::sync::Arc;

use chrono::Utc;
use kr_crypto::{encoding, hash::nonce_digest, sealed};
use kr_proto::{
    api::{IssueChallengeResponse, RejectReason, VerificationResponse},
    ChallengePayload, ChallengeRecord, ChallengeStatus, ParticipantRecord,
};
use kr_store::{Directory, Mailbox};
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::{
    error::{RelayError, Result},
    keyring::{KeyringEntry, SharedKeyring},
};

const ISSUE_AAD: &[u8] = b"kr-challenge-issue";
const RESPONSE_AAD: &[u8] = b"kr-challenge-response";

pub struct ChallengeProtocol {
    directory: Arc<dyn Directory>,
    mailbox: Arc<dyn Mailbox>,
    keyring: SharedKeyring,
}

impl ChallengeProtocol {
    pub fn new(directory: Arc<dyn Directory>, mailbox: Arc<dyn Mailbox>, keyring: SharedKeyring) -> Self {
        Self { directory, mailbox, keyring }
    }

    async fn participant(&self, participant_id: &str) -> Result<ParticipantRecord> {
        self.directory
            .participant(participant_id)
            .await?
            .ok_or_else(|| RelayError::ParticipantNotFound(participant_id.to_string()))
    }

    /// Issue a new challenge, replacing any outstanding one.
    pub async fn issue(&self, participant_id: &str) -> Result<IssueChallengeResponse> {
        let participant = self.participant(participant_id).await?;
        let keyring = self.keyring.for_issue().await?;
        let key = keyring.current();

        let nonce = sealed::random_nonce();
        let payload = Zeroizing::new(
            ChallengePayload {
                nonce,
                participant_id: participant_id.to_string(),
                server_id: keyring.server_id().to_string(),
            }
            .encode()?,
        );
        let encryption_nonce = sealed::random_nonce();
        let ciphertext = sealed::seal(
            &key.secret,
            &participant.identity_key,
            &encryption_nonce,
            &payload,
            ISSUE_AAD,
        )?;

        let record = ChallengeRecord {
            participant_id: participant_id.to_string(),
            attempt_id: uuid::Uuid::new_v4().to_string(),
            nonce,
            nonce_digest: nonce_digest(&nonce).to_vec(),
            keyring_version: key.version,
            status: ChallengeStatus::Unset,
            issued_at: Utc::now(),
            resolved_at: None,
        };
        self.mailbox.put_challenge(&record).await?;

        tracing::info!(
            participant = participant_id,
            attempt = %record.attempt_id,
            version = key.version,
            identity = %participant.identity_key.fingerprint(),
            "challenge issued"
        );
        Ok(IssueChallengeResponse {
            ciphertext: encoding::encode(&ciphertext),
            encryption_nonce: encoding::encode(&encryption_nonce),
            server_public_key: key.public_key,
            keyring_version: key.version,
        })
    }

    /// Verify the participant's response to its outstanding challenge and
    /// persist the outcome. A response that does not check out yields
    /// `verified = false`, never an error.
    pub async fn verify(&self, participant_id: &str, ciphertext_b64: &str) -> Result<VerificationResponse> {
        let participant = self.participant(participant_id).await?;
        let record = self.mailbox.challenge(participant_id).await?.ok_or_else(|| {
            RelayError::RecordNotFound { kind: "challenge", participant_id: participant_id.to_string() }
        })?;

        if record.status.is_terminal() {
            return Ok(VerificationResponse {
                verified: record.status == ChallengeStatus::Verified,
                reason: Some(RejectReason::AlreadyResolved),
            });
        }

        if ciphertext_b64.is_empty() {
            return Err(RelayError::invalid("ciphertext", "missing"));
        }
        let ciphertext = encoding::decode(ciphertext_b64).map_err(|e| RelayError::invalid("ciphertext", e))?;
        let keyring = self.keyring.for_version(record.keyring_version).await?;
        let key = keyring
            .get(record.keyring_version)
            .ok_or(RelayError::UnknownKeyVersion(record.keyring_version))?;

        let rejection = check_response(&record, keyring.server_id(), key, &participant, &ciphertext);
        let status = match rejection {
            None => ChallengeStatus::Verified,
            Some(_) => ChallengeStatus::Failed,
        };

        if !self.mailbox.resolve_challenge(participant_id, &record.attempt_id, status).await? {
            tracing::info!(participant = participant_id, attempt = %record.attempt_id, "challenge superseded");
            return Ok(VerificationResponse { verified: false, reason: Some(RejectReason::Superseded) });
        }

        match rejection {
            None => tracing::info!(participant = participant_id, attempt = %record.attempt_id, "challenge verified"),
            Some(reason) => tracing::warn!(
                participant = participant_id,
                attempt = %record.attempt_id,
                ?reason,
                "challenge failed"
            ),
        }
        Ok(VerificationResponse { verified: rejection.is_none(), reason: rejection })
    }
}

fn check_response(
    record: &ChallengeRecord,
    server_id: &str,
    key: &KeyringEntry,
    participant: &ParticipantRecord,
    ciphertext: &[u8],
) -> Option<RejectReason> {
    let Ok(plaintext) = sealed::open(&key.secret, &participant.identity_key, &record.nonce, ciphertext, RESPONSE_AAD)
    else {
        return Some(RejectReason::DecryptionFailed);
    };
    let Ok(payload) = ChallengePayload::decode(&plaintext) else {
        return Some(RejectReason::IdentityMismatch);
    };
    if payload.participant_id != record.participant_id || payload.server_id != server_id {
        return Some(RejectReason::IdentityMismatch);
    }
    if !encoding::ct_eq(&nonce_digest(&payload.nonce), &record.nonce_digest) {
        return Some(RejectReason::NonceMismatch);
    }
    None
}

/// Participant side: open an issued challenge with `identity_secret` and
/// produce the base64 response `verifyChallenge` expects.
pub fn answer_challenge(identity_secret: &StaticSecret, issued: &IssueChallengeResponse) -> Result<String> {
    let ciphertext = encoding::decode(&issued.ciphertext)?;
    let encryption_nonce = encoding::decode_array::<{ sealed::BOX_NONCE_LEN }>(&issued.encryption_nonce)?;

    let plaintext = sealed::open(
        identity_secret,
        &issued.server_public_key,
        &encryption_nonce,
        &ciphertext,
        ISSUE_AAD,
    )?;
    let payload = ChallengePayload::decode(&plaintext)?;
    let response = sealed::seal(
        identity_secret,
        &issued.server_public_key,
        &payload.nonce,
        &plaintext,
        RESPONSE_AAD,
    )?;
    Ok(encoding::encode(&response))
}
