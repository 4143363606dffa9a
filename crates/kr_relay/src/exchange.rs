//! X3DH key bundle relay.
//!
//! The initiator gets the recipient's identity key, signed prekey and one
//! freshly reserved one-time prekey; its own identity and ephemeral keys are
//! left in a pending session for the recipient to collect exactly once.

use std::sync::Arc;

use chrono::Utc;
use kr_crypto::PublicKeyBytes;
use kr_proto::{
    api::{
        InitiateKeyExchangeRequest, InitiateKeyExchangeResponse, RemainingPreKeysResponse,
        RetrieveSessionResponse,
    },
    PendingSession,
};
use kr_store::{Directory, Mailbox};

use crate::error::{RelayError, Result};

pub struct KeyBundleExchange {
    directory: Arc<dyn Directory>,
    mailbox: Arc<dyn Mailbox>,
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(RelayError::invalid(field, "missing"));
    }
    Ok(value)
}

fn parse_key(field: &str, value: &str) -> Result<PublicKeyBytes> {
    PublicKeyBytes::from_b64(required(field, value)?).map_err(|e| RelayError::invalid(field, e))
}

impl KeyBundleExchange {
    pub fn new(directory: Arc<dyn Directory>, mailbox: Arc<dyn Mailbox>) -> Self {
        Self { directory, mailbox }
    }

    pub async fn initiate(&self, req: &InitiateKeyExchangeRequest) -> Result<InitiateKeyExchangeResponse> {
        let recipient_id = required("recipient_id", &req.recipient_id)?;
        let sender_id = required("sender_id", &req.sender_id)?;
        let sender_identity_key = parse_key("sender_identity_key", &req.sender_identity_key)?;
        let sender_ephemeral_key = parse_key("sender_ephemeral_key", &req.sender_ephemeral_key)?;
        if sender_id == recipient_id {
            return Err(RelayError::invalid("recipient_id", "sender and recipient are the same participant"));
        }

        let recipient = self
            .directory
            .participant(recipient_id)
            .await?
            .ok_or_else(|| RelayError::ParticipantNotFound(recipient_id.to_string()))?;

        let session = PendingSession {
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            sender_identity_key,
            sender_ephemeral_key,
            one_time_pre_key_index: 0,
            created_at: Utc::now(),
        };
        let Some((one_time, stored)) = self.mailbox.post_pending_session(&session).await? else {
            tracing::warn!(recipient = recipient_id, "one-time prekeys exhausted");
            return Err(RelayError::PreKeysExhausted(recipient_id.to_string()));
        };

        tracing::info!(
            sender = sender_id,
            recipient = recipient_id,
            index = one_time.index,
            ephemeral = %stored.sender_ephemeral_key.fingerprint(),
            "one-time prekey reserved"
        );
        Ok(InitiateKeyExchangeResponse {
            recipient_identity_key: recipient.identity_key,
            recipient_signed_pre_key: recipient.signed_pre_key,
            recipient_one_time_pre_key: one_time.public_key,
            consumed_index: one_time.index,
        })
    }

    /// Collect (and remove) the pending session for the pair. An absent
    /// session is a normal result, and so is a pair with an empty id.
    pub async fn retrieve(&self, sender_id: &str, recipient_id: &str) -> Result<RetrieveSessionResponse> {
        if sender_id.is_empty() || recipient_id.is_empty() {
            return Ok(RetrieveSessionResponse { found: false, session: None });
        }

        let session = self.mailbox.take_pending_session(sender_id, recipient_id).await?;
        tracing::debug!(sender = sender_id, recipient = recipient_id, found = session.is_some(), "session pickup");
        Ok(RetrieveSessionResponse { found: session.is_some(), session })
    }

    pub async fn remaining_pre_keys(&self, participant_id: &str) -> Result<RemainingPreKeysResponse> {
        let participant_id = required("participant_id", participant_id)?;
        if self.directory.participant(participant_id).await?.is_none() {
            return Err(RelayError::ParticipantNotFound(participant_id.to_string()));
        }
        let remaining = self.directory.remaining_one_time_pre_keys(participant_id).await?;
        Ok(RemainingPreKeysResponse { remaining })
    }
}
