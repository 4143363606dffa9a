//! Database row models - these map to/from SQL rows.
//!
//! Binary columns hold base64 text; conversion into `kr_proto` records
//! decodes and length-checks every one of them.

use chrono::{DateTime, Utc};
use kr_crypto::{encoding, PublicKeyBytes};
use kr_proto::records::{
    ChallengeRecord, OneTimePreKey, ParticipantRecord, PendingSession, TriangulationRecord,
};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

fn key_column(table: &'static str, column: &str, value: &str) -> Result<PublicKeyBytes, StoreError> {
    PublicKeyBytes::from_b64(value).map_err(|e| StoreError::corrupt(table, format!("{column}: {e}")))
}

fn u32_column(table: &'static str, column: &str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::corrupt(table, format!("{column} out of range: {value}")))
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ParticipantRow {
    pub participant_id: String,
    /// Base64 X25519 identity public key
    pub identity_key: String,
    /// Base64 X25519 signed prekey
    pub signed_pre_key: String,
    pub published_at: DateTime<Utc>,
}

impl TryFrom<ParticipantRow> for ParticipantRecord {
    type Error = StoreError;

    fn try_from(row: ParticipantRow) -> Result<Self, Self::Error> {
        Ok(Self {
            identity_key: key_column("participants", "identity_key", &row.identity_key)?,
            signed_pre_key: key_column("participants", "signed_pre_key", &row.signed_pre_key)?,
            participant_id: row.participant_id,
            published_at: row.published_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OneTimePreKeyRow {
    pub participant_id: String,
    pub idx: i64,
    pub public_key: String,
    pub consumed_at: Option<DateTime<Utc>>,
    /// Sender that consumed the key (audit only)
    pub consumed_by: Option<String>,
}

impl TryFrom<OneTimePreKeyRow> for OneTimePreKey {
    type Error = StoreError;

    fn try_from(row: OneTimePreKeyRow) -> Result<Self, Self::Error> {
        Ok(Self {
            index: u32_column("one_time_prekeys", "idx", row.idx)?,
            public_key: key_column("one_time_prekeys", "public_key", &row.public_key)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChallengeRow {
    pub participant_id: String,
    pub attempt_id: String,
    /// Base64 24-byte challenge nonce
    pub nonce: String,
    /// Base64 SHA-512 of the nonce
    pub nonce_digest: String,
    pub keyring_version: i64,
    pub status: String, // ChallengeStatus as string
    pub issued_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<ChallengeRow> for ChallengeRecord {
    type Error = StoreError;

    fn try_from(row: ChallengeRow) -> Result<Self, Self::Error> {
        let nonce = encoding::decode_array::<24>(&row.nonce)
            .map_err(|e| StoreError::corrupt("challenges", format!("nonce: {e}")))?;
        let nonce_digest = encoding::decode(&row.nonce_digest)
            .map_err(|e| StoreError::corrupt("challenges", format!("nonce_digest: {e}")))?;
        Ok(Self {
            nonce,
            nonce_digest,
            keyring_version: u32_column("challenges", "keyring_version", row.keyring_version)?,
            status: row.status.parse()?,
            participant_id: row.participant_id,
            attempt_id: row.attempt_id,
            issued_at: row.issued_at,
            resolved_at: row.resolved_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TriangulationRow {
    pub participant_id: String,
    pub intermediate_point: String,
    pub attempt_id: Option<String>,
    /// Vault-encrypted server scalar; cleared once the attempt resolves
    pub server_scalar_enc: Option<String>,
    pub combined_point: Option<String>,
    pub response_point: Option<String>,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

impl TriangulationRow {
    pub(crate) fn to_record(&self) -> Result<TriangulationRecord, StoreError> {
        let optional_key = |column: &str, value: &Option<String>| {
            value
                .as_deref()
                .map(|v| key_column("triangulations", column, v))
                .transpose()
        };
        Ok(TriangulationRecord {
            participant_id: self.participant_id.clone(),
            intermediate_point: key_column("triangulations", "intermediate_point", &self.intermediate_point)?,
            attempt_id: self.attempt_id.clone(),
            combined_point: optional_key("combined_point", &self.combined_point)?,
            response_point: optional_key("response_point", &self.response_point)?,
            status: self.status.parse()?,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingSessionRow {
    pub sender_id: String,
    pub recipient_id: String,
    pub sender_identity_key: String,
    pub sender_ephemeral_key: String,
    pub one_time_pre_key_index: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PendingSessionRow> for PendingSession {
    type Error = StoreError;

    fn try_from(row: PendingSessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            sender_identity_key: key_column("pending_sessions", "sender_identity_key", &row.sender_identity_key)?,
            sender_ephemeral_key: key_column(
                "pending_sessions",
                "sender_ephemeral_key",
                &row.sender_ephemeral_key,
            )?,
            one_time_pre_key_index: u32_column(
                "pending_sessions",
                "one_time_pre_key_index",
                row.one_time_pre_key_index,
            )?,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServerKeyRow {
    pub version: i64,
    pub public_key: String,
    /// Vault-encrypted X25519 secret
    pub secret_enc: String,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}
