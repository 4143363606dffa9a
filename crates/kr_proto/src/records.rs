//! Logical documents held by the durable store.
//!
//! One participant document (directory entry + its one-time prekeys), one
//! challenge document and one triangulation document per participant, and
//! one pending-session document per ordered (sender, recipient) pair.
//!
//! Secret server material (the triangulation scalar, keyring secrets) is
//! never part of these types; the store hands it out separately.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use kr_crypto::PublicKeyBytes;
use serde::{Deserialize, Serialize};

use crate::codec::CodecError;

// ── Directory ────────────────────────────────────────────────────────────────

/// A participant's published keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub participant_id: String,
    /// Long-term X25519 identity key.
    pub identity_key: PublicKeyBytes,
    /// Medium-term X25519 signed prekey; also the triangulation base point.
    pub signed_pre_key: PublicKeyBytes,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimePreKey {
    pub index: u32,
    pub public_key: PublicKeyBytes,
}

// ── Challenge ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Unset,
    Verified,
    Failed,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Verified => "verified",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Unset)
    }
}

impl FromStr for ChallengeStatus {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unset" => Ok(Self::Unset),
            "verified" => Ok(Self::Verified),
            "failed" => Ok(Self::Failed),
            other => Err(CodecError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outstanding (or resolved) ownership challenge for one participant.
/// A new issue overwrites the previous attempt; records are never deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRecord {
    pub participant_id: String,
    /// Random id of this issue; verify resolves only the attempt it read.
    pub attempt_id: String,
    /// Challenge nonce N. Also the nonce of the participant's response box.
    pub nonce: [u8; 24],
    /// SHA-512(N).
    pub nonce_digest: Vec<u8>,
    /// Keyring version whose secret sealed the challenge.
    pub keyring_version: u32,
    pub status: ChallengeStatus,
    pub issued_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

// ── Triangulation ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriangulationStatus {
    /// Intermediate point submitted, no server scalar drawn yet.
    Unset,
    /// Server scalar drawn, waiting for the participant's response.
    Pending,
    Verified,
    NotVerified,
}

impl TriangulationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::NotVerified => "not_verified",
        }
    }
}

impl FromStr for TriangulationStatus {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unset" => Ok(Self::Unset),
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "not_verified" => Ok(Self::NotVerified),
            other => Err(CodecError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for TriangulationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriangulationRecord {
    pub participant_id: String,
    /// `x·PK`, computed by the participant.
    pub intermediate_point: PublicKeyBytes,
    pub attempt_id: Option<String>,
    /// `y·(x·PK)`, computed by the relay.
    pub combined_point: Option<PublicKeyBytes>,
    /// `x·(y·PK)`, submitted by the participant.
    pub response_point: Option<PublicKeyBytes>,
    pub status: TriangulationStatus,
    pub updated_at: DateTime<Utc>,
}

// ── Key bundle exchange ──────────────────────────────────────────────────────

/// Initiator material waiting for the recipient, keyed by (sender, recipient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSession {
    pub sender_id: String,
    pub recipient_id: String,
    pub sender_identity_key: PublicKeyBytes,
    pub sender_ephemeral_key: PublicKeyBytes,
    /// Index of the recipient's one-time prekey reserved for this session.
    pub one_time_pre_key_index: u32,
    /// Assigned by the store, not by the caller.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_parse_back() {
        for s in [ChallengeStatus::Unset, ChallengeStatus::Verified, ChallengeStatus::Failed] {
            assert_eq!(s.as_str().parse::<ChallengeStatus>().unwrap(), s);
        }
        for s in [
            TriangulationStatus::Unset,
            TriangulationStatus::Pending,
            TriangulationStatus::Verified,
            TriangulationStatus::NotVerified,
        ] {
            assert_eq!(s.as_str().parse::<TriangulationStatus>().unwrap(), s);
        }
        assert!("bogus".parse::<ChallengeStatus>().is_err());
    }

    #[test]
    fn only_unset_is_open() {
        assert!(!ChallengeStatus::Unset.is_terminal());
        assert!(ChallengeStatus::Verified.is_terminal());
        assert!(ChallengeStatus::Failed.is_terminal());
    }
}
