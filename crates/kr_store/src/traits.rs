//! Store contracts the relay protocols are written against.
//!
//! Methods that mutate state are atomic: they either apply completely or
//! not at all, and the `bool`-returning ones are compare-and-swap updates
//! that report whether their precondition still held.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kr_crypto::{triangulation::Scalar, PublicKeyBytes};
use kr_proto::records::{
    ChallengeRecord, ChallengeStatus, OneTimePreKey, ParticipantRecord, PendingSession,
    TriangulationRecord, TriangulationStatus,
};
use zeroize::Zeroizing;

use crate::error::StoreError;

/// Lookup of published participant keys.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn participant(&self, participant_id: &str) -> Result<Option<ParticipantRecord>, StoreError>;

    async fn remaining_one_time_pre_keys(&self, participant_id: &str) -> Result<u64, StoreError>;
}

/// Triangulation document plus the decrypted server scalar of its current
/// attempt, if one has been drawn and not yet resolved.
pub struct TriangulationState {
    pub record: TriangulationRecord,
    pub scalar: Option<Scalar>,
}

/// Per-participant and per-session documents.
#[async_trait]
pub trait Mailbox: Send + Sync {
    // ── Challenges ───────────────────────────────────────────────────────────

    /// Create or overwrite the participant's challenge (status reset to unset).
    async fn put_challenge(&self, record: &ChallengeRecord) -> Result<(), StoreError>;

    async fn challenge(&self, participant_id: &str) -> Result<Option<ChallengeRecord>, StoreError>;

    /// Resolve `attempt_id` if it is still the outstanding, unset attempt.
    async fn resolve_challenge(
        &self,
        participant_id: &str,
        attempt_id: &str,
        status: ChallengeStatus,
    ) -> Result<bool, StoreError>;

    // ── Triangulation ────────────────────────────────────────────────────────

    /// Record the participant's `x·PK`, discarding any previous attempt.
    async fn put_intermediate_point(
        &self,
        participant_id: &str,
        point: &PublicKeyBytes,
    ) -> Result<(), StoreError>;

    async fn triangulation(&self, participant_id: &str) -> Result<Option<TriangulationState>, StoreError>;

    /// Start an attempt with server scalar `y` and combined point `y·(x·PK)`,
    /// provided the intermediate point is still `expected_intermediate`.
    async fn begin_triangulation(
        &self,
        participant_id: &str,
        expected_intermediate: &PublicKeyBytes,
        attempt_id: &str,
        scalar: &Scalar,
        combined: &PublicKeyBytes,
    ) -> Result<bool, StoreError>;

    /// Store the participant's `x·(y·PK)` for a pending attempt.
    async fn put_triangulation_response(
        &self,
        participant_id: &str,
        attempt_id: &str,
        response: &PublicKeyBytes,
    ) -> Result<bool, StoreError>;

    /// Resolve a pending attempt and erase its scalar.
    async fn resolve_triangulation(
        &self,
        participant_id: &str,
        attempt_id: &str,
        status: TriangulationStatus,
    ) -> Result<bool, StoreError>;

    // ── Pending sessions ─────────────────────────────────────────────────────

    /// Reserve one unused one-time prekey of `session.recipient_id` and write
    /// `session` (keyed by sender, recipient) in the same transaction.
    /// `session.one_time_pre_key_index` and `created_at` are assigned here.
    /// Returns `None`, writing nothing, when the recipient has no unused key.
    async fn post_pending_session(
        &self,
        session: &PendingSession,
    ) -> Result<Option<(OneTimePreKey, PendingSession)>, StoreError>;

    /// Remove and return the pending session for (sender, recipient).
    async fn take_pending_session(
        &self,
        sender_id: &str,
        recipient_id: &str,
    ) -> Result<Option<PendingSession>, StoreError>;
}

/// A decrypted keyring entry.
pub struct StoredServerKey {
    pub version: u32,
    pub public_key: PublicKeyBytes,
    pub secret: Zeroizing<[u8; 32]>,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}

/// Durable home of the versioned server keyring.
#[async_trait]
pub trait KeyringStore: Send + Sync {
    /// All versions, oldest first.
    async fn server_keys(&self) -> Result<Vec<StoredServerKey>, StoreError>;

    /// Newest stored version, without touching any secret.
    async fn newest_server_key_version(&self) -> Result<Option<u32>, StoreError>;

    /// Insert `version`, retiring every older version. Fails with
    /// `Conflict` if `version` is not exactly one past the newest stored.
    async fn insert_server_key(
        &self,
        version: u32,
        public_key: &PublicKeyBytes,
        secret: &[u8; 32],
    ) -> Result<(), StoreError>;
}
