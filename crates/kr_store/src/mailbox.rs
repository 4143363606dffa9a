//! Mailbox side of the store: challenge, triangulation and pending-session
//! documents.

use async_trait::async_trait;
use chrono::Utc;
use kr_crypto::{encoding, triangulation::Scalar, PublicKeyBytes};
use kr_proto::records::{
    ChallengeRecord, ChallengeStatus, OneTimePreKey, PendingSession, TriangulationStatus,
};

use crate::{
    db::Store,
    error::StoreError,
    models::{ChallengeRow, OneTimePreKeyRow, PendingSessionRow, TriangulationRow},
    traits::{Mailbox, TriangulationState},
};

/// Vault context for a triangulation scalar: bound to participant and attempt.
fn scalar_context(participant_id: &str, attempt_id: &str) -> String {
    format!("triangulation:{participant_id}:{attempt_id}")
}

#[async_trait]
impl Mailbox for Store {
    async fn put_challenge(&self, record: &ChallengeRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO challenges
                (participant_id, attempt_id, nonce, nonce_digest, keyring_version, status, issued_at, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(participant_id) DO UPDATE SET
                attempt_id = excluded.attempt_id,
                nonce = excluded.nonce,
                nonce_digest = excluded.nonce_digest,
                keyring_version = excluded.keyring_version,
                status = excluded.status,
                issued_at = excluded.issued_at,
                resolved_at = excluded.resolved_at",
        )
        .bind(&record.participant_id)
        .bind(&record.attempt_id)
        .bind(encoding::encode(&record.nonce))
        .bind(encoding::encode(&record.nonce_digest))
        .bind(i64::from(record.keyring_version))
        .bind(record.status.as_str())
        .bind(record.issued_at)
        .bind(record.resolved_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn challenge(&self, participant_id: &str) -> Result<Option<ChallengeRecord>, StoreError> {
        let row: Option<ChallengeRow> = sqlx::query_as("SELECT * FROM challenges WHERE participant_id = ?")
            .bind(participant_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ChallengeRecord::try_from).transpose()
    }

    async fn resolve_challenge(
        &self,
        participant_id: &str,
        attempt_id: &str,
        status: ChallengeStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE challenges SET status = ?, resolved_at = ?
             WHERE participant_id = ? AND attempt_id = ? AND status = 'unset'",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(participant_id)
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn put_intermediate_point(
        &self,
        participant_id: &str,
        point: &PublicKeyBytes,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO triangulations
                (participant_id, intermediate_point, attempt_id, server_scalar_enc,
                 combined_point, response_point, status, updated_at)
             VALUES (?, ?, NULL, NULL, NULL, NULL, 'unset', ?)
             ON CONFLICT(participant_id) DO UPDATE SET
                intermediate_point = excluded.intermediate_point,
                attempt_id = NULL,
                server_scalar_enc = NULL,
                combined_point = NULL,
                response_point = NULL,
                status = 'unset',
                updated_at = excluded.updated_at",
        )
        .bind(participant_id)
        .bind(point.to_b64())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn triangulation(&self, participant_id: &str) -> Result<Option<TriangulationState>, StoreError> {
        let row: Option<TriangulationRow> =
            sqlx::query_as("SELECT * FROM triangulations WHERE participant_id = ?")
                .bind(participant_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let record = row.to_record()?;
        let scalar = match (&row.attempt_id, &row.server_scalar_enc) {
            (Some(attempt_id), Some(enc)) => {
                let bytes = self
                    .decrypt_value(enc, &scalar_context(participant_id, attempt_id))
                    .await?;
                Some(Scalar::from_bytes(&bytes)?)
            }
            _ => None,
        };
        Ok(Some(TriangulationState { record, scalar }))
    }

    async fn begin_triangulation(
        &self,
        participant_id: &str,
        expected_intermediate: &PublicKeyBytes,
        attempt_id: &str,
        scalar: &Scalar,
        combined: &PublicKeyBytes,
    ) -> Result<bool, StoreError> {
        let scalar_enc = self
            .encrypt_value(scalar.as_bytes(), &scalar_context(participant_id, attempt_id))
            .await?;

        // A later compute supersedes a pending attempt; a resolved one needs
        // a fresh intermediate point first.
        let result = sqlx::query(
            "UPDATE triangulations SET
                attempt_id = ?, server_scalar_enc = ?, combined_point = ?,
                response_point = NULL, status = 'pending', updated_at = ?
             WHERE participant_id = ? AND intermediate_point = ?
               AND status IN ('unset', 'pending')",
        )
        .bind(attempt_id)
        .bind(scalar_enc)
        .bind(combined.to_b64())
        .bind(Utc::now())
        .bind(participant_id)
        .bind(expected_intermediate.to_b64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn put_triangulation_response(
        &self,
        participant_id: &str,
        attempt_id: &str,
        response: &PublicKeyBytes,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE triangulations SET response_point = ?, updated_at = ?
             WHERE participant_id = ? AND attempt_id = ? AND status = 'pending'",
        )
        .bind(response.to_b64())
        .bind(Utc::now())
        .bind(participant_id)
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn resolve_triangulation(
        &self,
        participant_id: &str,
        attempt_id: &str,
        status: TriangulationStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE triangulations SET status = ?, server_scalar_enc = NULL, updated_at = ?
             WHERE participant_id = ? AND attempt_id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(participant_id)
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn post_pending_session(
        &self,
        session: &PendingSession,
    ) -> Result<Option<(OneTimePreKey, PendingSession)>, StoreError> {
        // IMMEDIATE takes the write lock up front, so two initiators can never
        // both read the same unused row.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let row: Option<OneTimePreKeyRow> = sqlx::query_as(
            "SELECT * FROM one_time_prekeys
             WHERE participant_id = ? AND consumed_at IS NULL
             ORDER BY RANDOM() LIMIT 1",
        )
        .bind(&session.recipient_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let now = Utc::now();
        let consumed = sqlx::query(
            "UPDATE one_time_prekeys SET consumed_at = ?, consumed_by = ?
             WHERE participant_id = ? AND idx = ? AND consumed_at IS NULL",
        )
        .bind(now)
        .bind(&session.sender_id)
        .bind(&row.participant_id)
        .bind(row.idx)
        .execute(&mut *tx)
        .await?;
        if consumed.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(StoreError::Conflict(format!(
                "one-time prekey {} of {} consumed concurrently",
                row.idx, row.participant_id
            )));
        }

        let key = OneTimePreKey::try_from(row)?;
        let stored = PendingSession {
            one_time_pre_key_index: key.index,
            created_at: now,
            ..session.clone()
        };

        sqlx::query(
            "INSERT INTO pending_sessions
                (sender_id, recipient_id, sender_identity_key, sender_ephemeral_key,
                 one_time_pre_key_index, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(sender_id, recipient_id) DO UPDATE SET
                sender_identity_key = excluded.sender_identity_key,
                sender_ephemeral_key = excluded.sender_ephemeral_key,
                one_time_pre_key_index = excluded.one_time_pre_key_index,
                created_at = excluded.created_at",
        )
        .bind(&stored.sender_id)
        .bind(&stored.recipient_id)
        .bind(stored.sender_identity_key.to_b64())
        .bind(stored.sender_ephemeral_key.to_b64())
        .bind(i64::from(stored.one_time_pre_key_index))
        .bind(stored.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some((key, stored)))
    }

    async fn take_pending_session(
        &self,
        sender_id: &str,
        recipient_id: &str,
    ) -> Result<Option<PendingSession>, StoreError> {
        let row: Option<PendingSessionRow> = sqlx::query_as(
            "DELETE FROM pending_sessions WHERE sender_id = ? AND recipient_id = ?
             RETURNING sender_id, recipient_id, sender_identity_key, sender_ephemeral_key,
                       one_time_pre_key_index, created_at",
        )
        .bind(sender_id)
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PendingSession::try_from).transpose()
    }
}
