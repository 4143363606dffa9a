//! Directory side of the store: published participant keys and their
//! one-time prekeys.

use async_trait::async_trait;
use chrono::Utc;
use kr_crypto::PublicKeyBytes;
use kr_proto::records::ParticipantRecord;

use crate::{db::Store, error::StoreError, models::ParticipantRow, traits::Directory};

#[async_trait]
impl Directory for Store {
    async fn participant(&self, participant_id: &str) -> Result<Option<ParticipantRecord>, StoreError> {
        let row: Option<ParticipantRow> = sqlx::query_as(
            "SELECT participant_id, identity_key, signed_pre_key, published_at
             FROM participants WHERE participant_id = ?",
        )
        .bind(participant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ParticipantRecord::try_from).transpose()
    }

    async fn remaining_one_time_pre_keys(&self, participant_id: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM one_time_prekeys WHERE participant_id = ? AND consumed_at IS NULL",
        )
        .bind(participant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}

// ── Provisioning ─────────────────────────────────────────────────────────────
//
// Account provisioning lives outside the relay; these exist for the `seed`
// command and for tests.

impl Store {
    /// Publish (or replace) a participant's identity key and signed prekey.
    pub async fn publish_participant(
        &self,
        participant_id: &str,
        identity_key: &PublicKeyBytes,
        signed_pre_key: &PublicKeyBytes,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO participants (participant_id, identity_key, signed_pre_key, published_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(participant_id) DO UPDATE SET
                identity_key = excluded.identity_key,
                signed_pre_key = excluded.signed_pre_key,
                published_at = excluded.published_at",
        )
        .bind(participant_id)
        .bind(identity_key.to_b64())
        .bind(signed_pre_key.to_b64())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::info!(
            participant = participant_id,
            identity = %identity_key.fingerprint(),
            "participant published"
        );
        Ok(())
    }

    /// Append one-time prekeys after the highest existing index.
    /// Returns the indices assigned, in input order.
    pub async fn add_one_time_pre_keys(
        &self,
        participant_id: &str,
        keys: &[PublicKeyBytes],
    ) -> Result<Vec<u32>, StoreError> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(idx) + 1, 0) FROM one_time_prekeys WHERE participant_id = ?",
        )
        .bind(participant_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut assigned = Vec::with_capacity(keys.len());
        for (offset, key) in keys.iter().enumerate() {
            let idx = next + offset as i64;
            sqlx::query("INSERT INTO one_time_prekeys (participant_id, idx, public_key) VALUES (?, ?, ?)")
                .bind(participant_id)
                .bind(idx)
                .bind(key.to_b64())
                .execute(&mut *tx)
                .await?;
            assigned.push(
                u32::try_from(idx)
                    .map_err(|_| StoreError::corrupt("one_time_prekeys", "index overflow"))?,
            );
        }

        tx.commit().await?;
        tracing::info!(participant = participant_id, added = keys.len(), "one-time prekeys added");
        Ok(assigned)
    }
}
