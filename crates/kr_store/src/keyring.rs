use async_trait::async_trait;
use chrono::Utc;
use kr_crypto::PublicKeyBytes;
use zeroize::Zeroizing;

use crate::{
    db::Store,
    error::StoreError,
    models::ServerKeyRow,
    traits::{KeyringStore, StoredServerKey},
};

fn secret_context(version: u32) -> String {
    format!("server_key:{version}")
}

#[async_trait]
impl KeyringStore for Store {
    async fn server_keys(&self) -> Result<Vec<StoredServerKey>, StoreError> {
        let rows: Vec<ServerKeyRow> = sqlx::query_as("SELECT * FROM server_keys ORDER BY version ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            let version = u32::try_from(row.version)
                .map_err(|_| StoreError::corrupt("server_keys", format!("version {}", row.version)))?;
            let public_key = PublicKeyBytes::from_b64(&row.public_key)
                .map_err(|e| StoreError::corrupt("server_keys", format!("public_key: {e}")))?;
            let plain = self.decrypt_value(&row.secret_enc, &secret_context(version)).await?;
            let secret: [u8; 32] = plain
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::corrupt("server_keys", "secret is not 32 bytes"))?;
            keys.push(StoredServerKey {
                version,
                public_key,
                secret: Zeroizing::new(secret),
                created_at: row.created_at,
                retired_at: row.retired_at,
            });
        }
        Ok(keys)
    }

    async fn newest_server_key_version(&self) -> Result<Option<u32>, StoreError> {
        let newest: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM server_keys")
            .fetch_one(&self.pool)
            .await?;
        newest
            .map(|v| u32::try_from(v).map_err(|_| StoreError::corrupt("server_keys", format!("version {v}"))))
            .transpose()
    }

    async fn insert_server_key(
        &self,
        version: u32,
        public_key: &PublicKeyBytes,
        secret: &[u8; 32],
    ) -> Result<(), StoreError> {
        let secret_enc = self.encrypt_value(secret, &secret_context(version)).await?;

        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let newest: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM server_keys")
            .fetch_one(&mut *tx)
            .await?;
        if i64::from(version) != newest + 1 {
            tx.rollback().await?;
            return Err(StoreError::Conflict(format!(
                "keyring version {version} does not follow stored version {newest}"
            )));
        }

        let now = Utc::now();
        sqlx::query("UPDATE server_keys SET retired_at = ? WHERE retired_at IS NULL")
            .bind(now)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO server_keys (version, public_key, secret_enc, created_at, retired_at)
             VALUES (?, ?, ?, ?, NULL)",
        )
        .bind(i64::from(version))
        .bind(public_key.to_b64())
        .bind(secret_enc)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(version, public = %public_key.fingerprint(), "server key stored");
        Ok(())
    }
}
