//! Database abstraction over SQLite via sqlx.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};

use crate::{error::StoreError, vault::Vault};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const STORE_AAD_PREFIX: &str = "kr-store-v1:";
const VAULT_SALT_KEY: &str = "vault_salt";

/// Central store handle.  Cheap to clone (Arc internally).
#[derive(Clone)]
pub struct Store {
    pub pool: SqlitePool,
    pub vault: Vault,
}

impl Store {
    /// Open (or create) the SQLite database at `db_path`.
    /// Pending migrations are applied before returning.
    ///
    /// WAL journal mode and foreign-key enforcement are configured at connection
    /// time here, NOT inside a migration: SQLite forbids changing `journal_mode`
    /// inside a transaction and sqlx wraps every migration in one.
    ///
    /// `busy_timeout` bounds how long a writer waits for another process (or
    /// pooled connection) holding the write lock.
    pub async fn open(db_path: &Path, vault: Vault, busy_timeout: Duration) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;
        MIGRATOR.run(&pool).await?;

        tracing::debug!(path = %db_path.display(), "relay store opened");
        Ok(Self { pool, vault })
    }

    /// Vault salt for this database, created on first call.
    pub async fn vault_salt(&self) -> Result<[u8; 16], StoreError> {
        let fresh = hex::encode(crate::vault::new_vault_salt());
        sqlx::query("INSERT OR IGNORE INTO relay_meta (key, value) VALUES (?, ?)")
            .bind(VAULT_SALT_KEY)
            .bind(&fresh)
            .execute(&self.pool)
            .await?;

        let stored: String = sqlx::query_scalar("SELECT value FROM relay_meta WHERE key = ?")
            .bind(VAULT_SALT_KEY)
            .fetch_one(&self.pool)
            .await?;
        let bytes = hex::decode(&stored).map_err(|e| StoreError::corrupt("relay_meta", e.to_string()))?;
        bytes
            .try_into()
            .map_err(|_| StoreError::corrupt("relay_meta", "vault salt is not 16 bytes"))
    }

    /// Encrypt a secret value with the vault key. `context` is bound as
    /// associated data, so a ciphertext cannot be moved to another row.
    pub async fn encrypt_value(&self, plaintext: &[u8], context: &str) -> Result<String, StoreError> {
        let aad = format!("{STORE_AAD_PREFIX}{context}");
        self.vault
            .with_key(|key| {
                let ct = kr_crypto::aead::encrypt(key, plaintext, aad.as_bytes())?;
                Ok(kr_crypto::encoding::encode(&ct))
            })
            .await
    }

    /// Decrypt a vault-encrypted value stored under `context`.
    pub async fn decrypt_value(&self, b64: &str, context: &str) -> Result<zeroize::Zeroizing<Vec<u8>>, StoreError> {
        let ct = kr_crypto::encoding::decode(b64)?;
        let aad = format!("{STORE_AAD_PREFIX}{context}");
        self.vault
            .with_key(|key| Ok(kr_crypto::aead::decrypt(key, &ct, aad.as_bytes())?))
            .await
    }
}
