//! Process-lifetime holder for the column encryption key.
//!
//! Encrypted columns are only readable while the vault is open. `lock`
//! drops the key (zeroized via `VaultKey`); afterwards every secret read or
//! write fails with `StoreError::VaultLocked`.

use std::sync::Arc;

use kr_crypto::kdf::{self, VaultKey, VAULT_SALT_LEN};
use tokio::sync::RwLock;

use crate::error::StoreError;

#[derive(Clone, Default)]
pub struct Vault {
    key: Arc<RwLock<Option<VaultKey>>>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stretch the operator passphrase against the database salt and open
    /// the vault with the result.
    pub async fn unlock(&self, passphrase: &[u8], salt: &[u8; VAULT_SALT_LEN]) -> Result<(), StoreError> {
        let derived = VaultKey::derive(passphrase, salt)?;
        self.key.write().await.replace(derived);
        Ok(())
    }

    /// Open with raw key bytes, bypassing the passphrase step.
    pub async fn unlock_with_key(&self, key: [u8; 32]) {
        self.key.write().await.replace(VaultKey(key));
    }

    pub async fn lock(&self) {
        self.key.write().await.take();
    }

    pub async fn is_locked(&self) -> bool {
        self.key.read().await.is_none()
    }

    /// Run `op` against the open key.
    pub async fn with_key<T>(&self, op: impl FnOnce(&[u8; 32]) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let slot = self.key.read().await;
        let key = slot.as_ref().ok_or(StoreError::VaultLocked)?;
        op(&key.0)
    }
}

/// Salt written to `relay_meta` when a database is first opened.
pub fn new_vault_salt() -> [u8; VAULT_SALT_LEN] {
    kdf::generate_salt()
}
