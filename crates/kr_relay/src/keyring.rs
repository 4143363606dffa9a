//! Versioned server keyring.
//!
//! A `ServerKeyring` is an immutable snapshot of the stored versions. The
//! newest version seals new challenges; older versions stay available so
//! challenges issued before a rotation or restart still verify. Keys are
//! only generated by `load_or_init` on an empty store and by an explicit
//! `rotate`.
//!
//! Several relay processes may share one store, and any of them may rotate.
//! `SharedKeyring` holds the running process's snapshot and swaps in a fresh
//! one when the store has moved past it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kr_crypto::{x3dh::generate_keypair, PublicKeyBytes};
use kr_store::{KeyringStore, StoreError, StoredServerKey};
use tokio::sync::RwLock;
use x25519_dalek::StaticSecret;

use crate::error::{RelayError, Result};

pub struct KeyringEntry {
    pub version: u32,
    pub secret: StaticSecret,
    pub public_key: PublicKeyBytes,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl From<StoredServerKey> for KeyringEntry {
    fn from(stored: StoredServerKey) -> Self {
        Self {
            version: stored.version,
            secret: StaticSecret::from(*stored.secret),
            public_key: stored.public_key,
            created_at: stored.created_at,
            retired_at: stored.retired_at,
        }
    }
}

pub struct ServerKeyring {
    server_id: String,
    current: u32,
    entries: BTreeMap<u32, KeyringEntry>,
}

impl ServerKeyring {
    /// Load every stored version. Fails if the keyring was never initialized.
    pub async fn load(server_id: &str, store: &dyn KeyringStore) -> Result<Self> {
        let entries: BTreeMap<u32, KeyringEntry> = store
            .server_keys()
            .await?
            .into_iter()
            .map(|stored| (stored.version, KeyringEntry::from(stored)))
            .collect();
        let current = *entries.keys().next_back().ok_or(RelayError::KeyringNotInitialized)?;

        tracing::debug!(server_id, current, versions = entries.len(), "keyring loaded");
        Ok(Self { server_id: server_id.to_string(), current, entries })
    }

    /// Load the keyring, creating version 1 if the store holds none.
    pub async fn load_or_init(server_id: &str, store: &dyn KeyringStore) -> Result<Self> {
        match Self::load(server_id, store).await {
            Err(RelayError::KeyringNotInitialized) => {}
            other => return other,
        }

        let (secret, public_key) = generate_keypair();
        match store.insert_server_key(1, &public_key, &secret.to_bytes()).await {
            Ok(()) => tracing::info!(version = 1, public = %public_key.fingerprint(), "keyring initialized"),
            // Another process initialized it first; use theirs.
            Err(StoreError::Conflict(_)) => {}
            Err(e) => return Err(e.into()),
        }
        Self::load(server_id, store).await
    }

    /// Add version `current + 1` and retire the older ones. Returns the
    /// reloaded keyring; `self` is left as it was.
    pub async fn rotate(&self, store: &dyn KeyringStore) -> Result<Self> {
        let version = self.current + 1;
        let (secret, public_key) = generate_keypair();
        store.insert_server_key(version, &public_key, &secret.to_bytes()).await?;
        tracing::info!(version, public = %public_key.fingerprint(), "keyring rotated");
        Self::load(&self.server_id, store).await
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Version used for new challenges.
    pub fn current(&self) -> &KeyringEntry {
        &self.entries[&self.current]
    }

    pub fn get(&self, version: u32) -> Option<&KeyringEntry> {
        self.entries.get(&version)
    }

    pub fn versions(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }
}

/// The keyring as used by a running relay.
#[derive(Clone)]
pub struct SharedKeyring {
    loaded: Arc<RwLock<Arc<ServerKeyring>>>,
    store: Arc<dyn KeyringStore>,
}

impl SharedKeyring {
    pub fn new(keyring: Arc<ServerKeyring>, store: Arc<dyn KeyringStore>) -> Self {
        Self { loaded: Arc::new(RwLock::new(keyring)), store }
    }

    pub async fn snapshot(&self) -> Arc<ServerKeyring> {
        self.loaded.read().await.clone()
    }

    async fn reload(&self) -> Result<Arc<ServerKeyring>> {
        let mut slot = self.loaded.write().await;
        let fresh = Arc::new(ServerKeyring::load(slot.server_id(), self.store.as_ref()).await?);
        if fresh.current != slot.current {
            tracing::info!(from = slot.current, to = fresh.current, "keyring reloaded");
        }
        *slot = fresh.clone();
        Ok(fresh)
    }

    /// Snapshot whose current version is the newest stored one.
    pub async fn for_issue(&self) -> Result<Arc<ServerKeyring>> {
        let loaded = self.snapshot().await;
        match self.store.newest_server_key_version().await? {
            Some(newest) if newest > loaded.current => self.reload().await,
            _ => Ok(loaded),
        }
    }

    /// Snapshot holding `version`, reloading once if this process has not
    /// seen it yet.
    pub async fn for_version(&self, version: u32) -> Result<Arc<ServerKeyring>> {
        let loaded = self.snapshot().await;
        if loaded.get(version).is_some() {
            return Ok(loaded);
        }
        let fresh = self.reload().await?;
        if fresh.get(version).is_none() {
            return Err(RelayError::UnknownKeyVersion(version));
        }
        Ok(fresh)
    }
}
