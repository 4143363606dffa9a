#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use kr_crypto::{
    x3dh::{generate_keypair, generate_one_time_prekeys},
    PublicKeyBytes,
};
use kr_relay::{Relay, ServerKeyring};
use kr_store::{Store, Vault};
use x25519_dalek::StaticSecret;

pub const SERVER_ID: &str = "relay-test";

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: Store,
    pub keyring: Arc<ServerKeyring>,
    pub relay: Relay,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let keyring = Arc::new(ServerKeyring::load_or_init(SERVER_ID, &store).await.unwrap());
        let relay = Relay::with_store(&store, keyring.clone());
        Self { dir, store, keyring, relay }
    }

    /// A relay over the same database, as a restarted (or second) process
    /// would see it.
    pub async fn reopen(&self, server_id: &str) -> (Store, Relay) {
        let store = open_store(&self.dir).await;
        let keyring = Arc::new(ServerKeyring::load(server_id, &store).await.unwrap());
        let relay = Relay::with_store(&store, keyring);
        (store, relay)
    }
}

pub async fn open_store(dir: &tempfile::TempDir) -> Store {
    let vault = Vault::new();
    vault.unlock_with_key([42u8; 32]).await;
    Store::open(&dir.path().join("relay.db"), vault, Duration::from_secs(10))
        .await
        .unwrap()
}

/// Secret halves of a published participant.
pub struct Participant {
    pub id: String,
    pub identity: StaticSecret,
    pub identity_public: PublicKeyBytes,
    pub signed_pre_key: StaticSecret,
    pub signed_pre_key_public: PublicKeyBytes,
    pub one_time: Vec<(StaticSecret, PublicKeyBytes)>,
}

impl Participant {
    pub fn one_time_secret(&self, index: u32) -> &StaticSecret {
        &self.one_time[index as usize].0
    }
}

pub async fn publish(store: &Store, id: &str, one_time_count: usize) -> Participant {
    let (identity, identity_public) = generate_keypair();
    let (signed_pre_key, signed_pre_key_public) = generate_keypair();
    let one_time = generate_one_time_prekeys(one_time_count);

    store.publish_participant(id, &identity_public, &signed_pre_key_public).await.unwrap();
    let publics: Vec<_> = one_time.iter().map(|(_, public)| *public).collect();
    let indices = store.add_one_time_pre_keys(id, &publics).await.unwrap();
    assert_eq!(indices, (0..one_time_count as u32).collect::<Vec<_>>());

    Participant {
        id: id.to_string(),
        identity,
        identity_public,
        signed_pre_key,
        signed_pre_key_public,
        one_time,
    }
}
