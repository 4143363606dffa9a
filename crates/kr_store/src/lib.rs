//! kr_store - Durable directory and mailbox for Keyrelay
//!
//! # Contract
//! The protocols only ever see the `Directory`, `Mailbox` and `KeyringStore`
//! traits. Every read-modify-write those traits expose is a single atomic
//! step against SQLite: either one conditional statement, or one
//! `BEGIN IMMEDIATE` transaction. No in-process locking is relied upon, so
//! several relay processes may share one database file.
//!
//! # Encryption strategy
//! - Server secrets (keyring secrets, triangulation scalars) are stored as
//!   XChaCha20-Poly1305 ciphertext, base64-encoded, under the vault key.
//! - The vault key is derived from the operator passphrase via Argon2id and
//!   held in memory only while the relay runs.
//! - Public keys, nonces, digests, ids and timestamps are plaintext.
//!
//! # Migration
//! SQLx migrations in `migrations/` are embedded and applied by `Store::open`.

pub mod db;
pub mod error;
pub mod models;
pub mod traits;
pub mod vault;

mod directory;
mod keyring;
mod mailbox;

pub use db::Store;
pub use error::StoreError;
pub use traits::{Directory, KeyringStore, Mailbox, StoredServerKey, TriangulationState};
pub use vault::Vault;
