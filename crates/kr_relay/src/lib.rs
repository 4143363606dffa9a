//! kr_relay - Store-mediated key ownership proofs and X3DH bundle relay
//!
//! # Protocols
//! - `challenge`     - Encrypted nonce challenge proving possession of an identity key
//! - `triangulation` - Three-hop DH check proving consistent use of a signed prekey
//! - `exchange`      - One-time prekey reservation and exactly-once pending-session pickup
//!
//! Protocols are stateless between calls: everything they remember lives in
//! the store behind `kr_store::{Directory, Mailbox}`, and every
//! read-modify-write is a single conditional store operation. The only
//! process-wide state is the current keyring snapshot (`SharedKeyring`),
//! which follows rotations made by other processes on the same store.
//!
//! # Hosting
//! - `relay`  - Request dispatch and error-code mapping
//! - `server` / `client` - Authenticated line-delimited JSON over TCP
//! - `config` - `RelayConfig` and data directory

pub mod challenge;
pub mod client;
pub mod config;
pub mod error;
pub mod exchange;
pub mod keyring;
pub mod relay;
pub mod server;
pub mod triangulation;

pub use error::{RelayError, Result};
pub use keyring::{ServerKeyring, SharedKeyring};
pub use relay::Relay;
