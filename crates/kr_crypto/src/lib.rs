//! kr_crypto - Keyrelay cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Binary values cross every boundary through `encoding`, never ad hoc.
//!
//! # Module layout
//! - `encoding`       - base64 key codec, `PublicKeyBytes`, constant-time equality
//! - `hash`           - SHA-512 nonce digests
//! - `kdf`            - HKDF / Argon2id key derivation
//! - `aead`           - XChaCha20-Poly1305 helpers for data at rest
//! - `sealed`         - authenticated public-key box (X25519 + XChaCha20-Poly1305)
//! - `triangulation`  - scalar / point arithmetic for the three-hop DH check
//! - `x3dh`           - client-side X3DH derivation over a relayed key bundle
//! - `error`          - unified error type

pub mod aead;
pub mod encoding;
pub mod error;
pub mod hash;
pub mod kdf;
pub mod sealed;
pub mod triangulation;
pub mod x3dh;

pub use encoding::PublicKeyBytes;
pub use error::CryptoError;
