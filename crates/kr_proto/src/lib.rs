//! kr_proto - Records, wire types and framing for Keyrelay
//!
//! All on-wire types are serialised to JSON; binary fields are base64
//! strings produced by `kr_crypto::encoding`.
//!
//! # Modules
//! - `records`  - Logical documents the relay persists (per participant / per session)
//! - `codec`    - Challenge plaintext framing
//! - `api`      - Request/response types, one per protocol operation
//! - `envelope` - Connection handshake and request/response envelopes

pub mod api;
pub mod codec;
pub mod envelope;
pub mod records;

pub use api::{ErrorCode, RelayRequest, RelayResponse};
pub use codec::{ChallengePayload, CodecError};
pub use envelope::Envelope;
pub use records::{
    ChallengeRecord, ChallengeStatus, OneTimePreKey, ParticipantRecord, PendingSession,
    TriangulationRecord, TriangulationStatus,
};
