use kr_crypto::CryptoError;
use kr_proto::{CodecError, ErrorCode};
use kr_store::StoreError;
use thiserror::Error;

/// Failure of a relay operation.
///
/// Negative protocol outcomes (a response that does not verify, no pending
/// session) are results, not errors; they never surface here.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("No {kind} record for participant {participant_id}")]
    RecordNotFound { kind: &'static str, participant_id: String },

    #[error("Unknown triangulation attempt {attempt_id} for participant {participant_id}")]
    UnknownAttempt { participant_id: String, attempt_id: String },

    #[error("Participant {0} has no unused one-time prekeys")]
    PreKeysExhausted(String),

    #[error("Keyring has no version {0}")]
    UnknownKeyVersion(u32),

    #[error("Keyring is empty; run `keyrelay init` first")]
    KeyringNotInitialized,

    #[error("Record changed concurrently: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated(_) => ErrorCode::Unauthenticated,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::ParticipantNotFound(_)
            | Self::RecordNotFound { .. }
            | Self::UnknownAttempt { .. }
            | Self::PreKeysExhausted(_) => ErrorCode::NotFound,
            Self::UnknownKeyVersion(_)
            | Self::KeyringNotInitialized
            | Self::Conflict(_)
            | Self::Store(_)
            | Self::Crypto(_)
            | Self::Codec(_) => ErrorCode::Internal,
        }
    }

    /// Message safe to return to a caller. Internal failures are not
    /// described beyond their code.
    pub fn public_message(&self) -> String {
        match self.code() {
            ErrorCode::Internal => "internal error".to_string(),
            _ => self.to_string(),
        }
    }

    pub(crate) fn invalid(field: &str, detail: impl std::fmt::Display) -> Self {
        Self::InvalidArgument(format!("{field}: {detail}"))
    }
}
