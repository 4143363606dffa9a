//! Challenge plaintext framing.
//!
//! The sealed challenge binds the random nonce to the exchange it was issued
//! for, so a response lifted from another participant or another relay
//! instance does not verify here.
//!
//! Format:
//!   [ nonce (24 bytes) | participant_id_len: u16 BE | participant_id | server_id ]
//!
//! `server_id` runs to the end of the buffer.

use thiserror::Error;

pub const CHALLENGE_NONCE_LEN: usize = 24;
const HEADER_LEN: usize = CHALLENGE_NONCE_LEN + 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengePayload {
    pub nonce: [u8; CHALLENGE_NONCE_LEN],
    pub participant_id: String,
    pub server_id: String,
}

impl ChallengePayload {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let id = self.participant_id.as_bytes();
        let id_len = u16::try_from(id.len())
            .map_err(|_| CodecError::FieldTooLong("participant_id"))?;

        let mut out = Vec::with_capacity(HEADER_LEN + id.len() + self.server_id.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&id_len.to_be_bytes());
        out.extend_from_slice(id);
        out.extend_from_slice(self.server_id.as_bytes());
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::Truncated(bytes.len()));
        }
        let mut nonce = [0u8; CHALLENGE_NONCE_LEN];
        nonce.copy_from_slice(&bytes[..CHALLENGE_NONCE_LEN]);

        let id_len = u16::from_be_bytes([bytes[CHALLENGE_NONCE_LEN], bytes[CHALLENGE_NONCE_LEN + 1]])
            as usize;
        let rest = &bytes[HEADER_LEN..];
        if id_len > rest.len() {
            return Err(CodecError::Truncated(bytes.len()));
        }
        let (id, server) = rest.split_at(id_len);

        Ok(Self {
            nonce,
            participant_id: String::from_utf8(id.to_vec())
                .map_err(|_| CodecError::InvalidUtf8("participant_id"))?,
            server_id: String::from_utf8(server.to_vec())
                .map_err(|_| CodecError::InvalidUtf8("server_id"))?,
        })
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Challenge payload truncated ({0} bytes)")]
    Truncated(usize),
    #[error("Field {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),
    #[error("Field {0} exceeds the framing limit")]
    FieldTooLong(&'static str),
    #[error("Unknown status value: {0}")]
    UnknownStatus(String),
}
