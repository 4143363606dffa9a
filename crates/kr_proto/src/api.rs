//! Request/response types, one pair per protocol operation.
//! These map directly to JSON bodies on the wire.

use kr_crypto::PublicKeyBytes;
use serde::{Deserialize, Serialize};

use crate::records::PendingSession;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    Unauthenticated,
    InvalidArgument,
    NotFound,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

/// Why a verification came back negative. Negative outcomes are results,
/// not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    DecryptionFailed,
    IdentityMismatch,
    NonceMismatch,
    /// Another issue or verify replaced the attempt this call read.
    Superseded,
    /// The attempt was already resolved; the recorded outcome is returned.
    AlreadyResolved,
    /// No scalar has been drawn for the current intermediate point.
    NoAttempt,
    NoResponse,
    PointMismatch,
}

// ── Challenge ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueChallengeRequest {
    pub participant_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueChallengeResponse {
    /// Sealed challenge payload (base64).
    pub ciphertext: String,
    /// Box nonce used to seal `ciphertext` (base64).
    pub encryption_nonce: String,
    /// Relay key the participant must open with and respond to.
    pub server_public_key: PublicKeyBytes,
    pub keyring_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyChallengeRequest {
    pub participant_id: String,
    /// Participant's response box (base64).
    pub ciphertext: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResponse {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

// ── Triangulation ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTriangulationPointRequest {
    pub participant_id: String,
    /// `x·PK` (base64).
    pub intermediate_point: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeTriangulationRequest {
    pub participant_id: String,
}

/// `y·(x·PK)` stays with the relay; the participant has to reach it on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeTriangulationResponse {
    /// `y·PK`; the participant multiplies by `x` and submits the result.
    pub server_point: PublicKeyBytes,
    pub attempt_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTriangulationResponseRequest {
    pub participant_id: String,
    pub attempt_id: String,
    /// `x·(y·PK)` (base64).
    pub response_point: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyTriangulationRequest {
    pub participant_id: String,
}

// ── Key bundle exchange ──────────────────────────────────────────────────────

/// Every field defaults to empty so that a missing field surfaces as
/// `invalid-argument` from the exchange instead of a framing error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitiateKeyExchangeRequest {
    #[serde(default)]
    pub recipient_id: String,
    #[serde(default)]
    pub sender_id: String,
    /// Base64 X25519 identity key of the sender.
    #[serde(default)]
    pub sender_identity_key: String,
    /// Base64 X25519 ephemeral key of the sender.
    #[serde(default)]
    pub sender_ephemeral_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateKeyExchangeResponse {
    pub recipient_identity_key: PublicKeyBytes,
    pub recipient_signed_pre_key: PublicKeyBytes,
    pub recipient_one_time_pre_key: PublicKeyBytes,
    pub consumed_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveSessionRequest {
    pub sender_id: String,
    pub recipient_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieveSessionResponse {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session: Option<PendingSession>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemainingPreKeysRequest {
    pub participant_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemainingPreKeysResponse {
    pub remaining: u64,
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "params", rename_all = "camelCase")]
pub enum RelayRequest {
    Ping,
    IssueChallenge(IssueChallengeRequest),
    VerifyChallenge(VerifyChallengeRequest),
    SubmitTriangulationPoint(SubmitTriangulationPointRequest),
    ComputeTriangulation(ComputeTriangulationRequest),
    SubmitTriangulationResponse(SubmitTriangulationResponseRequest),
    VerifyTriangulation(VerifyTriangulationRequest),
    InitiateKeyExchange(InitiateKeyExchangeRequest),
    RetrieveSession(RetrieveSessionRequest),
    RemainingPreKeys(RemainingPreKeysRequest),
}

impl RelayRequest {
    /// Operation name for log lines.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::IssueChallenge(_) => "issueChallenge",
            Self::VerifyChallenge(_) => "verifyChallenge",
            Self::SubmitTriangulationPoint(_) => "submitTriangulationPoint",
            Self::ComputeTriangulation(_) => "computeTriangulation",
            Self::SubmitTriangulationResponse(_) => "submitTriangulationResponse",
            Self::VerifyTriangulation(_) => "verifyTriangulation",
            Self::InitiateKeyExchange(_) => "initiateKeyExchange",
            Self::RetrieveSession(_) => "retrieveSession",
            Self::RemainingPreKeys(_) => "remainingPreKeys",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", content = "data", rename_all = "camelCase")]
pub enum RelayResponse {
    Pong,
    Accepted,
    ChallengeIssued(IssueChallengeResponse),
    Verification(VerificationResponse),
    TriangulationComputed(ComputeTriangulationResponse),
    KeyBundle(InitiateKeyExchangeResponse),
    Session(RetrieveSessionResponse),
    RemainingPreKeys(RemainingPreKeysResponse),
    Error(ErrorResponse),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape() {
        let req = RelayRequest::IssueChallenge(IssueChallengeRequest {
            participant_id: "u1".into(),
        });
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["op"], "issueChallenge");
        assert_eq!(json["params"]["participant_id"], "u1");
    }

    #[test]
    fn missing_exchange_fields_default_to_empty() {
        let req: RelayRequest = serde_json::from_str(
            r#"{"op":"initiateKeyExchange","params":{"recipient_id":"bob"}}"#,
        )
        .unwrap();
        match req {
            RelayRequest::InitiateKeyExchange(r) => {
                assert_eq!(r.recipient_id, "bob");
                assert!(r.sender_id.is_empty());
                assert!(r.sender_ephemeral_key.is_empty());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn error_codes_are_kebab_case() {
        let resp = RelayResponse::Error(ErrorResponse {
            code: ErrorCode::NotFound,
            message: "participant not found".into(),
        });
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["result"], "error");
        assert_eq!(json["data"]["code"], "not-found");
    }

    #[test]
    fn session_not_found_omits_session() {
        let resp = RetrieveSessionResponse { found: false, session: None };
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"found":false}"#);
    }
}
