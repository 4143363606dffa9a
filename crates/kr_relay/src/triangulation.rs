//! Three-hop Diffie–Hellman triangulation.
//!
//! With `PK` the participant's signed prekey, `x` the participant's scalar
//! and `y` a scalar the relay draws per attempt:
//!
//!   participant → relay  X = x·PK                 (submit_point)
//!   relay                C = y·X, stores y and C  (compute → y·PK only)
//!   participant → relay  R = x·(y·PK)             (submit_response)
//!   relay                y·X == C and R == C ?    (verify)
//!
//! Only a participant that applied the same `x` to the published `PK` both
//! times lands on `C`, which never leaves the relay. `y` lives in the participant's record, encrypted and
//! scoped to the attempt id, and is erased once the attempt resolves.

use std::sync::Arc;

use kr_crypto::{triangulation::Scalar, PublicKeyBytes};
use kr_proto::{
    api::{ComputeTriangulationResponse, RejectReason, VerificationResponse},
    ParticipantRecord, TriangulationStatus,
};
use kr_store::{Directory, Mailbox, TriangulationState};

use crate::error::{RelayError, Result};

pub struct TriangulationProtocol {
    directory: Arc<dyn Directory>,
    mailbox: Arc<dyn Mailbox>,
}

fn parse_point(field: &str, value: &str) -> Result<PublicKeyBytes> {
    if value.is_empty() {
        return Err(RelayError::invalid(field, "missing"));
    }
    let point = PublicKeyBytes::from_b64(value).map_err(|e| RelayError::invalid(field, e))?;
    // A low-order point collapses every product to the identity.
    Scalar::random()
        .mul(&point)
        .map_err(|_| RelayError::invalid(field, "point has low order"))?;
    Ok(point)
}

fn resolved(status: TriangulationStatus) -> VerificationResponse {
    VerificationResponse {
        verified: status == TriangulationStatus::Verified,
        reason: Some(RejectReason::AlreadyResolved),
    }
}

impl TriangulationProtocol {
    pub fn new(directory: Arc<dyn Directory>, mailbox: Arc<dyn Mailbox>) -> Self {
        Self { directory, mailbox }
    }

    async fn participant(&self, participant_id: &str) -> Result<ParticipantRecord> {
        self.directory
            .participant(participant_id)
            .await?
            .ok_or_else(|| RelayError::ParticipantNotFound(participant_id.to_string()))
    }

    async fn state(&self, participant_id: &str) -> Result<TriangulationState> {
        self.mailbox.triangulation(participant_id).await?.ok_or_else(|| RelayError::RecordNotFound {
            kind: "triangulation",
            participant_id: participant_id.to_string(),
        })
    }

    /// Record `x·PK`, starting over from a clean record.
    pub async fn submit_point(&self, participant_id: &str, intermediate_b64: &str) -> Result<()> {
        self.participant(participant_id).await?;
        let point = parse_point("intermediate_point", intermediate_b64)?;
        self.mailbox.put_intermediate_point(participant_id, &point).await?;
        tracing::info!(participant = participant_id, point = %point.fingerprint(), "intermediate point submitted");
        Ok(())
    }

    /// Draw `y` for a new attempt and store `y·(x·PK)`.
    pub async fn compute_and_store(&self, participant_id: &str) -> Result<ComputeTriangulationResponse> {
        let participant = self.participant(participant_id).await?;
        let state = self.state(participant_id).await?;
        if matches!(state.record.status, TriangulationStatus::Verified | TriangulationStatus::NotVerified) {
            return Err(RelayError::invalid(
                "participant_id",
                "triangulation already resolved; submit a new intermediate point",
            ));
        }

        let intermediate = state.record.intermediate_point;
        let y = Scalar::random();
        let combined = y.mul(&intermediate)?;
        let server_point = y.mul(&participant.signed_pre_key)?;
        let attempt_id = uuid::Uuid::new_v4().to_string();

        if !self
            .mailbox
            .begin_triangulation(participant_id, &intermediate, &attempt_id, &y, &combined)
            .await?
        {
            return Err(RelayError::Conflict(format!(
                "triangulation record of {participant_id} changed during compute"
            )));
        }

        tracing::info!(
            participant = participant_id,
            attempt = %attempt_id,
            "triangulation computed"
        );
        Ok(ComputeTriangulationResponse { server_point, attempt_id })
    }

    /// Record the participant's `x·(y·PK)` for a pending attempt.
    pub async fn submit_response(&self, participant_id: &str, attempt_id: &str, response_b64: &str) -> Result<()> {
        self.participant(participant_id).await?;
        if attempt_id.is_empty() {
            return Err(RelayError::invalid("attempt_id", "missing"));
        }
        let response = parse_point("response_point", response_b64)?;
        self.state(participant_id).await?;

        if !self.mailbox.put_triangulation_response(participant_id, attempt_id, &response).await? {
            return Err(RelayError::UnknownAttempt {
                participant_id: participant_id.to_string(),
                attempt_id: attempt_id.to_string(),
            });
        }
        tracing::debug!(participant = participant_id, attempt = attempt_id, "triangulation response submitted");
        Ok(())
    }

    /// Compare the participant's response with the stored combined point
    /// and persist the outcome of the pending attempt.
    pub async fn verify(&self, participant_id: &str) -> Result<VerificationResponse> {
        self.participant(participant_id).await?;
        let state = self.state(participant_id).await?;
        let record = &state.record;

        match record.status {
            TriangulationStatus::Verified | TriangulationStatus::NotVerified => return Ok(resolved(record.status)),
            TriangulationStatus::Unset => {
                return Ok(VerificationResponse { verified: false, reason: Some(RejectReason::NoAttempt) })
            }
            TriangulationStatus::Pending => {}
        }

        let (Some(attempt_id), Some(y), Some(combined)) = (&record.attempt_id, &state.scalar, &record.combined_point)
        else {
            return Ok(VerificationResponse { verified: false, reason: Some(RejectReason::NoAttempt) });
        };
        // The attempt stays open until a response arrives.
        let Some(response) = &record.response_point else {
            return Ok(VerificationResponse { verified: false, reason: Some(RejectReason::NoResponse) });
        };

        let recomputed = y.mul(&record.intermediate_point)?;
        let matches = recomputed.ct_matches(combined) & response.ct_matches(combined);
        let status = if matches { TriangulationStatus::Verified } else { TriangulationStatus::NotVerified };

        if !self.mailbox.resolve_triangulation(participant_id, attempt_id, status).await? {
            tracing::info!(participant = participant_id, attempt = %attempt_id, "triangulation superseded");
            return Ok(VerificationResponse { verified: false, reason: Some(RejectReason::Superseded) });
        }

        tracing::info!(participant = participant_id, attempt = %attempt_id, %status, "triangulation resolved");
        Ok(VerificationResponse {
            verified: matches,
            reason: (!matches).then_some(RejectReason::PointMismatch),
        })
    }
}

/// Participant side: the scalar `x` and its two products.
pub struct TriangulationClient {
    x: Scalar,
}

impl TriangulationClient {
    pub fn new() -> Self {
        Self { x: Scalar::random() }
    }

    /// `x·PK`, submitted before the relay computes.
    pub fn intermediate_point(&self, signed_pre_key: &PublicKeyBytes) -> Result<PublicKeyBytes> {
        Ok(self.x.mul(signed_pre_key)?)
    }

    /// `x·(y·PK)` from the relay's server point.
    pub fn respond(&self, server_point: &PublicKeyBytes) -> Result<PublicKeyBytes> {
        Ok(self.x.mul(server_point)?)
    }
}

impl Default for TriangulationClient {
    fn default() -> Self {
        Self::new()
    }
}
