use std::sync::Arc;

use kr_proto::{
    api::ErrorResponse,
    ErrorCode, RelayRequest, RelayResponse,
};
use kr_store::{Directory, Mailbox, Store};

use crate::{
    challenge::ChallengeProtocol,
    error::Result,
    exchange::KeyBundleExchange,
    keyring::{ServerKeyring, SharedKeyring},
    triangulation::TriangulationProtocol,
};

/// The three protocols behind one request dispatcher.
pub struct Relay {
    challenges: ChallengeProtocol,
    triangulation: TriangulationProtocol,
    exchange: KeyBundleExchange,
}

impl Relay {
    pub fn new(directory: Arc<dyn Directory>, mailbox: Arc<dyn Mailbox>, keyring: SharedKeyring) -> Self {
        Self {
            challenges: ChallengeProtocol::new(directory.clone(), mailbox.clone(), keyring),
            triangulation: TriangulationProtocol::new(directory.clone(), mailbox.clone()),
            exchange: KeyBundleExchange::new(directory, mailbox),
        }
    }

    /// Relay backed by one SQLite store for both directory and mailbox.
    pub fn with_store(store: &Store, keyring: Arc<ServerKeyring>) -> Self {
        let store = Arc::new(store.clone());
        let keyring = SharedKeyring::new(keyring, store.clone());
        Self::new(store.clone(), store, keyring)
    }

    pub fn challenges(&self) -> &ChallengeProtocol {
        &self.challenges
    }

    pub fn triangulation(&self) -> &TriangulationProtocol {
        &self.triangulation
    }

    pub fn exchange(&self) -> &KeyBundleExchange {
        &self.exchange
    }

    /// Run one operation. Errors become an `Error` response carrying their code.
    pub async fn handle(&self, request: RelayRequest) -> RelayResponse {
        let op = request.op();
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(err) => {
                let code = err.code();
                if code == ErrorCode::Internal {
                    tracing::error!(op, error = %err, "operation failed");
                } else {
                    tracing::debug!(op, error = %err, "operation rejected");
                }
                RelayResponse::Error(ErrorResponse { code, message: err.public_message() })
            }
        }
    }

    async fn dispatch(&self, request: RelayRequest) -> Result<RelayResponse> {
        Ok(match request {
            RelayRequest::Ping => RelayResponse::Pong,
            RelayRequest::IssueChallenge(req) => {
                RelayResponse::ChallengeIssued(self.challenges.issue(&req.participant_id).await?)
            }
            RelayRequest::VerifyChallenge(req) => {
                RelayResponse::Verification(self.challenges.verify(&req.participant_id, &req.ciphertext).await?)
            }
            RelayRequest::SubmitTriangulationPoint(req) => {
                self.triangulation.submit_point(&req.participant_id, &req.intermediate_point).await?;
                RelayResponse::Accepted
            }
            RelayRequest::ComputeTriangulation(req) => {
                RelayResponse::TriangulationComputed(self.triangulation.compute_and_store(&req.participant_id).await?)
            }
            RelayRequest::SubmitTriangulationResponse(req) => {
                self.triangulation
                    .submit_response(&req.participant_id, &req.attempt_id, &req.response_point)
                    .await?;
                RelayResponse::Accepted
            }
            RelayRequest::VerifyTriangulation(req) => {
                RelayResponse::Verification(self.triangulation.verify(&req.participant_id).await?)
            }
            RelayRequest::InitiateKeyExchange(req) => RelayResponse::KeyBundle(self.exchange.initiate(&req).await?),
            RelayRequest::RetrieveSession(req) => {
                RelayResponse::Session(self.exchange.retrieve(&req.sender_id, &req.recipient_id).await?)
            }
            RelayRequest::RemainingPreKeys(req) => {
                RelayResponse::RemainingPreKeys(self.exchange.remaining_pre_keys(&req.participant_id).await?)
            }
        })
    }
}
