//! Connection envelopes for the relay's line-delimited JSON transport.
//!
//! Every connection starts with a short handshake that establishes the
//! caller as a holder of the relay's shared auth secret:
//!
//!   client → ClientHello
//!   relay  → ServerChallenge { session_id, server_nonce }
//!   client → ClientAuth { client_nonce, proof = HMAC(secret, server_nonce || client_nonce) }
//!   relay  → AuthOk
//!
//! After that, each line is a `Request` answered by exactly one `Response`
//! carrying the same (strictly increasing) nonce.

use serde::{Deserialize, Serialize};

use crate::api::{ErrorCode, RelayRequest, RelayResponse};

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHello {
    pub protocol_version: u32,
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerChallenge {
    pub session_id: String,
    pub server_nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAuth {
    pub session_id: String,
    pub client_nonce: String,
    pub proof: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthOk {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub session_id: String,
    pub nonce: u64,
    pub request: RelayRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub session_id: String,
    pub nonce: u64,
    pub response: RelayResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Envelope {
    ClientHello(ClientHello),
    ServerChallenge(ServerChallenge),
    ClientAuth(ClientAuth),
    AuthOk(AuthOk),
    Error { code: ErrorCode, message: String },
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
}
