//! Client half of the relay connection protocol.

use anyhow::{anyhow, Result};
use kr_proto::{
    envelope::{AuthOk, ClientAuth, ClientHello, RequestEnvelope, ServerChallenge, PROTOCOL_VERSION},
    Envelope, ErrorCode, RelayRequest, RelayResponse,
};
use rand::RngCore;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpStream, ToSocketAddrs,
};

use crate::server::{compute_proof, read_frame, Frame, MAX_FRAME_LEN};

/// The relay answered with an `Error` envelope and closed the connection.
#[derive(Debug, Error)]
#[error("relay refused ({code:?}): {message}")]
pub struct Refused {
    pub code: ErrorCode,
    pub message: String,
}

pub struct RelayClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    session_id: String,
    last_nonce: u64,
}

impl RelayClient {
    /// Connect and authenticate with the shared secret.
    pub async fn connect(addr: impl ToSocketAddrs, client_id: &str, secret: &[u8]) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, writer) = stream.into_split();
        let mut client = Self { reader: BufReader::new(read_half), writer, session_id: String::new(), last_nonce: 0 };

        client
            .send(&Envelope::ClientHello(ClientHello {
                protocol_version: PROTOCOL_VERSION,
                client_id: client_id.to_string(),
            }))
            .await?;
        let ServerChallenge { session_id, server_nonce } = match client.receive().await? {
            Envelope::ServerChallenge(c) => c,
            _ => return Err(anyhow!("expected ServerChallenge")),
        };

        let mut nonce_bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let client_nonce = hex::encode(nonce_bytes);
        let proof = compute_proof(secret, &server_nonce, &client_nonce)?;
        client
            .send(&Envelope::ClientAuth(ClientAuth { session_id: session_id.clone(), client_nonce, proof }))
            .await?;

        let AuthOk { session_id } = match client.receive().await? {
            Envelope::AuthOk(ok) => ok,
            _ => return Err(anyhow!("expected AuthOk")),
        };
        client.session_id = session_id;
        Ok(client)
    }

    /// Send one request with the next nonce and wait for its response.
    pub async fn call(&mut self, request: RelayRequest) -> Result<RelayResponse> {
        let nonce = self.last_nonce + 1;
        self.call_with_nonce(nonce, request).await
    }

    /// Send one request under an explicit nonce. The relay drops the
    /// connection unless `nonce` is above every nonce it has seen.
    pub async fn call_with_nonce(&mut self, nonce: u64, request: RelayRequest) -> Result<RelayResponse> {
        self.last_nonce = self.last_nonce.max(nonce);
        self.send(&Envelope::Request(RequestEnvelope { session_id: self.session_id.clone(), nonce, request }))
            .await?;
        match self.receive().await? {
            Envelope::Response(env) if env.nonce == nonce => Ok(env.response),
            Envelope::Response(env) => Err(anyhow!("response nonce {} for request {nonce}", env.nonce)),
            _ => Err(anyhow!("unexpected envelope")),
        }
    }

    async fn send(&mut self, envelope: &Envelope) -> Result<()> {
        self.writer.write_all(serde_json::to_string(envelope)?.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Envelope> {
        let mut line = String::new();
        match read_frame(&mut self.reader, &mut line).await? {
            Frame::Line => {}
            Frame::Closed => return Err(anyhow!("relay closed the connection")),
            Frame::Oversized => return Err(anyhow!("relay frame exceeds {MAX_FRAME_LEN} bytes")),
        }
        match serde_json::from_str(line.trim_end())? {
            Envelope::Error { code, message } => Err(Refused { code, message }.into()),
            envelope => Ok(envelope),
        }
    }
}
