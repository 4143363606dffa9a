//! Line-delimited JSON over TCP.
//!
//! Each connection authenticates once with an HMAC-SHA256 proof over a
//! server nonce and a client nonce (see `kr_proto::envelope`), then sends
//! request envelopes whose nonces must strictly increase. Any handshake or
//! framing violation, including a line longer than `MAX_FRAME_LEN`, is
//! answered with an `Error` envelope and the connection is closed.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use kr_crypto::encoding::ct_eq;
use kr_proto::{
    envelope::{AuthOk, ResponseEnvelope, ServerChallenge, PROTOCOL_VERSION},
    Envelope, ErrorCode,
};
use rand::RngCore;
use sha2::Sha256;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::relay::Relay;

/// Longest accepted line, newline excluded.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

pub(crate) enum Frame {
    Line,
    Closed,
    Oversized,
}

/// Read one line into `line`, never buffering more than `MAX_FRAME_LEN + 1` bytes.
pub(crate) async fn read_frame<R>(reader: &mut R, line: &mut String) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let n = (&mut *reader).take(MAX_FRAME_LEN as u64 + 1).read_line(line).await?;
    if n == 0 {
        Ok(Frame::Closed)
    } else if n > MAX_FRAME_LEN && !line.ends_with('\n') {
        Ok(Frame::Oversized)
    } else {
        Ok(Frame::Line)
    }
}

/// HMAC-SHA256(secret, server_nonce || client_nonce), hex.
pub fn compute_proof(secret: &[u8], server_nonce: &str, client_nonce: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(|e| anyhow!("mac init: {e}"))?;
    mac.update(server_nonce.as_bytes());
    mac.update(client_nonce.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Clone)]
struct SessionState {
    last_nonce: u64,
}

pub struct AuthContext {
    shared_secret: Zeroizing<Vec<u8>>,
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl AuthContext {
    pub fn new(shared_secret: Vec<u8>) -> Self {
        Self { shared_secret: Zeroizing::new(shared_secret), sessions: Mutex::new(HashMap::new()) }
    }

    fn check_proof(&self, server_nonce: &str, client_nonce: &str, proof: &str) -> Result<bool> {
        let expected = compute_proof(&self.shared_secret, server_nonce, client_nonce)?;
        Ok(ct_eq(expected.as_bytes(), proof.as_bytes()))
    }

    async fn register_session(&self, session_id: String) {
        self.sessions.lock().await.insert(session_id, SessionState { last_nonce: 0 });
    }

    async fn end_session(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
    }

    async fn verify_and_update_nonce(&self, session_id: &str, nonce: u64) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(session_id).ok_or_else(|| anyhow!("unknown session"))?;
        if nonce <= session.last_nonce {
            return Err(anyhow!("replay detected: nonce not increasing"));
        }
        session.last_nonce = nonce;
        Ok(())
    }
}

pub struct RelayServer {
    auth: Arc<AuthContext>,
    relay: Arc<Relay>,
}

impl RelayServer {
    pub fn new(auth_secret: Vec<u8>, relay: Arc<Relay>) -> Self {
        Self { auth: Arc::new(AuthContext::new(auth_secret)), relay }
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        tracing::info!(addr = %listener.local_addr()?, "relay listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let auth = self.auth.clone();
            let relay = self.relay.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, auth, relay).await {
                    tracing::warn!(%peer, error = %e, "connection closed with error");
                }
            });
        }
    }
}

async fn send<W>(writer: &mut W, envelope: &Envelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(serde_json::to_string(envelope)?.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Next frame into `line`; `false` once the peer has closed.
async fn next_frame<R, W>(reader: &mut R, writer: &mut W, line: &mut String) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match read_frame(reader, line).await? {
        Frame::Line => Ok(true),
        Frame::Closed => Ok(false),
        Frame::Oversized => refuse(writer, ErrorCode::InvalidArgument, "frame exceeds size limit").await.map(|()| false),
    }
}

/// Tell the peer why it is being dropped, then fail the connection.
async fn refuse<W>(writer: &mut W, code: ErrorCode, message: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    send(writer, &Envelope::Error { code, message: message.to_string() }).await?;
    Err(anyhow!("{message}"))
}

async fn handle_connection<S>(stream: S, auth: Arc<AuthContext>, relay: Arc<Relay>) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    // Expect ClientHello
    let mut line = String::new();
    if !next_frame(&mut reader, &mut writer, &mut line).await? {
        return Err(anyhow!("empty hello"));
    }
    let hello = match serde_json::from_str::<Envelope>(line.trim_end()) {
        Ok(Envelope::ClientHello(h)) => h,
        _ => return refuse(&mut writer, ErrorCode::InvalidArgument, "expected ClientHello").await,
    };
    if hello.protocol_version != PROTOCOL_VERSION {
        return refuse(&mut writer, ErrorCode::InvalidArgument, "protocol version mismatch").await;
    }
    if hello.client_id.is_empty() {
        return refuse(&mut writer, ErrorCode::Unauthenticated, "missing client id").await;
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let mut server_nonce_bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut server_nonce_bytes);
    let server_nonce = hex::encode(server_nonce_bytes);
    send(
        &mut writer,
        &Envelope::ServerChallenge(ServerChallenge {
            session_id: session_id.clone(),
            server_nonce: server_nonce.clone(),
        }),
    )
    .await?;

    if !next_frame(&mut reader, &mut writer, &mut line).await? {
        return Err(anyhow!("missing client auth"));
    }
    let auth_msg = match serde_json::from_str::<Envelope>(line.trim_end()) {
        Ok(Envelope::ClientAuth(m)) => m,
        _ => return refuse(&mut writer, ErrorCode::Unauthenticated, "expected ClientAuth").await,
    };
    if auth_msg.session_id != session_id {
        return refuse(&mut writer, ErrorCode::Unauthenticated, "session id mismatch").await;
    }
    if !auth.check_proof(&server_nonce, &auth_msg.client_nonce, &auth_msg.proof)? {
        tracing::warn!(client = %hello.client_id, "handshake rejected: invalid proof");
        return refuse(&mut writer, ErrorCode::Unauthenticated, "invalid proof").await;
    }

    auth.register_session(session_id.clone()).await;
    send(&mut writer, &Envelope::AuthOk(AuthOk { session_id: session_id.clone() })).await?;
    tracing::debug!(client = %hello.client_id, session = %session_id, "client authenticated");

    let result = serve_requests(&mut reader, &mut writer, &mut line, &session_id, &auth, &relay).await;
    auth.end_session(&session_id).await;
    result
}

async fn serve_requests<R, W>(
    reader: &mut R,
    writer: &mut W,
    line: &mut String,
    session_id: &str,
    auth: &AuthContext,
    relay: &Relay,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        if !next_frame(reader, writer, line).await? {
            return Ok(());
        }
        let req_env = match serde_json::from_str::<Envelope>(line.trim_end()) {
            Ok(Envelope::Request(r)) => r,
            Ok(_) => return refuse(writer, ErrorCode::InvalidArgument, "expected Request envelope").await,
            Err(e) => return refuse(writer, ErrorCode::InvalidArgument, &format!("malformed request: {e}")).await,
        };
        if req_env.session_id != session_id {
            return refuse(writer, ErrorCode::Unauthenticated, "session mismatch").await;
        }
        if let Err(e) = auth.verify_and_update_nonce(session_id, req_env.nonce).await {
            return refuse(writer, ErrorCode::Unauthenticated, &e.to_string()).await;
        }

        let response = relay.handle(req_env.request).await;
        send(
            writer,
            &Envelope::Response(ResponseEnvelope {
                session_id: session_id.to_string(),
                nonce: req_env.nonce,
                response,
            }),
        )
        .await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_changes_with_nonce() {
        let p1 = compute_proof(&[1, 2, 3, 4], "abc", "def").unwrap();
        let p2 = compute_proof(&[1, 2, 3, 4], "abc", "xyz").unwrap();
        assert_ne!(p1, p2);
    }

    #[test]
    fn proof_is_checked_against_the_secret() {
        let ctx = AuthContext::new(vec![7; 32]);
        let good = compute_proof(&[7; 32], "s", "c").unwrap();
        let bad = compute_proof(&[8; 32], "s", "c").unwrap();
        assert!(ctx.check_proof("s", "c", &good).unwrap());
        assert!(!ctx.check_proof("s", "c", &bad).unwrap());
    }

    #[tokio::test]
    async fn frames_are_bounded() {
        let mut input = vec![b'a'; MAX_FRAME_LEN];
        input.push(b'\n');
        input.extend(std::iter::repeat(b'b').take(MAX_FRAME_LEN + 1));
        let mut reader = BufReader::new(input.as_slice());
        let mut line = String::new();

        assert!(matches!(read_frame(&mut reader, &mut line).await.unwrap(), Frame::Line));
        assert_eq!(line.len(), MAX_FRAME_LEN + 1);
        assert!(matches!(read_frame(&mut reader, &mut line).await.unwrap(), Frame::Oversized));
        assert!(matches!(read_frame(&mut reader, &mut line).await.unwrap(), Frame::Closed));
    }

    #[tokio::test]
    async fn nonce_replay_rejected() {
        let ctx = AuthContext::new(vec![1, 2, 3, 4]);
        ctx.register_session("s1".to_string()).await;
        ctx.verify_and_update_nonce("s1", 1).await.unwrap();
        assert!(ctx.verify_and_update_nonce("s1", 1).await.is_err());
        ctx.end_session("s1").await;
        assert!(ctx.verify_and_update_nonce("s1", 2).await.is_err());
    }
}
