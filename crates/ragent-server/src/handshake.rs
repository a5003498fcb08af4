//! Admission handshake
//!
//! Per-session state machine run after the server proof has been sent:
//!
//! ```text
//! Start -> NonceSent -> AwaitingReply -> SignatureVerified -> AuthorizationChecked -> Admitted
//!                            |                  |                      |
//!                            +------------------+----------------------+-----------> Rejected
//! ```
//!
//! Malformed replies and bad signatures close without a verdict. Only the
//! authorization step answers with `FAIL`.

use ragent_auth::{is_admitted, DirectoryError, GrantDirectory};
use ragent_proto::{ClientReply, Nonce, Verdict, VerifyKey, WireError, REPLY_LEN};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Why a session was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCause {
    MalformedReply,
    InvalidSignature,
    NotAuthorized,
    DirectoryFailure,
}

impl fmt::Display for RejectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectCause::MalformedReply => "malformed or absent reply",
            RejectCause::InvalidSignature => "invalid signature",
            RejectCause::NotAuthorized => "not authorized",
            RejectCause::DirectoryFailure => "authorization directory failure",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Start,
    NonceSent,
    AwaitingReply,
    SignatureVerified,
    AuthorizationChecked,
    Admitted,
    Rejected(RejectCause),
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::Admitted | HandshakeState::Rejected(_))
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Malformed or absent reply: {0}")]
    MalformedReply(#[source] std::io::Error),

    #[error("No reply within {0:?}")]
    ReplyTimeout(Duration),

    #[error("Malformed reply: {0}")]
    Wire(#[from] WireError),

    #[error("Invalid signature over nonce from {0}")]
    InvalidSignature(VerifyKey),

    #[error("{0} holds no matching grant")]
    NotAuthorized(VerifyKey),

    #[error("Authorization directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HandshakeError {
    pub fn cause(&self) -> RejectCause {
        match self {
            HandshakeError::MalformedReply(_)
            | HandshakeError::ReplyTimeout(_)
            | HandshakeError::Wire(_)
            | HandshakeError::Io(_) => RejectCause::MalformedReply,
            HandshakeError::InvalidSignature(_) => RejectCause::InvalidSignature,
            HandshakeError::NotAuthorized(_) => RejectCause::NotAuthorized,
            HandshakeError::Directory(_) => RejectCause::DirectoryFailure,
        }
    }
}

/// One session's admission handshake
pub struct AdmissionHandshake<'a> {
    relay_key: VerifyKey,
    directory: &'a dyn GrantDirectory,
    capability: &'a str,
    reply_timeout: Duration,
    state: HandshakeState,
}

impl<'a> AdmissionHandshake<'a> {
    pub fn new(
        relay_key: VerifyKey,
        directory: &'a dyn GrantDirectory,
        capability: &'a str,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            relay_key,
            directory,
            capability,
            reply_timeout,
            state: HandshakeState::Start,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run the handshake to completion, returning the admitted client's key.
    ///
    /// On `Ok` the `OKAY` marker has been written and the stream is ready for
    /// relaying. On `Err` the caller must close the stream.
    pub async fn run<S>(&mut self, stream: &mut S) -> Result<VerifyKey, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.drive(stream).await {
            Ok(client) => {
                self.transition(HandshakeState::Admitted);
                Ok(client)
            }
            Err(e) => {
                self.transition(HandshakeState::Rejected(e.cause()));
                Err(e)
            }
        }
    }

    async fn drive<S>(&mut self, stream: &mut S) -> Result<VerifyKey, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let nonce = Nonce::generate();
        stream.write_all(nonce.as_bytes()).await?;
        stream.flush().await?;
        self.transition(HandshakeState::NonceSent);

        let reply = self.read_reply(stream).await?;

        if !ragent_identity::verify(&reply.verify_key, nonce.as_bytes(), &reply.signature) {
            return Err(HandshakeError::InvalidSignature(reply.verify_key));
        }
        drop(nonce);
        self.transition(HandshakeState::SignatureVerified);
        debug!(client = %reply.verify_key, "Client signature valid");

        let grants = match self.directory.grants_from(&self.relay_key).await {
            Ok(grants) => grants,
            Err(e) => {
                warn!(client = %reply.verify_key, "Authorization lookup failed: {}", e);
                Self::send_verdict(stream, Verdict::Fail).await;
                return Err(e.into());
            }
        };
        let admitted = is_admitted(&grants, &reply.verify_key, self.capability);
        self.transition(HandshakeState::AuthorizationChecked);

        if !admitted {
            Self::send_verdict(stream, Verdict::Fail).await;
            return Err(HandshakeError::NotAuthorized(reply.verify_key));
        }

        info!(client = %reply.verify_key, "Relay grant exists for client");
        stream.write_all(Verdict::Okay.as_bytes()).await?;
        stream.flush().await?;
        Ok(reply.verify_key)
    }

    async fn read_reply<S>(&mut self, stream: &mut S) -> Result<ClientReply, HandshakeError>
    where
        S: AsyncRead + Unpin,
    {
        self.transition(HandshakeState::AwaitingReply);

        let mut buf = [0u8; REPLY_LEN];
        match tokio::time::timeout(self.reply_timeout, stream.read_exact(&mut buf)).await {
            Err(_) => return Err(HandshakeError::ReplyTimeout(self.reply_timeout)),
            Ok(Err(e)) => return Err(HandshakeError::MalformedReply(e)),
            Ok(Ok(_)) => {}
        }

        Ok(ClientReply::decode(&buf)?)
    }

    // The session is being rejected either way; a failed write changes nothing.
    async fn send_verdict<S>(stream: &mut S, verdict: Verdict)
    where
        S: AsyncWrite + Unpin,
    {
        if stream.write_all(verdict.as_bytes()).await.is_ok() {
            let _ = stream.flush().await;
        }
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!("Handshake {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
