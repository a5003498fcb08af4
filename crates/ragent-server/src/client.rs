//! Client half of the relay protocol
//!
//! The relay's certificate is self-signed, so TLS certificate validation is
//! replaced by the in-band [`ServerProof`]: the client checks that the proof
//! signs the exact certificate this connection presented, and optionally
//! that the proof key is the relay key it already trusts.

use ragent_cert::{ensure_crypto_provider, verify_proof, CertError};
use ragent_identity::Identity;
use ragent_proto::{
    ClientReply, Nonce, ServerProof, Verdict, VerifyKey, WireError, NONCE_LEN, PROOF_LEN,
    VERDICT_LEN,
};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// TLS server name sent in the ClientHello; never validated
const RELAY_SERVER_NAME: &str = "ragent";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Relay presented no certificate")]
    NoCertificate,

    #[error("Server proof rejected: {0}")]
    Proof(#[from] CertError),

    #[error("Relay key {actual} does not match expected {expected}")]
    RelayKeyMismatch {
        expected: VerifyKey,
        actual: VerifyKey,
    },

    #[error("Protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("Relay closed the connection without a verdict")]
    ClosedWithoutVerdict,

    #[error("Relay refused access")]
    Rejected,
}

/// Connects to a relay and performs the admission handshake
#[derive(Clone)]
pub struct RelayClient {
    connector: TlsConnector,
    expected_relay: Option<VerifyKey>,
}

impl RelayClient {
    pub fn new() -> Self {
        ensure_crypto_provider();

        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(ProofBoundVerifier::new())
            .with_no_client_auth();

        Self {
            connector: TlsConnector::from(Arc::new(config)),
            expected_relay: None,
        }
    }

    /// Only accept a relay whose proof is made by `key`
    pub fn expect_relay(mut self, key: VerifyKey) -> Self {
        self.expected_relay = Some(key);
        self
    }

    /// Open TLS, validate the server proof and read the nonce
    pub async fn open<A: ToSocketAddrs>(&self, addr: A) -> Result<PendingSession, ClientError> {
        let tcp = TcpStream::connect(addr).await?;
        let _ = tcp.set_nodelay(true);

        let server_name = ServerName::try_from(RELAY_SERVER_NAME)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let mut stream = self.connector.connect(server_name, tcp).await?;

        let mut raw = [0u8; PROOF_LEN];
        stream.read_exact(&mut raw).await?;
        let proof = ServerProof::decode(&raw)?;

        let cert = stream
            .get_ref()
            .1
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or(ClientError::NoCertificate)?;
        verify_proof(&proof, cert.as_ref())?;

        if let Some(expected) = self.expected_relay {
            if expected != proof.verify_key {
                return Err(ClientError::RelayKeyMismatch {
                    expected,
                    actual: proof.verify_key,
                });
            }
        }

        let mut raw = [0u8; NONCE_LEN];
        stream.read_exact(&mut raw).await?;
        let nonce = Nonce::decode(&raw)?;

        Ok(PendingSession {
            stream,
            relay_key: proof.verify_key,
            nonce,
        })
    }

    /// Full handshake: open, sign the nonce with `identity`, await the verdict
    pub async fn connect<A: ToSocketAddrs>(
        &self,
        addr: A,
        identity: &Identity,
    ) -> Result<ClientSession, ClientError> {
        self.open(addr).await?.authenticate(identity).await
    }
}

impl Default for RelayClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection whose server proof checked out, waiting for our reply
pub struct PendingSession {
    stream: TlsStream<TcpStream>,
    relay_key: VerifyKey,
    nonce: Nonce,
}

impl PendingSession {
    pub fn relay_key(&self) -> VerifyKey {
        self.relay_key
    }

    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    /// Answer the challenge as `identity`
    pub async fn authenticate(self, identity: &Identity) -> Result<ClientSession, ClientError> {
        let reply = ClientReply::new(identity.verify_key(), identity.sign(self.nonce.as_bytes()));
        self.send_reply(&reply).await
    }

    /// Send an arbitrary reply and read the verdict
    pub async fn send_reply(mut self, reply: &ClientReply) -> Result<ClientSession, ClientError> {
        self.stream.write_all(&reply.encode()).await?;
        self.stream.flush().await?;

        let mut raw = [0u8; VERDICT_LEN];
        match self.stream.read_exact(&mut raw).await {
            Ok(_) => {}
            Err(e) if is_closed(&e) => return Err(ClientError::ClosedWithoutVerdict),
            Err(e) => return Err(e.into()),
        }

        match Verdict::decode(&raw)? {
            Verdict::Okay => Ok(ClientSession {
                stream: self.stream,
                relay_key: self.relay_key,
            }),
            Verdict::Fail => Err(ClientError::Rejected),
        }
    }
}

/// Admitted session; the stream now carries application bytes
pub struct ClientSession {
    stream: TlsStream<TcpStream>,
    relay_key: VerifyKey,
}

impl ClientSession {
    pub fn relay_key(&self) -> VerifyKey {
        self.relay_key
    }

    pub fn stream_mut(&mut self) -> &mut TlsStream<TcpStream> {
        &mut self.stream
    }

    pub fn into_stream(self) -> TlsStream<TcpStream> {
        self.stream
    }
}

fn is_closed(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
    )
}

// Accepts any certificate (identity is established by the server proof) but
// still checks handshake signatures so the peer must hold the cert's key.
#[derive(Debug)]
struct ProofBoundVerifier {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ProofBoundVerifier {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            algorithms: rustls::crypto::ring::default_provider().signature_verification_algorithms,
        })
    }
}

impl ServerCertVerifier for ProofBoundVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
