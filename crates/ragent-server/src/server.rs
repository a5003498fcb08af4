//! TLS listener
//!
//! Accepts connections, sends the server proof first, then runs the
//! admission handshake and relay for each connection on its own task.
//! A failing session never affects the listener or other sessions.

use ragent_proto::VerifyKey;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout_at, Instant};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::{RelayConfig, RelayContext};
use crate::handshake::{AdmissionHandshake, HandshakeError};
use crate::relay::relay;

#[derive(Debug, Error)]
pub enum RelayServerError {
    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("Certificate error: {0}")]
    Certificate(#[from] ragent_cert::CertError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that end a single session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("TLS handshake failed: {0}")]
    Tls(std::io::Error),

    #[error("Admission not completed within the handshake timeout")]
    AdmissionTimeout,

    #[error("Failed to send server proof: {0}")]
    Proof(std::io::Error),

    #[error("Admission rejected: {0}")]
    Rejected(#[from] HandshakeError),

    #[error("Failed to connect to upstream {address}: {source}")]
    UpstreamConnect {
        address: String,
        source: std::io::Error,
    },
}

/// Pause before accepting again after an accept error (e.g. EMFILE)
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Authenticating relay server
pub struct RelayServer {
    config: Arc<RelayConfig>,
    context: Arc<RelayContext>,
    acceptor: TlsAcceptor,
    listener: TcpListener,
}

impl RelayServer {
    /// Bind the listen address. Fails if the address is unusable.
    pub async fn bind(config: RelayConfig, context: Arc<RelayContext>) -> Result<Self, RelayServerError> {
        let server_config = context.certificate().server_config()?;
        let acceptor = TlsAcceptor::from(server_config);

        let listener = TcpListener::bind(config.listen_addr).await.map_err(|e| {
            RelayServerError::BindError {
                address: config.listen_addr.ip().to_string(),
                port: config.listen_addr.port(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            config: Arc::new(config),
            context,
            acceptor,
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever
    pub async fn run(self) -> Result<(), RelayServerError> {
        info!(
            relay_key = %self.context.verify_key(),
            upstream = %self.config.upstream_addr,
            "ragent listening on {}",
            self.local_addr()?
        );

        let listener = &self.listener;
        loop {
            let (socket, peer_addr) = accept_with_backoff(move || listener.accept()).await;
            info!("Accepted connection from {}", peer_addr);

            let acceptor = self.acceptor.clone();
            let context = self.context.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                match Self::handle_connection(socket, peer_addr, acceptor, context, config).await {
                    Ok(()) => debug!("Session with {} finished", peer_addr),
                    Err(SessionError::Rejected(e)) => {
                        warn!("Rejected {} ({}): {}", peer_addr, e.cause(), e)
                    }
                    Err(e) => warn!("Session with {} failed: {}", peer_addr, e),
                }
            });
        }
    }

    async fn handle_connection(
        socket: TcpStream,
        peer_addr: SocketAddr,
        acceptor: TlsAcceptor,
        context: Arc<RelayContext>,
        config: Arc<RelayConfig>,
    ) -> Result<(), SessionError> {
        // One deadline for everything before the client is admitted
        let deadline = Instant::now() + config.handshake_timeout;

        let mut stream = timeout_at(deadline, acceptor.accept(socket))
            .await
            .map_err(|_| SessionError::AdmissionTimeout)?
            .map_err(SessionError::Tls)?;

        let client = admit(&mut stream, &context, &config, deadline).await?;

        let upstream = match TcpStream::connect(&config.upstream_addr).await {
            Ok(upstream) => upstream,
            Err(source) => {
                let _ = tokio::time::timeout(config.handshake_timeout, stream.shutdown()).await;
                return Err(SessionError::UpstreamConnect {
                    address: config.upstream_addr.clone(),
                    source,
                });
            }
        };
        let _ = upstream.set_nodelay(true);

        info!(client = %client, "Beginning relay: {}", peer_addr);
        let stats = relay(stream, upstream, &config.relay).await;
        info!(
            client = %client,
            to_upstream = stats.to_upstream,
            to_downstream = stats.to_downstream,
            "Relay terminated: {}",
            peer_addr
        );

        Ok(())
    }
}

/// Retry `accept` until it yields a connection, pausing after each error so a
/// persistent failure does not spin the loop
async fn accept_with_backoff<F, Fut, T>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(conn) => return conn,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

/// Send the server proof and run the admission handshake, all before
/// `deadline`. A rejected stream is shut down within the same deadline.
async fn admit<S>(
    stream: &mut S,
    context: &RelayContext,
    config: &RelayConfig,
    deadline: Instant,
) -> Result<VerifyKey, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let admission = async {
        // Proof goes first so the client can check the certificate before anything else
        stream
            .write_all(&context.proof().encode())
            .await
            .map_err(SessionError::Proof)?;
        stream.flush().await.map_err(SessionError::Proof)?;

        let mut handshake = AdmissionHandshake::new(
            context.verify_key(),
            context.directory(),
            &config.capability,
            config.handshake_timeout,
        );
        match handshake.run(stream).await {
            Ok(client) => Ok(client),
            Err(e) => {
                let _ = stream.shutdown().await;
                Err(SessionError::from(e))
            }
        }
    };

    match timeout_at(deadline, admission).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::AdmissionTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragent_auth::{AuthorizationGrant, StaticDirectory};
    use ragent_identity::Identity;
    use ragent_proto::{ClientReply, NONCE_LEN, PROOF_LEN, RELAY_CAPABILITY};
    use tokio::io::AsyncReadExt;

    fn context_with(directory: StaticDirectory) -> (RelayContext, Identity) {
        let relay = Identity::generate();
        let client = Identity::generate();
        let directory = directory.with_grant(AuthorizationGrant::new(
            relay.verify_key(),
            client.verify_key(),
            RELAY_CAPABILITY,
        ));
        let context = RelayContext::new(
            relay,
            Arc::new(directory),
            ragent_cert::DEFAULT_CERT_VALIDITY,
        )
        .unwrap();
        (context, client)
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_that_never_reads_is_dropped() {
        let (context, _) = context_with(StaticDirectory::default());
        let config = RelayConfig::default();

        // Too small for the proof; the peer never drains it
        let (mut server, _client) = tokio::io::duplex(16);
        let start = Instant::now();
        let deadline = start + config.handshake_timeout;

        let result = admit(&mut server, &context, &config, deadline).await;

        assert!(matches!(result, Err(SessionError::AdmissionTimeout)));
        assert!(start.elapsed() >= config.handshake_timeout);
    }

    #[tokio::test]
    async fn test_admitted_client_within_deadline() {
        let (context, client_identity) = context_with(StaticDirectory::default());
        let config = RelayConfig::default();
        let (mut server, mut client) = tokio::io::duplex(1024);
        let deadline = Instant::now() + config.handshake_timeout;

        let client_task = async move {
            let mut head = [0u8; PROOF_LEN + NONCE_LEN];
            client.read_exact(&mut head).await.unwrap();
            let reply = ClientReply::new(
                client_identity.verify_key(),
                client_identity.sign(&head[PROOF_LEN..]),
            );
            client.write_all(&reply.encode()).await.unwrap();

            let mut verdict = [0u8; 4];
            client.read_exact(&mut verdict).await.unwrap();
            (client_identity.verify_key(), verdict)
        };

        let (result, (client_key, verdict)) =
            tokio::join!(admit(&mut server, &context, &config, deadline), client_task);

        assert_eq!(result.unwrap(), client_key);
        assert_eq!(&verdict, b"OKAY");
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_errors_back_off_then_recover() {
        let mut failures = 3;
        let mut attempts = 0;
        let start = Instant::now();

        let conn = accept_with_backoff(|| {
            attempts += 1;
            let result = if failures > 0 {
                failures -= 1;
                Err(std::io::Error::from_raw_os_error(24))
            } else {
                Ok("connection")
            };
            async move { result }
        })
        .await;

        assert_eq!(conn, "connection");
        assert_eq!(attempts, 4);
        assert!(start.elapsed() >= ACCEPT_RETRY_DELAY * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_deadline_caps_silent_client() {
        let relay = Identity::generate();
        let context = RelayContext::new(
            relay,
            Arc::new(StaticDirectory::default()),
            ragent_cert::DEFAULT_CERT_VALIDITY,
        )
        .unwrap();
        let config = RelayConfig::default();
        let (mut server, _client) = tokio::io::duplex(1024);
        let deadline = Instant::now() + Duration::from_secs(2);

        // Shorter than the reply timeout: the session deadline wins
        let result = admit(&mut server, &context, &config, deadline).await;

        assert!(matches!(result, Err(SessionError::AdmissionTimeout)));
        assert!(Instant::now() >= deadline);
    }
}
