//! Relay configuration and shared per-process state

use ragent_auth::GrantDirectory;
use ragent_cert::{provision, CertError, IdentityCertificate, DEFAULT_CERT_VALIDITY};
use ragent_identity::Identity;
use ragent_proto::{ServerProof, VerifyKey, RELAY_CAPABILITY};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::relay::RelayOptions;

/// Relay server configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the TLS listener binds to
    pub listen_addr: SocketAddr,
    /// Local service every admitted session is relayed to
    pub upstream_addr: String,
    /// Capability a client must hold
    pub capability: String,
    /// Bound on the TLS handshake and on waiting for the client's reply
    pub handshake_timeout: Duration,
    /// Byte-forwarding options for admitted sessions
    pub relay: RelayOptions,
    /// Lifetime of the generated certificate
    pub cert_validity: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 4514)),
            upstream_addr: "127.0.0.1:28589".to_string(),
            capability: RELAY_CAPABILITY.to_string(),
            handshake_timeout: Duration::from_secs(10),
            relay: RelayOptions::default(),
            cert_validity: DEFAULT_CERT_VALIDITY,
        }
    }
}

/// Immutable state shared by every session: identity, certificate, proof and
/// the authorization directory. Built once at startup.
pub struct RelayContext {
    identity: Identity,
    certificate: IdentityCertificate,
    proof: ServerProof,
    directory: Arc<dyn GrantDirectory>,
}

impl RelayContext {
    /// Provision the identity certificate and bundle it with the directory
    pub fn new(
        identity: Identity,
        directory: Arc<dyn GrantDirectory>,
        cert_validity: Duration,
    ) -> Result<Self, CertError> {
        let provisioned = provision(&identity, cert_validity)?;
        Ok(Self {
            identity,
            certificate: provisioned.certificate,
            proof: provisioned.proof,
            directory,
        })
    }

    pub fn verify_key(&self) -> VerifyKey {
        self.identity.verify_key()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn certificate(&self) -> &IdentityCertificate {
        &self.certificate
    }

    pub fn proof(&self) -> &ServerProof {
        &self.proof
    }

    pub fn directory(&self) -> &dyn GrantDirectory {
        self.directory.as_ref()
    }
}

impl std::fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayContext")
            .field("identity", &self.identity)
            .field("certificate", &self.certificate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragent_auth::StaticDirectory;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.capability, "1.0/full");
        assert_eq!(config.relay.buffer_size, 4096);
        assert_eq!(config.relay.progress_interval, Duration::from_secs(5));
        assert_eq!(config.cert_validity.as_secs(), 365 * 24 * 60 * 60);
    }

    #[test]
    fn test_context_proof_covers_certificate() {
        let identity = Identity::generate();
        let key = identity.verify_key();
        let context = RelayContext::new(
            identity,
            Arc::new(StaticDirectory::default()),
            DEFAULT_CERT_VALIDITY,
        )
        .unwrap();

        assert_eq!(context.verify_key(), key);
        assert_eq!(context.proof().verify_key, key);
        assert!(ragent_cert::verify_proof(
            context.proof(),
            context.certificate().cert_der.as_ref()
        )
        .is_ok());
    }
}
