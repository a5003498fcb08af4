//! Identity-bound certificate provisioning
//!
//! Builds the relay's self-signed TLS certificate (CommonName = textual
//! verify-key) and the detached [`ServerProof`] binding that certificate to
//! the relay identity.

pub mod proof;
pub mod self_signed;

pub use proof::{create_proof, verify_proof};
pub use self_signed::{
    generate_identity_cert, CertificateInfo, IdentityCertificate, DEFAULT_CERT_VALIDITY,
};

use ragent_identity::Identity;
use ragent_proto::ServerProof;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("Certificate generation failed: {0}")]
    GenerationFailed(String),

    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("Certificate parse failed: {0}")]
    ParseFailed(String),

    #[error("TLS configuration failed: {0}")]
    TlsConfig(#[from] rustls::Error),

    #[error("Server proof signature does not cover the presented certificate")]
    InvalidProofSignature,

    #[error("Certificate CommonName {common_name:?} does not match proof key {verify_key}")]
    CommonNameMismatch {
        common_name: Option<String>,
        verify_key: String,
    },
}

/// Certificate plus the proof that it was produced under the relay identity.
/// Created once at startup, read-only afterwards.
#[derive(Debug)]
pub struct ProvisionedCertificate {
    pub certificate: IdentityCertificate,
    pub proof: ServerProof,
}

/// Generate the identity certificate and sign it
pub fn provision(identity: &Identity, validity: Duration) -> Result<ProvisionedCertificate, CertError> {
    let certificate = generate_identity_cert(&identity.verify_key(), validity)?;
    let proof = create_proof(identity, &certificate);

    tracing::info!(
        verify_key = %identity.verify_key(),
        serial = %certificate.info.serial,
        "Provisioned identity certificate (valid for {} days)",
        validity.as_secs() / 86_400
    );

    Ok(ProvisionedCertificate { certificate, proof })
}

// Initialize rustls crypto provider
static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

/// Install the ring crypto provider as the process default (idempotent)
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("Rustls crypto provider already installed");
        }
    });
}
