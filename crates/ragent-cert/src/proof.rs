//! Detached proof binding a certificate to the relay identity

use ragent_identity::Identity;
use ragent_proto::ServerProof;

use crate::{CertError, CertificateInfo, IdentityCertificate};

/// Sign the certificate's raw DER bytes with the relay identity
pub fn create_proof(identity: &Identity, certificate: &IdentityCertificate) -> ServerProof {
    let signature = identity.sign(certificate.cert_der.as_ref());
    ServerProof::new(identity.verify_key(), signature)
}

/// Check a proof against the certificate a connection actually presented.
///
/// Succeeds only if the signature covers `cert_der` under the proof's key and
/// the certificate's CommonName is that key's textual form.
pub fn verify_proof(proof: &ServerProof, cert_der: &[u8]) -> Result<(), CertError> {
    if !ragent_identity::verify(&proof.verify_key, cert_der, &proof.signature) {
        return Err(CertError::InvalidProofSignature);
    }

    let info = CertificateInfo::parse(cert_der)?;
    let expected = proof.verify_key.to_string();
    if info.common_name.as_deref() != Some(expected.as_str()) {
        return Err(CertError::CommonNameMismatch {
            common_name: info.common_name,
            verify_key: expected,
        });
    }

    Ok(())
}
