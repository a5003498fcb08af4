//! Self-signed certificate generation
//!
//! The certificate carries no SANs: clients do not validate it through a CA
//! chain but through the [`ServerProof`](ragent_proto::ServerProof) sent in-band.

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, KeyUsagePurpose, SerialNumber,
};
use ragent_proto::VerifyKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::sync::Arc;
use std::time::Duration;

use crate::{ensure_crypto_provider, CertError};

/// Certificate lifetime used by the relay
pub const DEFAULT_CERT_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Fields read back from the encoded certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub common_name: Option<String>,
    pub issuer_common_name: Option<String>,
    pub serial: String,
    /// Unix seconds
    pub not_before: i64,
    /// Unix seconds
    pub not_after: i64,
    pub is_ca: bool,
    pub digital_signature: bool,
    pub key_encipherment: bool,
    pub key_cert_sign: bool,
    pub server_auth: bool,
}

impl CertificateInfo {
    /// Parse the interesting fields out of a DER certificate
    pub fn parse(der: &[u8]) -> Result<Self, CertError> {
        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| CertError::ParseFailed(e.to_string()))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);
        let issuer_common_name = cert
            .issuer()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        let is_ca = cert
            .basic_constraints()
            .ok()
            .flatten()
            .map(|bc| bc.value.ca)
            .unwrap_or(false);

        let (digital_signature, key_encipherment, key_cert_sign) = cert
            .key_usage()
            .ok()
            .flatten()
            .map(|ku| {
                (
                    ku.value.digital_signature(),
                    ku.value.key_encipherment(),
                    ku.value.key_cert_sign(),
                )
            })
            .unwrap_or((false, false, false));

        let server_auth = cert
            .extended_key_usage()
            .ok()
            .flatten()
            .map(|eku| eku.value.server_auth)
            .unwrap_or(false);

        Ok(Self {
            common_name,
            issuer_common_name,
            serial: cert.raw_serial_as_string(),
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            is_ca,
            digital_signature,
            key_encipherment,
            key_cert_sign,
            server_auth,
        })
    }
}

/// A self-signed certificate bound to a verify-key, with its private key
pub struct IdentityCertificate {
    /// Certificate in DER format (binary)
    pub cert_der: CertificateDer<'static>,

    /// Private key in DER format (PKCS#8)
    pub key_der: PrivateKeyDer<'static>,

    /// Certificate in PEM format (text)
    pub pem_cert: String,

    /// Private key in PEM format (text)
    pub pem_key: String,

    /// Parsed view of `cert_der`
    pub info: CertificateInfo,
}

impl IdentityCertificate {
    /// Build a rustls server configuration presenting this certificate
    pub fn server_config(&self) -> Result<Arc<rustls::ServerConfig>, CertError> {
        ensure_crypto_provider();

        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![self.cert_der.clone()], self.key_der.clone_key())?;

        Ok(Arc::new(config))
    }
}

impl std::fmt::Debug for IdentityCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCertificate")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Generate a self-signed CA certificate whose CommonName is the textual verify-key
///
/// - Issuer = subject, CA basic constraint
/// - Key usage: digitalSignature, keyEncipherment, keyCertSign
/// - Extended key usage: serverAuth
/// - Random positive 128-bit serial
pub fn generate_identity_cert(
    verify_key: &VerifyKey,
    validity: Duration,
) -> Result<IdentityCertificate, CertError> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, verify_key.to_string());
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::KeyCertSign,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let not_before = time::OffsetDateTime::now_utc();
    let lifetime = time::Duration::try_from(validity)
        .map_err(|e| CertError::GenerationFailed(e.to_string()))?;
    params.not_before = not_before;
    params.not_after = not_before
        .checked_add(lifetime)
        .ok_or_else(|| CertError::GenerationFailed(format!("validity {:?} out of range", validity)))?;

    let mut serial: [u8; 16] = rand::random();
    serial[0] &= 0x7f;
    params.serial_number = Some(SerialNumber::from(serial.to_vec()));

    let key_pair = KeyPair::generate().map_err(|e| CertError::KeyGenerationFailed(e.to_string()))?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CertError::GenerationFailed(e.to_string()))?;

    let cert_der = cert.der().clone();
    let info = CertificateInfo::parse(cert_der.as_ref())?;

    Ok(IdentityCertificate {
        cert_der,
        key_der: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
        pem_cert: cert.pem(),
        pem_key: key_pair.serialize_pem(),
        info,
    })
}
