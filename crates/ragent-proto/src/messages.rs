//! Fixed-layout protocol messages

use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;

use crate::{
    check_len, VerifyKey, WireError, KEY_LEN, NONCE_LEN, PROOF_LEN, REPLY_LEN, SIGNATURE_LEN,
    VERDICT_LEN,
};

/// Proof that the relay's TLS certificate was produced by the holder of
/// `verify_key`: a signature over the certificate's DER bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerProof {
    pub verify_key: VerifyKey,
    pub signature: [u8; SIGNATURE_LEN],
}

impl ServerProof {
    pub fn new(verify_key: VerifyKey, signature: [u8; SIGNATURE_LEN]) -> Self {
        Self {
            verify_key,
            signature,
        }
    }

    pub fn encode(&self) -> [u8; PROOF_LEN] {
        encode_signed(&self.verify_key, &self.signature)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        check_len("ServerProof", PROOF_LEN, bytes)?;
        let (verify_key, signature) = split_signed(bytes);
        Ok(Self {
            verify_key,
            signature,
        })
    }
}

/// Per-session challenge. Never reused, never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Draw a fresh nonce from the operating system RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        check_len("Nonce", NONCE_LEN, bytes)?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(bytes);
        Ok(Self(nonce))
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Nonce(..)")
    }
}

/// Client's answer to the challenge: its claimed key and a signature over the nonce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientReply {
    pub verify_key: VerifyKey,
    pub signature: [u8; SIGNATURE_LEN],
}

impl ClientReply {
    pub fn new(verify_key: VerifyKey, signature: [u8; SIGNATURE_LEN]) -> Self {
        Self {
            verify_key,
            signature,
        }
    }

    pub fn encode(&self) -> [u8; REPLY_LEN] {
        encode_signed(&self.verify_key, &self.signature)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        check_len("ClientReply", REPLY_LEN, bytes)?;
        let (verify_key, signature) = split_signed(bytes);
        Ok(Self {
            verify_key,
            signature,
        })
    }
}

/// Admission outcome sent once the client's key has been checked against the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Okay,
    Fail,
}

impl Verdict {
    pub const OKAY: &'static [u8; VERDICT_LEN] = b"OKAY";
    pub const FAIL: &'static [u8; VERDICT_LEN] = b"FAIL";

    pub fn as_bytes(&self) -> &'static [u8; VERDICT_LEN] {
        match self {
            Verdict::Okay => Self::OKAY,
            Verdict::Fail => Self::FAIL,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        check_len("Verdict", VERDICT_LEN, bytes)?;
        match bytes {
            b"OKAY" => Ok(Verdict::Okay),
            b"FAIL" => Ok(Verdict::Fail),
            other => {
                let mut marker = [0u8; VERDICT_LEN];
                marker.copy_from_slice(other);
                Err(WireError::UnknownVerdict(marker))
            }
        }
    }

    pub fn is_okay(&self) -> bool {
        matches!(self, Verdict::Okay)
    }
}

fn encode_signed(key: &VerifyKey, signature: &[u8; SIGNATURE_LEN]) -> [u8; KEY_LEN + SIGNATURE_LEN] {
    let mut out = [0u8; KEY_LEN + SIGNATURE_LEN];
    out[..KEY_LEN].copy_from_slice(key.as_bytes());
    out[KEY_LEN..].copy_from_slice(signature);
    out
}

// Caller has already checked the length.
fn split_signed(bytes: &[u8]) -> (VerifyKey, [u8; SIGNATURE_LEN]) {
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes[..KEY_LEN]);
    let mut signature = [0u8; SIGNATURE_LEN];
    signature.copy_from_slice(&bytes[KEY_LEN..KEY_LEN + SIGNATURE_LEN]);
    (VerifyKey::from_bytes(key), signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proof_layout() {
        let proof = ServerProof::new(VerifyKey::from_bytes([1u8; KEY_LEN]), [2u8; SIGNATURE_LEN]);
        let bytes = proof.encode();

        assert_eq!(bytes.len(), 96);
        assert!(bytes[..32].iter().all(|b| *b == 1));
        assert!(bytes[32..].iter().all(|b| *b == 2));
        assert_eq!(ServerProof::decode(&bytes).unwrap(), proof);
    }

    #[test]
    fn test_reply_splits_key_and_signature() {
        let mut raw = [0u8; REPLY_LEN];
        raw[..KEY_LEN].fill(0xaa);
        raw[KEY_LEN..].fill(0x55);

        let reply = ClientReply::decode(&raw).unwrap();
        assert_eq!(reply.verify_key, VerifyKey::from_bytes([0xaa; KEY_LEN]));
        assert_eq!(reply.signature, [0x55; SIGNATURE_LEN]);
    }

    #[test]
    fn test_short_reply_is_rejected() {
        let err = ClientReply::decode(&[0u8; 95]).unwrap_err();
        assert_eq!(
            err,
            WireError::BadLength {
                message: "ClientReply",
                expected: 96,
                actual: 95
            }
        );
        assert!(ServerProof::decode(&[0u8; 97]).is_err());
    }

    #[test]
    fn test_nonces_differ() {
        let a = Nonce::generate();
        let b = Nonce::generate();
        assert_ne!(a, b);
        assert_eq!(format!("{:?}", a), "Nonce(..)");
    }

    #[test]
    fn test_verdict_markers() {
        assert_eq!(Verdict::Okay.as_bytes(), b"OKAY");
        assert_eq!(Verdict::Fail.as_bytes(), b"FAIL");
        assert_eq!(Verdict::decode(b"OKAY").unwrap(), Verdict::Okay);
        assert_eq!(Verdict::decode(b"FAIL").unwrap(), Verdict::Fail);
        assert_eq!(
            Verdict::decode(b"NOPE"),
            Err(WireError::UnknownVerdict(*b"NOPE"))
        );
        assert!(Verdict::decode(b"OK").is_err());
    }
}
