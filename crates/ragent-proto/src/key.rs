//! Verify-key type and its textual form
//!
//! Keys are rendered as URL-safe base64 with padding (44 characters). That
//! string is the certificate CommonName, the log form and the grant-file form.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::KEY_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyFormatError {
    #[error("Invalid base64 key: {0}")]
    InvalidEncoding(String),

    #[error("Verify-key must be 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// Public verify-key identifying an entity
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VerifyKey([u8; KEY_LEN]);

impl VerifyKey {
    /// Reserved key standing for "every identity" in authorization grants
    pub const EVERYONE: VerifyKey = VerifyKey([
        0xfb, 0xef, 0xbe, 0x12, 0xa3, 0xff, 0xfd, 0x66, 0x38, 0xef, 0xb9, 0xe8, 0x7c, 0xc6, 0x14,
        0xcf, 0x63, 0x0d, 0x14, 0x1b, 0x1f, 0x6b, 0x92, 0x0a, 0xfd, 0x10, 0x65, 0x46, 0xf2, 0xa9,
        0xb4, 0x36,
    ]);

    /// Alias accepted when parsing for [`VerifyKey::EVERYONE`]
    pub const EVERYONE_ALIAS: &'static str = "everyone";

    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyFormatError> {
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| KeyFormatError::InvalidLength(bytes.len()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; KEY_LEN] {
        self.0
    }

    pub fn is_everyone(&self) -> bool {
        *self == Self::EVERYONE
    }
}

impl fmt::Display for VerifyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE.encode(self.0))
    }
}

impl fmt::Debug for VerifyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyKey({})", self)
    }
}

impl FromStr for VerifyKey {
    type Err = KeyFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(Self::EVERYONE_ALIAS) {
            return Ok(Self::EVERYONE);
        }
        let bytes = URL_SAFE
            .decode(s)
            .map_err(|e| KeyFormatError::InvalidEncoding(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for VerifyKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VerifyKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_everyone_key_text_form() {
        assert_eq!(
            VerifyKey::EVERYONE.to_string(),
            "----EqP__WY477nofMYUz2MNFBsfa5IK_RBlRvKptDY="
        );
        assert_eq!(
            "everyone".parse::<VerifyKey>().unwrap(),
            VerifyKey::EVERYONE
        );
        assert!(VerifyKey::EVERYONE.is_everyone());
    }

    #[test]
    fn test_text_form_is_stable() {
        let key = VerifyKey::from_bytes([7u8; KEY_LEN]);
        let text = key.to_string();

        assert_eq!(text.len(), 44);
        assert_eq!(text.parse::<VerifyKey>().unwrap(), key);
    }

    #[test]
    fn test_rejects_wrong_length() {
        let short = URL_SAFE.encode([1u8; 16]);
        assert_eq!(
            short.parse::<VerifyKey>(),
            Err(KeyFormatError::InvalidLength(16))
        );
        assert!(VerifyKey::from_slice(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            "not a key!".parse::<VerifyKey>(),
            Err(KeyFormatError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_serde_uses_text_form() {
        let key = VerifyKey::from_bytes([42u8; KEY_LEN]);
        let json = serde_json::to_string(&key).unwrap();

        assert_eq!(json, format!("\"{}\"", key));
        let parsed: VerifyKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }
}
