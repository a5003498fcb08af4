//! Relay Identity
//!
//! Ed25519 signing identity loaded once at startup. The public half doubles
//! as the relay's label (certificate CommonName) and as the issuer key used
//! when querying the authorization directory.
//!
//! Credential file layout:
//!
//! ```text
//! [0x32][32-byte secret key][32-byte verify-key]
//! ```

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use ragent_proto::{VerifyKey, KEY_LEN, SIGNATURE_LEN};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

/// Leading tag byte of a credential file holding a signing key
pub const CREDENTIAL_TAG: u8 = 0x32;

/// Total size of a credential file
pub const CREDENTIAL_LEN: usize = 1 + KEY_LEN + KEY_LEN;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Failed to read identity file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to write identity file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("Identity file {0} already exists")]
    AlreadyExists(String),

    #[error("Identity credential must be 65 bytes, got {0}")]
    BadLength(usize),

    #[error("Unexpected credential tag 0x{0:02x}")]
    BadTag(u8),

    #[error("Stored verify-key does not match the secret key")]
    KeyMismatch,
}

/// Signing identity: private key plus its public verify-key
pub struct Identity {
    signing_key: SigningKey,
    verify_key: VerifyKey,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Create from raw secret key bytes
    pub fn from_secret_bytes(secret: &[u8; KEY_LEN]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verify_key = VerifyKey::from_bytes(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            verify_key,
        }
    }

    /// Parse the binary credential format
    pub fn from_credential(bytes: &[u8]) -> Result<Self, IdentityError> {
        if bytes.len() != CREDENTIAL_LEN {
            return Err(IdentityError::BadLength(bytes.len()));
        }
        if bytes[0] != CREDENTIAL_TAG {
            return Err(IdentityError::BadTag(bytes[0]));
        }

        let mut secret = [0u8; KEY_LEN];
        secret.copy_from_slice(&bytes[1..1 + KEY_LEN]);
        let identity = Self::from_secret_bytes(&secret);

        if identity.verify_key.as_bytes()[..] != bytes[1 + KEY_LEN..] {
            return Err(IdentityError::KeyMismatch);
        }
        Ok(identity)
    }

    /// Serialize to the binary credential format
    pub fn to_credential(&self) -> [u8; CREDENTIAL_LEN] {
        let mut out = [0u8; CREDENTIAL_LEN];
        out[0] = CREDENTIAL_TAG;
        out[1..1 + KEY_LEN].copy_from_slice(&self.signing_key.to_bytes());
        out[1 + KEY_LEN..].copy_from_slice(self.verify_key.as_bytes());
        out
    }

    /// Load an identity from a credential file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| IdentityError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let identity = Self::from_credential(&bytes)?;
        tracing::debug!(verify_key = %identity.verify_key, "Loaded identity from {}", path.display());
        Ok(identity)
    }

    /// Write the identity to a credential file, refusing to clobber an existing one
    /// unless `overwrite` is set. On unix the file is created with mode 0600.
    pub fn save(&self, path: impl AsRef<Path>, overwrite: bool) -> Result<(), IdentityError> {
        let path = path.as_ref();
        let write_error = |source: io::Error| IdentityError::Write {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| IdentityError::Write {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let mut options = OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path).map_err(|source| {
            if source.kind() == io::ErrorKind::AlreadyExists {
                IdentityError::AlreadyExists(path.display().to_string())
            } else {
                write_error(source)
            }
        })?;

        // mode() only applies to newly created files
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(write_error)?;
        }

        file.write_all(&self.to_credential()).map_err(write_error)?;
        file.sync_all().map_err(write_error)?;

        Ok(())
    }

    pub fn verify_key(&self) -> VerifyKey {
        self.verify_key
    }

    /// Sign a message with the private key
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        let signature: Signature = self.signing_key.sign(message);
        signature.to_bytes()
    }

    /// Verify a signature made by this identity
    pub fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_LEN]) -> bool {
        verify(&self.verify_key, message, signature)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("verify_key", &self.verify_key)
            .finish_non_exhaustive()
    }
}

/// Verify a signature against a verify-key. Malformed and small-order keys
/// never verify, nor do signatures with a non-canonical R.
pub fn verify(key: &VerifyKey, message: &[u8], signature: &[u8; SIGNATURE_LEN]) -> bool {
    let verifying_key = match VerifyingKey::from_bytes(key.as_bytes()) {
        Ok(vk) => vk,
        Err(_) => return false,
    };

    let signature = Signature::from_bytes(signature);

    verifying_key.verify_strict(message, &signature).is_ok()
}
