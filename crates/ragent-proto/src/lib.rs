//! Relay Wire Protocol
//!
//! Fixed-layout messages exchanged after the TLS handshake, and the
//! verify-key type shared by every other ragent crate.
//!
//! ```text
//! relay  -> client : ServerProof  (32-byte key | 64-byte signature over cert DER)
//! relay  -> client : Nonce        (32 random bytes)
//! client -> relay  : ClientReply  (32-byte key | 64-byte signature over nonce)
//! relay  -> client : Verdict      ("OKAY" | "FAIL")
//! ```

pub mod key;
pub mod messages;

pub use key::{KeyFormatError, VerifyKey};
pub use messages::*;

use thiserror::Error;

/// Length of a verify-key on the wire
pub const KEY_LEN: usize = 32;

/// Length of an Ed25519 signature on the wire
pub const SIGNATURE_LEN: usize = 64;

/// Length of the per-session challenge
pub const NONCE_LEN: usize = 32;

/// Length of the server proof sent first on every connection
pub const PROOF_LEN: usize = KEY_LEN + SIGNATURE_LEN;

/// Length of the client's challenge response
pub const REPLY_LEN: usize = KEY_LEN + SIGNATURE_LEN;

/// Length of the admission verdict marker
pub const VERDICT_LEN: usize = 4;

/// Capability a client must be granted to use the relay
pub const RELAY_CAPABILITY: &str = "1.0/full";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("{message} must be exactly {expected} bytes, got {actual}")]
    BadLength {
        message: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown verdict marker: {0:?}")]
    UnknownVerdict([u8; VERDICT_LEN]),
}

pub(crate) fn check_len(
    message: &'static str,
    expected: usize,
    bytes: &[u8],
) -> Result<(), WireError> {
    if bytes.len() != expected {
        return Err(WireError::BadLength {
            message,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}
