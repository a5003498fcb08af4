//! ragent relay server
//!
//! Accepts TLS connections, proves the relay identity with a detached
//! certificate proof, challenges the client to prove its own identity,
//! checks the authorization directory, and relays bytes to a fixed
//! upstream service for admitted clients.

pub mod client;
pub mod config;
pub mod handshake;
pub mod relay;
pub mod server;

pub use client::{ClientError, ClientSession, PendingSession, RelayClient};
pub use config::{RelayConfig, RelayContext};
pub use handshake::{AdmissionHandshake, HandshakeError, HandshakeState, RejectCause};
pub use relay::{copy_simplex, relay, Direction, RelayOptions, RelayStats, Termination};
pub use server::{RelayServer, RelayServerError, SessionError};
