//! Relay authorization
//!
//! Decides whether a client identity may use the relay by looking for a
//! grant issued by the relay's own identity to either that client or the
//! wildcard "everyone" key, for the relay capability.

pub mod directory;
pub mod grant;

pub use directory::{DirectoryError, FileDirectory, GrantDirectory, GrantRecord, StaticDirectory};
pub use grant::{is_admitted, AuthorizationGrant, ValidityState};
