//! Authorization grants and the admission policy

use ragent_proto::VerifyKey;
use serde::{Deserialize, Serialize};

/// Validity of a grant at query time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidityState {
    Valid,
    Expired,
    Revoked,
}

/// Delegation from `issuer` to `receiver` (or everyone) for one capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationGrant {
    pub issuer: VerifyKey,
    pub receiver: VerifyKey,
    pub capability: String,
    pub state: ValidityState,
}

impl AuthorizationGrant {
    pub fn new(issuer: VerifyKey, receiver: VerifyKey, capability: impl Into<String>) -> Self {
        Self {
            issuer,
            receiver,
            capability: capability.into(),
            state: ValidityState::Valid,
        }
    }

    pub fn with_state(mut self, state: ValidityState) -> Self {
        self.state = state;
        self
    }

    pub fn is_valid(&self) -> bool {
        self.state == ValidityState::Valid
    }

    /// Whether this grant lets `client` use `capability`
    pub fn admits(&self, client: &VerifyKey, capability: &str) -> bool {
        self.is_valid()
            && self.capability == capability
            && (self.receiver == *client || self.receiver.is_everyone())
    }
}

/// Any-match policy: admitted if at least one grant admits the client.
/// Grant order is irrelevant.
pub fn is_admitted(grants: &[AuthorizationGrant], client: &VerifyKey, capability: &str) -> bool {
    grants.iter().any(|grant| grant.admits(client, capability))
}
