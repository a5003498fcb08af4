//! Authorization directory backends
//!
//! The directory is queried once per handshake for every grant issued by the
//! relay identity. Policy evaluation lives in [`crate::grant`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ragent_proto::VerifyKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::grant::{AuthorizationGrant, ValidityState};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Failed to read grant file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse grant file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Source of authorization grants
#[async_trait]
pub trait GrantDirectory: Send + Sync {
    /// All grants issued by `issuer`, with their current validity
    async fn grants_from(&self, issuer: &VerifyKey) -> Result<Vec<AuthorizationGrant>, DirectoryError>;
}

/// Fixed in-memory grant list
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    grants: Vec<AuthorizationGrant>,
}

impl StaticDirectory {
    pub fn new(grants: Vec<AuthorizationGrant>) -> Self {
        Self { grants }
    }

    pub fn with_grant(mut self, grant: AuthorizationGrant) -> Self {
        self.grants.push(grant);
        self
    }
}

#[async_trait]
impl GrantDirectory for StaticDirectory {
    async fn grants_from(&self, issuer: &VerifyKey) -> Result<Vec<AuthorizationGrant>, DirectoryError> {
        Ok(self
            .grants
            .iter()
            .filter(|g| g.issuer == *issuer)
            .cloned()
            .collect())
    }
}

/// One grant as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRecord {
    pub issuer: VerifyKey,
    /// Receiver key, or `"everyone"`
    pub receiver: VerifyKey,
    pub capability: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked: bool,
}

impl GrantRecord {
    /// Revocation wins over expiry
    pub fn state_at(&self, now: DateTime<Utc>) -> ValidityState {
        if self.revoked {
            ValidityState::Revoked
        } else if self.expires_at.is_some_and(|t| t <= now) {
            ValidityState::Expired
        } else {
            ValidityState::Valid
        }
    }

    pub fn to_grant(&self, now: DateTime<Utc>) -> AuthorizationGrant {
        AuthorizationGrant {
            issuer: self.issuer,
            receiver: self.receiver,
            capability: self.capability.clone(),
            state: self.state_at(now),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GrantFile {
    #[serde(default)]
    grants: Vec<GrantRecord>,
}

/// JSON grant file, re-read on every query so edits and revocations
/// apply to new sessions without a restart
///
/// ```json
/// { "grants": [
///     { "issuer": "<relay key>", "receiver": "everyone", "capability": "1.0/full" },
///     { "issuer": "<relay key>", "receiver": "<client key>", "capability": "1.0/full",
///       "expires_at": "2027-01-01T00:00:00Z" }
/// ] }
/// ```
#[derive(Debug, Clone)]
pub struct FileDirectory {
    path: PathBuf,
}

impl FileDirectory {
    /// Open a grant file, failing early if it cannot be read or parsed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, DirectoryError> {
        let directory = Self { path: path.into() };
        let records = directory.load().await?;
        tracing::info!(
            "Loaded {} grant(s) from {}",
            records.len(),
            directory.path.display()
        );
        Ok(directory)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<GrantRecord>, DirectoryError> {
        let json = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| DirectoryError::Read {
                path: self.path.display().to_string(),
                source,
            })?;

        let file: GrantFile = serde_json::from_str(&json).map_err(|source| DirectoryError::Parse {
            path: self.path.display().to_string(),
            source,
        })?;

        Ok(file.grants)
    }
}

#[async_trait]
impl GrantDirectory for FileDirectory {
    async fn grants_from(&self, issuer: &VerifyKey) -> Result<Vec<AuthorizationGrant>, DirectoryError> {
        let now = Utc::now();
        let grants: Vec<_> = self
            .load()
            .await?
            .iter()
            .filter(|r| r.issuer == *issuer)
            .map(|r| r.to_grant(now))
            .collect();

        tracing::debug!(issuer = %issuer, "Directory returned {} grant(s)", grants.len());
        Ok(grants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ragent_proto::RELAY_CAPABILITY;

    fn key(b: u8) -> VerifyKey {
        VerifyKey::from_bytes([b; 32])
    }

    #[tokio::test]
    async fn test_static_directory_filters_by_issuer() {
        let directory = StaticDirectory::default()
            .with_grant(AuthorizationGrant::new(key(1), key(2), RELAY_CAPABILITY))
            .with_grant(AuthorizationGrant::new(key(5), key(3), RELAY_CAPABILITY));

        let grants = directory.grants_from(&key(1)).await.unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].receiver, key(2));
    }

    #[test]
    fn test_record_state() {
        let now = Utc::now();
        let mut record = GrantRecord {
            issuer: key(1),
            receiver: key(2),
            capability: RELAY_CAPABILITY.to_string(),
            expires_at: None,
            revoked: false,
        };
        assert_eq!(record.state_at(now), ValidityState::Valid);

        record.expires_at = Some(now + Duration::hours(1));
        assert_eq!(record.state_at(now), ValidityState::Valid);

        record.expires_at = Some(now - Duration::seconds(1));
        assert_eq!(record.state_at(now), ValidityState::Expired);

        record.revoked = true;
        assert_eq!(record.state_at(now), ValidityState::Revoked);
    }

    #[tokio::test]
    async fn test_file_directory_reads_grants() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.json");
        let json = format!(
            r#"{{ "grants": [
                {{ "issuer": "{relay}", "receiver": "everyone", "capability": "1.0/full" }},
                {{ "issuer": "{relay}", "receiver": "{client}", "capability": "1.0/full",
                   "expires_at": "2001-01-01T00:00:00Z" }},
                {{ "issuer": "{other}", "receiver": "{client}", "capability": "1.0/full" }}
            ] }}"#,
            relay = key(1),
            client = key(2),
            other = key(3),
        );
        std::fs::write(&path, json).unwrap();

        let directory = FileDirectory::open(&path).await.unwrap();
        let grants = directory.grants_from(&key(1)).await.unwrap();

        assert_eq!(grants.len(), 2);
        assert!(grants[0].receiver.is_everyone());
        assert_eq!(grants[0].state, ValidityState::Valid);
        assert_eq!(grants[1].state, ValidityState::Expired);
    }

    #[tokio::test]
    async fn test_file_directory_sees_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.json");
        std::fs::write(&path, r#"{ "grants": [] }"#).unwrap();

        let directory = FileDirectory::open(&path).await.unwrap();
        assert!(directory.grants_from(&key(1)).await.unwrap().is_empty());

        let json = format!(
            r#"{{ "grants": [ {{ "issuer": "{}", "receiver": "{}", "capability": "1.0/full" }} ] }}"#,
            key(1),
            key(2)
        );
        std::fs::write(&path, json).unwrap();
        assert_eq!(directory.grants_from(&key(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_directory_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = FileDirectory::open(dir.path().join("missing.json")).await;
        assert!(matches!(missing, Err(DirectoryError::Read { .. })));

        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            FileDirectory::open(&path).await,
            Err(DirectoryError::Parse { .. })
        ));
    }
}
