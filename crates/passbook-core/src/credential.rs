//! Ephemeral access credentials

use crate::ids::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Classification of a credential at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    Expired,
}

/// Usage limits attached to a credential by the station
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CredentialInfo {
    /// Credits the credential may spend
    pub credit_limit: u64,
    /// Scope the credential was issued for (e.g. a model family)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Short-lived, credit-limited key exchanged for one ticket
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessCredential {
    pub token: String,
    pub info: CredentialInfo,
    pub expires_at: DateTime<Utc>,
    pub owner_session_id: SessionId,
}

impl AccessCredential {
    /// Status at `now`; expired from the instant `now >= expires_at`
    #[inline]
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> CredentialStatus {
        if now >= self.expires_at {
            CredentialStatus::Expired
        } else {
            CredentialStatus::Active
        }
    }

    /// Time left at `now`, zero once expired
    #[must_use]
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Stable, non-secret handle for logs and persisted session bindings
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.token.as_bytes());
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCredential")
            .field("fingerprint", &self.fingerprint())
            .field("info", &self.info)
            .field("expires_at", &self.expires_at)
            .field("owner_session_id", &self.owner_session_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn credential(expires_at: DateTime<Utc>) -> AccessCredential {
        AccessCredential {
            token: "sk-ephemeral-123".to_string(),
            info: CredentialInfo {
                credit_limit: 500,
                ..CredentialInfo::default()
            },
            expires_at,
            owner_session_id: SessionId::new(),
        }
    }

    #[test]
    fn expires_exactly_at_deadline() {
        let now = Utc::now();
        let cred = credential(now + TimeDelta::seconds(10));

        assert_eq!(cred.status_at(now), CredentialStatus::Active);
        assert_eq!(cred.status_at(cred.expires_at), CredentialStatus::Expired);
        assert_eq!(cred.remaining_at(now), Duration::from_secs(10));
        assert_eq!(cred.remaining_at(now + TimeDelta::seconds(30)), Duration::ZERO);
    }

    #[test]
    fn debug_hides_token() {
        let cred = credential(Utc::now());
        let debug = format!("{cred:?}");
        assert!(!debug.contains("sk-ephemeral-123"));
        assert!(debug.contains(&cred.fingerprint()));
    }
}
