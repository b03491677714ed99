//! Persisted credentials and their session bindings
//!
//! Sessions refer to credentials by fingerprint, never by token, so the
//! binding table can be inspected without exposing secrets.

use crate::backend::{KeyValueStore, CREDENTIALS_KEY};
use passbook_core::{AccessCredential, SessionId, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

const CREDENTIALS_FORMAT_VERSION: u32 = 1;

/// A session's reference to a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBinding {
    pub session: SessionId,
    /// [`AccessCredential::fingerprint`] of the bound credential
    pub credential: String,
}

/// Everything the credential vault persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialSnapshot {
    pub version: u32,
    #[serde(default)]
    pub credentials: Vec<AccessCredential>,
    #[serde(default)]
    pub sessions: Vec<SessionBinding>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for CredentialSnapshot {
    fn default() -> Self {
        Self {
            version: CREDENTIALS_FORMAT_VERSION,
            credentials: Vec::new(),
            sessions: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl CredentialSnapshot {
    /// Credential a session is bound to
    #[must_use]
    pub fn credential_for(&self, session: &SessionId) -> Option<&AccessCredential> {
        let binding = self.sessions.iter().find(|b| &b.session == session)?;
        self.credentials
            .iter()
            .find(|c| c.fingerprint() == binding.credential)
    }
}

/// Credential persistence over the key-value port
#[derive(Clone)]
pub struct CredentialVault {
    backend: Arc<dyn KeyValueStore>,
}

impl CredentialVault {
    #[must_use]
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Load the persisted snapshot (empty if none)
    pub fn load(&self) -> Result<CredentialSnapshot, StoreError> {
        match self.backend.get(CREDENTIALS_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(CredentialSnapshot::default()),
        }
    }

    /// Replace the persisted snapshot
    pub fn save(&self, snapshot: &CredentialSnapshot) -> Result<(), StoreError> {
        let mut snapshot = snapshot.clone();
        snapshot.version = snapshot.version.max(CREDENTIALS_FORMAT_VERSION);
        self.backend
            .put(CREDENTIALS_KEY, &serde_json::to_vec(&snapshot)?)?;
        tracing::debug!(
            credentials = snapshot.credentials.len(),
            sessions = snapshot.sessions.len(),
            "Saved credentials"
        );
        Ok(())
    }

    /// Forget every credential
    pub fn clear(&self) -> Result<(), StoreError> {
        self.backend.delete(CREDENTIALS_KEY)
    }
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use chrono::{TimeDelta, Utc};
    use passbook_core::CredentialInfo;

    fn credential(token: &str) -> AccessCredential {
        AccessCredential {
            token: token.to_string(),
            info: CredentialInfo {
                credit_limit: 100,
                ..CredentialInfo::default()
            },
            expires_at: Utc::now() + TimeDelta::minutes(5),
            owner_session_id: SessionId::new(),
        }
    }

    #[test]
    fn empty_vault_loads_default() {
        let vault = CredentialVault::new(Arc::new(MemoryStore::new()));
        let snapshot = vault.load().unwrap();
        assert!(snapshot.credentials.is_empty());
        assert_eq!(snapshot.version, 1);
    }

    #[test]
    fn save_then_load_resolves_sessions() {
        let backend = Arc::new(MemoryStore::new());
        let vault = CredentialVault::new(backend.clone());
        let cred = credential("sk-one");
        let session = cred.owner_session_id;

        let snapshot = CredentialSnapshot {
            credentials: vec![cred.clone()],
            sessions: vec![SessionBinding {
                session,
                credential: cred.fingerprint(),
            }],
            ..CredentialSnapshot::default()
        };
        vault.save(&snapshot).unwrap();

        let loaded = CredentialVault::new(backend).load().unwrap();
        assert_eq!(loaded.credential_for(&session), Some(&cred));
        assert_eq!(loaded.credential_for(&SessionId::new()), None);
    }

    #[test]
    fn bindings_do_not_store_tokens() {
        let backend = Arc::new(MemoryStore::new());
        let vault = CredentialVault::new(backend.clone());
        let cred = credential("sk-secret-token");
        vault
            .save(&CredentialSnapshot {
                sessions: vec![SessionBinding {
                    session: SessionId::new(),
                    credential: cred.fingerprint(),
                }],
                ..CredentialSnapshot::default()
            })
            .unwrap();

        let raw = backend.get(CREDENTIALS_KEY).unwrap().unwrap();
        assert!(!String::from_utf8(raw).unwrap().contains("sk-secret-token"));
    }

    #[test]
    fn clear_removes_everything() {
        let vault = CredentialVault::new(Arc::new(MemoryStore::new()));
        vault
            .save(&CredentialSnapshot {
                credentials: vec![credential("sk-x")],
                ..CredentialSnapshot::default()
            })
            .unwrap();
        vault.clear().unwrap();
        assert!(vault.load().unwrap().credentials.is_empty());
    }
}
