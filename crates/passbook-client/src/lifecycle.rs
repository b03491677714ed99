//! Credential lifecycle - expiry, renewal and session sharing
//!
//! The tracker is the single owner of every credential (`Arc`); sessions
//! hold `Weak` references. Renewal swaps the owned credential, so every
//! session that pointed at the old one sees the new one without copies
//! drifting apart.
//!
//! Expiry is recomputed on a ticker (1 Hz by default). A credential is
//! `Expired` from the instant `now >= expires_at` and stays expired until
//! a successful [`renew`](CredentialLifecycle::renew) replaces it. Each
//! credential emits [`LifecycleEvent::Expired`] at most once.
//!
//! A credential that was paid for with a ticket is always kept in memory,
//! even if the vault write fails. The lifecycle then reports unsaved
//! changes until a later write (or [`flush`](CredentialLifecycle::flush))
//! succeeds; the ticker retries on every tick.

use crate::broker::{AccessBroker, AccessParams};
use crate::cancel::CancelToken;
use indexmap::IndexMap;
use parking_lot::Mutex;
use passbook_core::{
    AccessCredential, Clock, CredentialInfo, CredentialStatus, LifecycleError, SessionId,
};
use passbook_store::{CredentialSnapshot, CredentialVault, SessionBinding};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const EVENT_CAPACITY: usize = 64;

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Tracked { credential: String },
    Expired { credential: String },
    Renewed { previous: String, current: String },
    Cleared { credential: String },
}

/// Point-in-time view of a tracked credential
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialView {
    pub fingerprint: String,
    pub info: CredentialInfo,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub status: CredentialStatus,
    pub remaining: Duration,
    pub shared_count: usize,
    /// More than one session refers to the credential
    pub is_shared: bool,
}

#[derive(Debug, Clone)]
struct Tracked {
    credential: Arc<AccessCredential>,
    expired: bool,
}

#[derive(Debug, Clone, Default)]
struct Tracker {
    /// Keyed by token
    credentials: IndexMap<String, Tracked>,
    sessions: HashMap<SessionId, Weak<AccessCredential>>,
}

impl Tracker {
    fn bind(&mut self, session: SessionId, credential: &Arc<AccessCredential>) {
        self.sessions.insert(session, Arc::downgrade(credential));
    }

    fn shared_count(&self, token: &str) -> usize {
        self.sessions
            .values()
            .filter_map(Weak::upgrade)
            .filter(|c| c.token == token)
            .count()
    }

    fn sessions_on(&self, token: &str) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|(_, weak)| weak.upgrade().is_some_and(|c| c.token == token))
            .map(|(session, _)| *session)
            .collect()
    }

    fn prune_dangling(&mut self) {
        self.sessions.retain(|_, weak| weak.strong_count() > 0);
    }

    fn snapshot(&self) -> CredentialSnapshot {
        let credentials = self
            .credentials
            .values()
            .map(|t| (*t.credential).clone())
            .collect();
        let mut sessions: Vec<SessionBinding> = self
            .sessions
            .iter()
            .filter_map(|(session, weak)| {
                weak.upgrade().map(|c| SessionBinding {
                    session: *session,
                    credential: c.fingerprint(),
                })
            })
            .collect();
        sessions.sort_by_key(|b| b.session);
        CredentialSnapshot {
            credentials,
            sessions,
            ..CredentialSnapshot::default()
        }
    }
}

/// Tracks credentials, their expiry and the sessions sharing them
pub struct CredentialLifecycle {
    broker: Arc<AccessBroker>,
    vault: CredentialVault,
    clock: Arc<dyn Clock>,
    tracker: Mutex<Tracker>,
    events: broadcast::Sender<LifecycleEvent>,
    unsaved: AtomicBool,
}

impl CredentialLifecycle {
    #[must_use]
    pub fn new(broker: Arc<AccessBroker>, vault: CredentialVault, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            broker,
            vault,
            clock,
            tracker: Mutex::new(Tracker::default()),
            events,
            unsaved: AtomicBool::new(false),
        }
    }

    /// Subscribe to lifecycle events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Reload persisted credentials, dropping any already expired
    ///
    /// Returns the number of credentials restored.
    pub fn restore(&self) -> Result<usize, LifecycleError> {
        let snapshot = self.vault.load()?;
        let now = self.clock.now();

        let restored = self.mutate(|tracker| {
            let mut by_fingerprint = HashMap::new();
            for credential in snapshot.credentials {
                if credential.status_at(now) == CredentialStatus::Expired {
                    tracing::debug!(credential = %credential.fingerprint(), "Dropping expired credential");
                    continue;
                }
                let credential = Arc::new(credential);
                by_fingerprint.insert(credential.fingerprint(), Arc::clone(&credential));
                tracker.credentials.insert(
                    credential.token.clone(),
                    Tracked {
                        credential,
                        expired: false,
                    },
                );
            }
            for binding in snapshot.sessions {
                if let Some(credential) = by_fingerprint.get(&binding.credential) {
                    tracker.bind(binding.session, credential);
                }
            }
            Ok(by_fingerprint.len())
        })?;

        tracing::info!(credentials = restored, "Restored credentials");
        Ok(restored)
    }

    /// Take ownership of a freshly issued credential
    ///
    /// The credential's owner session is bound to it. Never fails: a vault
    /// write error leaves the credential tracked with unsaved changes.
    pub fn track(&self, credential: AccessCredential) -> Arc<AccessCredential> {
        let credential = Arc::new(credential);
        let expired = credential.status_at(self.clock.now()) == CredentialStatus::Expired;
        let handle = Arc::clone(&credential);

        self.commit(|tracker| {
            tracker.bind(credential.owner_session_id, &credential);
            tracker
                .credentials
                .insert(credential.token.clone(), Tracked { credential, expired });
            tracker.prune_dangling();
        });

        tracing::debug!(credential = %handle.fingerprint(), session = %handle.owner_session_id, "Tracking credential");
        self.emit(LifecycleEvent::Tracked {
            credential: handle.fingerprint(),
        });
        handle
    }

    /// Point another session at a tracked credential
    pub fn attach(&self, session: SessionId, credential: &AccessCredential) -> Result<(), LifecycleError> {
        self.mutate(|tracker| {
            let canonical = tracker
                .credentials
                .get(&credential.token)
                .map(|t| Arc::clone(&t.credential))
                .ok_or_else(|| LifecycleError::UnknownCredential(credential.fingerprint()))?;
            tracker.bind(session, &canonical);
            tracker.prune_dangling();
            Ok(())
        })?;
        tracing::debug!(credential = %credential.fingerprint(), %session, "Attached session");
        Ok(())
    }

    /// Drop a session's reference; returns whether it had one
    pub fn detach(&self, session: &SessionId) -> Result<bool, LifecycleError> {
        self.mutate(|tracker| Ok(tracker.sessions.remove(session).is_some()))
    }

    /// Credential a session currently refers to
    #[must_use]
    pub fn credential_for(&self, session: &SessionId) -> Option<Arc<AccessCredential>> {
        self.tracker.lock().sessions.get(session).and_then(Weak::upgrade)
    }

    /// Sessions whose reference resolves to this credential's token
    ///
    /// Counted from scratch on every call.
    #[must_use]
    pub fn shared_count(&self, credential: &AccessCredential) -> usize {
        self.tracker.lock().shared_count(&credential.token)
    }

    /// Status of a credential now
    ///
    /// Untracked credentials are classified by their expiry alone.
    #[must_use]
    pub fn status(&self, credential: &AccessCredential) -> CredentialStatus {
        let now = self.clock.now();
        let flagged = self
            .tracker
            .lock()
            .credentials
            .get(&credential.token)
            .is_some_and(|t| t.expired);
        if flagged {
            CredentialStatus::Expired
        } else {
            credential.status_at(now)
        }
    }

    /// View of the credential bound to `session`
    #[must_use]
    pub fn view(&self, session: &SessionId) -> Option<CredentialView> {
        let now = self.clock.now();
        let tracker = self.tracker.lock();
        let credential = tracker.sessions.get(session).and_then(Weak::upgrade)?;
        let flagged = tracker
            .credentials
            .get(&credential.token)
            .is_some_and(|t| t.expired);
        let status = if flagged {
            CredentialStatus::Expired
        } else {
            credential.status_at(now)
        };
        let shared_count = tracker.shared_count(&credential.token);
        Some(CredentialView {
            fingerprint: credential.fingerprint(),
            info: credential.info.clone(),
            expires_at: credential.expires_at,
            status,
            remaining: if status == CredentialStatus::Expired {
                Duration::ZERO
            } else {
                credential.remaining_at(now)
            },
            shared_count,
            is_shared: shared_count > 1,
        })
    }

    /// Tracked credentials, oldest first
    #[must_use]
    pub fn credentials(&self) -> Vec<Arc<AccessCredential>> {
        self.tracker
            .lock()
            .credentials
            .values()
            .map(|t| Arc::clone(&t.credential))
            .collect()
    }

    /// Recompute expiry; returns fingerprints that expired on this tick
    pub fn tick(&self) -> Vec<String> {
        let now = self.clock.now();
        let expired: Vec<String> = {
            let mut tracker = self.tracker.lock();
            tracker
                .credentials
                .values_mut()
                .filter(|t| !t.expired && t.credential.status_at(now) == CredentialStatus::Expired)
                .map(|t| {
                    t.expired = true;
                    t.credential.fingerprint()
                })
                .collect()
        };

        for credential in &expired {
            tracing::info!(%credential, "Credential expired");
            self.emit(LifecycleEvent::Expired {
                credential: credential.clone(),
            });
        }
        expired
    }

    /// Run [`tick`](Self::tick) every `interval` until `cancel` fires
    ///
    /// The task holds only a weak reference and also stops once the
    /// lifecycle is dropped.
    pub fn spawn_ticker(self: &Arc<Self>, interval: Duration, cancel: CancelToken) -> JoinHandle<()> {
        let lifecycle = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(lifecycle) = lifecycle.upgrade() else { break };
                        lifecycle.tick();
                        if lifecycle.has_unsaved_changes() {
                            if let Err(e) = lifecycle.flush() {
                                tracing::debug!(error = %e, "Credential vault still unwritable");
                            }
                        }
                    }
                }
            }
            tracing::debug!("Expiry ticker stopped");
        })
    }

    /// Replace the session's credential with a freshly exchanged one
    ///
    /// The current credential stays in place (and visible) unless the
    /// exchange succeeds. Every session sharing the old credential moves
    /// to the new one. Once the exchange succeeds the swap always happens;
    /// a vault write error only leaves unsaved changes behind.
    pub async fn renew(&self, session: &SessionId) -> Result<Arc<AccessCredential>, LifecycleError> {
        let current = self
            .credential_for(session)
            .ok_or_else(|| LifecycleError::UnknownCredential(session.to_string()))?;

        let mut params = AccessParams::new(*session);
        if let Some(scope) = &current.info.scope {
            params = params.with_scope(scope.clone());
        }
        let grant = self.broker.request_access(params).await.map_err(|e| {
            tracing::warn!(credential = %current.fingerprint(), error = %e, "Renewal failed; keeping current credential");
            LifecycleError::Renewal(e)
        })?;

        let renewed = Arc::new(grant.credential);
        let handle = Arc::clone(&renewed);
        self.commit(|tracker| {
            let mut moved = tracker.sessions_on(&current.token);
            if !moved.contains(session) {
                moved.push(*session);
            }
            tracker.credentials.shift_remove(&current.token);
            for s in moved {
                tracker.bind(s, &renewed);
            }
            tracker.credentials.insert(
                renewed.token.clone(),
                Tracked {
                    credential: renewed,
                    expired: false,
                },
            );
        });

        let previous = current.fingerprint();
        drop(current);
        self.tracker.lock().prune_dangling();

        tracing::info!(%previous, current = %handle.fingerprint(), "Credential renewed");
        self.emit(LifecycleEvent::Renewed {
            previous,
            current: handle.fingerprint(),
        });
        Ok(handle)
    }

    /// Forget a credential and every session reference to it
    pub fn clear(&self, credential: &AccessCredential) -> Result<bool, LifecycleError> {
        let removed = self.mutate(|tracker| {
            let sessions = tracker.sessions_on(&credential.token);
            let removed = tracker.credentials.shift_remove(&credential.token).is_some();
            for session in sessions {
                tracker.sessions.remove(&session);
            }
            Ok(removed)
        })?;

        if removed {
            self.emit(LifecycleEvent::Cleared {
                credential: credential.fingerprint(),
            });
        }
        Ok(removed)
    }

    /// Forget every expired credential; returns how many were dropped
    pub fn prune_expired(&self) -> Result<usize, LifecycleError> {
        let now = self.clock.now();
        let cleared = self.mutate(|tracker| {
            let expired: Vec<Arc<AccessCredential>> = tracker
                .credentials
                .values()
                .filter(|t| t.expired || t.credential.status_at(now) == CredentialStatus::Expired)
                .map(|t| Arc::clone(&t.credential))
                .collect();
            for credential in &expired {
                for session in tracker.sessions_on(&credential.token) {
                    tracker.sessions.remove(&session);
                }
                tracker.credentials.shift_remove(&credential.token);
            }
            Ok(expired.iter().map(|c| c.fingerprint()).collect::<Vec<_>>())
        })?;

        for credential in &cleared {
            self.emit(LifecycleEvent::Cleared {
                credential: credential.clone(),
            });
        }
        Ok(cleared.len())
    }

    /// Whether the vault is behind the in-memory state
    #[must_use]
    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved.load(Ordering::SeqCst)
    }

    /// Write the current state to the vault if it is behind
    pub fn flush(&self) -> Result<(), LifecycleError> {
        let tracker = self.tracker.lock();
        if !self.has_unsaved_changes() {
            return Ok(());
        }
        self.vault.save(&tracker.snapshot())?;
        self.unsaved.store(false, Ordering::SeqCst);
        tracing::info!("Credential vault caught up");
        Ok(())
    }

    /// Apply a change that must not be lost, then persist it
    ///
    /// Used once a ticket has been paid for. A failed write is logged and
    /// remembered, not returned.
    fn commit(&self, f: impl FnOnce(&mut Tracker)) {
        let mut tracker = self.tracker.lock();
        f(&mut tracker);
        match self.vault.save(&tracker.snapshot()) {
            Ok(()) => self.unsaved.store(false, Ordering::SeqCst),
            Err(e) => {
                self.unsaved.store(true, Ordering::SeqCst);
                tracing::error!(error = %e, "Credential vault write failed; keeping credential in memory");
            }
        }
    }

    /// Stage → persist → commit
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Tracker) -> Result<R, LifecycleError>,
    ) -> Result<R, LifecycleError> {
        let mut tracker = self.tracker.lock();
        let mut staged = tracker.clone();
        let out = f(&mut staged)?;
        self.vault.save(&staged.snapshot())?;
        *tracker = staged;
        self.unsaved.store(false, Ordering::SeqCst);
        Ok(out)
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for CredentialLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tracker = self.tracker.lock();
        f.debug_struct("CredentialLifecycle")
            .field("credentials", &tracker.credentials.len())
            .field("sessions", &tracker.sessions.len())
            .field("unsaved", &self.has_unsaved_changes())
            .finish_non_exhaustive()
    }
}
