//! Testing utilities for the Passbook workspace
//!
//! Shared test doubles and fixtures.

#![allow(missing_docs)]

pub mod station;

pub use station::TestStation;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use passbook_client::{AccessBroker, CredentialLifecycle};
use passbook_core::{Clock, IssuerKey, PendingBlind, StoreError, Ticket};
use passbook_store::{CredentialVault, KeyValueStore, MemoryStore, TokenStore};
use rand::rngs::OsRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Memory backend whose writes can be made to fail
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    failing_key: Mutex<Option<String>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail writes to `key` only; `None` heals it
    pub fn fail_writes_to(&self, key: Option<&str>) {
        *self.failing_key.lock() = key.map(str::to_string);
    }

    fn check_write(&self, key: &str) -> Result<(), StoreError> {
        let failing = self.fail_writes.load(Ordering::SeqCst)
            || self.failing_key.lock().as_deref() == Some(key);
        if failing {
            return Err(StoreError::Backend("quota exceeded".into()));
        }
        Ok(())
    }
}

impl KeyValueStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.check_write(key)?;
        self.inner.put(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_write(key)?;
        self.inner.delete(key)
    }
}

/// Finalized tickets signed by `issuer`
pub fn mint_tickets(issuer: &IssuerKey, n: usize) -> Vec<Ticket> {
    (0..n)
        .map(|_| {
            let pending = PendingBlind::generate(&mut OsRng);
            let signed = issuer.sign(&pending.request()).unwrap();
            let mut ticket = Ticket::blinded(pending.ticket_id(), pending.request());
            ticket.record_signature(signed).unwrap();
            ticket.finalize(pending.unblind(&signed).unwrap()).unwrap();
            ticket
        })
        .collect()
}

/// In-memory ledger holding `n` tickets the station will accept
pub fn seeded_store(station: &TestStation, n: usize) -> Arc<TokenStore> {
    let store = TokenStore::in_memory();
    store.add(mint_tickets(station.issuer(), n)).unwrap();
    Arc::new(store)
}

/// Broker over `store` with a short timeout
pub fn broker(station: &Arc<TestStation>, store: &Arc<TokenStore>) -> Arc<AccessBroker> {
    Arc::new(
        AccessBroker::new(station.clone(), store.clone()).with_timeout(Duration::from_secs(2)),
    )
}

/// Lifecycle with an in-memory vault
pub fn lifecycle(
    broker: Arc<AccessBroker>,
    clock: Arc<dyn Clock>,
) -> (CredentialLifecycle, Arc<MemoryStore>) {
    let backend = Arc::new(MemoryStore::new());
    let vault = CredentialVault::new(backend.clone());
    (CredentialLifecycle::new(broker, vault, clock), backend)
}
