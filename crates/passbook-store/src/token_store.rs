//! Token store - the durable ticket ledger
//!
//! Owns every ticket the client holds. All mutations go through a single
//! lock and follow stage → persist → commit: the change is applied to a
//! staged copy, the staged ledger is written to the backend, and only then
//! does it replace the live ledger. A failed write leaves both the backend
//! and memory exactly as they were.
//!
//! Tickets out for an exchange or split are *claimed*. Claims live only in
//! memory: they hide a ticket from [`TokenStore::list_ready`] so concurrent
//! operations never pick the same ticket, and they vanish on restart so an
//! interrupted exchange leaves its ticket `Finalized`.

use crate::backend::{KeyValueStore, MemoryStore, LEDGER_KEY};
use crate::claim::{ClaimSet, TicketClaim};
use crate::snapshot::{LedgerExport, LedgerSnapshot};
use crate::transfer::VaultTransfer;
use indexmap::IndexMap;
use parking_lot::Mutex;
use passbook_core::state_machine;
use passbook_core::{FinalizedTicket, StoreError, Ticket, TicketId, TicketState};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Live ledger counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerCount {
    /// Finalized tickets (including ones claimed by an in-flight operation)
    pub active: usize,
    /// Consumed or spent tickets
    pub archived: usize,
}

/// Result of [`TokenStore::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddOutcome {
    pub added: usize,
    pub duplicates: usize,
}

/// Result of [`TokenStore::import_all`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportSummary {
    pub added_active: usize,
    pub added_archived: usize,
    pub duplicates: usize,
    /// Duplicates that moved a local ticket forward (e.g. Finalized -> Spent)
    pub advanced: usize,
}

#[derive(Debug, Clone, Default)]
struct Ledger {
    tickets: IndexMap<TicketId, Ticket>,
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
struct Inner {
    ledger: Ledger,
    claims: HashSet<TicketId>,
}

/// Durable local ledger of tickets
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
    inner: Mutex<Inner>,
}

impl TokenStore {
    /// Open the ledger persisted in `backend` (empty if none)
    pub fn open(backend: Arc<dyn KeyValueStore>) -> Result<Self, StoreError> {
        let ledger = match backend.get(LEDGER_KEY)? {
            Some(bytes) => {
                let snapshot = LedgerSnapshot::decode(&bytes)?;
                let mut tickets = IndexMap::with_capacity(snapshot.tickets.len());
                for ticket in snapshot.tickets {
                    check_storable(&ticket).map_err(|reason| {
                        StoreError::Corrupt(format!("ticket {}: {reason}", ticket.id.short()))
                    })?;
                    if tickets.insert(ticket.id, ticket).is_some() {
                        return Err(StoreError::Corrupt("duplicate ticket id".into()));
                    }
                }
                Ledger {
                    tickets,
                    extra: snapshot.extra,
                }
            }
            None => Ledger::default(),
        };

        let store = Self {
            backend,
            inner: Mutex::new(Inner {
                ledger,
                claims: HashSet::new(),
            }),
        };
        let count = store.count();
        tracing::info!(active = count.active, archived = count.archived, "Opened ticket ledger");
        Ok(store)
    }

    /// Ledger backed by memory only
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryStore::new()),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Append tickets, skipping ids already present
    ///
    /// Only `Finalized`, `Consumed` and `Spent` tickets may enter the
    /// ledger; the whole batch is rejected if any ticket is invalid.
    pub fn add(&self, tickets: Vec<Ticket>) -> Result<AddOutcome, StoreError> {
        for ticket in &tickets {
            check_storable(ticket).map_err(|reason| StoreError::InvalidTicket {
                id: ticket.id,
                reason,
            })?;
        }

        let outcome = self.mutate(|inner| {
            let mut outcome = AddOutcome::default();
            for ticket in tickets {
                if inner.ledger.tickets.contains_key(&ticket.id) {
                    outcome.duplicates += 1;
                } else {
                    inner.ledger.tickets.insert(ticket.id, ticket);
                    outcome.added += 1;
                }
            }
            Ok((outcome, outcome.added > 0))
        })?;

        tracing::debug!(added = outcome.added, duplicates = outcome.duplicates, "Added tickets");
        Ok(outcome)
    }

    /// Unclaimed `Finalized` tickets, oldest first
    #[must_use]
    pub fn list_ready(&self) -> Vec<Ticket> {
        let inner = self.inner.lock();
        ready_ids(&inner)
            .filter_map(|id| inner.ledger.tickets.get(&id).cloned())
            .collect()
    }

    /// Number of unclaimed `Finalized` tickets
    #[must_use]
    pub fn ready_count(&self) -> usize {
        let inner = self.inner.lock();
        ready_ids(&inner).count()
    }

    #[must_use]
    pub fn get(&self, id: &TicketId) -> Option<Ticket> {
        self.inner.lock().ledger.tickets.get(id).cloned()
    }

    /// Counters from a live scan of the ledger
    #[must_use]
    pub fn count(&self) -> LedgerCount {
        let inner = self.inner.lock();
        inner
            .ledger
            .tickets
            .values()
            .fold(LedgerCount::default(), |mut count, ticket| {
                if ticket.state.is_ready() {
                    count.active += 1;
                } else if ticket.state.is_terminal() {
                    count.archived += 1;
                }
                count
            })
    }

    /// Number of tickets currently claimed
    #[must_use]
    pub fn claimed_count(&self) -> usize {
        self.inner.lock().claims.len()
    }

    /// Mark a ticket consumed; a no-op if it is already terminal
    ///
    /// Returns whether the ledger changed.
    pub fn mark_consumed(&self, id: &TicketId) -> Result<bool, StoreError> {
        self.settle(&[*id], TicketState::Consumed)
            .map(|changed| changed > 0)
    }

    /// Mark a ticket spent; a no-op if it is already terminal
    pub fn mark_spent(&self, id: &TicketId) -> Result<bool, StoreError> {
        self.settle(&[*id], TicketState::Spent).map(|changed| changed > 0)
    }

    /// Claim a specific ready ticket
    pub fn claim(&self, id: &TicketId) -> Result<TicketClaim<'_>, StoreError> {
        let material = {
            let mut inner = self.inner.lock();
            let ticket = inner
                .ledger
                .tickets
                .get(id)
                .ok_or(StoreError::UnknownTicket(*id))?;
            if !ticket.state.is_ready() {
                return Err(StoreError::TicketNotReady {
                    id: *id,
                    state: ticket.state,
                });
            }
            let material = spendable(ticket)?;
            if !inner.claims.insert(*id) {
                return Err(StoreError::TicketClaimed(*id));
            }
            material
        };
        tracing::debug!(ticket = %id.short(), "Claimed ticket");
        Ok(TicketClaim::new(self, *id, material))
    }

    /// Claim the oldest ready ticket, if any
    pub fn claim_next(&self) -> Result<Option<TicketClaim<'_>>, StoreError> {
        let next = ready_ids(&self.inner.lock()).next();
        match next {
            Some(id) => self.claim(&id).map(Some),
            None => Ok(None),
        }
    }

    /// Claim the `n` oldest ready tickets as one unit
    pub fn claim_oldest(&self, n: usize) -> Result<ClaimSet<'_>, StoreError> {
        let claimed = {
            let mut inner = self.inner.lock();
            let ids: Vec<TicketId> = ready_ids(&inner).take(n).collect();
            if ids.len() < n {
                return Err(StoreError::InsufficientTickets {
                    requested: n,
                    available: ids.len(),
                });
            }
            let mut claimed = Vec::with_capacity(n);
            for id in &ids {
                let ticket = inner
                    .ledger
                    .tickets
                    .get(id)
                    .ok_or(StoreError::UnknownTicket(*id))?;
                claimed.push((*id, spendable(ticket)?));
            }
            inner.claims.extend(ids);
            claimed
        };
        tracing::debug!(count = n, "Claimed ticket batch");
        Ok(ClaimSet::new(self, claimed))
    }

    /// Every ticket in insertion order
    #[must_use]
    pub fn export_all(&self) -> Vec<Ticket> {
        self.inner.lock().ledger.tickets.values().cloned().collect()
    }

    /// Export as a portable JSON document
    pub fn export_json(&self) -> Result<String, StoreError> {
        LedgerExport::new(self.export_all()).to_json()
    }

    /// Set-union merge of `tickets` into the ledger
    ///
    /// New ids are appended. A duplicate never regresses the local ticket,
    /// but may move it forward: a ticket already spent on another device
    /// is archived here too.
    pub fn import_all(&self, tickets: Vec<Ticket>) -> Result<ImportSummary, StoreError> {
        for ticket in &tickets {
            check_storable(ticket).map_err(|reason| StoreError::InvalidTicket {
                id: ticket.id,
                reason,
            })?;
        }

        let summary = self.mutate(|inner| {
            let mut summary = ImportSummary::default();
            for incoming in tickets {
                match inner.ledger.tickets.get_mut(&incoming.id) {
                    Some(local) => {
                        summary.duplicates += 1;
                        if local.state != incoming.state
                            && state_machine::is_forward(local.state, incoming.state)
                        {
                            local.state = incoming.state;
                            summary.advanced += 1;
                        }
                    }
                    None => {
                        if incoming.state.is_ready() {
                            summary.added_active += 1;
                        } else {
                            summary.added_archived += 1;
                        }
                        inner.ledger.tickets.insert(incoming.id, incoming);
                    }
                }
            }
            let changed = summary.added_active + summary.added_archived + summary.advanced > 0;
            Ok((summary, changed))
        })?;

        tracing::info!(
            added_active = summary.added_active,
            added_archived = summary.added_archived,
            duplicates = summary.duplicates,
            advanced = summary.advanced,
            "Imported tickets"
        );
        Ok(summary)
    }

    /// Import a document produced by [`export_json`](Self::export_json)
    pub fn import_json(&self, json: &str) -> Result<ImportSummary, StoreError> {
        self.import_all(LedgerExport::from_json(json)?.tickets)
    }

    /// Start moving the whole ledger to another device
    ///
    /// Nothing is removed until [`VaultTransfer::confirm`] is called.
    pub fn begin_transfer(&self) -> Result<VaultTransfer<'_>, StoreError> {
        let inner = self.inner.lock();
        if !inner.claims.is_empty() {
            return Err(StoreError::TransferBlocked {
                claimed: inner.claims.len(),
            });
        }
        let tickets = inner.ledger.tickets.values().cloned().collect();
        drop(inner);
        Ok(VaultTransfer::new(self, tickets))
    }

    pub(crate) fn remove_transferred(&self, ids: &[TicketId]) -> Result<usize, StoreError> {
        self.mutate(|inner| {
            if !inner.claims.is_empty() {
                return Err(StoreError::TransferBlocked {
                    claimed: inner.claims.len(),
                });
            }
            let removed = ids
                .iter()
                .filter(|id| inner.ledger.tickets.shift_remove(*id).is_some())
                .count();
            Ok((removed, removed > 0))
        })
    }

    /// Move tickets to a terminal state in one write, releasing their claims
    ///
    /// Tickets already terminal are skipped.
    pub(crate) fn settle(&self, ids: &[TicketId], to: TicketState) -> Result<usize, StoreError> {
        let changed = self.mutate(|inner| {
            let mut changed = 0;
            for id in ids {
                let ticket = inner
                    .ledger
                    .tickets
                    .get_mut(id)
                    .ok_or(StoreError::UnknownTicket(*id))?;
                if ticket.state.is_terminal() {
                    continue;
                }
                if !ticket.state.is_ready() {
                    return Err(StoreError::TicketNotReady {
                        id: *id,
                        state: ticket.state,
                    });
                }
                ticket.transition(to)?;
                changed += 1;
            }
            for id in ids {
                inner.claims.remove(id);
            }
            Ok((changed, changed > 0))
        })?;

        if changed > 0 {
            tracing::debug!(count = changed, state = %to, "Settled tickets");
        }
        Ok(changed)
    }

    pub(crate) fn release(&self, ids: &[TicketId]) {
        let mut inner = self.inner.lock();
        for id in ids {
            inner.claims.remove(id);
        }
    }

    /// Stage → persist → commit
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Inner) -> Result<(R, bool), StoreError>,
    ) -> Result<R, StoreError> {
        let mut inner = self.inner.lock();
        let mut staged = inner.clone();
        let (out, persist) = f(&mut staged)?;
        if persist {
            let snapshot = LedgerSnapshot::new(
                staged.ledger.tickets.values().cloned().collect(),
                staged.ledger.extra.clone(),
            );
            self.backend.put(LEDGER_KEY, &snapshot.encode()?).map_err(|e| {
                tracing::error!(error = %e, "Ledger write failed; change discarded");
                e
            })?;
        }
        *inner = staged;
        Ok(out)
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TokenStore")
            .field("tickets", &inner.ledger.tickets.len())
            .field("claims", &inner.claims.len())
            .finish_non_exhaustive()
    }
}

fn ready_ids(inner: &Inner) -> impl Iterator<Item = TicketId> + '_ {
    inner
        .ledger
        .tickets
        .values()
        .filter(|t| t.state.is_ready() && !inner.claims.contains(&t.id))
        .map(|t| t.id)
}

fn spendable(ticket: &Ticket) -> Result<FinalizedTicket, StoreError> {
    ticket
        .finalized_ticket
        .clone()
        .ok_or_else(|| StoreError::InvalidTicket {
            id: ticket.id,
            reason: "finalized ticket has no material".into(),
        })
}

fn check_storable(ticket: &Ticket) -> Result<(), String> {
    if ticket.state.is_pending() {
        return Err(format!("{} tickets cannot be stored", ticket.state));
    }
    ticket.check_consistency()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use passbook_core::{IssuerKey, PendingBlind};
    use pretty_assertions::assert_eq;
    use rand::rngs::OsRng;

    mock! {
        pub Kv {}
        impl KeyValueStore for Kv {
            fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
            fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
            fn delete(&self, key: &str) -> Result<(), StoreError>;
        }
    }

    fn mint(n: usize) -> Vec<Ticket> {
        let issuer = IssuerKey::generate(&mut OsRng);
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

    fn ids(tickets: &[Ticket]) -> Vec<TicketId> {
        tickets.iter().map(|t| t.id).collect()
    }

    #[test]
    fn add_is_idempotent_by_id() {
        let store = TokenStore::in_memory();
        let tickets = mint(3);

        let first = store.add(tickets.clone()).unwrap();
        let second = store.add(tickets).unwrap();

        assert_eq!(first, AddOutcome { added: 3, duplicates: 0 });
        assert_eq!(second, AddOutcome { added: 0, duplicates: 3 });
        assert_eq!(store.count(), LedgerCount { active: 3, archived: 0 });
    }

    #[test]
    fn add_rejects_pending_tickets() {
        let store = TokenStore::in_memory();
        let pending = PendingBlind::generate(&mut OsRng);
        let blinded = Ticket::blinded(pending.ticket_id(), pending.request());

        let mut batch = mint(2);
        batch.push(blinded);

        assert!(matches!(store.add(batch), Err(StoreError::InvalidTicket { .. })));
        assert_eq!(store.count().active, 0);
    }

    #[test]
    fn list_ready_keeps_insertion_order() {
        let store = TokenStore::in_memory();
        let first = mint(2);
        let second = mint(2);
        store.add(first.clone()).unwrap();
        store.add(second.clone()).unwrap();

        let expected: Vec<_> = ids(&first).into_iter().chain(ids(&second)).collect();
        assert_eq!(ids(&store.list_ready()), expected);

        store.mark_consumed(&expected[0]).unwrap();
        assert_eq!(ids(&store.list_ready()), expected[1..].to_vec());
    }

    #[test]
    fn marking_twice_equals_marking_once() {
        let store = TokenStore::in_memory();
        let tickets = mint(2);
        store.add(tickets.clone()).unwrap();

        assert!(store.mark_consumed(&tickets[0].id).unwrap());
        let after_once = store.export_all();
        assert!(!store.mark_consumed(&tickets[0].id).unwrap());
        assert!(!store.mark_spent(&tickets[0].id).unwrap());
        assert_eq!(store.export_all(), after_once);

        assert!(store.mark_spent(&tickets[1].id).unwrap());
        assert!(!store.mark_spent(&tickets[1].id).unwrap());
        assert_eq!(store.count(), LedgerCount { active: 0, archived: 2 });
    }

    #[test]
    fn unknown_ticket_is_an_error() {
        let store = TokenStore::in_memory();
        let id = TicketId::from_nonce(&[0u8; 32]);
        assert!(matches!(store.mark_spent(&id), Err(StoreError::UnknownTicket(_))));
    }

    #[test]
    fn claims_hide_tickets_until_released() {
        let store = TokenStore::in_memory();
        let tickets = mint(2);
        store.add(tickets.clone()).unwrap();

        let claim = store.claim_next().unwrap().unwrap();
        assert_eq!(claim.id(), tickets[0].id);
        assert_eq!(store.ready_count(), 1);
        assert_eq!(store.count().active, 2);
        assert!(matches!(store.claim(&tickets[0].id), Err(StoreError::TicketClaimed(_))));

        drop(claim);
        assert_eq!(store.ready_count(), 2);
    }

    #[test]
    fn claim_oldest_is_all_or_nothing() {
        let store = TokenStore::in_memory();
        store.add(mint(3)).unwrap();

        assert!(matches!(
            store.claim_oldest(4),
            Err(StoreError::InsufficientTickets { requested: 4, available: 3 })
        ));
        assert_eq!(store.claimed_count(), 0);

        let set = store.claim_oldest(2).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(store.ready_count(), 1);
        assert_eq!(set.consume_all().unwrap(), 2);
        assert_eq!(store.count(), LedgerCount { active: 1, archived: 2 });
        assert_eq!(store.claimed_count(), 0);
    }

    #[test]
    fn failed_write_changes_nothing() {
        let mut kv = MockKv::new();
        kv.expect_get().returning(|_| Ok(None));
        kv.expect_put()
            .returning(|_, _| Err(StoreError::Backend("quota exceeded".into())));

        let store = TokenStore::open(Arc::new(kv)).unwrap();
        let result = store.add(mint(2));

        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(store.count(), LedgerCount::default());
        assert!(store.export_all().is_empty());
    }

    #[test]
    fn no_op_marks_do_not_write() {
        let mut kv = MockKv::new();
        kv.expect_get().returning(|_| Ok(None));
        kv.expect_put().times(2).returning(|_, _| Ok(()));

        let store = TokenStore::open(Arc::new(kv)).unwrap();
        let tickets = mint(1);
        store.add(tickets.clone()).unwrap();
        store.mark_spent(&tickets[0].id).unwrap();
        store.mark_spent(&tickets[0].id).unwrap();
        store.mark_consumed(&tickets[0].id).unwrap();
    }

    #[test]
    fn reopen_restores_ledger_and_drops_claims() {
        let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let tickets = mint(3);
        {
            let store = TokenStore::open(backend.clone()).unwrap();
            store.add(tickets.clone()).unwrap();
            store.mark_spent(&tickets[1].id).unwrap();
            let claim = store.claim_next().unwrap().unwrap();
            std::mem::forget(claim);
        }

        let reopened = TokenStore::open(backend).unwrap();
        assert_eq!(reopened.count(), LedgerCount { active: 2, archived: 1 });
        assert_eq!(reopened.claimed_count(), 0);
        assert_eq!(ids(&reopened.list_ready()), vec![tickets[0].id, tickets[2].id]);
    }

    #[test]
    fn import_of_own_export_is_idempotent() {
        let store = TokenStore::in_memory();
        let tickets = mint(4);
        store.add(tickets.clone()).unwrap();
        store.mark_consumed(&tickets[3].id).unwrap();

        let json = store.export_json().unwrap();
        let first = store.import_json(&json).unwrap();
        let second = store.import_json(&json).unwrap();

        assert_eq!(first.added_active, 0);
        assert_eq!(first.added_archived, 0);
        assert_eq!(second.added_active + second.added_archived, 0);
        assert_eq!(second.duplicates, 4);
    }

    #[test]
    fn import_into_fresh_store_counts_by_state() {
        let source = TokenStore::in_memory();
        let tickets = mint(5);
        source.add(tickets.clone()).unwrap();
        source.mark_spent(&tickets[0].id).unwrap();
        source.mark_consumed(&tickets[1].id).unwrap();

        let target = TokenStore::in_memory();
        target.add(vec![tickets[4].clone()]).unwrap();
        let summary = target.import_all(source.export_all()).unwrap();

        assert_eq!(
            summary,
            ImportSummary { added_active: 2, added_archived: 2, duplicates: 1, advanced: 0 }
        );
        assert_eq!(target.count(), LedgerCount { active: 3, archived: 2 });
    }

    #[test]
    fn import_moves_tickets_forward_never_back() {
        let local = TokenStore::in_memory();
        let tickets = mint(2);
        local.add(tickets.clone()).unwrap();
        local.mark_consumed(&tickets[1].id).unwrap();

        let remote = TokenStore::in_memory();
        remote.add(tickets.clone()).unwrap();
        remote.mark_spent(&tickets[0].id).unwrap();

        let summary = local.import_all(remote.export_all()).unwrap();
        assert_eq!(summary.advanced, 1);
        assert_eq!(local.get(&tickets[0].id).unwrap().state, TicketState::Spent);
        assert_eq!(local.get(&tickets[1].id).unwrap().state, TicketState::Consumed);
    }

    #[test]
    fn corrupt_ledger_refuses_to_open() {
        let backend = Arc::new(MemoryStore::new());
        backend.put(LEDGER_KEY, b"{\"version\":1,\"tickets\":\"nope\"}").unwrap();
        assert!(TokenStore::open(backend).is_err());
    }
}
