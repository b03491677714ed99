//! In-flight ticket claims
//!
//! A claim reserves ready tickets for one exchange or split. It is settled
//! by consuming or spending the tickets; dropping it unsettled (error,
//! timeout, cancelled future) puts the tickets back in the ready pool.

use crate::token_store::TokenStore;
use passbook_core::{FinalizedTicket, StoreError, TicketId, TicketState};

/// A single claimed ticket
#[derive(Debug)]
#[must_use = "dropping a claim releases the ticket"]
pub struct TicketClaim<'s> {
    store: &'s TokenStore,
    id: TicketId,
    material: FinalizedTicket,
    settled: bool,
}

impl<'s> TicketClaim<'s> {
    pub(crate) fn new(store: &'s TokenStore, id: TicketId, material: FinalizedTicket) -> Self {
        Self {
            store,
            id,
            material,
            settled: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> TicketId {
        self.id
    }

    /// The spendable ticket to present to the station
    #[inline]
    #[must_use]
    pub fn material(&self) -> &FinalizedTicket {
        &self.material
    }

    /// The station accepted the ticket
    pub fn consume(mut self) -> Result<(), StoreError> {
        self.store.settle(&[self.id], TicketState::Consumed)?;
        self.settled = true;
        Ok(())
    }

    /// The station reported the ticket as already used
    pub fn spend(mut self) -> Result<(), StoreError> {
        self.store.settle(&[self.id], TicketState::Spent)?;
        self.settled = true;
        Ok(())
    }

    /// Return the ticket to the ready pool
    pub fn release(self) {}
}

impl Drop for TicketClaim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.store.release(&[self.id]);
            tracing::debug!(ticket = %self.id.short(), "Released ticket claim");
        }
    }
}

/// Several tickets claimed as one unit
#[derive(Debug)]
#[must_use = "dropping a claim set releases its tickets"]
pub struct ClaimSet<'s> {
    store: &'s TokenStore,
    tickets: Vec<(TicketId, FinalizedTicket)>,
    settled: bool,
}

impl<'s> ClaimSet<'s> {
    pub(crate) fn new(store: &'s TokenStore, tickets: Vec<(TicketId, FinalizedTicket)>) -> Self {
        Self {
            store,
            tickets,
            settled: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<TicketId> {
        self.tickets.iter().map(|(id, _)| *id).collect()
    }

    #[must_use]
    pub fn materials(&self) -> Vec<FinalizedTicket> {
        self.tickets.iter().map(|(_, m)| m.clone()).collect()
    }

    /// Consume every ticket in a single ledger write
    pub fn consume_all(mut self) -> Result<usize, StoreError> {
        let changed = self.store.settle(&self.ids(), TicketState::Consumed)?;
        self.settled = true;
        Ok(changed)
    }

    /// Spend the tickets at `positions` and release the rest
    ///
    /// Positions index [`ClaimSet::materials`]; out-of-range ones are
    /// ignored. Returns the ids that were archived.
    pub fn spend_at(mut self, positions: &[usize]) -> Result<Vec<TicketId>, StoreError> {
        let used: Vec<TicketId> = positions
            .iter()
            .filter_map(|&i| self.tickets.get(i).map(|(id, _)| *id))
            .collect();
        self.store.settle(&used, TicketState::Spent)?;
        self.settled = true;

        let rest: Vec<TicketId> = self
            .tickets
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| !used.contains(id))
            .collect();
        self.store.release(&rest);
        Ok(used)
    }

    /// Return every ticket to the ready pool
    pub fn release(self) {}
}

impl Drop for ClaimSet<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.store.release(&self.ids());
            tracing::debug!(count = self.tickets.len(), "Released ticket claims");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passbook_core::{IssuerKey, PendingBlind, Ticket};
    use rand::rngs::OsRng;

    fn store_with(n: usize) -> TokenStore {
        let issuer = IssuerKey::generate(&mut OsRng);
        let tickets = (0..n)
            .map(|_| {
                let pending = PendingBlind::generate(&mut OsRng);
                let signed = issuer.sign(&pending.request()).unwrap();
                let mut ticket = Ticket::blinded(pending.ticket_id(), pending.request());
                ticket.record_signature(signed).unwrap();
                ticket.finalize(pending.unblind(&signed).unwrap()).unwrap();
                ticket
            })
            .collect();
        let store = TokenStore::in_memory();
        store.add(tickets).unwrap();
        store
    }

    #[test]
    fn consumed_claim_is_archived() {
        let store = store_with(1);
        let claim = store.claim_next().unwrap().unwrap();
        let id = claim.id();
        assert_eq!(claim.material().ticket_id(), id);

        claim.consume().unwrap();
        assert_eq!(store.get(&id).unwrap().state, TicketState::Consumed);
        assert_eq!(store.claimed_count(), 0);
    }

    #[test]
    fn spent_claim_is_archived() {
        let store = store_with(2);
        let claim = store.claim_next().unwrap().unwrap();
        let id = claim.id();
        claim.spend().unwrap();

        assert_eq!(store.get(&id).unwrap().state, TicketState::Spent);
        assert_eq!(store.ready_count(), 1);
    }

    #[test]
    fn released_claim_stays_finalized() {
        let store = store_with(1);
        let claim = store.claim_next().unwrap().unwrap();
        let id = claim.id();
        claim.release();

        assert_eq!(store.get(&id).unwrap().state, TicketState::Finalized);
        assert_eq!(store.ready_count(), 1);
    }

    #[test]
    fn spending_part_of_a_set_releases_the_others() {
        let store = store_with(4);
        let set = store.claim_oldest(3).unwrap();
        let ids = set.ids();

        let spent = set.spend_at(&[1, 7]).unwrap();

        assert_eq!(spent, vec![ids[1]]);
        assert_eq!(store.get(&ids[1]).unwrap().state, TicketState::Spent);
        assert_eq!(store.get(&ids[0]).unwrap().state, TicketState::Finalized);
        assert_eq!(store.claimed_count(), 0);
        assert_eq!(store.ready_count(), 3);
    }

    #[test]
    fn dropped_claim_set_releases_everything() {
        let store = store_with(3);
        {
            let set = store.claim_oldest(3).unwrap();
            assert_eq!(set.materials().len(), 3);
            assert_eq!(store.ready_count(), 0);
        }
        assert_eq!(store.ready_count(), 3);
    }
}
