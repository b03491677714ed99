//! Moving a ledger to another device
//!
//! A transfer snapshots every ticket. The local copies are removed only
//! when the caller confirms the destination imported them; aborting (or
//! dropping the handle) leaves the ledger untouched.

use crate::snapshot::LedgerExport;
use crate::token_store::TokenStore;
use passbook_core::{StoreError, Ticket, TicketId};

/// A pending ledger transfer
#[derive(Debug)]
#[must_use = "a transfer does nothing until confirmed"]
pub struct VaultTransfer<'s> {
    store: &'s TokenStore,
    tickets: Vec<Ticket>,
}

impl<'s> VaultTransfer<'s> {
    pub(crate) fn new(store: &'s TokenStore, tickets: Vec<Ticket>) -> Self {
        Self { store, tickets }
    }

    /// Tickets included in the transfer
    #[inline]
    #[must_use]
    pub fn tickets(&self) -> &[Ticket] {
        &self.tickets
    }

    /// Export document for the destination device
    pub fn to_json(&self) -> Result<String, StoreError> {
        LedgerExport::new(self.tickets.clone()).to_json()
    }

    /// Remove the transferred tickets from this ledger
    ///
    /// Tickets added after the transfer began are kept.
    pub fn confirm(self) -> Result<usize, StoreError> {
        let ids: Vec<TicketId> = self.tickets.iter().map(|t| t.id).collect();
        let removed = self.store.remove_transferred(&ids)?;
        tracing::info!(removed, "Ledger transfer confirmed");
        Ok(removed)
    }

    /// Keep everything in place
    pub fn abort(self) {
        tracing::info!(tickets = self.tickets.len(), "Ledger transfer aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passbook_core::{IssuerKey, PendingBlind};
    use rand::rngs::OsRng;

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

    #[test]
    fn confirm_moves_tickets_to_destination() {
        let source = TokenStore::in_memory();
        source.add(mint(3)).unwrap();

        let transfer = source.begin_transfer().unwrap();
        let json = transfer.to_json().unwrap();

        let destination = TokenStore::in_memory();
        let summary = destination.import_json(&json).unwrap();
        assert_eq!(summary.added_active, 3);

        assert_eq!(transfer.confirm().unwrap(), 3);
        assert!(source.export_all().is_empty());
    }

    #[test]
    fn abort_keeps_tickets() {
        let store = TokenStore::in_memory();
        store.add(mint(2)).unwrap();

        store.begin_transfer().unwrap().abort();
        assert_eq!(store.count().active, 2);
    }

    #[test]
    fn late_additions_survive_confirm() {
        let store = TokenStore::in_memory();
        store.add(mint(2)).unwrap();
        let transfer = store.begin_transfer().unwrap();

        let late = mint(1);
        store.add(late.clone()).unwrap();
        transfer.confirm().unwrap();

        assert_eq!(store.export_all(), late);
    }

    #[test]
    fn claims_block_transfer() {
        let store = TokenStore::in_memory();
        store.add(mint(2)).unwrap();

        let claim = store.claim_next().unwrap().unwrap();
        assert!(matches!(
            store.begin_transfer(),
            Err(StoreError::TransferBlocked { claimed: 1 })
        ));
        drop(claim);

        let transfer = store.begin_transfer().unwrap();
        let claim = store.claim_next().unwrap().unwrap();
        assert!(matches!(transfer.confirm(), Err(StoreError::TransferBlocked { .. })));
        claim.release();
        assert_eq!(store.count().active, 2);
    }
}
