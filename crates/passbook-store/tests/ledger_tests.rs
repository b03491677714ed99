//! Ledger invariants across persistence and merge

use passbook_core::{IssuerKey, PendingBlind, StoreError, Ticket, TicketState};
use passbook_store::{FileStore, KeyValueStore, LedgerCount, TokenStore};
use proptest::prelude::*;
use rand::rngs::OsRng;
use std::sync::Arc;

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

#[derive(Debug, Clone, Copy)]
enum Op {
    Consume(usize),
    Spend(usize),
}

impl Op {
    fn index(self) -> usize {
        match self {
            Self::Consume(i) | Self::Spend(i) => i,
        }
    }
}

fn op_strategy(n: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..n).prop_map(Op::Consume),
        (0..n).prop_map(Op::Spend),
    ]
}

fn apply(store: &TokenStore, tickets: &[Ticket], op: Op) {
    match op {
        Op::Consume(i) => {
            store.mark_consumed(&tickets[i].id).unwrap();
        }
        Op::Spend(i) => {
            store.mark_spent(&tickets[i].id).unwrap();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Repeating any settle operation leaves the ledger as a single application did
    #[test]
    fn settling_is_idempotent(ops in proptest::collection::vec(op_strategy(4), 1..12)) {
        let tickets = mint(4);
        let once = TokenStore::in_memory();
        let twice = TokenStore::in_memory();
        once.add(tickets.clone()).unwrap();
        twice.add(tickets.clone()).unwrap();

        for op in &ops {
            apply(&once, &tickets, *op);
            apply(&twice, &tickets, *op);
            apply(&twice, &tickets, *op);
        }

        prop_assert_eq!(once.export_all(), twice.export_all());
    }

    /// Importing an export twice never adds anything the first time didn't
    #[test]
    fn merge_is_idempotent(
        local_ops in proptest::collection::vec(op_strategy(5), 0..6),
        remote_ops in proptest::collection::vec(op_strategy(5), 0..6),
        split in 0usize..=5,
    ) {
        let tickets = mint(5);
        let local = TokenStore::in_memory();
        local.add(tickets[..split].to_vec()).unwrap();
        for op in &local_ops {
            if op.index() < split {
                apply(&local, &tickets, *op);
            }
        }

        let remote = TokenStore::in_memory();
        remote.add(tickets.clone()).unwrap();
        for op in &remote_ops {
            apply(&remote, &tickets, *op);
        }
        let export = remote.export_json().unwrap();

        local.import_json(&export).unwrap();
        let after_first = local.export_all();
        let second = local.import_json(&export).unwrap();

        prop_assert_eq!(second.added_active + second.added_archived + second.advanced, 0);
        prop_assert_eq!(local.export_all(), after_first);
        prop_assert_eq!(local.export_all().len(), 5);
    }

    /// Imported state never moves a ticket backwards
    #[test]
    fn merge_never_regresses(remote_ops in proptest::collection::vec(op_strategy(3), 0..6)) {
        let tickets = mint(3);
        let local = TokenStore::in_memory();
        local.add(tickets.clone()).unwrap();
        for t in &tickets {
            local.mark_consumed(&t.id).unwrap();
        }

        let remote = TokenStore::in_memory();
        remote.add(tickets.clone()).unwrap();
        for op in &remote_ops {
            apply(&remote, &tickets, *op);
        }
        local.import_all(remote.export_all()).unwrap();

        for t in &tickets {
            prop_assert_eq!(local.get(&t.id).unwrap().state, TicketState::Consumed);
        }
    }
}

#[test]
fn file_backed_ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let tickets = mint(3);

    {
        let backend: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        let store = TokenStore::open(backend).unwrap();
        store.add(tickets.clone()).unwrap();
        store.mark_consumed(&tickets[0].id).unwrap();
    }

    let backend: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    let store = TokenStore::open(backend).unwrap();
    assert_eq!(store.count(), LedgerCount { active: 2, archived: 1 });
    assert_eq!(store.get(&tickets[0].id).unwrap().state, TicketState::Consumed);
}

#[test]
fn unknown_ticket_fields_survive_the_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let mut tickets = mint(1);
    tickets[0]
        .extra
        .insert("issued_by".into(), serde_json::Value::String("station-9".into()));

    {
        let backend: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        TokenStore::open(backend).unwrap().add(tickets.clone()).unwrap();
    }

    let backend: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    let store = TokenStore::open(backend).unwrap();
    let restored = store.get(&tickets[0].id).unwrap();
    assert_eq!(restored.extra["issued_by"], "station-9");
}

#[test]
fn pending_ticket_on_disk_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let pending = PendingBlind::generate(&mut OsRng);
    let blinded = Ticket::blinded(pending.ticket_id(), pending.request());
    let raw = serde_json::json!({ "version": 1, "tickets": [blinded] });
    std::fs::write(dir.path().join("ledger.json"), raw.to_string()).unwrap();

    let backend: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    assert!(matches!(TokenStore::open(backend), Err(StoreError::Corrupt(_))));
}
