//! Redemption against an in-process station

use parking_lot::Mutex;
use passbook_client::{BlindExchangeClient, CancelToken};
use passbook_core::{NoProgress, RedeemError, StationError};
use passbook_store::TokenStore;
use passbook_test_utils::{FlakyStore, TestStation};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn client(station: &Arc<TestStation>, store: &Arc<TokenStore>) -> BlindExchangeClient {
    BlindExchangeClient::new(station.clone(), store.clone()).with_timeout(Duration::from_secs(2))
}

#[derive(Default)]
struct Recorder(Mutex<Vec<u8>>);

impl Recorder {
    fn observer(&self) -> impl Fn(&str, u8) + Send + Sync + '_ {
        move |_msg: &str, pct: u8| self.0.lock().push(pct)
    }

    fn percents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }
}

#[tokio::test]
async fn redeem_mints_every_ticket_in_the_code() {
    let station = Arc::new(TestStation::new());
    let store = Arc::new(TokenStore::in_memory());
    let code = station.issue_code(5);

    let outcome = client(&station, &store)
        .redeem(&code.grouped().to_lowercase(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(outcome.tickets_issued, 5);
    let ready = store.list_ready();
    assert_eq!(ready.len(), 5);
    for ticket in &ready {
        assert!(station.issuer().verify(ticket.finalized_ticket.as_ref().unwrap()));
    }
}

#[tokio::test]
async fn progress_is_monotonic_and_ends_at_100_once() {
    let station = Arc::new(TestStation::new());
    let store = Arc::new(TokenStore::in_memory());
    let code = station.issue_code(3);
    let recorder = Recorder::default();

    client(&station, &store)
        .redeem(code.as_str(), &recorder.observer())
        .await
        .unwrap();

    let percents = recorder.percents();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.iter().filter(|p| **p == 100).count(), 1);
    assert_eq!(percents.last(), Some(&100));
}

#[tokio::test]
async fn malformed_code_is_rejected_before_any_call() {
    let station = Arc::new(TestStation::new());
    let store = Arc::new(TokenStore::in_memory());
    let recorder = Recorder::default();

    let err = client(&station, &store)
        .redeem("TOO-SHORT", &recorder.observer())
        .await
        .unwrap_err();

    assert!(matches!(err, RedeemError::InvalidCode(_)));
    assert_eq!(station.sign_calls(), 0);
    assert!(!recorder.percents().contains(&100));
}

#[tokio::test]
async fn used_code_is_a_remote_rejection() {
    let station = Arc::new(TestStation::new());
    let store = Arc::new(TokenStore::in_memory());
    let code = station.issue_code(2);
    let client = client(&station, &store);

    client.redeem(code.as_str(), &NoProgress).await.unwrap();
    let err = client.redeem(code.as_str(), &NoProgress).await.unwrap_err();

    assert!(matches!(err, RedeemError::RemoteRejected(_)));
    assert_eq!(store.count().active, 2);
}

#[tokio::test]
async fn network_failure_adds_nothing_and_stops_progress() {
    let station = Arc::new(TestStation::new());
    let store = Arc::new(TokenStore::in_memory());
    let code = station.issue_code(4);
    station.fail_next_sign(StationError::Network("connection reset".into()));
    let recorder = Recorder::default();

    let err = client(&station, &store)
        .redeem(code.as_str(), &recorder.observer())
        .await
        .unwrap_err();

    assert!(matches!(err, RedeemError::Network(StationError::Network(_))));
    assert_eq!(store.count().active, 0);
    let percents = recorder.percents();
    assert!(!percents.is_empty());
    assert!(!percents.contains(&100));
}

#[tokio::test]
async fn short_signature_batch_is_rejected_whole() {
    let station = Arc::new(TestStation::new());
    let store = Arc::new(TokenStore::in_memory());
    let code = station.issue_code(3);
    station.drop_a_signature_next();

    let err = client(&station, &store)
        .redeem(code.as_str(), &NoProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, RedeemError::Network(StationError::Malformed(_))));
    assert_eq!(store.count().active, 0);
}

#[tokio::test(start_paused = true)]
async fn slow_station_times_out_without_state() {
    let station = Arc::new(TestStation::new());
    station.set_delay(Some(Duration::from_secs(10)));
    let store = Arc::new(TokenStore::in_memory());
    let code = station.issue_code(1);

    let err = client(&station, &store)
        .redeem(code.as_str(), &NoProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, RedeemError::Network(StationError::Timeout(_))));
    assert_eq!(store.count().active, 0);
}

#[tokio::test]
async fn storage_failure_is_surfaced() {
    let station = Arc::new(TestStation::new());
    let backend = Arc::new(FlakyStore::new());
    let store = Arc::new(TokenStore::open(backend.clone()).unwrap());
    let code = station.issue_code(2);
    backend.fail_writes(true);

    let err = client(&station, &store)
        .redeem(code.as_str(), &NoProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, RedeemError::Storage(_)));
    assert_eq!(store.count().active, 0);
}

#[tokio::test]
async fn cancelled_before_sign_makes_no_call() {
    let station = Arc::new(TestStation::new());
    let store = Arc::new(TokenStore::in_memory());
    let code = station.issue_code(2);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = client(&station, &store)
        .redeem_with_cancel(code.as_str(), &NoProgress, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, RedeemError::Cancelled));
    assert_eq!(station.sign_calls(), 0);
}
