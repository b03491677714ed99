//! In-process issuing station with a real signing key

use async_trait::async_trait;
use chrono::TimeDelta;
use parking_lot::Mutex;
use passbook_client::{
    ExchangeRequest, ExchangeResponse, SignRequest, SignResponse, SplitRequest, SplitResponse,
    Station,
};
use passbook_core::{
    Clock, CredentialInfo, FinalizedTicket, IssuerKey, RedemptionCode, StationError, SystemClock,
};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Ledger {
    /// Outstanding codes and the tickets each is worth
    codes: HashMap<String, u32>,
    redeemed: HashSet<String>,
    spent: HashSet<[u8; 32]>,
}

#[derive(Debug, Default)]
struct Faults {
    sign: VecDeque<StationError>,
    exchange: VecDeque<StationError>,
    split: VecDeque<StationError>,
    split_code: Option<String>,
    sign_short: bool,
}

/// Station double that really signs, verifies and tracks spent tickets
#[derive(Debug)]
pub struct TestStation {
    issuer: IssuerKey,
    clock: Arc<dyn Clock>,
    credential_ttl: TimeDelta,
    credit_limit: u64,
    ledger: Mutex<Ledger>,
    faults: Mutex<Faults>,
    delay: Mutex<Option<Duration>>,
    sign_calls: AtomicUsize,
    exchange_calls: AtomicUsize,
    split_calls: AtomicUsize,
}

impl Default for TestStation {
    fn default() -> Self {
        Self::new()
    }
}

impl TestStation {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Credentials expire relative to `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            issuer: IssuerKey::generate(&mut OsRng),
            clock,
            credential_ttl: TimeDelta::minutes(10),
            credit_limit: 1_000,
            ledger: Mutex::new(Ledger::default()),
            faults: Mutex::new(Faults::default()),
            delay: Mutex::new(None),
            sign_calls: AtomicUsize::new(0),
            exchange_calls: AtomicUsize::new(0),
            split_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_credential_ttl(mut self, ttl: TimeDelta) -> Self {
        self.credential_ttl = ttl;
        self
    }

    pub fn issuer(&self) -> &IssuerKey {
        &self.issuer
    }

    /// Register a fresh code worth `count` tickets
    pub fn issue_code(&self, count: u32) -> RedemptionCode {
        let code = RedemptionCode::generate(count, &mut OsRng).unwrap();
        self.ledger.lock().codes.insert(code.as_str().to_string(), count);
        code
    }

    /// Record a ticket as spent elsewhere (another device won the race)
    pub fn mark_used(&self, ticket: &FinalizedTicket) {
        self.ledger.lock().spent.insert(ticket.nonce);
    }

    pub fn is_spent(&self, ticket: &FinalizedTicket) -> bool {
        self.ledger.lock().spent.contains(&ticket.nonce)
    }

    pub fn fail_next_sign(&self, err: StationError) {
        self.faults.lock().sign.push_back(err);
    }

    pub fn fail_next_exchange(&self, err: StationError) {
        self.faults.lock().exchange.push_back(err);
    }

    pub fn fail_next_split(&self, err: StationError) {
        self.faults.lock().split.push_back(err);
    }

    /// Answer the next split with this raw code instead of a real one
    pub fn respond_to_next_split_with(&self, code: impl Into<String>) {
        self.faults.lock().split_code = Some(code.into());
    }

    /// Return one signature fewer than requested on the next sign call
    pub fn drop_a_signature_next(&self) {
        self.faults.lock().sign_short = true;
    }

    /// Delay every response
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn split_calls(&self) -> usize {
        self.split_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_ticket(&self, ledger: &Ledger, ticket: &FinalizedTicket) -> Result<(), StationError> {
        if !self.issuer.verify(ticket) {
            return Err(StationError::Rejected("invalid ticket signature".into()));
        }
        if ledger.spent.contains(&ticket.nonce) {
            return Err(StationError::TicketUsed);
        }
        Ok(())
    }
}

#[async_trait]
impl Station for TestStation {
    async fn sign(&self, request: SignRequest) -> Result<SignResponse, StationError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(err) = self.faults.lock().sign.pop_front() {
            return Err(err);
        }

        let mut ledger = self.ledger.lock();
        let key = request.code.as_str().to_string();
        if ledger.redeemed.contains(&key) {
            return Err(StationError::Rejected("code already used".into()));
        }
        let Some(&count) = ledger.codes.get(&key) else {
            return Err(StationError::Rejected("unknown code".into()));
        };
        if request.blinded_requests.len() != count as usize {
            return Err(StationError::Rejected(format!(
                "code is worth {count} tickets, got {} requests",
                request.blinded_requests.len()
            )));
        }

        let mut signed_responses = request
            .blinded_requests
            .iter()
            .map(|r| self.issuer.sign(r))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StationError::Rejected(e.to_string()))?;
        ledger.codes.remove(&key);
        ledger.redeemed.insert(key);

        if std::mem::take(&mut self.faults.lock().sign_short) {
            signed_responses.pop();
        }
        Ok(SignResponse { signed_responses })
    }

    async fn exchange(&self, request: ExchangeRequest) -> Result<ExchangeResponse, StationError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(err) = self.faults.lock().exchange.pop_front() {
            return Err(err);
        }

        let mut ledger = self.ledger.lock();
        self.check_ticket(&ledger, &request.ticket)?;
        ledger.spent.insert(request.ticket.nonce);

        let mut token = [0u8; 16];
        OsRng.fill_bytes(&mut token);
        Ok(ExchangeResponse {
            token: format!("pk-{}", hex::encode(token)),
            info: CredentialInfo {
                credit_limit: self.credit_limit,
                scope: request.scope,
                ..CredentialInfo::default()
            },
            expires_at: self.clock.now() + self.credential_ttl,
        })
    }

    async fn split(&self, request: SplitRequest) -> Result<SplitResponse, StationError> {
        self.split_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(err) = self.faults.lock().split.pop_front() {
            return Err(err);
        }

        let mut ledger = self.ledger.lock();
        if request.tickets.iter().any(|t| !self.issuer.verify(t)) {
            return Err(StationError::Rejected("invalid ticket signature".into()));
        }
        let positions: Vec<usize> = request
            .tickets
            .iter()
            .enumerate()
            .filter(|(_, t)| ledger.spent.contains(&t.nonce))
            .map(|(i, _)| i)
            .collect();
        if !positions.is_empty() {
            return Err(StationError::TicketsUsed { positions });
        }
        for ticket in &request.tickets {
            ledger.spent.insert(ticket.nonce);
        }

        if let Some(code) = self.faults.lock().split_code.take() {
            return Ok(SplitResponse { code });
        }

        let count = u32::try_from(request.tickets.len())
            .map_err(|_| StationError::Rejected("too many tickets".into()))?;
        let code = RedemptionCode::generate(count, &mut OsRng)
            .map_err(|e| StationError::Rejected(e.to_string()))?;
        ledger.codes.insert(code.as_str().to_string(), count);
        Ok(SplitResponse {
            code: code.into(),
        })
    }
}
