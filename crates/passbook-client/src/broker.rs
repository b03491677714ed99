//! Access broker - ticket-for-credential exchange
//!
//! Each attempt claims one ready ticket, presents it to the station and
//! settles it from the response:
//!
//! | station says          | ticket      | broker                       |
//! |-----------------------|-------------|------------------------------|
//! | credential            | `Consumed`  | done                         |
//! | ticket already used   | `Spent`     | retry with the next ticket   |
//! | anything else         | `Finalized` | stop, surface the error      |
//!
//! Retries are bounded by an attempt budget of
//! `min(ready tickets, required + margin)` so a stale ledger cannot loop.

use crate::cancel::CancelToken;
use crate::deadline::with_deadline;
use crate::station::{ExchangeRequest, Station};
use passbook_core::{
    AccessCredential, AccessError, SessionId, StationError, StoreError, TicketId,
};
use passbook_store::{TicketClaim, TokenStore};
use std::sync::Arc;
use std::time::Duration;

/// Default extra attempts beyond the tickets required
pub const DEFAULT_RETRY_MARGIN: u32 = 3;

/// Exchange phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    Idle,
    Exchanging { attempt: u32 },
    Retrying { attempt: u32 },
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
}

/// What to do after a ticket was reported used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again with the next ready ticket
    Retry,
    /// Budget spent
    Exhausted { attempts: u32 },
}

/// Bounded retry state machine
///
/// `Idle -> Exchanging -> {Succeeded, Retrying, Failed}`, with `Retrying`
/// looping back to `Exchanging`. Pure; the broker feeds it outcomes.
#[derive(Debug, Clone)]
pub struct ExchangeMachine {
    phase: ExchangePhase,
    budget: u32,
    attempts: u32,
}

impl ExchangeMachine {
    /// Machine allowed at most `budget` station calls
    #[must_use]
    pub fn new(budget: u32) -> Self {
        Self {
            phase: ExchangePhase::Idle,
            budget,
            attempts: 0,
        }
    }

    /// Budget for `available` ready tickets when `required` are needed
    #[must_use]
    pub fn budget_for(available: usize, required: u32, margin: u32) -> u32 {
        let available = u32::try_from(available).unwrap_or(u32::MAX);
        available.min(required.max(1).saturating_add(margin))
    }

    #[inline]
    #[must_use]
    pub fn phase(&self) -> ExchangePhase {
        self.phase
    }

    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[inline]
    #[must_use]
    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Whether another station call is allowed
    #[must_use]
    pub fn can_attempt(&self) -> bool {
        matches!(self.phase, ExchangePhase::Idle | ExchangePhase::Retrying { .. })
            && self.attempts < self.budget
    }

    /// Enter `Exchanging`; returns the attempt number (1-based)
    pub fn begin(&mut self) -> Option<u32> {
        if !self.can_attempt() {
            return None;
        }
        self.attempts += 1;
        self.phase = ExchangePhase::Exchanging {
            attempt: self.attempts,
        };
        Some(self.attempts)
    }

    pub fn succeed(&mut self) {
        if let ExchangePhase::Exchanging { .. } = self.phase {
            self.phase = ExchangePhase::Succeeded {
                attempts: self.attempts,
            };
        }
    }

    /// The current ticket was already used elsewhere
    pub fn ticket_used(&mut self) -> RetryDecision {
        if self.attempts < self.budget {
            self.phase = ExchangePhase::Retrying {
                attempt: self.attempts,
            };
            RetryDecision::Retry
        } else {
            self.fail();
            RetryDecision::Exhausted {
                attempts: self.attempts,
            }
        }
    }

    pub fn fail(&mut self) {
        self.phase = ExchangePhase::Failed {
            attempts: self.attempts,
        };
    }
}

/// Parameters for one access request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessParams {
    /// Ticket to try first; the oldest ready ticket if `None`
    pub ticket: Option<TicketId>,
    /// Session that will own the credential
    pub session: SessionId,
    /// Scope to request (e.g. a model family)
    pub scope: Option<String>,
    /// Tickets the caller expects this access to need
    pub required_tickets: u32,
    /// Overrides the broker's retry margin
    pub retry_margin: Option<u32>,
}

impl AccessParams {
    #[must_use]
    pub fn new(session: SessionId) -> Self {
        Self {
            ticket: None,
            session,
            scope: None,
            required_tickets: 1,
            retry_margin: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_ticket(mut self, id: TicketId) -> Self {
        self.ticket = Some(id);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_required_tickets(mut self, required: u32) -> Self {
        self.required_tickets = required;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_retry_margin(mut self, margin: u32) -> Self {
        self.retry_margin = Some(margin);
        self
    }
}

/// A credential and how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct AccessGrant {
    pub credential: AccessCredential,
    /// Ticket consumed for the credential
    pub ticket_id: TicketId,
    /// Station calls made, including the successful one
    pub attempts: u32,
    /// Tickets found already used along the way
    pub spent: Vec<TicketId>,
}

/// Exchanges ready tickets for access credentials
pub struct AccessBroker {
    station: Arc<dyn Station>,
    store: Arc<TokenStore>,
    timeout: Duration,
    retry_margin: u32,
}

impl AccessBroker {
    #[must_use]
    pub fn new(station: Arc<dyn Station>, store: Arc<TokenStore>) -> Self {
        Self {
            station,
            store,
            timeout: Duration::from_secs(30),
            retry_margin: DEFAULT_RETRY_MARGIN,
        }
    }

    /// With station call timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// With default retry margin
    #[inline]
    #[must_use]
    pub fn with_retry_margin(mut self, margin: u32) -> Self {
        self.retry_margin = margin;
        self
    }

    /// The ledger this broker spends from
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Exchange a ticket for a credential
    pub async fn request_access(&self, params: AccessParams) -> Result<AccessGrant, AccessError> {
        self.request_access_with_cancel(params, &CancelToken::new())
            .await
    }

    /// Exchange a ticket for a credential; `cancel` is honoured between attempts
    pub async fn request_access_with_cancel(
        &self,
        params: AccessParams,
        cancel: &CancelToken,
    ) -> Result<AccessGrant, AccessError> {
        let available = self.store.ready_count();
        if available == 0 {
            return Err(match params.ticket {
                Some(id) => unavailable(id, "no ready tickets"),
                None => AccessError::NoTicketsAvailable,
            });
        }

        let margin = params.retry_margin.unwrap_or(self.retry_margin);
        let mut machine = ExchangeMachine::new(ExchangeMachine::budget_for(
            available,
            params.required_tickets,
            margin,
        ));
        let mut preferred = params.ticket;
        let mut spent = Vec::new();

        loop {
            if cancel.is_cancelled() {
                machine.fail();
                return Err(AccessError::Cancelled);
            }

            let claim = match preferred.take() {
                Some(id) => self.store.claim(&id).map_err(|e| claim_error(id, e))?,
                None => match self.store.claim_next()? {
                    Some(claim) => claim,
                    None if machine.attempts() == 0 => return Err(AccessError::NoTicketsAvailable),
                    None => {
                        machine.fail();
                        return Err(AccessError::AllTicketsSpent {
                            attempts: machine.attempts(),
                        });
                    }
                },
            };

            let Some(attempt) = machine.begin() else {
                claim.release();
                return Err(AccessError::AllTicketsSpent {
                    attempts: machine.attempts(),
                });
            };

            let ticket_id = claim.id();
            tracing::debug!(ticket = %ticket_id.short(), attempt, budget = machine.budget(), "Exchanging ticket");

            let outcome = self.exchange(&claim, params.scope.clone()).await;
            match outcome {
                Ok(response) => {
                    claim.consume().map_err(|e| {
                        tracing::error!(ticket = %ticket_id.short(), error = %e, "Exchanged ticket could not be archived");
                        e
                    })?;
                    machine.succeed();

                    let credential = AccessCredential {
                        token: response.token,
                        info: response.info,
                        expires_at: response.expires_at,
                        owner_session_id: params.session,
                    };
                    tracing::info!(
                        ticket = %ticket_id.short(),
                        credential = %credential.fingerprint(),
                        attempts = machine.attempts(),
                        "Access granted"
                    );
                    return Ok(AccessGrant {
                        credential,
                        ticket_id,
                        attempts: machine.attempts(),
                        spent,
                    });
                }
                Err(e) if e.is_ticket_conflict() => {
                    claim.spend()?;
                    spent.push(ticket_id);
                    tracing::warn!(ticket = %ticket_id.short(), attempt, "Ticket already used; trying next");
                    if let RetryDecision::Exhausted { attempts } = machine.ticket_used() {
                        tracing::warn!(attempts, "Retry budget exhausted");
                        return Err(AccessError::AllTicketsSpent { attempts });
                    }
                }
                Err(e) => {
                    claim.release();
                    machine.fail();
                    if e.is_indeterminate() {
                        tracing::warn!(ticket = %ticket_id.short(), error = %e, "Exchange outcome unknown; ticket kept");
                    } else {
                        tracing::warn!(ticket = %ticket_id.short(), error = %e, "Exchange failed");
                    }
                    return Err(AccessError::Remote(e));
                }
            }
        }
    }

    async fn exchange(
        &self,
        claim: &TicketClaim<'_>,
        scope: Option<String>,
    ) -> Result<crate::station::ExchangeResponse, StationError> {
        let request = ExchangeRequest {
            ticket: claim.material().clone(),
            scope,
        };
        with_deadline(self.timeout, self.station.exchange(request)).await
    }
}

impl std::fmt::Debug for AccessBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessBroker")
            .field("timeout", &self.timeout)
            .field("retry_margin", &self.retry_margin)
            .finish_non_exhaustive()
    }
}

fn unavailable(id: TicketId, reason: impl Into<String>) -> AccessError {
    AccessError::TicketUnavailable {
        id,
        reason: reason.into(),
    }
}

fn claim_error(id: TicketId, err: StoreError) -> AccessError {
    match err {
        StoreError::UnknownTicket(_) => unavailable(id, "not in ledger"),
        StoreError::TicketNotReady { state, .. } => unavailable(id, format!("ticket is {state}")),
        StoreError::TicketClaimed(_) => unavailable(id, "ticket is in use"),
        other => AccessError::Storage(other),
    }
}
