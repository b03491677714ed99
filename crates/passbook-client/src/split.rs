//! Split service - folding tickets into a shareable code
//!
//! The `n` oldest ready tickets are claimed as one unit before the station
//! call. They are consumed together on success and released together on
//! any failure, so a split never half-happens locally.
//!
//! When the station names tickets of the batch as already used, those are
//! archived as `Spent` and the split is retried with the next oldest
//! tickets, under the same bounded budget the access broker uses.

use crate::broker::{ExchangeMachine, RetryDecision, DEFAULT_RETRY_MARGIN};
use crate::cancel::CancelToken;
use crate::deadline::with_deadline;
use crate::station::{SplitRequest, Station};
use passbook_core::config::MAX_SPLIT_TICKETS;
use passbook_core::{RedemptionCode, SplitError, StationError, StoreError, TicketId};
use passbook_store::TokenStore;
use std::sync::Arc;
use std::time::Duration;

/// Result of a successful split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutcome {
    pub code: RedemptionCode,
    pub tickets_consumed: usize,
    /// Tickets found already used along the way
    pub spent: Vec<TicketId>,
}

/// Consumes tickets in exchange for one redemption code
pub struct SplitService {
    station: Arc<dyn Station>,
    store: Arc<TokenStore>,
    timeout: Duration,
    max_split: usize,
    retry_margin: u32,
}

impl SplitService {
    #[must_use]
    pub fn new(station: Arc<dyn Station>, store: Arc<TokenStore>) -> Self {
        Self {
            station,
            store,
            timeout: Duration::from_secs(30),
            max_split: MAX_SPLIT_TICKETS,
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

    /// With maximum split size (never above the hard ceiling)
    #[inline]
    #[must_use]
    pub fn with_max_split(mut self, max: usize) -> Self {
        self.max_split = max.min(MAX_SPLIT_TICKETS);
        self
    }

    /// With extra attempts allowed after used tickets are found
    #[inline]
    #[must_use]
    pub fn with_retry_margin(mut self, margin: u32) -> Self {
        self.retry_margin = margin;
        self
    }

    /// Largest split currently possible
    #[must_use]
    pub fn max_allowed(&self) -> usize {
        self.max_split.min(self.store.ready_count())
    }

    /// Split `n` tickets into one code
    pub async fn split(&self, n: usize) -> Result<SplitOutcome, SplitError> {
        self.split_with_cancel(n, &CancelToken::new()).await
    }

    pub async fn split_with_cancel(
        &self,
        n: usize,
        cancel: &CancelToken,
    ) -> Result<SplitOutcome, SplitError> {
        let max = self.max_allowed();
        if n == 0 || n > max {
            return Err(SplitError::InvalidCount { requested: n, max });
        }
        let mut machine = ExchangeMachine::new(self.retry_margin.saturating_add(1));
        let mut spent = Vec::new();

        loop {
            if cancel.is_cancelled() {
                return Err(SplitError::Cancelled);
            }
            let Some(attempt) = machine.begin() else {
                return Err(SplitError::AllTicketsSpent {
                    attempts: machine.attempts(),
                    spent: spent.len(),
                });
            };

            let claims = self.store.claim_oldest(n).map_err(|e| match e {
                StoreError::InsufficientTickets { available, .. } => SplitError::InvalidCount {
                    requested: n,
                    max: available.min(self.max_split),
                },
                other => SplitError::Storage(other),
            })?;

            tracing::debug!(tickets = n, attempt, "Requesting split");
            let request = SplitRequest {
                tickets: claims.materials(),
            };
            let response = match with_deadline(self.timeout, self.station.split(request)).await {
                Ok(response) => response,
                Err(StationError::TicketsUsed { positions }) => {
                    let used = claims.spend_at(&positions)?;
                    if used.is_empty() {
                        machine.fail();
                        tracing::warn!(?positions, "Station named no ticket of the batch");
                        return Err(SplitError::Remote(StationError::TicketsUsed { positions }));
                    }
                    tracing::warn!(used = used.len(), attempt, "Tickets already used; retrying split");
                    spent.extend(used);
                    if let RetryDecision::Exhausted { attempts } = machine.ticket_used() {
                        tracing::warn!(attempts, "Split retry budget exhausted");
                        return Err(SplitError::AllTicketsSpent {
                            attempts,
                            spent: spent.len(),
                        });
                    }
                    continue;
                }
                Err(e) => {
                    claims.release();
                    machine.fail();
                    tracing::warn!(tickets = n, error = %e, "Split failed; tickets kept");
                    return Err(SplitError::Remote(e));
                }
            };

            let code = match check_code(&response.code, n) {
                Ok(code) => code,
                Err(e) => {
                    claims.release();
                    machine.fail();
                    tracing::warn!(tickets = n, error = %e, "Station returned an unusable code");
                    return Err(SplitError::Remote(e));
                }
            };

            let consumed = claims.consume_all()?;
            machine.succeed();
            tracing::info!(tickets = consumed, attempts = machine.attempts(), "Split tickets into a new code");
            return Ok(SplitOutcome {
                code,
                tickets_consumed: consumed,
                spent,
            });
        }
    }
}

impl std::fmt::Debug for SplitService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitService")
            .field("timeout", &self.timeout)
            .field("max_split", &self.max_split)
            .field("retry_margin", &self.retry_margin)
            .finish_non_exhaustive()
    }
}

/// The code must parse and carry exactly the tickets that were split
fn check_code(raw: &str, expected: usize) -> Result<RedemptionCode, StationError> {
    let code = RedemptionCode::parse(raw)
        .map_err(|e| StationError::Malformed(format!("split code: {e}")))?;
    if code.ticket_count() as usize != expected {
        return Err(StationError::Malformed(format!(
            "split code worth {} tickets, expected {expected}",
            code.ticket_count()
        )));
    }
    Ok(code)
}
