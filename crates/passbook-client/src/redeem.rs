//! Redemption: minting tickets from a code
//!
//! Three phases per code:
//! 1. **Blind** one fresh nonce per ticket the code is worth
//! 2. **Sign** the whole batch at the station in one call
//! 3. **Unblind** every response locally
//!
//! Tickets enter the ledger only after every unblind succeeds, and in a
//! single write. A failure anywhere leaves the ledger untouched.

use crate::cancel::CancelToken;
use crate::deadline::with_deadline;
use crate::station::{SignRequest, Station};
use passbook_core::{
    PendingBlind, ProgressObserver, ProgressReporter, RedeemError, RedemptionCode, StationError,
    StoreError, Ticket,
};
use passbook_store::TokenStore;
use rand::rngs::OsRng;
use std::sync::Arc;
use std::time::Duration;

/// Result of a successful redemption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeemOutcome {
    pub tickets_issued: usize,
}

/// Drives the blind → sign → unblind protocol
pub struct BlindExchangeClient {
    station: Arc<dyn Station>,
    store: Arc<TokenStore>,
    timeout: Duration,
}

impl BlindExchangeClient {
    #[must_use]
    pub fn new(station: Arc<dyn Station>, store: Arc<TokenStore>) -> Self {
        Self {
            station,
            store,
            timeout: Duration::from_secs(30),
        }
    }

    /// With station call timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Redeem `code`, reporting progress to `progress`
    pub async fn redeem(
        &self,
        code: &str,
        progress: &dyn ProgressObserver,
    ) -> Result<RedeemOutcome, RedeemError> {
        self.redeem_with_cancel(code, progress, &CancelToken::new())
            .await
    }

    /// Redeem `code`, giving up before the station call if `cancel` fires
    ///
    /// Once the station has signed, the code is spent remotely, so the
    /// minted tickets are always stored even if cancellation arrives late.
    pub async fn redeem_with_cancel(
        &self,
        code: &str,
        progress: &dyn ProgressObserver,
        cancel: &CancelToken,
    ) -> Result<RedeemOutcome, RedeemError> {
        let mut reporter = ProgressReporter::new(progress);
        let result = self.run(code, &mut reporter, cancel).await;
        match &result {
            Ok(outcome) => {
                reporter.complete(&format!("Added {} tickets", outcome.tickets_issued));
                tracing::info!(tickets = outcome.tickets_issued, "Redeemed code");
            }
            Err(e) => {
                reporter.fail();
                tracing::warn!(error = %e, "Redemption failed");
            }
        }
        result
    }

    async fn run(
        &self,
        input: &str,
        reporter: &mut ProgressReporter<'_>,
        cancel: &CancelToken,
    ) -> Result<RedeemOutcome, RedeemError> {
        reporter.report("Checking code", 0);
        let code = RedemptionCode::parse(input)?;
        let count = code.ticket_count() as usize;

        reporter.report("Preparing tickets", 5);
        let pending: Vec<PendingBlind> = (0..count)
            .map(|_| PendingBlind::generate(&mut OsRng))
            .collect();
        let request = SignRequest {
            code,
            blinded_requests: pending.iter().map(PendingBlind::request).collect(),
        };

        if cancel.is_cancelled() {
            return Err(RedeemError::Cancelled);
        }

        reporter.report("Requesting signatures", 20);
        tracing::debug!(tickets = count, "Submitting blinded batch");
        let response = with_deadline(self.timeout, self.station.sign(request)).await?;

        if response.signed_responses.len() != count {
            return Err(StationError::Malformed(format!(
                "expected {count} signatures, got {}",
                response.signed_responses.len()
            ))
            .into());
        }

        reporter.report("Finalizing tickets", 70);
        let mut tickets = Vec::with_capacity(count);
        for (slot, signed) in pending.iter().zip(&response.signed_responses) {
            let finalized = slot.unblind(signed)?;
            let mut ticket = Ticket::blinded(slot.ticket_id(), slot.request());
            ticket.record_signature(*signed).map_err(StoreError::from)?;
            ticket.finalize(finalized).map_err(StoreError::from)?;
            tickets.push(ticket);
        }

        reporter.report("Saving tickets", 90);
        let outcome = self.store.add(tickets)?;
        if outcome.duplicates > 0 {
            tracing::warn!(duplicates = outcome.duplicates, "Minted tickets already in ledger");
        }

        Ok(RedeemOutcome {
            tickets_issued: outcome.added,
        })
    }
}

impl std::fmt::Debug for BlindExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlindExchangeClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
