//! Issuing station port
//!
//! The station is the remote counterpart for all three protocol calls.
//! Implementations map transport and server failures onto
//! [`StationError`]; in particular a ticket the station has already seen
//! must surface as [`StationError::TicketUsed`] so the broker can retry.
//! Batch calls (split) report [`StationError::TicketsUsed`] with the
//! request positions of the offending tickets.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use passbook_core::{
    BlindedRequest, CredentialInfo, FinalizedTicket, RedemptionCode, SignedResponse, StationError,
};
use serde::{Deserialize, Serialize};

/// Blind-sign a batch of requests against a redemption code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignRequest {
    pub code: RedemptionCode,
    pub blinded_requests: Vec<BlindedRequest>,
}

/// One signature per request, in request order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignResponse {
    pub signed_responses: Vec<SignedResponse>,
}

/// Spend a ticket for an access credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRequest {
    pub ticket: FinalizedTicket,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeResponse {
    pub token: String,
    pub info: CredentialInfo,
    pub expires_at: DateTime<Utc>,
}

/// Fold tickets into one redemption code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRequest {
    pub tickets: Vec<FinalizedTicket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitResponse {
    /// Kept as a raw string; the client validates it before trusting it
    pub code: String,
}

/// Remote issuing station
#[async_trait]
pub trait Station: Send + Sync {
    /// Sign every blinded request; all-or-nothing
    async fn sign(&self, request: SignRequest) -> Result<SignResponse, StationError>;

    /// Exchange one finalized ticket for a credential
    async fn exchange(&self, request: ExchangeRequest) -> Result<ExchangeResponse, StationError>;

    /// Exchange finalized tickets for a new redemption code
    async fn split(&self, request: SplitRequest) -> Result<SplitResponse, StationError>;
}
