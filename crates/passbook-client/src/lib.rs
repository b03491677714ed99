//! Passbook Client - the ticket protocol against an issuing station
//!
//! Four services sit on top of the ledger:
//! - [`BlindExchangeClient`] mints tickets from a redemption code
//! - [`AccessBroker`] exchanges a ticket for an access credential
//! - [`SplitService`] folds tickets into a shareable code
//! - [`CredentialLifecycle`] tracks expiry, renewal and session sharing
//!
//! All remote calls go through the [`Station`] port; [`HttpStation`] is
//! the production implementation.
//!
//! # Example
//!
//! ```rust,ignore
//! use passbook_client::{AccessParams, Passbook};
//! use passbook_core::{NoProgress, PassbookConfig, SessionId};
//!
//! let passbook = Passbook::open(PassbookConfig::load("passbook.toml".as_ref())?)?;
//! passbook.redeem("7QK3-M9XW-PZ2R-HT4B-N8VD-CJ05", &NoProgress).await?;
//! let (credential, _) = passbook.request_access(AccessParams::new(SessionId::new())).await?;
//! ```

#![allow(missing_docs)]

pub mod broker;
pub mod cancel;
mod deadline;
pub mod http;
pub mod lifecycle;
pub mod passbook;
pub mod redeem;
pub mod split;
pub mod station;

pub use broker::{
    AccessBroker, AccessGrant, AccessParams, ExchangeMachine, ExchangePhase, RetryDecision,
    DEFAULT_RETRY_MARGIN,
};
pub use cancel::CancelToken;
pub use http::HttpStation;
pub use lifecycle::{CredentialLifecycle, CredentialView, LifecycleEvent};
pub use passbook::Passbook;
pub use redeem::{BlindExchangeClient, RedeemOutcome};
pub use split::{SplitOutcome, SplitService};
pub use station::{
    ExchangeRequest, ExchangeResponse, SignRequest, SignResponse, SplitRequest, SplitResponse,
    Station,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
