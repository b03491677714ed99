//! Passbook Core - tickets, credentials and redemption codes
//!
//! The vocabulary shared by every layer of the ticket ledger:
//! - Ticket identifiers, states and the forward-only state machine
//! - The local blind/unblind primitive used to mint tickets
//! - Redemption codes (24-character bundles of ticket value)
//! - Ephemeral access credentials
//! - The error taxonomy and configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use passbook_core::prelude::*;
//!
//! let code = RedemptionCode::parse("7QK3-M9XW-PZ2R-HT4B-N8VD-CJ05")?;
//! assert_eq!(code.ticket_count(), 5);
//! ```

#![allow(missing_docs)]

pub mod blind;
pub mod clock;
pub mod code;
pub mod config;
pub mod credential;
pub mod error;
pub mod ids;
pub mod progress;
pub mod state_machine;
pub mod ticket;

pub use blind::{BlindedRequest, BlindingFactor, FinalizedTicket, IssuerKey, PendingBlind, SignedResponse};
pub use clock::{Clock, SystemClock};
pub use code::RedemptionCode;
pub use config::PassbookConfig;
pub use credential::{AccessCredential, CredentialInfo, CredentialStatus};
pub use error::{
    AccessError, BlindError, CodeError, ConfigError, ErrorClass, LifecycleError, PassbookError,
    RedeemError, SplitError, StationError, StoreError, TransitionError,
};
pub use ids::{SessionId, TicketId};
pub use progress::{NoProgress, ProgressObserver, ProgressReporter};
pub use ticket::{Ticket, TicketState};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Passbook types
    pub use crate::{
        AccessCredential, Clock, CredentialStatus, ErrorClass, PassbookConfig, PassbookError,
        ProgressObserver, RedemptionCode, SessionId, Ticket, TicketId, TicketState,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
