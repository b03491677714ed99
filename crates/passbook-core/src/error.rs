//! Error types for Passbook
//!
//! Every error falls into one of four classes:
//! - Validation: bad input, rejected before any I/O
//! - Conflict: a ticket was already spent elsewhere
//! - Remote: the station or the network failed
//! - Storage: local persistence failed

use crate::ids::TicketId;
use crate::ticket::TicketState;
use std::time::Duration;

/// Broad error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Validation,
    Conflict,
    Remote,
    Storage,
}

/// Illegal ticket state transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("illegal ticket transition {from} -> {to}")]
    Illegal { from: TicketState, to: TicketState },
}

/// Redemption code parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("redemption code must be {expected} characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid character {ch:?} at position {position}")]
    InvalidCharacter { ch: char, position: usize },

    #[error("redemption code is worth zero tickets")]
    ZeroCount,

    #[error("ticket count {count} outside 1..={max}")]
    CountOutOfRange { count: u32, max: u32 },
}

/// Blinding primitive errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlindError {
    #[error("bytes do not encode a group element")]
    InvalidPoint,

    #[error("group element is the identity")]
    IdentityPoint,

    #[error("bytes do not encode a valid signing key")]
    InvalidScalar,
}

/// Ledger and persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The persistence backend failed (I/O, quota)
    #[error("storage backend failed: {0}")]
    Backend(String),

    /// Persisted data could not be encoded or decoded
    #[error("ledger serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persisted data decoded but is not a valid ledger
    #[error("ledger is corrupt: {0}")]
    Corrupt(String),

    #[error("unknown ticket {0:?}")]
    UnknownTicket(TicketId),

    #[error("ticket {id:?} is {state}, not ready")]
    TicketNotReady { id: TicketId, state: TicketState },

    #[error("ticket {0:?} is already claimed by another operation")]
    TicketClaimed(TicketId),

    #[error("invalid ticket {id:?}: {reason}")]
    InvalidTicket { id: TicketId, reason: String },

    #[error("only {available} ready tickets, {requested} requested")]
    InsufficientTickets { requested: usize, available: usize },

    #[error("{claimed} tickets are in flight; transfer refused")]
    TransferBlocked { claimed: usize },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl StoreError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Backend(_) | Self::Serialization(_) | Self::Corrupt(_) => ErrorClass::Storage,
            _ => ErrorClass::Validation,
        }
    }
}

/// Errors reported by (or while talking to) the issuing station
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StationError {
    /// The ticket was already redeemed (another device or tab won the race)
    #[error("ticket already used")]
    TicketUsed,

    /// Some tickets of a batch were already redeemed; positions index the request
    #[error("{} ticket(s) in the batch already used", positions.len())]
    TicketsUsed { positions: Vec<usize> },

    /// The station refused the request (invalid or already-used code, bad ticket)
    #[error("station rejected request: {0}")]
    Rejected(String),

    #[error("rate limited by station")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("station error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed station response: {0}")]
    Malformed(String),

    /// No response in time; the outcome is unknown
    #[error("station did not respond within {0:?}")]
    Timeout(Duration),
}

impl StationError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::TicketUsed | Self::TicketsUsed { .. } => ErrorClass::Conflict,
            _ => ErrorClass::Remote,
        }
    }

    /// Whether the station refused because a ticket was already spent
    #[inline]
    #[must_use]
    pub fn is_ticket_conflict(&self) -> bool {
        matches!(self, Self::TicketUsed | Self::TicketsUsed { .. })
    }

    /// Whether the outcome of the remote call is unknown
    #[inline]
    #[must_use]
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Network(_) | Self::Malformed(_))
    }

    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Network(_) | Self::RateLimited { .. } | Self::Server { .. }
        )
    }
}

/// Redemption (minting) errors
#[derive(Debug, thiserror::Error)]
pub enum RedeemError {
    #[error("invalid redemption code: {0}")]
    InvalidCode(#[from] CodeError),

    #[error("code rejected by station: {0}")]
    RemoteRejected(String),

    #[error("redemption failed: {0}")]
    Network(StationError),

    #[error("station returned an unusable signature: {0}")]
    Unblind(#[from] BlindError),

    #[error("failed to store minted tickets: {0}")]
    Storage(#[from] StoreError),

    #[error("redemption cancelled")]
    Cancelled,
}

impl From<StationError> for RedeemError {
    fn from(err: StationError) -> Self {
        match err {
            StationError::Rejected(reason) => Self::RemoteRejected(reason),
            StationError::TicketUsed | StationError::TicketsUsed { .. } => {
                Self::RemoteRejected("code already used".to_string())
            }
            other => Self::Network(other),
        }
    }
}

impl RedeemError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidCode(_) | Self::Cancelled => ErrorClass::Validation,
            Self::RemoteRejected(_) | Self::Unblind(_) => ErrorClass::Remote,
            Self::Network(e) => e.class(),
            Self::Storage(e) => e.class(),
        }
    }
}

/// Access exchange errors
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("no tickets available")]
    NoTicketsAvailable,

    /// Every attempted ticket was reported as already used
    #[error("all tickets spent after {attempts} attempts")]
    AllTicketsSpent { attempts: u32 },

    #[error("ticket {id:?} cannot be exchanged: {reason}")]
    TicketUnavailable { id: TicketId, reason: String },

    #[error("access exchange failed: {0}")]
    Remote(StationError),

    #[error("ledger update failed: {0}")]
    Storage(#[from] StoreError),

    #[error("access request cancelled")]
    Cancelled,
}

impl AccessError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NoTicketsAvailable | Self::TicketUnavailable { .. } | Self::Cancelled => {
                ErrorClass::Validation
            }
            Self::AllTicketsSpent { .. } => ErrorClass::Conflict,
            Self::Remote(e) => e.class(),
            Self::Storage(e) => e.class(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote(e) if e.is_retryable())
    }
}

/// Split errors
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("cannot split {requested} tickets (allowed 1..={max})")]
    InvalidCount { requested: usize, max: usize },

    #[error("split failed: {0}")]
    Remote(StationError),

    /// Tickets kept being reported as used until the retry budget ran out
    #[error("split abandoned after {attempts} attempts; {spent} stale tickets archived")]
    AllTicketsSpent { attempts: u32, spent: usize },

    #[error("ledger update failed: {0}")]
    Storage(#[from] StoreError),

    #[error("split cancelled")]
    Cancelled,
}

impl SplitError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidCount { .. } | Self::Cancelled => ErrorClass::Validation,
            Self::AllTicketsSpent { .. } => ErrorClass::Conflict,
            Self::Remote(e) => e.class(),
            Self::Storage(e) => e.class(),
        }
    }
}

/// Credential lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("credential {0} is not tracked")]
    UnknownCredential(String),

    #[error("renewal failed: {0}")]
    Renewal(#[from] AccessError),

    #[error("credential persistence failed: {0}")]
    Storage(#[from] StoreError),
}

impl LifecycleError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UnknownCredential(_) => ErrorClass::Validation,
            Self::Renewal(e) => e.class(),
            Self::Storage(e) => e.class(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main Passbook error type
#[derive(Debug, thiserror::Error)]
pub enum PassbookError {
    #[error(transparent)]
    Redeem(#[from] RedeemError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PassbookError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Redeem(e) => e.class(),
            Self::Access(e) => e.class(),
            Self::Split(e) => e.class(),
            Self::Lifecycle(e) => e.class(),
            Self::Store(e) => e.class(),
            Self::Config(_) => ErrorClass::Validation,
        }
    }
}
