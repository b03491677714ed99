//! Passbook Store - the local ticket ledger
//!
//! Provides durable, all-or-nothing storage for:
//! - The ticket ledger (`TokenStore`)
//! - Per-session credential references (`CredentialVault`)
//!
//! Both sit on a small key-value persistence port so the same ledger runs
//! against browser storage, a directory of files, or memory in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use passbook_store::{FileStore, TokenStore};
//! use std::sync::Arc;
//!
//! let backend = Arc::new(FileStore::open("~/.passbook")?);
//! let store = TokenStore::open(backend)?;
//!
//! let counts = store.count();
//! println!("{} ready, {} archived", counts.active, counts.archived);
//! ```

#![allow(missing_docs)]

pub mod backend;
pub mod claim;
pub mod file;
pub mod snapshot;
pub mod token_store;
pub mod transfer;
pub mod vault;

pub use backend::{KeyValueStore, MemoryStore, CREDENTIALS_KEY, LEDGER_KEY};
pub use claim::{ClaimSet, TicketClaim};
pub use file::FileStore;
pub use snapshot::{LedgerExport, LedgerSnapshot, LEDGER_FORMAT_VERSION};
pub use token_store::{AddOutcome, ImportSummary, LedgerCount, TokenStore};
pub use transfer::VaultTransfer;
pub use vault::{CredentialSnapshot, CredentialVault, SessionBinding};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
