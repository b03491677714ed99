//! Persisted and exported ledger formats

use chrono::{DateTime, Utc};
use passbook_core::{StoreError, Ticket};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current on-disk ledger format
pub const LEDGER_FORMAT_VERSION: u32 = 1;

const EXPORT_FORMAT: &str = "passbook-ledger";

/// The full ledger as written to the persistence backend
///
/// Unknown envelope fields are kept in `extra` and written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: u32,
    pub tickets: Vec<Ticket>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LedgerSnapshot {
    #[must_use]
    pub fn new(tickets: Vec<Ticket>, extra: Map<String, Value>) -> Self {
        Self {
            version: LEDGER_FORMAT_VERSION,
            tickets,
            extra,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let snapshot: Self = serde_json::from_slice(bytes)?;
        if snapshot.version > LEDGER_FORMAT_VERSION {
            tracing::warn!(
                version = snapshot.version,
                supported = LEDGER_FORMAT_VERSION,
                "Ledger written by a newer client; unknown fields will be preserved"
            );
        }
        Ok(snapshot)
    }
}

/// Portable export of every ticket in a ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerExport {
    pub format: String,
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub tickets: Vec<Ticket>,
}

impl LedgerExport {
    #[must_use]
    pub fn new(tickets: Vec<Ticket>) -> Self {
        Self {
            format: EXPORT_FORMAT.to_string(),
            version: LEDGER_FORMAT_VERSION,
            exported_at: Utc::now(),
            tickets,
        }
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse an export; a bare JSON array of tickets is accepted too
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Payload {
            Envelope(LedgerExport),
            Bare(Vec<Ticket>),
        }

        match serde_json::from_str::<Payload>(json)? {
            Payload::Envelope(export) => {
                if export.format != EXPORT_FORMAT {
                    return Err(StoreError::Corrupt(format!(
                        "unexpected export format {:?}",
                        export.format
                    )));
                }
                Ok(export)
            }
            Payload::Bare(tickets) => Ok(Self::new(tickets)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_preserves_unknown_envelope_fields() {
        let raw = br#"{"version":2,"tickets":[],"sync_cursor":"abc"}"#;
        let snapshot = LedgerSnapshot::decode(raw).unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.extra["sync_cursor"], "abc");

        let encoded = snapshot.encode().unwrap();
        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value["sync_cursor"], "abc");
    }

    #[test]
    fn export_accepts_bare_array() {
        let export = LedgerExport::from_json("[]").unwrap();
        assert!(export.tickets.is_empty());
        assert_eq!(export.format, "passbook-ledger");
    }

    #[test]
    fn export_rejects_foreign_format() {
        let json = r#"{"format":"other","version":1,"exported_at":"2024-01-01T00:00:00Z","tickets":[]}"#;
        assert!(matches!(LedgerExport::from_json(json), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        assert!(matches!(
            LedgerSnapshot::decode(b"not json"),
            Err(StoreError::Serialization(_))
        ));
    }
}
