//! Ticket record and lifecycle states

use crate::blind::{BlindedRequest, FinalizedTicket, SignedResponse};
use crate::error::TransitionError;
use crate::ids::TicketId;
use crate::state_machine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ticket lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    /// Blinded request generated locally, not yet signed
    Blinded,
    /// Station signature received, not yet unblinded
    Signed,
    /// Unblinded and ready to spend
    Finalized,
    /// Exchanged by this client (credential or split)
    Consumed,
    /// Reported as already used by the station
    Spent,
}

impl TicketState {
    /// Position along the forward chain
    #[inline]
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Blinded => 0,
            Self::Signed => 1,
            Self::Finalized => 2,
            Self::Consumed | Self::Spent => 3,
        }
    }

    /// Usable for exchange
    #[inline]
    #[must_use]
    pub fn is_ready(self) -> bool {
        self == Self::Finalized
    }

    /// Consumed or spent
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Consumed | Self::Spent)
    }

    /// Still inside the minting protocol
    #[inline]
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Blinded | Self::Signed)
    }
}

impl std::fmt::Display for TicketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Blinded => "blinded",
            Self::Signed => "signed",
            Self::Finalized => "finalized",
            Self::Consumed => "consumed",
            Self::Spent => "spent",
        };
        f.write_str(s)
    }
}

/// A blindly-signed ticket
///
/// Fields the ledger does not recognise are kept in `extra` and written
/// back unchanged, so ledgers produced by newer clients survive a round
/// trip through older ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub blinded_request: BlindedRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_response: Option<SignedResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_ticket: Option<FinalizedTicket>,
    pub state: TicketState,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Ticket {
    /// Ticket fresh out of the blinding step
    #[must_use]
    pub fn blinded(id: TicketId, blinded_request: BlindedRequest) -> Self {
        Self {
            id,
            blinded_request,
            signed_response: None,
            finalized_ticket: None,
            state: TicketState::Blinded,
            extra: Map::new(),
        }
    }

    /// Record the station's signature (`Blinded -> Signed`)
    pub fn record_signature(&mut self, response: SignedResponse) -> Result<(), TransitionError> {
        self.transition(TicketState::Signed)?;
        self.signed_response = Some(response);
        Ok(())
    }

    /// Record the unblinded ticket (`Signed -> Finalized`)
    pub fn finalize(&mut self, finalized: FinalizedTicket) -> Result<(), TransitionError> {
        self.transition(TicketState::Finalized)?;
        self.finalized_ticket = Some(finalized);
        Ok(())
    }

    /// Apply a single legal transition
    pub fn transition(&mut self, to: TicketState) -> Result<(), TransitionError> {
        state_machine::validate_transition(self.state, to)?;
        self.state = to;
        Ok(())
    }

    /// Check the record is internally consistent for its state
    pub fn check_consistency(&self) -> Result<(), String> {
        if self.state.rank() >= TicketState::Signed.rank() && self.signed_response.is_none() {
            return Err(format!("{} ticket has no signed response", self.state));
        }
        if self.state.rank() >= TicketState::Finalized.rank() {
            let finalized = self
                .finalized_ticket
                .as_ref()
                .ok_or_else(|| format!("{} ticket has no finalized material", self.state))?;
            if TicketId::from_nonce(&finalized.nonce) != self.id {
                return Err("ticket id does not match its nonce".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blind::{IssuerKey, PendingBlind};
    use rand::rngs::OsRng;

    fn finalized_ticket() -> Ticket {
        let issuer = IssuerKey::generate(&mut OsRng);
        let pending = PendingBlind::generate(&mut OsRng);
        let mut ticket = Ticket::blinded(pending.ticket_id(), pending.request());
        let signed = issuer.sign(&pending.request()).unwrap();
        ticket.record_signature(signed).unwrap();
        ticket.finalize(pending.unblind(&signed).unwrap()).unwrap();
        ticket
    }

    #[test]
    fn ticket_walks_forward() {
        let mut ticket = finalized_ticket();
        assert!(ticket.state.is_ready());
        assert!(ticket.check_consistency().is_ok());

        ticket.transition(TicketState::Consumed).unwrap();
        assert!(ticket.state.is_terminal());
        assert!(ticket.transition(TicketState::Finalized).is_err());
        assert!(ticket.transition(TicketState::Spent).is_err());
    }

    #[test]
    fn unknown_fields_survive_roundtrip() {
        let ticket = finalized_ticket();
        let mut json = serde_json::to_value(&ticket).unwrap();
        json.as_object_mut()
            .unwrap()
            .insert("issued_by".into(), Value::String("station-7".into()));

        let parsed: Ticket = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.extra.get("issued_by"), Some(&Value::String("station-7".into())));

        let again = serde_json::to_value(&parsed).unwrap();
        assert_eq!(again["issued_by"], "station-7");
    }

    #[test]
    fn inconsistent_ticket_detected() {
        let mut ticket = finalized_ticket();
        ticket.finalized_ticket = None;
        assert!(ticket.check_consistency().is_err());
    }
}
