use crate::error::TransitionError;
use crate::ticket::TicketState;

/// Validates a ticket state transition.
///
/// Transitions only move forward: `Blinded -> Signed -> Finalized ->
/// {Consumed | Spent}`. Terminal states accept nothing.
pub fn validate_transition(from: TicketState, to: TicketState) -> Result<(), TransitionError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(TransitionError::Illegal { from, to })
    }
}

pub fn allowed_transitions(from: TicketState) -> Vec<TicketState> {
    use TicketState::*;
    match from {
        Blinded => vec![Signed],
        Signed => vec![Finalized],
        Finalized => vec![Consumed, Spent],
        Consumed => vec![],
        Spent => vec![],
    }
}

/// Whether `to` is reachable from `from` through zero or more legal steps.
///
/// Used when merging ledgers: a duplicate may only move a local ticket
/// forward, never back.
pub fn is_forward(from: TicketState, to: TicketState) -> bool {
    if from == to {
        return true;
    }
    allowed_transitions(from)
        .into_iter()
        .any(|next| is_forward(next, to))
}

fn allowed(from: TicketState, to: TicketState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use TicketState::*;

    fn any_state() -> impl Strategy<Value = TicketState> {
        prop_oneof![
            Just(Blinded),
            Just(Signed),
            Just(Finalized),
            Just(Consumed),
            Just(Spent),
        ]
    }

    #[test]
    fn test_forward_chain() {
        assert!(validate_transition(Blinded, Signed).is_ok());
        assert!(validate_transition(Signed, Finalized).is_ok());
        assert!(validate_transition(Finalized, Consumed).is_ok());
        assert!(validate_transition(Finalized, Spent).is_ok());
    }

    #[test]
    fn test_no_skips_or_regressions() {
        assert!(validate_transition(Blinded, Finalized).is_err());
        assert!(validate_transition(Consumed, Finalized).is_err());
        assert!(validate_transition(Spent, Consumed).is_err());
        assert!(validate_transition(Consumed, Spent).is_err());
    }

    #[test]
    fn test_is_forward() {
        assert!(is_forward(Blinded, Spent));
        assert!(is_forward(Finalized, Finalized));
        assert!(!is_forward(Spent, Finalized));
        assert!(!is_forward(Consumed, Spent));
    }

    proptest! {
        #[test]
        fn prop_transitions_match_allowed(from in any_state(), to in any_state()) {
            let res = validate_transition(from, to);
            let allowed = allowed_transitions(from);
            prop_assert_eq!(res.is_ok(), allowed.contains(&to));
        }

        #[test]
        fn prop_transitions_never_regress(from in any_state(), to in any_state()) {
            if validate_transition(from, to).is_ok() {
                prop_assert!(to.rank() > from.rank());
                prop_assert!(!is_forward(to, from));
            }
        }
    }
}
