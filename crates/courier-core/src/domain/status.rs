//! Request status state machine.

use serde::{Deserialize, Serialize};

use super::errors::CourierError;

/// Lifecycle status of a request.
///
/// State transitions:
/// - Pending -> Claimed (a worker wins the claim)
/// - Claimed -> Completed (claim holder reports success)
/// - Claimed -> Failed (permanent failure, or retry budget exhausted)
/// - Claimed -> Pending (lease expiry / explicit release, back into the pool)
///
/// Completed and Failed are terminal. The set is closed: there are no
/// other states, and the only way to change status is through
/// `check_transition` at the store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Submitted, waiting to be claimed.
    Pending,

    /// Exclusively held by one worker under a lease.
    Claimed,

    /// Processed successfully. Terminal.
    Completed,

    /// Failed permanently. Terminal.
    Failed,
}

impl RequestStatus {
    /// Is this a terminal status (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }

    /// Is this request eligible for a claim?
    pub fn is_claimable(self) -> bool {
        matches!(self, RequestStatus::Pending)
    }

    /// Is `next` a legal transition out of this status?
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Pending, Claimed) | (Claimed, Completed) | (Claimed, Failed) | (Claimed, Pending)
        )
    }
}

/// Validate a status transition, rejecting anything outside the table.
pub fn check_transition(from: RequestStatus, to: RequestStatus) -> Result<(), CourierError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(CourierError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::RequestStatus::*;
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Pending, Claimed)]
    #[case(Claimed, Completed)]
    #[case(Claimed, Failed)]
    #[case(Claimed, Pending)]
    fn legal_transitions_pass(#[case] from: RequestStatus, #[case] to: RequestStatus) {
        check_transition(from, to).unwrap();
    }

    #[rstest]
    #[case(Pending, Completed)]
    #[case(Pending, Failed)]
    #[case(Pending, Pending)]
    #[case(Claimed, Claimed)]
    #[case(Completed, Pending)]
    #[case(Completed, Claimed)]
    #[case(Completed, Failed)]
    #[case(Completed, Completed)]
    #[case(Failed, Pending)]
    #[case(Failed, Claimed)]
    #[case(Failed, Completed)]
    #[case(Failed, Failed)]
    fn illegal_transitions_are_rejected(#[case] from: RequestStatus, #[case] to: RequestStatus) {
        let err = check_transition(from, to).unwrap_err();
        assert!(matches!(
            err,
            CourierError::InvalidTransition { from: f, to: t } if f == from && t == to
        ));
    }

    #[test]
    fn terminal_and_claimable_flags() {
        assert!(Completed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Pending.is_terminal());
        assert!(!Claimed.is_terminal());

        assert!(Pending.is_claimable());
        assert!(!Claimed.is_claimable());
        assert!(!Completed.is_claimable());
        assert!(!Failed.is_claimable());
    }

    #[test]
    fn status_serializes_as_text() {
        assert_eq!(serde_json::to_string(&Pending).unwrap(), "\"Pending\"");
        assert_eq!(serde_json::to_string(&Claimed).unwrap(), "\"Claimed\"");
        assert_eq!(serde_json::to_string(&Completed).unwrap(), "\"Completed\"");
        assert_eq!(serde_json::to_string(&Failed).unwrap(), "\"Failed\"");
    }
}
