use thiserror::Error;

use crate::types::{Amount, AssetId, CircleId, ParticipantId};

/// Circle ledger errors.
///
/// None of these are retried by the ledger. Precondition violations leave state
/// untouched and emit no event; transfer failures are carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CircleError {
    #[error("participant '{0}' is already a member")]
    AlreadyMember(ParticipantId),

    #[error("circle is full ({max_members} members)")]
    CircleFull { max_members: u32 },

    #[error("attestation reference is empty")]
    InvalidAttestation,

    #[error("participant '{0}' is not a member")]
    NotMember(ParticipantId),

    #[error("participant '{participant}' already paid for cycle {cycle}")]
    AlreadyPaid {
        participant: ParticipantId,
        cycle: u64,
    },

    #[error("invalid state: {0}")]
    InvalidState(StateViolation),

    #[error("invalid circle parameters: {0}")]
    InvalidParams(String),

    #[error("'{0}' is not the circle administrator")]
    Unauthorized(ParticipantId),

    #[error("circle {0} not found")]
    CircleNotFound(CircleId),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl CircleError {
    pub fn invalid_params(reason: impl Into<String>) -> Self {
        Self::InvalidParams(reason.into())
    }

    /// True for rejections caused by caller input or circle state.
    pub fn is_precondition(&self) -> bool {
        !self.is_transfer_failure()
    }

    /// True when the asset-transfer collaborator refused the call.
    pub fn is_transfer_failure(&self) -> bool {
        matches!(self, Self::Transfer(_))
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::InvalidState(StateViolation::TransitionInFlight))
    }
}

/// Reasons a payout or nested call is refused in the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateViolation {
    #[error("circle is not full ({members}/{max_members} members)")]
    NotFull { members: u32, max_members: u32 },

    #[error("nothing collected for cycle {0}")]
    NothingCollected(u64),

    #[error("another ledger transition is in flight")]
    TransitionInFlight,

    #[error("custody balance {balance} is below the collected amount {collected}")]
    CustodyShortfall { balance: Amount, collected: Amount },
}

/// Failures reported by the asset-transfer collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("insufficient funds in '{account}': needed {needed}, available {available}")]
    InsufficientFunds {
        account: String,
        needed: Amount,
        available: Amount,
    },

    #[error("transfer rejected by '{rail}': {reason}")]
    Rejected { rail: String, reason: String },

    #[error("asset '{0}' is not supported")]
    UnsupportedAsset(AssetId),
}

impl TransferError {
    pub fn rejected(rail: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            rail: rail.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_errors_pass_through_unchanged() {
        let inner = TransferError::InsufficientFunds {
            account: "ada".into(),
            needed: 100,
            available: 40,
        };
        let err = CircleError::from(inner.clone());
        assert_eq!(err.to_string(), inner.to_string());
        assert!(err.is_transfer_failure());
        assert!(!err.is_precondition());
        assert_eq!(err, CircleError::Transfer(inner));
    }

    #[test]
    fn state_violation_display() {
        let err = CircleError::InvalidState(StateViolation::NotFull {
            members: 2,
            max_members: 5,
        });
        assert!(err.to_string().contains("2/5"));
        assert!(err.is_precondition());
        assert!(!err.is_in_flight());

        let nested = CircleError::InvalidState(StateViolation::TransitionInFlight);
        assert!(nested.is_in_flight());
        assert!(nested.to_string().contains("in flight"));
    }
}
