use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{CircleError, StateViolation};

/// In-flight flag held for the whole of a mutating ledger operation.
///
/// Set before preconditions are read and released only when the permit drops,
/// which happens after the transition has committed or been abandoned. Any call
/// that arrives in between (including one issued from inside a collaborator
/// callback) is refused instead of queued.
#[derive(Debug, Default)]
pub(crate) struct TransitionGuard {
    in_flight: AtomicBool,
}

impl TransitionGuard {
    pub(crate) fn enter(&self) -> Result<TransitionPermit<'_>, CircleError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CircleError::InvalidState(StateViolation::TransitionInFlight))?;
        Ok(TransitionPermit { guard: self })
    }

    pub(crate) fn is_held(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

#[must_use = "the guard is released as soon as the permit is dropped"]
pub(crate) struct TransitionPermit<'a> {
    guard: &'a TransitionGuard,
}

impl Drop for TransitionPermit<'_> {
    fn drop(&mut self) {
        self.guard.in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_entry_is_refused_until_release() {
        let guard = TransitionGuard::default();
        let permit = guard.enter().expect("first entry");
        assert!(guard.is_held());

        let nested = guard.enter();
        assert!(matches!(
            nested,
            Err(CircleError::InvalidState(StateViolation::TransitionInFlight))
        ));

        drop(permit);
        assert!(!guard.is_held());
        assert!(guard.enter().is_ok());
    }

    #[test]
    fn permit_is_released_on_unwind() {
        let guard = TransitionGuard::default();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _permit = guard.enter().expect("entry");
            panic!("collaborator blew up");
        }));
        assert!(outcome.is_err());
        assert!(!guard.is_held());
    }
}
