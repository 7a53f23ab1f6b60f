//! Record lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a record.
///
/// ```text
/// new ──► in_flight ──► saved
///  │          │
///  └──────────┴──► error ──► in_flight   (explicit re-commit only)
/// ```
///
/// A record placeholder created by a find starts in `InFlight` and becomes
/// `Saved` once the adapter loads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Created locally, owned by a transaction, not yet submitted.
    New,
    /// Submitted to the adapter (create or find) and awaiting its callback.
    InFlight,
    /// Known to the persistence layer; owned by no transaction.
    Saved,
    /// The adapter reported a failure.
    Error,
}

impl RecordState {
    /// Whether the record has not yet been acknowledged by the adapter.
    pub const fn is_uncommitted(self) -> bool {
        !matches!(self, RecordState::Saved)
    }

    /// Whether a transition from `self` to `next` is allowed.
    pub const fn can_transition_to(self, next: RecordState) -> bool {
        matches!(
            (self, next),
            (RecordState::New, RecordState::InFlight)
                | (RecordState::New, RecordState::Error)
                | (RecordState::InFlight, RecordState::Saved)
                | (RecordState::InFlight, RecordState::Error)
                | (RecordState::Error, RecordState::InFlight)
        )
    }

    /// Short lowercase name used in logs and error messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            RecordState::New => "new",
            RecordState::InFlight => "in_flight",
            RecordState::Saved => "saved",
            RecordState::Error => "error",
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(RecordState::New.can_transition_to(RecordState::InFlight));
        assert!(RecordState::InFlight.can_transition_to(RecordState::Saved));
        assert!(RecordState::InFlight.can_transition_to(RecordState::Error));
        assert!(RecordState::Error.can_transition_to(RecordState::InFlight));
    }

    #[test]
    fn test_saved_is_terminal() {
        for next in [
            RecordState::New,
            RecordState::InFlight,
            RecordState::Error,
        ] {
            assert!(!RecordState::Saved.can_transition_to(next));
        }
        assert!(!RecordState::New.can_transition_to(RecordState::Saved));
    }

    #[test]
    fn test_display() {
        assert_eq!(RecordState::InFlight.to_string(), "in_flight");
        assert!(RecordState::New.is_uncommitted());
        assert!(!RecordState::Saved.is_uncommitted());
    }
}
