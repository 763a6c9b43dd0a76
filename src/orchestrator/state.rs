use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one target within a run.
///
/// ```text
/// Pending -> Authenticating -> Discovering -> Acting -> Done
///    \              \               \            \
///     +--------------+---------------+------------+--> Aborted
/// ```
///
/// `Done` and `Aborted` are terminal. Transitions only move forward;
/// `Discovering -> Done` is allowed when there is nothing left to do today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Pending,
    Authenticating,
    Discovering,
    Acting,
    Done,
    Aborted,
}

impl TargetState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TargetState::Done | TargetState::Aborted)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(&self, next: TargetState) -> bool {
        use TargetState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Aborted)
                | (Pending, Authenticating)
                | (Authenticating, Discovering)
                | (Discovering, Acting)
                | (Discovering, Done)
                | (Acting, Done)
        )
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetState::Pending => "pending",
            TargetState::Authenticating => "authenticating",
            TargetState::Discovering => "discovering",
            TargetState::Acting => "acting",
            TargetState::Done => "done",
            TargetState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}
