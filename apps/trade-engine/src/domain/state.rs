//! Trade lifecycle state machine.
//!
//! Every state mutation in the orchestrators goes through
//! [`assert_transition`] before anything is persisted. An invalid
//! transition is a programming-logic error, not a recoverable runtime
//! condition: callers propagate it instead of swallowing it.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`crate::domain::trade::Trade`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeState {
    /// Trade record exists; nothing submitted yet.
    Created,
    /// A swap transaction has been submitted, confirmation pending.
    Submitted,
    /// Entry confirmed on-chain; position is open.
    Confirmed,
    /// Position exited; terminal.
    Closed,
    /// Execution failed; terminal.
    Failed,
    /// Entry abandoned before opening a position; terminal.
    Canceled,
}

impl TradeState {
    /// States reachable from `self` in one step.
    #[must_use]
    pub const fn allowed_transitions(self) -> &'static [Self] {
        match self {
            Self::Created => &[Self::Submitted, Self::Failed, Self::Canceled],
            Self::Submitted => &[Self::Confirmed, Self::Failed, Self::Canceled],
            Self::Confirmed => &[Self::Submitted, Self::Closed, Self::Failed, Self::Canceled],
            Self::Closed | Self::Failed | Self::Canceled => &[],
        }
    }

    /// Whether the state is terminal (no further transitions).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Record string, matching the persisted representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Submitted => "SUBMITTED",
            Self::Confirmed => "CONFIRMED",
            Self::Closed => "CLOSED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for TradeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State machine violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// The requested transition is not in the allowed set.
    #[error("Invalid trade state transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: TradeState,
        /// Requested state.
        to: TradeState,
    },
}

/// Whether `from -> to` is an allowed lifecycle transition.
#[must_use]
pub fn can_transition(from: TradeState, to: TradeState) -> bool {
    from.allowed_transitions().contains(&to)
}

/// Assert that `from -> to` is allowed.
pub fn assert_transition(from: TradeState, to: TradeState) -> Result<(), StateError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(StateError::InvalidTransition { from, to })
    }
}
