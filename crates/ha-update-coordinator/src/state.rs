//! Coordinator lifecycle state machine
//!
//! ```text
//! Uninitialized → Ready → Ready (each refresh)
//!       ↘           ↘
//!        Stopped ←───┘   (terminal)
//! ```

use thiserror::Error;

/// Lifecycle state of a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinatorState {
    /// Created, first refresh not yet attempted
    #[default]
    Uninitialized,
    /// First refresh attempted; timer may be armed
    Ready,
    /// Torn down (terminal)
    Stopped,
}

/// Error when an invalid state transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid coordinator transition from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: CoordinatorState,
    pub to: CoordinatorState,
    pub reason: &'static str,
}

impl CoordinatorState {
    /// Attempt a transition to a new state.
    pub fn try_transition(
        self,
        to: CoordinatorState,
    ) -> Result<CoordinatorState, InvalidTransition> {
        use CoordinatorState::*;

        let valid = match (self, to) {
            (Uninitialized, Ready) => true,
            (Ready, Ready) => true,
            (Uninitialized, Stopped) => true,
            (Ready, Stopped) => true,
            (Stopped, _) => false,
            _ => false,
        };

        if valid {
            Ok(to)
        } else {
            Err(InvalidTransition {
                from: self,
                to,
                reason: Self::transition_error_reason(self, to),
            })
        }
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition_to(self, to: CoordinatorState) -> bool {
        self.try_transition(to).is_ok()
    }

    pub fn is_stopped(self) -> bool {
        self == CoordinatorState::Stopped
    }

    fn transition_error_reason(from: CoordinatorState, to: CoordinatorState) -> &'static str {
        use CoordinatorState::*;

        match (from, to) {
            (Stopped, _) => "Stopped is terminal - coordinator cannot restart",
            (Ready, Uninitialized) => "Cannot forget the first refresh",
            (Uninitialized, Uninitialized) => "Already uninitialized",
            _ => "Invalid state transition",
        }
    }
}
