//! Config Entry State Machine
//!
//! ```text
//! NotLoaded → SetupInProgress → Loaded
//!                            ↘ SetupError → SetupInProgress (manual retry)
//!                            ↘ SetupRetry → SetupInProgress (scheduled retry)
//!                            ↘ MigrationError (terminal)
//!
//! Loaded/SetupError/SetupRetry → UnloadInProgress → NotLoaded
//!                                                 ↘ FailedUnload (terminal)
//! ```

use std::time::Duration;

use crate::entry::ConfigEntryState;
use thiserror::Error;

/// Error when an invalid state transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid state transition from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: ConfigEntryState,
    pub to: ConfigEntryState,
    pub reason: &'static str,
}

impl ConfigEntryState {
    /// Attempt a transition to a new state.
    pub fn try_transition(
        self,
        to: ConfigEntryState,
    ) -> Result<ConfigEntryState, InvalidTransition> {
        use ConfigEntryState::*;

        let valid = match (self, to) {
            (NotLoaded | SetupError | SetupRetry, SetupInProgress) => true,
            (SetupInProgress, Loaded | SetupError | SetupRetry | MigrationError) => true,
            (Loaded | SetupError | SetupRetry, UnloadInProgress) => true,
            (UnloadInProgress, NotLoaded | FailedUnload) => true,
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
    pub fn can_transition_to(self, to: ConfigEntryState) -> bool {
        self.try_transition(to).is_ok()
    }

    /// State an entry lands in after its integration's setup returned
    pub fn after_setup(result: &Result<(), crate::handler::SetupError>) -> ConfigEntryState {
        match result {
            Ok(()) => ConfigEntryState::Loaded,
            Err(err) if err.is_retryable() => ConfigEntryState::SetupRetry,
            Err(_) => ConfigEntryState::SetupError,
        }
    }

    fn transition_error_reason(from: ConfigEntryState, to: ConfigEntryState) -> &'static str {
        use ConfigEntryState::*;

        match (from, to) {
            (MigrationError, _) => "MigrationError is terminal - entry cannot recover",
            (FailedUnload, _) => "FailedUnload is terminal - entry cannot recover",
            (SetupInProgress, _) => "Setup in progress - wait for it to finish",
            (UnloadInProgress, _) => "Unload in progress - wait for it to finish",
            (Loaded, SetupInProgress) => "Already loaded - unload first before re-setup",
            (NotLoaded, _) => "Entry is not loaded - set it up first",
            _ => "Invalid state transition",
        }
    }
}

/// Delay before the next scheduled setup retry.
///
/// `2^min(tries, 4) * 5` seconds plus up to 100ms of jitter, giving
/// 5s, 10s, 20s, 40s, 80s and then 80s forever.
pub fn calculate_retry_delay(tries: u32) -> Duration {
    let base = Duration::from_secs(u64::from(2_u32.pow(tries.min(4)) * 5));
    let jitter = Duration::from_millis(rand::random::<u64>() % 100);
    base + jitter
}
