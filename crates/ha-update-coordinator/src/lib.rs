//! Data update coordination for polling integrations
//!
//! A [`DataUpdateCoordinator`] owns one remote endpoint's cached state. It
//! fetches on a timer and on debounced request, never runs two fetches at
//! once, classifies failures, and notifies listeners with a shared snapshot
//! after each successful fetch.
//!
//! # Key Types
//!
//! - [`Fetcher`] - Performs one remote retrieval
//! - [`DataUpdateCoordinator`] - Timer, snapshot, failure state, listeners
//! - [`Debouncer`] - Trailing-edge debounce used by `refresh_now`
//! - [`ListenerHandle`] - Removable listener registration
//! - [`UpdateFailed`] / [`FailureKind`] - Classified fetch failures

pub mod coordinator;
pub mod debounce;
pub mod error;
pub mod listener;
pub mod state;

pub use coordinator::{
    DataUpdateCoordinator, FailureObserver, FailureState, Fetcher, RefreshOutcome, RefreshTrigger,
};
pub use debounce::Debouncer;
pub use error::{CoordinatorError, FailureKind, UpdateFailed};
pub use listener::{ListenerHandle, ListenerId, ListenerSet};
pub use state::{CoordinatorState, InvalidTransition};
