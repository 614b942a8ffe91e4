//! Config Entries
//!
//! This crate provides the configuration entry system for Home Assistant.
//! Config entries represent individual integration instances and manage
//! their lifecycle (setup, unload, reload).
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - A single integration configuration
//! - [`ConfigEntryState`] - Lifecycle state of an entry
//! - [`ConfigEntries`] - Manager for all config entries
//! - [`ConfigEntryHandler`] - Hooks an integration registers for its domain
//! - [`Hass`] - What a handler receives: entries, services and platforms
//!
//! # Storage
//!
//! Config entries are persisted in `.storage/core.config_entries` with
//! version tracking for migrations.

pub mod entry;
pub mod handler;
pub mod hass;
pub mod manager;
pub mod platform;
pub mod services;
pub mod state_machine;
pub mod store;

// Re-export main types
pub use entry::{
    ConfigEntry, ConfigEntryDisabledBy, ConfigEntrySource, ConfigEntryState, ConfigEntryUpdate,
};
pub use handler::{ConfigEntryHandler, SetupError, UnloadError};
pub use hass::Hass;
pub use manager::{
    ConfigEntries, ConfigEntriesError, ConfigEntriesResult, UpdateListener, UpdateListenerHandle,
};
pub use platform::{
    DeviceIdentifier, DeviceInfo, EntityRecord, EntityState, InMemoryPlatformHost, Platform,
    PlatformHost,
};
pub use services::{ServiceCall, ServiceError, ServiceRegistry, ServiceResult};
pub use state_machine::{calculate_retry_delay, InvalidTransition};
pub use store::{EntryStore, StorageError, STORAGE_KEY, STORAGE_MINOR_VERSION, STORAGE_VERSION};
