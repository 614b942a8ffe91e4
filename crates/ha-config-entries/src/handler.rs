//! Integration hooks called by the config entries manager

use async_trait::async_trait;
use thiserror::Error;

use crate::entry::ConfigEntry;
use crate::hass::Hass;

/// Why an integration could not set up an entry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    /// Transient; the manager schedules a retry with backoff
    #[error("not ready: {0}")]
    NotReady(String),

    /// Credentials rejected; needs user action
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Permanent failure
    #[error("setup failed: {0}")]
    Failed(String),
}

impl SetupError {
    pub fn not_ready(reason: impl Into<String>) -> Self {
        SetupError::NotReady(reason.into())
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        SetupError::Failed(reason.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SetupError::NotReady(_))
    }
}

/// Why an integration could not unload an entry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UnloadError {
    #[error("platforms could not be unloaded for {0}")]
    Platforms(String),

    #[error("unload failed: {0}")]
    Failed(String),
}

/// Lifecycle hooks an integration registers for its domain
#[async_trait]
pub trait ConfigEntryHandler: Send + Sync {
    async fn setup_entry(&self, hass: &Hass, entry: &ConfigEntry) -> Result<(), SetupError>;

    async fn unload_entry(&self, hass: &Hass, entry: &ConfigEntry) -> Result<(), UnloadError>;
}
