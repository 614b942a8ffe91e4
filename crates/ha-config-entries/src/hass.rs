//! Handle to the host services an integration talks to

use std::sync::Arc;

use crate::entry::{ConfigEntry, ConfigEntryUpdate};
use crate::manager::{ConfigEntries, ConfigEntriesResult};
use crate::platform::{InMemoryPlatformHost, PlatformHost};
use crate::services::ServiceRegistry;

/// Cheap to clone; every clone refers to the same host.
#[derive(Clone)]
pub struct Hass {
    pub config_entries: Arc<ConfigEntries>,
    pub services: Arc<ServiceRegistry>,
    pub platforms: Arc<dyn PlatformHost>,
}

impl Hass {
    pub fn new(config_entries: ConfigEntries, platforms: Arc<dyn PlatformHost>) -> Self {
        Self {
            config_entries: Arc::new(config_entries),
            services: Arc::new(ServiceRegistry::new()),
            platforms,
        }
    }

    /// Host without persistence, returning the platform host for inspection
    pub fn in_memory() -> (Self, Arc<InMemoryPlatformHost>) {
        let platforms = Arc::new(InMemoryPlatformHost::new());
        let hass = Self::new(ConfigEntries::in_memory(), platforms.clone());
        (hass, platforms)
    }

    /// Set up an entry. Returns true when it ended up loaded.
    pub async fn setup(&self, entry_id: &str) -> ConfigEntriesResult<bool> {
        self.config_entries.setup(self, entry_id).await
    }

    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        self.config_entries.unload(self, entry_id).await
    }

    pub async fn reload(&self, entry_id: &str) -> ConfigEntriesResult<bool> {
        self.config_entries.reload(self, entry_id).await
    }

    pub async fn update_entry(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        self.config_entries.update(entry_id, update).await
    }
}
