//! Entity platforms and the host-side sink integrations forward entities to

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entry::ConfigEntry;

/// Entity platforms an integration can forward to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    BinarySensor,
    Climate,
    Sensor,
    Switch,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::BinarySensor => "binary_sensor",
            Platform::Climate => "climate",
            Platform::Sensor => "sensor",
            Platform::Switch => "switch",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (domain, id) pair identifying a device
pub type DeviceIdentifier = (String, String);

/// Device an entity belongs to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<DeviceIdentifier>,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
    /// Parent device (e.g. the gateway a thermostat talks through)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via_device: Option<DeviceIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_url: Option<String>,
}

/// Description of one entity forwarded to a platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub unique_id: String,
    pub platform: Platform,
    pub name: Option<String>,
    pub device_class: Option<String>,
    pub unit_of_measurement: Option<String>,
    pub state_class: Option<String>,
    pub entity_category: Option<String>,
    pub icon: Option<String>,
    pub enabled_default: bool,
    pub device: DeviceInfo,
}

/// Current state of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub value: serde_json::Value,
    pub available: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl EntityState {
    pub fn new(value: serde_json::Value, available: bool) -> Self {
        Self {
            value,
            available,
            attributes: HashMap::new(),
        }
    }

    pub fn unavailable() -> Self {
        Self::new(serde_json::Value::Null, false)
    }
}

/// Host extension point receiving entities, states and notifications
#[async_trait]
pub trait PlatformHost: Send + Sync {
    /// Set up the given platforms for an entry with its entities
    async fn forward_entry_setups(
        &self,
        entry: &ConfigEntry,
        platforms: &[Platform],
        entities: Vec<EntityRecord>,
    );

    /// Tear down platforms for an entry. Returns false if any failed to unload.
    async fn unload_platforms(&self, entry: &ConfigEntry, platforms: &[Platform]) -> bool;

    fn write_state(&self, unique_id: &str, state: EntityState);

    /// Show a persistent notification to the user
    fn create_notification(&self, title: &str, message: &str);

    /// Remove a device and its entities. Returns false if it was unknown.
    fn remove_device(&self, identifier: &DeviceIdentifier) -> bool;
}

struct StoredEntity {
    entry_id: String,
    record: EntityRecord,
}

/// Platform host keeping everything in memory
#[derive(Default)]
pub struct InMemoryPlatformHost {
    platforms: DashMap<String, HashSet<Platform>>,
    entities: DashMap<String, StoredEntity>,
    states: DashMap<String, EntityState>,
    devices: DashMap<DeviceIdentifier, DeviceInfo>,
    notifications: Mutex<Vec<(String, String)>>,
}

impl InMemoryPlatformHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Platforms currently set up for an entry, sorted
    pub fn loaded_platforms(&self, entry_id: &str) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self
            .platforms
            .get(entry_id)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default();
        platforms.sort();
        platforms
    }

    pub fn entity(&self, unique_id: &str) -> Option<EntityRecord> {
        self.entities.get(unique_id).map(|e| e.record.clone())
    }

    pub fn entities_for_entry(&self, entry_id: &str) -> Vec<EntityRecord> {
        let mut records: Vec<EntityRecord> = self
            .entities
            .iter()
            .filter(|e| e.entry_id == entry_id)
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));
        records
    }

    pub fn state(&self, unique_id: &str) -> Option<EntityState> {
        self.states.get(unique_id).map(|s| s.clone())
    }

    pub fn device(&self, identifier: &DeviceIdentifier) -> Option<DeviceInfo> {
        self.devices.get(identifier).map(|d| d.clone())
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notifications
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PlatformHost for InMemoryPlatformHost {
    async fn forward_entry_setups(
        &self,
        entry: &ConfigEntry,
        platforms: &[Platform],
        entities: Vec<EntityRecord>,
    ) {
        self.platforms
            .entry(entry.entry_id.clone())
            .or_default()
            .extend(platforms.iter().copied());

        for record in entities {
            if !platforms.contains(&record.platform) {
                debug!(
                    unique_id = %record.unique_id,
                    platform = %record.platform,
                    "Skipping entity for platform not set up"
                );
                continue;
            }
            for identifier in &record.device.identifiers {
                self.devices
                    .entry(identifier.clone())
                    .or_insert_with(|| record.device.clone());
            }
            self.entities.insert(
                record.unique_id.clone(),
                StoredEntity {
                    entry_id: entry.entry_id.clone(),
                    record,
                },
            );
        }

        info!(entry_id = %entry.entry_id, ?platforms, "Platforms set up");
    }

    async fn unload_platforms(&self, entry: &ConfigEntry, platforms: &[Platform]) -> bool {
        if let Some(mut loaded) = self.platforms.get_mut(&entry.entry_id) {
            loaded.retain(|p| !platforms.contains(p));
        }
        self.platforms.remove_if(&entry.entry_id, |_, loaded| loaded.is_empty());

        let removed: Vec<String> = self
            .entities
            .iter()
            .filter(|e| e.entry_id == entry.entry_id && platforms.contains(&e.record.platform))
            .map(|e| e.key().clone())
            .collect();
        for unique_id in removed {
            self.entities.remove(&unique_id);
            self.states.remove(&unique_id);
        }

        debug!(entry_id = %entry.entry_id, ?platforms, "Platforms unloaded");
        true
    }

    fn write_state(&self, unique_id: &str, state: EntityState) {
        self.states.insert(unique_id.to_string(), state);
    }

    fn create_notification(&self, title: &str, message: &str) {
        info!(title = %title, "Persistent notification");
        if let Ok(mut notifications) = self.notifications.lock() {
            notifications.push((title.to_string(), message.to_string()));
        }
    }

    fn remove_device(&self, identifier: &DeviceIdentifier) -> bool {
        if self.devices.remove(identifier).is_none() {
            return false;
        }
        self.entities
            .retain(|_, e| !e.record.device.identifiers.contains(identifier));
        true
    }
}
