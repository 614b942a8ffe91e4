//! Config Entry types
//!
//! A ConfigEntry represents a single instance of an integration's configuration.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Config entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    /// Initial state, not yet set up
    #[default]
    NotLoaded,
    /// Integration setup is running
    SetupInProgress,
    /// Successfully set up
    Loaded,
    /// Setup failed and will not be retried automatically
    SetupError,
    /// Setup failed transiently; a retry is scheduled
    SetupRetry,
    /// Version migration failed (terminal)
    MigrationError,
    /// Integration unload is running
    UnloadInProgress,
    /// Unload failed (terminal)
    FailedUnload,
}

impl ConfigEntryState {
    /// Check if the entry can be unloaded/reloaded from this state
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConfigEntryState::Loaded
                | ConfigEntryState::SetupError
                | ConfigEntryState::SetupRetry
                | ConfigEntryState::NotLoaded
        )
    }
}

/// Source of the config entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntrySource {
    /// Configured via UI/API
    #[default]
    User,
    /// Imported from YAML config
    Import,
    /// mDNS/Bonjour discovery
    Zeroconf,
    /// USB device discovery
    Usb,
    /// Re-authentication flow
    Reauth,
}

/// Reason an entry was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryDisabledBy {
    User,
}

/// A configuration entry for an integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Unique identifier (ULID)
    pub entry_id: String,

    /// Integration domain (e.g., "plugwise")
    pub domain: String,

    /// Human-readable display name
    pub title: String,

    /// Connection data entered when the entry was created
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,

    /// User-configurable options
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,

    #[serde(default = "default_version")]
    pub version: u32,

    /// Optional unique identifier for duplicate prevention
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    #[serde(default)]
    pub source: ConfigEntrySource,

    /// Current lifecycle state (not persisted)
    #[serde(skip, default)]
    pub state: ConfigEntryState,

    /// Human-readable explanation for failed states (not persisted)
    #[serde(skip, default)]
    pub reason: Option<String>,

    /// Number of setup retry attempts (not persisted)
    #[serde(skip, default)]
    pub tries: u32,

    /// Do not create entities for newly discovered devices
    #[serde(default)]
    pub pref_disable_new_entities: bool,

    /// Disable background polling
    #[serde(default)]
    pub pref_disable_polling: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<ConfigEntryDisabledBy>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl ConfigEntry {
    /// Create a new config entry
    pub fn new(domain: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            data: HashMap::new(),
            options: HashMap::new(),
            version: 1,
            unique_id: None,
            source: ConfigEntrySource::User,
            state: ConfigEntryState::NotLoaded,
            reason: None,
            tries: 0,
            pref_disable_new_entities: false,
            pref_disable_polling: false,
            disabled_by: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_data(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        self.data = data;
        self
    }

    /// Set a single data value
    pub fn with_data_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_options(mut self, options: HashMap<String, serde_json::Value>) -> Self {
        self.options = options;
        self
    }

    /// Set a single option
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    pub fn with_source(mut self, source: ConfigEntrySource) -> Self {
        self.source = source;
        self
    }

    pub fn with_pref_disable_new_entities(mut self, disable: bool) -> Self {
        self.pref_disable_new_entities = disable;
        self
    }

    pub fn with_pref_disable_polling(mut self, disable: bool) -> Self {
        self.pref_disable_polling = disable;
        self
    }

    /// Deserialize `data` into a typed configuration
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(&self.data)?)
    }

    /// Deserialize `options` into a typed configuration
    pub fn options_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(&self.options)?)
    }

    /// A data value as a non-empty string
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ConfigEntryState::Loaded
    }
}

/// Update data for a config entry
#[derive(Debug, Default)]
pub struct ConfigEntryUpdate {
    pub title: Option<String>,
    pub data: Option<HashMap<String, serde_json::Value>>,
    pub options: Option<HashMap<String, serde_json::Value>>,
    pub unique_id: Option<Option<String>>,
    pub pref_disable_new_entities: Option<bool>,
    pub pref_disable_polling: Option<bool>,
}

impl ConfigEntryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn data(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn options(mut self, options: HashMap<String, serde_json::Value>) -> Self {
        self.options = Some(options);
        self
    }

    pub fn unique_id(mut self, unique_id: Option<String>) -> Self {
        self.unique_id = Some(unique_id);
        self
    }

    pub fn pref_disable_new_entities(mut self, disable: bool) -> Self {
        self.pref_disable_new_entities = Some(disable);
        self
    }

    pub fn pref_disable_polling(mut self, disable: bool) -> Self {
        self.pref_disable_polling = Some(disable);
        self
    }

    /// Whether applying this update to `entry` changes anything update
    /// listeners care about
    pub fn changes_options_of(&self, entry: &ConfigEntry) -> bool {
        self.options.as_ref().is_some_and(|o| *o != entry.options)
            || self.pref_disable_new_entities.is_some_and(|p| p != entry.pref_disable_new_entities)
            || self.pref_disable_polling.is_some_and(|p| p != entry.pref_disable_polling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct HostData {
        host: String,
        #[serde(default = "default_port")]
        port: u16,
    }

    fn default_port() -> u16 {
        80
    }

    #[test]
    fn test_config_entry_new() {
        let entry = ConfigEntry::new("plugwise", "Smile Adam");
        assert_eq!(entry.domain, "plugwise");
        assert_eq!(entry.state, ConfigEntryState::NotLoaded);
        assert_eq!(entry.version, 1);
        assert!(!entry.entry_id.is_empty());
    }

    #[test]
    fn test_data_as_typed_config() {
        let entry = ConfigEntry::new("plugwise", "Smile").with_data_value("host", json!("1.1.1.1"));

        let data: HostData = entry.data_as().unwrap();
        assert_eq!(
            data,
            HostData {
                host: "1.1.1.1".into(),
                port: 80
            }
        );
    }

    #[test]
    fn test_data_str_skips_empty() {
        let entry = ConfigEntry::new("plugwise", "Smile")
            .with_data_value("host", json!(""))
            .with_data_value("usb_path", json!("/dev/ttyUSB0"));

        assert_eq!(entry.data_str("host"), None);
        assert_eq!(entry.data_str("usb_path"), Some("/dev/ttyUSB0"));
        assert_eq!(entry.data_str("missing"), None);
    }

    #[test]
    fn test_state_recoverable() {
        assert!(ConfigEntryState::NotLoaded.is_recoverable());
        assert!(ConfigEntryState::Loaded.is_recoverable());
        assert!(ConfigEntryState::SetupError.is_recoverable());
        assert!(ConfigEntryState::SetupRetry.is_recoverable());

        assert!(!ConfigEntryState::SetupInProgress.is_recoverable());
        assert!(!ConfigEntryState::MigrationError.is_recoverable());
        assert!(!ConfigEntryState::UnloadInProgress.is_recoverable());
        assert!(!ConfigEntryState::FailedUnload.is_recoverable());
    }

    #[test]
    fn test_options_change_detection() {
        let entry = ConfigEntry::new("plugwise", "Smile").with_option("scan_interval", json!(60));

        let same = ConfigEntryUpdate::new().options(entry.options.clone());
        assert!(!same.changes_options_of(&entry));

        let mut options = entry.options.clone();
        options.insert("scan_interval".into(), json!(30));
        assert!(ConfigEntryUpdate::new().options(options).changes_options_of(&entry));

        assert!(!ConfigEntryUpdate::new().title("renamed").changes_options_of(&entry));

        let polling_off = ConfigEntryUpdate::new().pref_disable_polling(true);
        assert!(polling_off.changes_options_of(&entry));
        let unchanged = ConfigEntryUpdate::new().pref_disable_polling(false);
        assert!(!unchanged.changes_options_of(&entry));
    }

    #[test]
    fn test_runtime_fields_not_persisted() {
        let mut entry = ConfigEntry::new("plugwise", "Stick").with_source(ConfigEntrySource::Usb);
        entry.state = ConfigEntryState::Loaded;
        entry.tries = 3;

        let json = serde_json::to_string(&entry).unwrap();
        let parsed: ConfigEntry = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.source, ConfigEntrySource::Usb);
        assert_eq!(parsed.state, ConfigEntryState::NotLoaded);
        assert_eq!(parsed.tries, 0);
    }
}
