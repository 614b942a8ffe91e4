//! Typed views of Plugwise config entry data and options

use std::time::Duration;

use ha_config_entries::ConfigEntry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::constants::{
    CONF_HOST, CONF_USB_PATH, DEFAULT_PORT, DEFAULT_UNAVAILABLE_AFTER, DEFAULT_USERNAME,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("entry has neither a host nor a USB path")]
    NoConnection,

    #[error("invalid entry data: {0}")]
    InvalidData(#[from] serde_json::Error),
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_unavailable_after() -> u32 {
    DEFAULT_UNAVAILABLE_AFTER
}

/// Connection settings for a Smile gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub password: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Connection settings for a USB stick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbConfig {
    pub usb_path: String,
}

/// How an entry reaches its devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionConfig {
    Gateway(GatewayConfig),
    Usb(UsbConfig),
}

impl ConnectionConfig {
    /// Pick the connection strategy from entry data; `host` wins over `usb_path`.
    pub fn from_entry(entry: &ConfigEntry) -> Result<Self, ConfigError> {
        if entry.data_str(CONF_HOST).is_some() {
            return Ok(ConnectionConfig::Gateway(entry.data_as()?));
        }
        if entry.data_str(CONF_USB_PATH).is_some() {
            return Ok(ConnectionConfig::Usb(entry.data_as()?));
        }
        Err(ConfigError::NoConnection)
    }
}

/// Options editable after setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlugwiseOptions {
    /// Polling interval in seconds
    #[serde(default)]
    pub scan_interval: Option<u64>,
    #[serde(default = "default_unavailable_after")]
    pub unavailable_after: u32,
}

impl Default for PlugwiseOptions {
    fn default() -> Self {
        Self {
            scan_interval: None,
            unavailable_after: DEFAULT_UNAVAILABLE_AFTER,
        }
    }
}

impl PlugwiseOptions {
    /// Parse the entry's options, falling back to defaults when malformed
    pub fn from_entry(entry: &ConfigEntry) -> Self {
        entry.options_as().unwrap_or_else(|err| {
            warn!(entry_id = %entry.entry_id, error = %err, "Ignoring invalid Plugwise options");
            Self::default()
        })
    }

    /// Configured interval, or `default` when unset or zero
    pub fn scan_interval_or(&self, default: Duration) -> Duration {
        match self.scan_interval {
            Some(seconds) if seconds > 0 => Duration::from_secs(seconds),
            _ => default,
        }
    }

    /// Failures tolerated before entities go unavailable, at least one
    pub fn unavailable_after(&self) -> u32 {
        self.unavailable_after.max(1)
    }
}
