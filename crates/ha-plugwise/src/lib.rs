//! Plugwise integration
//!
//! Exposes Plugwise Smile gateways (Anna, Adam, P1, Stretch) and USB-stick
//! Zigbee networks (Circle, Scan, Sense) as entities.
//!
//! # Key Types
//!
//! - [`PlugwiseIntegration`] - Config entry handler for the `plugwise` domain
//! - [`ClientFactory`] - Builds the vendor clients for an entry
//! - [`GatewayRuntime`] / [`UsbRuntime`] - What a loaded entry owns
//!
//! A gateway entry is polled through a
//! [`DataUpdateCoordinator`](ha_update_coordinator::DataUpdateCoordinator);
//! a USB-stick entry is pushed to by the stick's own update callbacks.

pub mod api;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod entity;
pub mod gateway;
pub mod models;
pub mod usb;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ha_config_entries::{ConfigEntry, ConfigEntryHandler, Hass, SetupError, UnloadError};
use tracing::error;

pub use api::{
    ClientFactory, DeviceData, GatewayData, PlugwiseData, PlugwiseError, SmileApi, SmileInfo,
    SmileType, StickApi, StickNode,
};
pub use config::{ConnectionConfig, GatewayConfig, PlugwiseOptions, UsbConfig};
pub use constants::DOMAIN;
pub use coordinator::{PlugwiseCoordinator, SmileFetcher};
pub use entity::{EntityKind, SmileEntity};
pub use gateway::GatewayRuntime;
pub use usb::{StickEntity, UsbRuntime};

/// Runtime data of a loaded entry, by connection strategy
#[derive(Clone)]
pub enum RuntimeData {
    Gateway(GatewayRuntime),
    Usb(UsbRuntime),
}

/// Config entry handler for the `plugwise` domain
pub struct PlugwiseIntegration {
    factory: Arc<dyn ClientFactory>,
    runtime: Arc<DashMap<String, RuntimeData>>,
}

impl PlugwiseIntegration {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            runtime: Arc::new(DashMap::new()),
        }
    }

    /// Create the integration and register it with the host
    pub fn register(hass: &Hass, factory: Arc<dyn ClientFactory>) -> Arc<Self> {
        let integration = Arc::new(Self::new(factory));
        hass.config_entries
            .register_handler(DOMAIN, integration.clone());
        integration
    }

    pub fn runtime(&self, entry_id: &str) -> Option<RuntimeData> {
        self.runtime.get(entry_id).map(|r| r.value().clone())
    }

    pub fn gateway(&self, entry_id: &str) -> Option<GatewayRuntime> {
        match self.runtime(entry_id)? {
            RuntimeData::Gateway(gateway) => Some(gateway),
            RuntimeData::Usb(_) => None,
        }
    }

    pub fn stick(&self, entry_id: &str) -> Option<UsbRuntime> {
        match self.runtime(entry_id)? {
            RuntimeData::Usb(usb) => Some(usb),
            RuntimeData::Gateway(_) => None,
        }
    }

    /// Number of entries currently holding runtime data
    pub fn loaded_entries(&self) -> usize {
        self.runtime.len()
    }
}

#[async_trait]
impl ConfigEntryHandler for PlugwiseIntegration {
    async fn setup_entry(&self, hass: &Hass, entry: &ConfigEntry) -> Result<(), SetupError> {
        let connection = ConnectionConfig::from_entry(entry).map_err(|err| {
            error!(entry_id = %entry.entry_id, error = %err, "Cannot set up Plugwise entry");
            SetupError::failed(err.to_string())
        })?;

        match connection {
            ConnectionConfig::Gateway(config) => {
                gateway::setup_entry(hass, entry, config, &self.factory, &self.runtime).await
            }
            ConnectionConfig::Usb(config) => {
                usb::setup_entry(hass, entry, config, &self.factory, &self.runtime).await
            }
        }
    }

    async fn unload_entry(&self, hass: &Hass, entry: &ConfigEntry) -> Result<(), UnloadError> {
        match self.runtime(&entry.entry_id) {
            Some(RuntimeData::Gateway(runtime)) => {
                gateway::unload_entry(hass, entry, &runtime, &self.runtime).await
            }
            Some(RuntimeData::Usb(runtime)) => {
                usb::unload_entry(hass, entry, &runtime, &self.runtime).await
            }
            None => Err(UnloadError::Failed(format!(
                "no runtime data for entry {}",
                entry.entry_id
            ))),
        }
    }
}
