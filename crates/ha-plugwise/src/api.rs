//! Vendor client seams
//!
//! The Smile gateway speaks XML over HTTP and the USB stick drives a Zigbee
//! network over a serial port. Both protocols live in external clients; this
//! module defines what the integration needs from them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ha_update_coordinator::FailureKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GatewayConfig;

/// Errors raised by the vendor clients
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlugwiseError {
    #[error("invalid username or Smile ID")]
    InvalidAuthentication,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("no XML data received")]
    XmlDataMissing,

    #[error("invalid XML: {0}")]
    InvalidXml(String),

    #[error("unexpected response: {0}")]
    ResponseError(String),

    #[error("timeout")]
    Timeout,

    #[error("serial port error: {0}")]
    Port(String),

    #[error("USB-stick initialization failed")]
    StickInit,

    #[error("Zigbee network down")]
    NetworkDown,

    #[error("Circle+ node unreachable")]
    CirclePlus,

    #[error("{0} does not support this command")]
    UnsupportedCommand(String),
}

impl PlugwiseError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            PlugwiseError::InvalidAuthentication => FailureKind::Authentication,
            PlugwiseError::Timeout => FailureKind::Timeout,
            PlugwiseError::XmlDataMissing => FailureKind::DataMissing,
            PlugwiseError::InvalidXml(_)
            | PlugwiseError::ResponseError(_)
            | PlugwiseError::UnsupportedCommand(_) => FailureKind::Protocol,
            PlugwiseError::ConnectionFailed(_)
            | PlugwiseError::Port(_)
            | PlugwiseError::StickInit
            | PlugwiseError::NetworkDown
            | PlugwiseError::CirclePlus => FailureKind::Connectivity,
        }
    }
}

/// Product line of a Smile, which decides the default poll rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmileType {
    /// Anna / Adam climate gateways
    Thermostat,
    /// P1 energy meter
    Power,
    /// Stretch plug hub
    Stretch,
}

impl SmileType {
    pub fn default_scan_interval(&self) -> Duration {
        match self {
            SmileType::Power => Duration::from_secs(10),
            SmileType::Stretch | SmileType::Thermostat => Duration::from_secs(60),
        }
    }
}

/// What the Smile reported about itself while connecting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmileInfo {
    pub name: Option<String>,
    pub hostname: String,
    pub version: String,
    pub smile_type: SmileType,
}

/// Gateway-level attributes from one poll
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayData {
    pub gateway_id: String,
    #[serde(default)]
    pub smile_name: String,
    #[serde(default)]
    pub heater_id: Option<String>,
    /// Absent on gateways without a master thermostat
    #[serde(default)]
    pub single_master_thermostat: Option<bool>,
    /// Notification id -> severity -> message
    #[serde(default)]
    pub notifications: HashMap<String, HashMap<String, String>>,
}

/// Thermostat capabilities of a climate device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermostatData {
    pub setpoint: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub resolution: f64,
}

/// One appliance or zone from a poll
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceData {
    pub name: String,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(default)]
    pub sensors: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub binary_sensors: HashMap<String, bool>,
    #[serde(default)]
    pub switches: HashMap<String, bool>,
    #[serde(default)]
    pub thermostat: Option<ThermostatData>,
}

/// Result of one Smile poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlugwiseData {
    pub gateway: GatewayData,
    pub devices: HashMap<String, DeviceData>,
}

/// Async client for a Smile gateway
#[async_trait]
pub trait SmileApi: Send + Sync + 'static {
    /// Returns false when the gateway answered but is not usable yet
    async fn connect(&self) -> Result<bool, PlugwiseError>;

    /// Only meaningful after a successful `connect`
    fn info(&self) -> SmileInfo;

    async fn update(&self) -> Result<PlugwiseData, PlugwiseError>;

    async fn delete_notification(&self) -> Result<(), PlugwiseError>;

    async fn set_switch_state(
        &self,
        device_id: &str,
        switch: &str,
        on: bool,
    ) -> Result<(), PlugwiseError>;

    async fn set_temperature(&self, device_id: &str, setpoint: f64) -> Result<(), PlugwiseError>;
}

/// A node discovered on the stick's Zigbee network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StickNode {
    pub mac: String,
    pub hardware_model: String,
    pub firmware_version: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default = "available_by_default")]
    pub available: bool,
    /// Latest reading per feature key
    #[serde(default)]
    pub values: HashMap<String, serde_json::Value>,
}

fn available_by_default() -> bool {
    true
}

impl StickNode {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    /// Last five characters of the MAC, used in display names
    pub fn short_mac(&self) -> &str {
        let start = self.mac.len().saturating_sub(5);
        self.mac.get(start..).unwrap_or(&self.mac)
    }
}

/// Called with the MAC of a node whose state changed or that asked to join
pub type NodeCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Identifies a stick callback subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Blocking client for a USB stick. Callers run it on the blocking pool.
pub trait StickApi: Send + Sync + 'static {
    fn connect(&self) -> Result<(), PlugwiseError>;
    fn initialize_stick(&self) -> Result<(), PlugwiseError>;
    fn initialize_circle_plus(&self) -> Result<(), PlugwiseError>;
    fn disconnect(&self) -> Result<(), PlugwiseError>;

    /// Discover registered nodes. Unsupported nodes are left out.
    fn scan(&self) -> Result<Vec<StickNode>, PlugwiseError>;

    /// Number of nodes registered at the Circle+
    fn joined_nodes(&self) -> usize;

    fn node(&self, mac: &str) -> Option<StickNode>;

    /// Start the stick's own background polling of nodes
    fn auto_update(&self);

    fn allow_join_requests(&self, enable: bool, accept: bool);

    fn node_join(&self, mac: &str) -> Result<(), PlugwiseError>;
    fn node_unjoin(&self, mac: &str) -> Result<(), PlugwiseError>;

    fn subscribe_node_updates(&self, callback: NodeCallback) -> SubscriptionId;
    fn subscribe_join_requests(&self, callback: NodeCallback) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Builds vendor clients from entry configuration
pub trait ClientFactory: Send + Sync + 'static {
    fn smile(&self, config: &GatewayConfig, timeout: Duration) -> Arc<dyn SmileApi>;

    fn stick(&self, usb_path: &str) -> Arc<dyn StickApi>;
}
