//! Constants for the Plugwise integration

use std::time::Duration;

use ha_config_entries::Platform;

pub const DOMAIN: &str = "plugwise";
pub const MANUFACTURER: &str = "Plugwise";

// Config entry data keys
pub const CONF_HOST: &str = "host";
pub const CONF_PASSWORD: &str = "password";
pub const CONF_USERNAME: &str = "username";
pub const CONF_USB_PATH: &str = "usb_path";

// Config entry option keys
pub const CONF_SCAN_INTERVAL: &str = "scan_interval";
pub const CONF_UNAVAILABLE_AFTER: &str = "unavailable_after";

pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_USERNAME: &str = "smile";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Quiet period before a requested refresh, giving the Smile time to
/// process a command before it is polled again
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(1500);

/// Consecutive failed polls before entities report unavailable
pub const DEFAULT_UNAVAILABLE_AFTER: u32 = 3;

/// Legacy Smile firmware that reports no usable hostname
pub const LEGACY_FIRMWARE: &str = "1.8.0";

pub const GATEWAY_PLATFORMS: &[Platform] = &[
    Platform::BinarySensor,
    Platform::Climate,
    Platform::Sensor,
    Platform::Switch,
];
/// Platforms for gateways without a master thermostat (P1, Stretch)
pub const SENSOR_PLATFORMS: &[Platform] = &[Platform::Sensor, Platform::Switch];
pub const USB_PLATFORMS: &[Platform] =
    &[Platform::BinarySensor, Platform::Sensor, Platform::Switch];

// Services
pub const SERVICE_DELETE_NOTIFICATION: &str = "delete_notification";
pub const SERVICE_DEVICE_ADD: &str = "device_add";
pub const SERVICE_DEVICE_REMOVE: &str = "device_remove";
pub const ATTR_MAC_ADDRESS: &str = "mac";

// USB node features
pub const USB_RELAY_ID: &str = "relay";
pub const USB_MOTION_ID: &str = "motion";

pub const NEW_DEVICE_TITLE: &str = "New Plugwise device";
