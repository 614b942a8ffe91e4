//! Host with the Plugwise integration registered against mock clients

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ha_config_entries::{ConfigEntry, ConfigEntryState, Hass, InMemoryPlatformHost};
use ha_plugwise::constants::{CONF_HOST, CONF_PASSWORD, CONF_USB_PATH};
use ha_plugwise::{
    ClientFactory, GatewayConfig, PlugwiseIntegration, SmileApi, StickApi, DOMAIN,
};
use serde_json::json;

use super::{load_smile_fixture, load_stick_fixture, MockSmile, MockStick};

/// Hands out the same mocks for every entry and records what it was asked for
pub struct MockFactory {
    pub smile: Arc<MockSmile>,
    pub stick: Arc<MockStick>,
    smile_requests: Mutex<Vec<(GatewayConfig, Duration)>>,
    stick_requests: Mutex<Vec<String>>,
}

impl MockFactory {
    pub fn new(smile: MockSmile, stick: MockStick) -> Self {
        Self {
            smile: Arc::new(smile),
            stick: Arc::new(stick),
            smile_requests: Mutex::new(Vec::new()),
            stick_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn smile_requests(&self) -> Vec<(GatewayConfig, Duration)> {
        self.smile_requests.lock().unwrap().clone()
    }

    pub fn stick_requests(&self) -> Vec<String> {
        self.stick_requests.lock().unwrap().clone()
    }
}

impl ClientFactory for MockFactory {
    fn smile(&self, config: &GatewayConfig, timeout: Duration) -> Arc<dyn SmileApi> {
        self.smile_requests
            .lock()
            .unwrap()
            .push((config.clone(), timeout));
        self.smile.clone()
    }

    fn stick(&self, usb_path: &str) -> Arc<dyn StickApi> {
        self.stick_requests.lock().unwrap().push(usb_path.to_string());
        self.stick.clone()
    }
}

/// An isolated host with the integration registered
pub struct TestPlugwise {
    pub hass: Hass,
    pub platforms: Arc<InMemoryPlatformHost>,
    pub integration: Arc<PlugwiseIntegration>,
    pub factory: Arc<MockFactory>,
}

impl TestPlugwise {
    /// Smile replaying `smile_fixture`; the stick serves `stick.json`
    pub fn new(smile_fixture: &str) -> Self {
        let factory = Arc::new(MockFactory::new(
            MockSmile::new(load_smile_fixture(smile_fixture)),
            MockStick::new(load_stick_fixture("stick.json")),
        ));
        let (hass, platforms) = Hass::in_memory();
        let integration = PlugwiseIntegration::register(&hass, factory.clone());
        Self {
            hass,
            platforms,
            integration,
            factory,
        }
    }

    pub fn smile(&self) -> &MockSmile {
        &self.factory.smile
    }

    pub fn stick(&self) -> &MockStick {
        &self.factory.stick
    }

    /// Add an entry and set it up, returning its id
    pub async fn init_integration(&self, entry: ConfigEntry) -> String {
        let entry = self.hass.config_entries.add(entry).await.unwrap();
        self.hass.setup(&entry.entry_id).await.unwrap();
        entry.entry_id
    }

    pub fn entry(&self, entry_id: &str) -> ConfigEntry {
        self.hass.config_entries.get(entry_id).unwrap()
    }

    pub fn entry_state(&self, entry_id: &str) -> ConfigEntryState {
        self.entry(entry_id).state
    }

    /// Current value of an entity, `None` when it has no state
    pub fn value(&self, unique_id: &str) -> Option<serde_json::Value> {
        self.platforms.state(unique_id).map(|s| s.value)
    }

    pub fn is_available(&self, unique_id: &str) -> bool {
        self.platforms
            .state(unique_id)
            .map(|s| s.available)
            .unwrap_or(false)
    }
}

/// Gateway entry as created before the username was configurable
pub fn gateway_entry() -> ConfigEntry {
    ConfigEntry::new(DOMAIN, "Smile Adam")
        .with_data_value(CONF_HOST, json!("1.1.1.1"))
        .with_data_value(CONF_PASSWORD, json!("test-password"))
}

pub fn usb_entry() -> ConfigEntry {
    ConfigEntry::new(DOMAIN, "Stick").with_data_value(CONF_USB_PATH, json!("/dev/ttyUSB0"))
}

/// Install a test subscriber so failures show the integration's logs
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ha_plugwise=debug,ha_config_entries=debug")
        .with_test_writer()
        .try_init();
}
