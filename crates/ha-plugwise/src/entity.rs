//! Entities backed by a Smile coordinator

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use ha_config_entries::{EntityRecord, EntityState, Platform, PlatformHost};
use ha_update_coordinator::{FailureState, ListenerHandle};
use serde_json::{json, Value};
use tracing::debug;

use crate::api::{DeviceData, PlugwiseData, PlugwiseError};
use crate::coordinator::PlugwiseCoordinator;
use crate::models::{PlugwiseEntityDescription, PW_NOTIFICATION};

/// What an entity shows of its device
#[derive(Debug, Clone, Copy)]
pub enum EntityKind {
    Described(&'static PlugwiseEntityDescription),
    /// Thermostat of a climate zone
    Climate,
}

impl EntityKind {
    pub fn platform(&self) -> Platform {
        match self {
            EntityKind::Described(desc) => desc.platform,
            EntityKind::Climate => Platform::Climate,
        }
    }
}

/// One entity of one Smile device.
///
/// Availability: the device is in the latest snapshot and fewer than
/// `unavailable_after` polls in a row have failed.
pub struct SmileEntity {
    device_id: String,
    kind: EntityKind,
    record: EntityRecord,
    coordinator: PlugwiseCoordinator,
    platforms: Arc<dyn PlatformHost>,
    unavailable_after: Arc<AtomicU32>,
    listener: Mutex<Option<ListenerHandle>>,
}

impl SmileEntity {
    pub fn new(
        device_id: impl Into<String>,
        kind: EntityKind,
        record: EntityRecord,
        coordinator: PlugwiseCoordinator,
        platforms: Arc<dyn PlatformHost>,
        unavailable_after: Arc<AtomicU32>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            kind,
            record,
            coordinator,
            platforms,
            unavailable_after,
            listener: Mutex::new(None),
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.record.unique_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn platform(&self) -> Platform {
        self.kind.platform()
    }

    pub fn record(&self) -> &EntityRecord {
        &self.record
    }

    /// Subscribe to the coordinator and publish the current state
    pub fn added(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = self.coordinator.add_listener(move |data: &Arc<PlugwiseData>| {
            if let Some(entity) = weak.upgrade() {
                entity.publish(data, entity.coordinator.failure_state().consecutive_failures);
            }
            Ok(())
        });

        if let Ok(mut listener) = self.listener.lock() {
            if let Some(previous) = listener.replace(handle) {
                previous.remove();
            }
        }
        self.write_state();
    }

    /// Stop following the coordinator
    pub fn removed(&self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.remove();
            }
        }
    }

    /// Re-publish after a failed poll so availability follows the failure count
    pub fn failure_changed(&self, failures: &FailureState) {
        if let Some(data) = self.coordinator.get_snapshot() {
            self.publish(&data, failures.consecutive_failures);
        }
    }

    pub fn write_state(&self) {
        self.platforms.write_state(self.unique_id(), self.state());
    }

    pub fn state(&self) -> EntityState {
        match self.coordinator.get_snapshot() {
            Some(data) => self.render(&data, self.coordinator.failure_state().consecutive_failures),
            None => EntityState::unavailable(),
        }
    }

    pub fn available(&self) -> bool {
        self.state().available
    }

    fn publish(&self, data: &PlugwiseData, failures: u32) {
        self.platforms.write_state(self.unique_id(), self.render(data, failures));
    }

    fn render(&self, data: &PlugwiseData, failures: u32) -> EntityState {
        let Some(device) = data.devices.get(&self.device_id) else {
            debug!(unique_id = %self.unique_id(), "Device missing from Plugwise data");
            return EntityState::unavailable();
        };
        let available = failures < self.unavailable_after.load(Ordering::SeqCst);

        match self.kind {
            EntityKind::Described(desc) => match desc.platform {
                Platform::Sensor => EntityState::new(
                    device.sensors.get(desc.key).cloned().unwrap_or(Value::Null),
                    available,
                ),
                Platform::Switch => {
                    EntityState::new(on_off(device.switches.get(desc.key)), available)
                }
                Platform::BinarySensor => {
                    let is_on = device.binary_sensors.get(desc.key).copied();
                    let mut state = EntityState::new(on_off(is_on.as_ref()), available);
                    let icon = if is_on == Some(false) { desc.icon_off } else { desc.icon };
                    if let Some(icon) = icon {
                        state.attributes.insert("icon".into(), json!(icon));
                    }
                    if desc.key == PW_NOTIFICATION {
                        state.attributes.extend(notification_attributes(data));
                    }
                    state
                }
                Platform::Climate => EntityState::new(Value::Null, available),
            },
            EntityKind::Climate => climate_state(device, available),
        }
    }

    pub async fn turn_on(&self) -> Result<(), PlugwiseError> {
        self.set_switch(true).await
    }

    pub async fn turn_off(&self) -> Result<(), PlugwiseError> {
        self.set_switch(false).await
    }

    async fn set_switch(&self, on: bool) -> Result<(), PlugwiseError> {
        let EntityKind::Described(desc) = self.kind else {
            return Err(PlugwiseError::UnsupportedCommand(self.unique_id().to_string()));
        };
        if desc.platform != Platform::Switch {
            return Err(PlugwiseError::UnsupportedCommand(self.unique_id().to_string()));
        }

        self.coordinator
            .fetcher()
            .api()
            .set_switch_state(&self.device_id, desc.key, on)
            .await?;
        self.coordinator.refresh_now();
        Ok(())
    }

    pub async fn set_temperature(&self, setpoint: f64) -> Result<(), PlugwiseError> {
        if !matches!(self.kind, EntityKind::Climate) {
            return Err(PlugwiseError::UnsupportedCommand(self.unique_id().to_string()));
        }

        self.coordinator
            .fetcher()
            .api()
            .set_temperature(&self.device_id, setpoint)
            .await?;
        self.coordinator.refresh_now();
        Ok(())
    }
}

impl Drop for SmileEntity {
    fn drop(&mut self) {
        self.removed();
    }
}

fn on_off(value: Option<&bool>) -> Value {
    match value {
        Some(true) => json!("on"),
        Some(false) => json!("off"),
        None => Value::Null,
    }
}

/// `<severity>_msg` lists built from the gateway's notifications
fn notification_attributes(data: &PlugwiseData) -> HashMap<String, Value> {
    let mut by_severity: HashMap<String, Vec<String>> = HashMap::new();
    let mut ids: Vec<&String> = data.gateway.notifications.keys().collect();
    ids.sort();
    for id in ids {
        for (severity, message) in &data.gateway.notifications[id] {
            by_severity
                .entry(format!("{}_msg", severity.to_lowercase()))
                .or_default()
                .push(message.clone());
        }
    }
    by_severity
        .into_iter()
        .map(|(key, messages)| (key, json!(messages)))
        .collect()
}

fn climate_state(device: &DeviceData, available: bool) -> EntityState {
    let current = device.sensors.get("temperature").cloned().unwrap_or(Value::Null);
    let mut state = EntityState::new(current, available);
    if let Some(thermostat) = &device.thermostat {
        state.attributes.insert("temperature".into(), json!(thermostat.setpoint));
        state.attributes.insert("min_temp".into(), json!(thermostat.lower_bound));
        state.attributes.insert("max_temp".into(), json!(thermostat.upper_bound));
        state.attributes.insert("target_temp_step".into(), json!(thermostat.resolution));
    }
    state
}
