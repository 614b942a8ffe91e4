//! Smile gateway connection strategy

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use ha_config_entries::{
    ConfigEntry, ConfigEntryUpdate, DeviceInfo, EntityRecord, Hass, Platform, ServiceError,
    SetupError, UnloadError, UpdateListenerHandle,
};
use ha_update_coordinator::CoordinatorError;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::api::{ClientFactory, DeviceData, PlugwiseData, PlugwiseError, SmileApi, SmileInfo};
use crate::config::{GatewayConfig, PlugwiseOptions};
use crate::constants::{
    CONF_USERNAME, DEFAULT_COOLDOWN, DEFAULT_TIMEOUT, DEFAULT_USERNAME, DOMAIN, GATEWAY_PLATFORMS,
    LEGACY_FIRMWARE, SENSOR_PLATFORMS, SERVICE_DELETE_NOTIFICATION,
};
use crate::coordinator::{new_coordinator, PlugwiseCoordinator};
use crate::entity::{EntityKind, SmileEntity};
use crate::models::{descriptions, PlugwiseApi};
use crate::RuntimeData;

/// Everything a loaded gateway entry owns
#[derive(Clone)]
pub struct GatewayRuntime {
    pub api: Arc<dyn SmileApi>,
    pub coordinator: PlugwiseCoordinator,
    pub platforms: Vec<Platform>,
    entities: Arc<Vec<Arc<SmileEntity>>>,
    unavailable_after: Arc<AtomicU32>,
    update_listener: Arc<UpdateListenerHandle>,
}

impl GatewayRuntime {
    pub fn entities(&self) -> &[Arc<SmileEntity>] {
        &self.entities
    }

    pub fn entity(&self, unique_id: &str) -> Option<Arc<SmileEntity>> {
        self.entities
            .iter()
            .find(|e| e.unique_id() == unique_id)
            .cloned()
    }

    pub fn unavailable_after(&self) -> u32 {
        self.unavailable_after.load(Ordering::SeqCst)
    }

    /// Detach entities, stop polling and drop the options listener
    fn shutdown(&self) {
        for entity in self.entities.iter() {
            entity.removed();
        }
        self.coordinator.stop();
        self.update_listener.remove();
    }
}

#[instrument(skip_all, fields(entry_id = %entry.entry_id))]
pub(crate) async fn setup_entry(
    hass: &Hass,
    entry: &ConfigEntry,
    config: GatewayConfig,
    factory: &Arc<dyn ClientFactory>,
    runtime: &Arc<DashMap<String, RuntimeData>>,
) -> Result<(), SetupError> {
    // Entries created before the username was configurable
    if !entry.data.contains_key(CONF_USERNAME) {
        let mut data = entry.data.clone();
        data.insert(CONF_USERNAME.to_string(), json!(DEFAULT_USERNAME));
        hass.update_entry(&entry.entry_id, ConfigEntryUpdate::new().data(data))
            .await
            .map_err(|e| SetupError::failed(e.to_string()))?;
    }

    let api = factory.smile(&config, DEFAULT_TIMEOUT);
    connect(api.as_ref()).await?;
    let info = api.info();

    if entry.unique_id.is_none() && info.version != LEGACY_FIRMWARE {
        debug!(unique_id = %info.hostname, "Migrating entry to Smile hostname");
        hass.update_entry(
            &entry.entry_id,
            ConfigEntryUpdate::new().unique_id(Some(info.hostname.clone())),
        )
        .await
        .map_err(|e| SetupError::failed(e.to_string()))?;
    }

    let options = PlugwiseOptions::from_entry(entry);
    let interval = options.scan_interval_or(info.smile_type.default_scan_interval());

    let coordinator = new_coordinator(api.clone(), DEFAULT_TIMEOUT, DEFAULT_COOLDOWN);
    if let Err(err) = coordinator.request_first_refresh().await {
        coordinator.stop();
        return Err(first_refresh_error(err));
    }
    let Some(data) = coordinator.get_snapshot() else {
        coordinator.stop();
        return Err(SetupError::not_ready(format!(
            "No data received from {}",
            coordinator.name()
        )));
    };
    if entry.pref_disable_polling {
        info!("Polling disabled for this entry");
    } else {
        coordinator
            .start(interval)
            .map_err(|e| SetupError::failed(e.to_string()))?;
    }

    debug!(gateway_id = %data.gateway.gateway_id, "Gateway found");
    debug!(version = %info.version, "Gateway software version");
    debug!(
        single_master_thermostat = ?data.gateway.single_master_thermostat,
        "Single master thermostat"
    );

    let platforms: Vec<Platform> = match data.gateway.single_master_thermostat {
        Some(_) => GATEWAY_PLATFORMS.to_vec(),
        None => SENSOR_PLATFORMS.to_vec(),
    };

    let unavailable_after = Arc::new(AtomicU32::new(options.unavailable_after()));
    let entities: Arc<Vec<Arc<SmileEntity>>> = Arc::new(
        build_entities(hass, &config.host, &data, &coordinator, &unavailable_after)
            .into_iter()
            .filter(|e| platforms.contains(&e.platform()))
            .collect(),
    );

    let records = entities.iter().map(|e| e.record().clone()).collect();
    hass.platforms
        .forward_entry_setups(entry, &platforms, records)
        .await;
    for entity in entities.iter() {
        entity.added();
    }

    let observed: Weak<Vec<Arc<SmileEntity>>> = Arc::downgrade(&entities);
    coordinator.set_failure_observer(move |failures| {
        if let Some(entities) = observed.upgrade() {
            for entity in entities.iter() {
                entity.failure_changed(failures);
            }
        }
    });

    if platforms.contains(&Platform::Climate) {
        register_delete_notification(hass, api.clone(), &info);
    }

    let update_listener = Arc::new(add_options_listener(
        hass,
        entry,
        &coordinator,
        &entities,
        &unavailable_after,
        &info,
    ));

    runtime.insert(
        entry.entry_id.clone(),
        RuntimeData::Gateway(GatewayRuntime {
            api,
            coordinator,
            platforms,
            entities,
            unavailable_after,
            update_listener,
        }),
    );

    info!(smile = ?info.name, ?interval, "Plugwise gateway set up");
    Ok(())
}

async fn connect(api: &dyn SmileApi) -> Result<(), SetupError> {
    match tokio::time::timeout(DEFAULT_TIMEOUT, api.connect()).await {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => {
            error!("Unable to connect to the Smile/Stretch");
            Err(SetupError::not_ready("Unable to connect to the Smile/Stretch"))
        }
        Ok(Err(PlugwiseError::InvalidAuthentication)) => {
            error!("Invalid username or Smile ID");
            Err(SetupError::AuthFailed("Invalid username or Smile ID".into()))
        }
        Ok(Err(PlugwiseError::Timeout)) | Err(_) => {
            error!("Timeout while connecting to the Smile/Stretch");
            Err(SetupError::not_ready("Timeout while connecting to the Smile/Stretch"))
        }
        Ok(Err(err)) => {
            error!(error = %err, "Error while communicating to the Smile/Stretch");
            Err(SetupError::not_ready(err.to_string()))
        }
    }
}

fn first_refresh_error(err: CoordinatorError) -> SetupError {
    if err.is_fatal() {
        SetupError::AuthFailed(err.to_string())
    } else {
        SetupError::not_ready(err.to_string())
    }
}

/// One entity per description key each device reports, plus a climate
/// entity per thermostat
fn build_entities(
    hass: &Hass,
    host: &str,
    data: &PlugwiseData,
    coordinator: &PlugwiseCoordinator,
    unavailable_after: &Arc<AtomicU32>,
) -> Vec<Arc<SmileEntity>> {
    let devices: BTreeMap<&String, &DeviceData> = data.devices.iter().collect();
    let mut entities = Vec::new();

    for (device_id, device) in devices {
        let device_info = device_info(host, data, device_id, device);
        let mut add = |kind: EntityKind, key: &str, name: String| {
            let unique_id = format!("{device_id}-{key}");
            let record = match kind {
                EntityKind::Described(desc) => desc.record(unique_id, name, device_info.clone()),
                EntityKind::Climate => EntityRecord {
                    unique_id,
                    platform: Platform::Climate,
                    name: Some(name),
                    device_class: None,
                    unit_of_measurement: Some("°C".into()),
                    state_class: None,
                    entity_category: None,
                    icon: None,
                    enabled_default: true,
                    device: device_info.clone(),
                },
            };
            entities.push(Arc::new(SmileEntity::new(
                device_id.as_str(),
                kind,
                record,
                coordinator.clone(),
                hass.platforms.clone(),
                unavailable_after.clone(),
            )));
        };

        for desc in descriptions(Platform::Sensor, PlugwiseApi::Smile) {
            if device.sensors.contains_key(desc.key) {
                let name = format!("{} {}", device.name, desc.name);
                add(EntityKind::Described(desc), desc.key, name);
            }
        }
        for desc in descriptions(Platform::BinarySensor, PlugwiseApi::Smile) {
            if device.binary_sensors.contains_key(desc.key) {
                let name = format!("{} {}", device.name, desc.name);
                add(EntityKind::Described(desc), desc.key, name);
            }
        }
        for desc in descriptions(Platform::Switch, PlugwiseApi::Smile) {
            if device.switches.contains_key(desc.key) {
                let name = format!("{} {}", device.name, desc.name);
                add(EntityKind::Described(desc), desc.key, name);
            }
        }
        if device.thermostat.is_some() {
            add(EntityKind::Climate, "climate", device.name.clone());
        }
    }

    entities
}

fn device_info(
    host: &str,
    data: &PlugwiseData,
    device_id: &str,
    device: &DeviceData,
) -> DeviceInfo {
    let gateway_id = &data.gateway.gateway_id;
    let mut info = DeviceInfo {
        identifiers: vec![(DOMAIN.to_string(), device_id.to_string())],
        name: Some(format!("Smile {}", data.gateway.smile_name)),
        manufacturer: device.vendor.clone(),
        model: device.model.clone(),
        sw_version: device.firmware.clone(),
        via_device: None,
        configuration_url: Some(format!("http://{host}")),
    };
    if device_id != gateway_id {
        info.name = Some(device.name.clone());
        info.via_device = Some((DOMAIN.to_string(), gateway_id.clone()));
    }
    info
}

fn register_delete_notification(hass: &Hass, api: Arc<dyn SmileApi>, info: &SmileInfo) {
    let smile_name = info.name.clone().unwrap_or_else(|| DOMAIN.to_string());
    hass.services
        .register(DOMAIN, SERVICE_DELETE_NOTIFICATION, move |_call| {
            let api = api.clone();
            let smile_name = smile_name.clone();
            async move {
                debug!(smile = %smile_name, "Service delete PW Notification called");
                match api.delete_notification().await {
                    Ok(()) => debug!(smile = %smile_name, "PW Notification deleted"),
                    Err(err) => debug!(
                        smile = %smile_name,
                        error = %err,
                        "Failed to delete the Plugwise Notification"
                    ),
                }
                Ok::<(), ServiceError>(())
            }
        });
}

/// Apply option changes in place: poll interval, polling preference and
/// availability threshold
fn add_options_listener(
    hass: &Hass,
    entry: &ConfigEntry,
    coordinator: &PlugwiseCoordinator,
    entities: &Arc<Vec<Arc<SmileEntity>>>,
    unavailable_after: &Arc<AtomicU32>,
    info: &SmileInfo,
) -> UpdateListenerHandle {
    let coordinator = coordinator.clone();
    let entities = Arc::downgrade(entities);
    let unavailable_after = unavailable_after.clone();
    let default_interval = info.smile_type.default_scan_interval();

    hass.config_entries
        .add_update_listener(&entry.entry_id, move |entry: ConfigEntry| {
            let options = PlugwiseOptions::from_entry(&entry);
            let interval = options.scan_interval_or(default_interval);
            unavailable_after.store(options.unavailable_after(), Ordering::SeqCst);

            let result = if entry.pref_disable_polling {
                coordinator.pause_polling();
                Ok(())
            } else {
                coordinator.start(interval)
            };
            if let Some(entities) = entities.upgrade() {
                for entity in entities.iter() {
                    entity.write_state();
                }
            }
            async move {
                result?;
                info!(entry_id = %entry.entry_id, ?interval, "Plugwise options updated");
                Ok::<(), anyhow::Error>(())
            }
        })
}

#[instrument(skip_all, fields(entry_id = %entry.entry_id))]
pub(crate) async fn unload_entry(
    hass: &Hass,
    entry: &ConfigEntry,
    gateway: &GatewayRuntime,
    runtime: &Arc<DashMap<String, RuntimeData>>,
) -> Result<(), UnloadError> {
    if !hass.platforms.unload_platforms(entry, GATEWAY_PLATFORMS).await {
        warn!("Plugwise platforms failed to unload");
        return Err(UnloadError::Platforms(entry.title.clone()));
    }

    gateway.shutdown();
    runtime.remove(&entry.entry_id);

    let gateways_left = runtime
        .iter()
        .any(|r| matches!(r.value(), RuntimeData::Gateway(_)));
    if !gateways_left {
        hass.services.unregister(DOMAIN, SERVICE_DELETE_NOTIFICATION);
    }

    info!("Plugwise gateway unloaded");
    Ok(())
}
