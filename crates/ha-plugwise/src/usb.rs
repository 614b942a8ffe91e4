//! USB-stick connection strategy
//!
//! The stick client is blocking, so every call that talks to the serial
//! port goes through the blocking pool.

use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use ha_config_entries::{
    ConfigEntry, DeviceInfo, EntityRecord, EntityState, Hass, Platform, PlatformHost, ServiceCall,
    ServiceError, SetupError, UnloadError, UpdateListenerHandle,
};
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::api::{ClientFactory, NodeCallback, PlugwiseError, StickApi, StickNode, SubscriptionId};
use crate::config::UsbConfig;
use crate::constants::{
    ATTR_MAC_ADDRESS, DOMAIN, MANUFACTURER, NEW_DEVICE_TITLE, SERVICE_DEVICE_ADD,
    SERVICE_DEVICE_REMOVE, USB_MOTION_ID, USB_PLATFORMS, USB_RELAY_ID,
};
use crate::models::{descriptions, find, PlugwiseApi, PlugwiseEntityDescription};
use crate::RuntimeData;

/// Full 16-digit hex Zigbee MAC
static MAC_ADDRESS: OnceLock<Regex> = OnceLock::new();

fn mac_address() -> &'static Regex {
    MAC_ADDRESS.get_or_init(|| Regex::new(r"^[0-9A-Fa-f]{16}$").expect("MAC pattern compiles"))
}

/// An entity of one node on the stick's network
pub struct StickEntity {
    mac: String,
    description: &'static PlugwiseEntityDescription,
    record: EntityRecord,
}

impl StickEntity {
    fn new(node: &StickNode, description: &'static PlugwiseEntityDescription) -> Self {
        let device = DeviceInfo {
            identifiers: vec![(DOMAIN.to_string(), node.mac.clone())],
            name: Some(format!("{} ({})", node.hardware_model, node.mac)),
            manufacturer: Some(MANUFACTURER.to_string()),
            model: Some(node.hardware_model.clone()),
            sw_version: Some(node.firmware_version.clone()),
            via_device: None,
            configuration_url: None,
        };
        let record = description.record(
            format!("{}-{}", node.mac, description.key),
            format!("{} ({})", description.name, node.short_mac()),
            device,
        );
        Self {
            mac: node.mac.clone(),
            description,
            record,
        }
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn unique_id(&self) -> &str {
        &self.record.unique_id
    }

    pub fn record(&self) -> &EntityRecord {
        &self.record
    }

    pub fn render(&self, node: Option<&StickNode>) -> EntityState {
        let Some(node) = node else {
            return EntityState::unavailable();
        };
        let value = node.values.get(self.description.key).cloned().unwrap_or(Value::Null);
        let value = match (self.description.platform, value) {
            (Platform::Switch | Platform::BinarySensor, Value::Bool(on)) => {
                json!(if on { "on" } else { "off" })
            }
            (_, value) => value,
        };
        EntityState::new(value, node.available)
    }
}

/// Everything a loaded stick entry owns
#[derive(Clone)]
pub struct UsbRuntime {
    pub stick: Arc<dyn StickApi>,
    pub nodes: Arc<Vec<StickNode>>,
    entities: Arc<Vec<StickEntity>>,
    subscriptions: Arc<Vec<SubscriptionId>>,
    update_listener: Arc<UpdateListenerHandle>,
}

impl UsbRuntime {
    pub fn entities(&self) -> &[StickEntity] {
        &self.entities
    }

    fn shutdown(&self) {
        for id in self.subscriptions.iter() {
            self.stick.unsubscribe(*id);
        }
        self.update_listener.remove();
    }
}

async fn run_blocking<T, F>(stick: &Arc<dyn StickApi>, call: F) -> Result<T, PlugwiseError>
where
    T: Send + 'static,
    F: FnOnce(&dyn StickApi) -> Result<T, PlugwiseError> + Send + 'static,
{
    let stick = stick.clone();
    match tokio::task::spawn_blocking(move || call(stick.as_ref())).await {
        Ok(result) => result,
        Err(err) => Err(PlugwiseError::ConnectionFailed(format!(
            "USB-stick task failed: {err}"
        ))),
    }
}

async fn disconnect(stick: &Arc<dyn StickApi>) {
    if let Err(err) = run_blocking(stick, |s| s.disconnect()).await {
        warn!(error = %err, "Error while disconnecting the USB-stick");
    }
}

type InitStep = fn(&dyn StickApi) -> Result<(), PlugwiseError>;

/// Connect, initialize the stick and find the Circle+.
/// A port error means nothing was opened, so there is nothing to disconnect.
async fn initialize(stick: &Arc<dyn StickApi>) -> Result<(), SetupError> {
    let steps: [(&str, InitStep); 3] = [
        ("Connect to USB-Stick", |s| s.connect()),
        ("Initialize USB-stick", |s| s.initialize_stick()),
        ("Discover Circle+ node", |s| s.initialize_circle_plus()),
    ];

    for (step, call) in steps {
        debug!("{}", step);
        let Err(err) = run_blocking(stick, call).await else {
            continue;
        };
        match &err {
            PlugwiseError::Port(_) => {
                error!("Connecting to Plugwise USBstick communication failed")
            }
            PlugwiseError::StickInit => {
                error!("Initializing of Plugwise USBstick communication failed")
            }
            PlugwiseError::NetworkDown => warn!("Plugwise zigbee network down"),
            PlugwiseError::CirclePlus => warn!("Failed to connect to Circle+ node"),
            PlugwiseError::Timeout => warn!("Timeout"),
            other => error!(error = %other, "Unexpected USB-stick error"),
        }
        if !matches!(err, PlugwiseError::Port(_)) {
            disconnect(stick).await;
        }
        return Err(SetupError::not_ready(err.to_string()));
    }
    Ok(())
}

/// Relay nodes get a switch, motion nodes a binary sensor, every node its sensors
fn build_entities(nodes: &[StickNode]) -> Vec<StickEntity> {
    let mut entities = Vec::new();
    for node in nodes {
        if node.has_feature(USB_RELAY_ID) {
            if let Some(desc) = find(Platform::Switch, PlugwiseApi::Stick, USB_RELAY_ID) {
                entities.push(StickEntity::new(node, desc));
            }
        }
        if node.has_feature(USB_MOTION_ID) {
            if let Some(desc) = find(Platform::BinarySensor, PlugwiseApi::Stick, USB_MOTION_ID) {
                entities.push(StickEntity::new(node, desc));
            }
        }
        for desc in descriptions(Platform::Sensor, PlugwiseApi::Stick) {
            if node.has_feature(desc.key) {
                entities.push(StickEntity::new(node, desc));
            }
        }
    }
    entities
}

#[instrument(skip_all, fields(entry_id = %entry.entry_id, usb_path = %config.usb_path))]
pub(crate) async fn setup_entry(
    hass: &Hass,
    entry: &ConfigEntry,
    config: UsbConfig,
    factory: &Arc<dyn ClientFactory>,
    runtime: &Arc<DashMap<String, RuntimeData>>,
) -> Result<(), SetupError> {
    let stick = factory.stick(&config.usb_path);
    initialize(&stick).await?;

    debug!("Start discovery of registered nodes");
    let nodes = match run_blocking(&stick, |s| s.scan()).await {
        Ok(nodes) => nodes,
        Err(err) => {
            warn!(error = %err, "Discovery of Plugwise nodes failed");
            disconnect(&stick).await;
            return Err(SetupError::not_ready(err.to_string()));
        }
    };
    debug!(
        "Successfully discovered {} out of {} registered nodes",
        nodes.len(),
        stick.joined_nodes()
    );

    let entities = Arc::new(build_entities(&nodes));
    let records = entities.iter().map(|e| e.record().clone()).collect();
    hass.platforms
        .forward_entry_setups(entry, USB_PLATFORMS, records)
        .await;
    for entity in entities.iter() {
        let node = nodes.iter().find(|n| n.mac == entity.mac);
        hass.platforms.write_state(entity.unique_id(), entity.render(node));
    }

    let mut subscriptions = vec![stick.subscribe_node_updates(node_update_callback(
        &stick,
        &entities,
        hass.platforms.clone(),
    ))];

    stick.auto_update();

    if entry.pref_disable_new_entities {
        debug!("Configuring stick NOT to accept any new join requests");
        stick.allow_join_requests(true, false);
    } else {
        debug!("Configuring stick to automatically accept new join requests");
        stick.allow_join_requests(true, true);
        subscriptions.push(
            stick.subscribe_join_requests(join_request_callback(&stick, hass.platforms.clone())),
        );
    }

    let reload_hass = hass.clone();
    let update_listener = hass
        .config_entries
        .add_update_listener(&entry.entry_id, move |entry: ConfigEntry| {
            let hass = reload_hass.clone();
            async move {
                debug!(entry_id = %entry.entry_id, "Options changed, reloading USB-stick entry");
                hass.reload(&entry.entry_id).await?;
                Ok::<(), anyhow::Error>(())
            }
        });

    register_services(hass, &stick);

    runtime.insert(
        entry.entry_id.clone(),
        RuntimeData::Usb(UsbRuntime {
            stick,
            nodes: Arc::new(nodes),
            entities,
            subscriptions: Arc::new(subscriptions),
            update_listener: Arc::new(update_listener),
        }),
    );

    info!("Plugwise USB-stick set up");
    Ok(())
}

/// Republish a node's entities when the stick reports a change
fn node_update_callback(
    stick: &Arc<dyn StickApi>,
    entities: &Arc<Vec<StickEntity>>,
    platforms: Arc<dyn PlatformHost>,
) -> NodeCallback {
    let stick: Weak<dyn StickApi> = Arc::downgrade(stick);
    let entities = Arc::downgrade(entities);
    Arc::new(move |mac: &str| {
        let (Some(stick), Some(entities)) = (stick.upgrade(), entities.upgrade()) else {
            return;
        };
        let node = stick.node(mac);
        for entity in entities.iter().filter(|e| e.mac == mac) {
            platforms.write_state(entity.unique_id(), entity.render(node.as_ref()));
        }
    })
}

fn join_request_callback(
    stick: &Arc<dyn StickApi>,
    platforms: Arc<dyn PlatformHost>,
) -> NodeCallback {
    let stick: Weak<dyn StickApi> = Arc::downgrade(stick);
    Arc::new(move |mac: &str| {
        let model = stick
            .upgrade()
            .and_then(|s| s.node(mac))
            .map(|n| n.hardware_model)
            .unwrap_or_else(|| "Unknown".to_string());
        let short_mac = mac.get(mac.len().saturating_sub(5)..).unwrap_or(mac);
        info!(mac = %mac, "New Plugwise node joined");
        platforms.create_notification(
            NEW_DEVICE_TITLE,
            &format!(
                "A new Plugwise device has been joined : \n\n - {model} ({short_mac})\n\nConfigure this device at the device dashboard"
            ),
        );
    })
}

fn parse_mac(call: &ServiceCall) -> Result<String, ServiceError> {
    let mac = call
        .data
        .get(ATTR_MAC_ADDRESS)
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::InvalidData(format!("missing field `{ATTR_MAC_ADDRESS}`")))?;
    if !mac_address().is_match(mac) {
        return Err(ServiceError::InvalidData(format!("invalid MAC address: {mac}")));
    }
    Ok(mac.to_string())
}

fn register_services(hass: &Hass, stick: &Arc<dyn StickApi>) {
    let add_stick = stick.clone();
    hass.services.register(DOMAIN, SERVICE_DEVICE_ADD, move |call| {
        let stick = add_stick.clone();
        async move {
            let mac = parse_mac(&call)?;
            debug!(mac = %mac, "Send request to add device to Plugwise network");
            run_blocking(&stick, move |s| s.node_join(&mac))
                .await
                .map_err(|e| ServiceError::CallFailed(e.to_string()))?;
            Ok::<(), ServiceError>(())
        }
    });

    let remove_stick = stick.clone();
    let platforms = hass.platforms.clone();
    hass.services.register(DOMAIN, SERVICE_DEVICE_REMOVE, move |call| {
        let stick = remove_stick.clone();
        let platforms = platforms.clone();
        async move {
            let mac = parse_mac(&call)?;
            debug!(mac = %mac, "Send request to remove device from Plugwise network");
            let unjoin_mac = mac.clone();
            run_blocking(&stick, move |s| s.node_unjoin(&unjoin_mac))
                .await
                .map_err(|e| ServiceError::CallFailed(e.to_string()))?;
            if platforms.remove_device(&(DOMAIN.to_string(), mac.clone())) {
                debug!(mac = %mac, "Removed device from Home Assistant");
            }
            Ok::<(), ServiceError>(())
        }
    });
}

#[instrument(skip_all, fields(entry_id = %entry.entry_id))]
pub(crate) async fn unload_entry(
    hass: &Hass,
    entry: &ConfigEntry,
    usb: &UsbRuntime,
    runtime: &Arc<DashMap<String, RuntimeData>>,
) -> Result<(), UnloadError> {
    let unload_ok = hass.platforms.unload_platforms(entry, USB_PLATFORMS).await;
    usb.shutdown();
    if !unload_ok {
        return Err(UnloadError::Platforms(entry.title.clone()));
    }

    disconnect(&usb.stick).await;
    runtime.remove(&entry.entry_id);

    let sticks_left = runtime.iter().any(|r| matches!(r.value(), RuntimeData::Usb(_)));
    if !sticks_left {
        hass.services.unregister(DOMAIN, SERVICE_DEVICE_ADD);
        hass.services.unregister(DOMAIN, SERVICE_DEVICE_REMOVE);
    }

    info!("Plugwise USB-stick unloaded");
    Ok(())
}
