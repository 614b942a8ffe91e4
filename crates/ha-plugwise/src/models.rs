//! Entity descriptions for Plugwise devices
//!
//! Each description is keyed by the attribute name the vendor client reports,
//! so an entity exists only where a device actually reports that key.

use ha_config_entries::{DeviceInfo, EntityRecord, Platform};

use crate::constants::{USB_MOTION_ID, USB_RELAY_ID};

/// Which client reports the attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlugwiseApi {
    Smile,
    Stick,
}

// Units
const POWER_WATT: &str = "W";
const ENERGY_WATT_HOUR: &str = "Wh";
const ENERGY_KILO_WATT_HOUR: &str = "kWh";
const PERCENTAGE: &str = "%";
const PRESSURE_BAR: &str = "bar";
const SIGNAL_STRENGTH_DBM: &str = "dBm";
const TEMP_CELSIUS: &str = "°C";
const TEMP_KELVIN: &str = "K";
const TIME_MILLISECONDS: &str = "ms";
const UNIT_LUMEN: &str = "lm";
const VOLUME_CUBIC_METERS: &str = "m³";

// State classes
const MEASUREMENT: &str = "measurement";
const TOTAL: &str = "total";
const TOTAL_INCREASING: &str = "total_increasing";

// Entity categories
const CONFIG: &str = "config";
const DIAGNOSTIC: &str = "diagnostic";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlugwiseEntityDescription {
    pub key: &'static str,
    pub api: PlugwiseApi,
    pub platform: Platform,
    pub name: &'static str,
    pub device_class: Option<&'static str>,
    pub unit: Option<&'static str>,
    pub state_class: Option<&'static str>,
    pub entity_category: Option<&'static str>,
    pub icon: Option<&'static str>,
    /// Icon while a binary sensor is off
    pub icon_off: Option<&'static str>,
    pub enabled_default: bool,
}

impl PlugwiseEntityDescription {
    const fn new(
        platform: Platform,
        key: &'static str,
        api: PlugwiseApi,
        name: &'static str,
    ) -> Self {
        Self {
            key,
            api,
            platform,
            name,
            device_class: None,
            unit: None,
            state_class: None,
            entity_category: None,
            icon: None,
            icon_off: None,
            enabled_default: true,
        }
    }

    /// Sensors are measurements unless stated otherwise
    const fn sensor(key: &'static str, api: PlugwiseApi, name: &'static str) -> Self {
        Self::new(Platform::Sensor, key, api, name).state_class(MEASUREMENT)
    }

    const fn switch(key: &'static str, api: PlugwiseApi, name: &'static str) -> Self {
        Self::new(Platform::Switch, key, api, name)
    }

    const fn binary_sensor(key: &'static str, api: PlugwiseApi, name: &'static str) -> Self {
        Self::new(Platform::BinarySensor, key, api, name)
    }

    const fn device_class(mut self, device_class: &'static str) -> Self {
        self.device_class = Some(device_class);
        self
    }

    const fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    const fn state_class(mut self, state_class: &'static str) -> Self {
        self.state_class = Some(state_class);
        self
    }

    const fn category(mut self, category: &'static str) -> Self {
        self.entity_category = Some(category);
        self
    }

    const fn icon(mut self, icon: &'static str) -> Self {
        self.icon = Some(icon);
        self
    }

    const fn icon_off(mut self, icon: &'static str) -> Self {
        self.icon_off = Some(icon);
        self
    }

    const fn disabled(mut self) -> Self {
        self.enabled_default = false;
        self
    }

    /// Entity record for this description on a device
    pub fn record(&self, unique_id: String, name: String, device: DeviceInfo) -> EntityRecord {
        EntityRecord {
            unique_id,
            platform: self.platform,
            name: Some(name),
            device_class: self.device_class.map(str::to_string),
            unit_of_measurement: self.unit.map(str::to_string),
            state_class: self.state_class.map(str::to_string),
            entity_category: self.entity_category.map(str::to_string),
            // A device class already implies an icon
            icon: match self.device_class {
                Some(_) => None,
                None => self.icon.map(str::to_string),
            },
            enabled_default: self.enabled_default,
            device,
        }
    }
}

use PlugwiseApi::{Smile, Stick};
type Desc = PlugwiseEntityDescription;

pub static SENSORS: &[PlugwiseEntityDescription] = &[
    Desc::sensor("power_1s", Stick, "Power usage").device_class("power").unit(POWER_WATT),
    Desc::sensor("energy_consumption_today", Stick, "Energy consumption today")
        .device_class("energy")
        .state_class(TOTAL_INCREASING)
        .unit(ENERGY_KILO_WATT_HOUR),
    Desc::sensor("ping", Stick, "Ping roundtrip")
        .icon("mdi:speedometer")
        .unit(TIME_MILLISECONDS)
        .disabled(),
    Desc::sensor("power_8s", Stick, "Power usage 8 seconds")
        .device_class("power")
        .unit(POWER_WATT)
        .disabled(),
    Desc::sensor("RSSI_in", Stick, "Inbound RSSI")
        .device_class("signal_strength")
        .unit(SIGNAL_STRENGTH_DBM)
        .disabled(),
    Desc::sensor("RSSI_out", Stick, "Outbound RSSI")
        .device_class("signal_strength")
        .unit(SIGNAL_STRENGTH_DBM)
        .disabled(),
    Desc::sensor("power_con_cur_hour", Stick, "Power consumption current hour")
        .device_class("power")
        .unit(ENERGY_KILO_WATT_HOUR)
        .disabled(),
    Desc::sensor("power_prod_cur_hour", Stick, "Power production current hour")
        .device_class("power")
        .unit(ENERGY_KILO_WATT_HOUR)
        .disabled(),
    Desc::sensor("power_con_today", Stick, "Power consumption today")
        .device_class("power")
        .unit(ENERGY_KILO_WATT_HOUR)
        .disabled(),
    Desc::sensor("power_con_prev_hour", Stick, "Power consumption previous hour")
        .device_class("power")
        .unit(ENERGY_KILO_WATT_HOUR)
        .disabled(),
    Desc::sensor("power_con_yesterday", Stick, "Power consumption yesterday")
        .device_class("power")
        .unit(ENERGY_KILO_WATT_HOUR)
        .disabled(),
    Desc::sensor("battery", Smile, "Battery")
        .device_class("battery")
        .category(DIAGNOSTIC)
        .unit(PERCENTAGE),
    Desc::sensor("temperature", Smile, "Temperature")
        .device_class("temperature")
        .category(DIAGNOSTIC)
        .unit(TEMP_CELSIUS),
    Desc::sensor("electricity_consumed", Smile, "Electricity Consumed")
        .device_class("power")
        .unit(POWER_WATT),
    Desc::sensor("electricity_consumed_interval", Smile, "Electricity Consumed Interval")
        .device_class("energy")
        .state_class(TOTAL)
        .unit(ENERGY_WATT_HOUR),
    Desc::sensor(
        "electricity_consumed_off_peak_cumulative",
        Smile,
        "Electricity Consumed Off Peak Cumulative",
    )
    .device_class("energy")
    .state_class(TOTAL_INCREASING)
    .unit(ENERGY_KILO_WATT_HOUR),
    Desc::sensor(
        "electricity_consumed_off_peak_interval",
        Smile,
        "Electricity Consumed Off Peak Interval",
    )
    .device_class("energy")
    .state_class(TOTAL)
    .unit(ENERGY_WATT_HOUR),
    Desc::sensor(
        "electricity_consumed_off_peak_point",
        Smile,
        "Electricity Consumed Off Peak Point",
    )
    .device_class("power")
    .unit(POWER_WATT),
    Desc::sensor(
        "electricity_consumed_peak_cumulative",
        Smile,
        "Electricity Consumed Peak Cumulative",
    )
    .device_class("energy")
    .state_class(TOTAL_INCREASING)
    .unit(ENERGY_KILO_WATT_HOUR),
    Desc::sensor("electricity_consumed_peak_interval", Smile, "Electricity Consumed Peak Interval")
        .device_class("energy")
        .state_class(TOTAL)
        .unit(ENERGY_WATT_HOUR),
    Desc::sensor("electricity_consumed_peak_point", Smile, "Electricity Consumed Peak Point")
        .device_class("power")
        .unit(POWER_WATT),
    Desc::sensor("electricity_consumed_point", Smile, "Electricity Consumed Point")
        .device_class("power")
        .unit(POWER_WATT),
    Desc::sensor("electricity_produced", Smile, "Electricity Produced")
        .device_class("power")
        .unit(POWER_WATT)
        .disabled(),
    Desc::sensor("electricity_produced_interval", Smile, "Electricity Produced Interval")
        .device_class("energy")
        .state_class(TOTAL)
        .unit(ENERGY_WATT_HOUR)
        .disabled(),
    Desc::sensor(
        "electricity_produced_off_peak_cumulative",
        Smile,
        "Electricity Produced Off Peak Cumulative",
    )
    .device_class("energy")
    .state_class(TOTAL_INCREASING)
    .unit(ENERGY_KILO_WATT_HOUR),
    Desc::sensor(
        "electricity_produced_off_peak_interval",
        Smile,
        "Electricity Produced Off Peak Interval",
    )
    .device_class("energy")
    .state_class(TOTAL)
    .unit(ENERGY_WATT_HOUR),
    Desc::sensor(
        "electricity_produced_off_peak_point",
        Smile,
        "Electricity Produced Off Peak Point",
    )
    .device_class("power")
    .unit(POWER_WATT),
    Desc::sensor(
        "electricity_produced_peak_cumulative",
        Smile,
        "Electricity Produced Peak Cumulative",
    )
    .device_class("energy")
    .state_class(TOTAL_INCREASING)
    .unit(ENERGY_KILO_WATT_HOUR),
    Desc::sensor("electricity_produced_peak_interval", Smile, "Electricity Produced Peak Interval")
        .device_class("energy")
        .state_class(TOTAL)
        .unit(ENERGY_WATT_HOUR),
    Desc::sensor("electricity_produced_peak_point", Smile, "Electricity Produced Peak Point")
        .device_class("power")
        .unit(POWER_WATT),
    Desc::sensor("electricity_produced_point", Smile, "Electricity Produced Point")
        .device_class("power")
        .unit(POWER_WATT),
    Desc::sensor("gas_consumed_cumulative", Smile, "Gas Consumed Cumulative")
        .device_class("gas")
        .state_class(TOTAL_INCREASING)
        .unit(VOLUME_CUBIC_METERS),
    Desc::sensor("gas_consumed_interval", Smile, "Gas Consumed Interval")
        .device_class("gas")
        .state_class(TOTAL)
        .unit(VOLUME_CUBIC_METERS),
    Desc::sensor("humidity", Smile, "Relative Humidity")
        .device_class("humidity")
        .unit(PERCENTAGE),
    Desc::sensor("illuminance", Smile, "Illuminance")
        .device_class("illuminance")
        .unit(UNIT_LUMEN),
    Desc::sensor("intended_boiler_temperature", Smile, "Intended Boiler Temperature")
        .device_class("temperature")
        .category(DIAGNOSTIC)
        .unit(TEMP_CELSIUS),
    Desc::sensor("modulation_level", Smile, "Modulation Level")
        .category(DIAGNOSTIC)
        .unit(PERCENTAGE)
        .icon("mdi:percent"),
    Desc::sensor("net_electricity_cumulative", Smile, "Net Electricity Cumulative")
        .device_class("energy")
        .state_class(TOTAL)
        .unit(ENERGY_KILO_WATT_HOUR),
    Desc::sensor("net_electricity_point", Smile, "Net Electricity Point")
        .device_class("power")
        .unit(POWER_WATT),
    Desc::sensor("outdoor_temperature", Smile, "Outdoor Temperature")
        .device_class("temperature")
        .unit(TEMP_CELSIUS),
    Desc::sensor("outdoor_air_temperature", Smile, "Outdoor Air Temperature")
        .device_class("temperature")
        .category(DIAGNOSTIC)
        .unit(TEMP_CELSIUS),
    Desc::sensor("return_temperature", Smile, "Return Temperature")
        .device_class("temperature")
        .category(DIAGNOSTIC)
        .unit(TEMP_CELSIUS),
    Desc::sensor("setpoint", Smile, "Setpoint")
        .device_class("temperature")
        .category(DIAGNOSTIC)
        .unit(TEMP_CELSIUS)
        .disabled(),
    Desc::sensor("setpoint_high", Smile, "Setpoint_high")
        .device_class("temperature")
        .category(DIAGNOSTIC)
        .unit(TEMP_CELSIUS)
        .disabled(),
    Desc::sensor("setpoint_low", Smile, "Setpoint_low")
        .device_class("temperature")
        .category(DIAGNOSTIC)
        .unit(TEMP_CELSIUS)
        .disabled(),
    Desc::sensor("temperature_difference", Smile, "Temperature Difference")
        .device_class("temperature")
        .category(DIAGNOSTIC)
        .unit(TEMP_KELVIN)
        .disabled(),
    Desc::sensor("valve_position", Smile, "Valve Position")
        .icon("mdi:valve")
        .category(DIAGNOSTIC)
        .unit(PERCENTAGE),
    Desc::sensor("water_pressure", Smile, "Water Pressure")
        .device_class("pressure")
        .category(DIAGNOSTIC)
        .unit(PRESSURE_BAR),
    Desc::sensor("water_temperature", Smile, "Water Temperature")
        .device_class("temperature")
        .category(DIAGNOSTIC)
        .unit(TEMP_CELSIUS),
];

pub static SWITCHES: &[PlugwiseEntityDescription] = &[
    Desc::switch(USB_RELAY_ID, Stick, "Relay state").device_class("outlet"),
    Desc::switch("dhw_cm_switch", Smile, "DHW Comfort Mode")
        .icon("mdi:water-plus")
        .device_class("switch")
        .category(CONFIG),
    Desc::switch("lock", Smile, "Lock")
        .icon("mdi:lock")
        .device_class("switch")
        .category(CONFIG)
        .disabled(),
    Desc::switch("relay", Smile, "Relay").device_class("switch"),
];

pub static BINARY_SENSORS: &[PlugwiseEntityDescription] = &[
    Desc::binary_sensor(USB_MOTION_ID, Stick, "Motion").device_class("motion"),
    Desc::binary_sensor("compressor_state", Smile, "Compressor State")
        .icon("mdi:hvac")
        .icon_off("mdi:hvac-off")
        .category(DIAGNOSTIC),
    Desc::binary_sensor("dhw_state", Smile, "DHW State")
        .icon("mdi:water-pump")
        .icon_off("mdi:water-pump-off")
        .category(DIAGNOSTIC),
    Desc::binary_sensor("flame_state", Smile, "Flame State")
        .icon("mdi:fire")
        .icon_off("mdi:fire-off")
        .category(DIAGNOSTIC),
    Desc::binary_sensor("heating_state", Smile, "Heating")
        .icon("mdi:radiator")
        .icon_off("mdi:radiator-off")
        .category(DIAGNOSTIC),
    Desc::binary_sensor("cooling_state", Smile, "Cooling")
        .icon("mdi:snowflake")
        .icon_off("mdi:snowflake-off")
        .category(DIAGNOSTIC),
    Desc::binary_sensor(PW_NOTIFICATION, Smile, "Plugwise Notification")
        .icon("mdi:mailbox-up-outline")
        .icon_off("mdi:mailbox-outline")
        .category(DIAGNOSTIC)
        .disabled(),
    Desc::binary_sensor("slave_boiler_state", Smile, "Secondary Boiler State")
        .icon("mdi:fire")
        .icon_off("mdi:circle-off-outline")
        .category(DIAGNOSTIC)
        .disabled(),
];

/// Binary sensor carrying the gateway's notifications as attributes
pub const PW_NOTIFICATION: &str = "plugwise_notification";

/// Descriptions of one platform reported by the given client
pub fn descriptions(
    platform: Platform,
    api: PlugwiseApi,
) -> impl Iterator<Item = &'static PlugwiseEntityDescription> {
    let table: &'static [PlugwiseEntityDescription] = match platform {
        Platform::Sensor => SENSORS,
        Platform::Switch => SWITCHES,
        Platform::BinarySensor => BINARY_SENSORS,
        Platform::Climate => &[],
    };
    table.iter().filter(move |d| d.api == api)
}

/// Look up a description by vendor key
pub fn find(
    platform: Platform,
    api: PlugwiseApi,
    key: &str,
) -> Option<&'static PlugwiseEntityDescription> {
    descriptions(platform, api).find(|d| d.key == key)
}
