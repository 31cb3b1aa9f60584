//! Auto-discovery metadata for the published keys.
//!
//! Describes every dataset key as a sensor so home-automation systems can
//! pick the values up without manual setup. Units are reported after scaling,
//! so `MWh` regions are announced as `kWh` and `kW` regions as `W`.

use serde::Serialize;

use crate::automation::config::{CollectorConfig, TIMESTAMP_KEY};
use crate::values::matcher::Unit;

/// Topic suffix the dataset is published under.
pub const STATE_TOPIC: &str = "info";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SensorDescriptor {
    pub unique_id: String,
    pub name: String,
    pub state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<&'static str>,
    pub value_template: String,
}

impl SensorDescriptor {
    fn new(key: &str, topic_prefix: &str, unit_hint: Option<&str>) -> Self {
        let unit = unit_hint.and_then(Unit::from_token).map(|u| u.base());
        Self {
            unique_id: format!("mira_{}", key.to_lowercase()),
            name: key.to_string(),
            state_topic: format!("{}{}", topic_prefix, STATE_TOPIC),
            unit_of_measurement: unit
                .map(|u| u.canonical().to_string())
                .or_else(|| unit_hint.map(str::to_string)),
            device_class: unit.map(device_class),
            state_class: unit.map(state_class),
            value_template: format!("{{{{ value_json.{} }}}}", key),
        }
    }
}

fn device_class(unit: Unit) -> &'static str {
    match unit {
        Unit::Celsius => "temperature",
        Unit::KilowattHour | Unit::MegawattHour => "energy",
        Unit::Watt | Unit::Kilowatt => "power",
    }
}

fn state_class(unit: Unit) -> &'static str {
    match unit {
        Unit::KilowattHour | Unit::MegawattHour => "total_increasing",
        _ => "measurement",
    }
}

/// Builds one descriptor per dataset key, in dataset order.
pub fn describe(config: &CollectorConfig, topic_prefix: &str) -> Vec<SensorDescriptor> {
    let timestamp = config
        .include_timestamp
        .then(|| SensorDescriptor::new(TIMESTAMP_KEY, topic_prefix, None));

    timestamp
        .into_iter()
        .chain(
            config
                .output_keys()
                .map(|(_, region, key)| SensorDescriptor::new(key, topic_prefix, region.unit_hint(key))),
        )
        .collect()
}
