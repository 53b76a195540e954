use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::temperature::Temperature;

const MIN_TARGET: Temperature = Temperature::from_millis(5_000);
const MAX_TARGET: Temperature = Temperature::from_millis(30_000);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThermostatConfig {
    /// How far below target the reading must fall before heat is called for.
    pub threshold: Temperature,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            threshold: Temperature::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ZoneConfig {
    pub id: String,
    /// Whether the zone follows a temperature sensor, or runs on the schedule alone.
    #[serde(default = "default_true")]
    pub thermostat: bool,
    /// Target used until a persisted one is restored.
    #[serde(default = "default_target")]
    pub default_target: Temperature,
}

impl ZoneConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            thermostat: true,
            default_target: default_target(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub thermostat: ThermostatConfig,
    #[serde(default = "default_zones")]
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_boost_minutes")]
    pub boost_minutes: u32,
    #[serde(default = "default_state_publish_interval_ms")]
    pub state_publish_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thermostat: ThermostatConfig::default(),
            zones: default_zones(),
            network: NetworkConfig::default(),
            http_port: default_http_port(),
            boost_minutes: default_boost_minutes(),
            state_publish_interval_ms: default_state_publish_interval_ms(),
        }
    }
}

impl ThermostatConfig {
    pub fn sanitize(&mut self) {
        self.threshold = self
            .threshold
            .clamp(Temperature::from_millis(100), Temperature::from_millis(5_000));
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.thermostat.sanitize();

        // Zone ids end up in file names and MQTT topics.
        let mut seen = HashSet::new();
        self.zones.retain(|zone| is_valid_zone_id(&zone.id) && seen.insert(zone.id.clone()));
        for zone in &mut self.zones {
            zone.default_target = zone.default_target.clamp(MIN_TARGET, MAX_TARGET);
        }

        if self.http_port == 0 {
            self.http_port = default_http_port();
        }
        self.boost_minutes = self.boost_minutes.clamp(1, 24 * 60);
        self.state_publish_interval_ms = self.state_publish_interval_ms.max(1_000);
    }

    pub fn zone(&self, id: &str) -> Option<&ZoneConfig> {
        self.zones.iter().find(|zone| zone.id == id)
    }
}

pub fn is_valid_zone_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn clamp_target(target: Temperature) -> Temperature {
    target.clamp(MIN_TARGET, MAX_TARGET)
}

fn default_true() -> bool {
    true
}

fn default_target() -> Temperature {
    Temperature::from_millis(18_000)
}

fn default_zones() -> Vec<ZoneConfig> {
    vec![ZoneConfig::new("main")]
}

fn default_http_port() -> u16 {
    8080
}

fn default_boost_minutes() -> u32 {
    30
}

fn default_state_publish_interval_ms() -> u64 {
    10_000
}
