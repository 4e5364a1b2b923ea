//! Bridge configuration – a TOML file plus `SIMLINK_*` environment overrides.
//!
//! ```toml
//! [bus]
//! uri = "ws://localhost:9090"
//!
//! [sensors]
//! rate_hz = 50.0
//!
//! [stream]
//! port = 8888
//! byte_order = "little"
//!
//! [coordinates]
//! extent_x = 100.0
//! extent_y = 300.0
//! z_offset = 1.3
//! origin = [2500.0, -7500.0]
//! ```
//!
//! Every section and field is optional.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use simlink_control::DriverConfig;
use simlink_frames::CoordinateConfig;
use simlink_middleware::{ByteOrder, SensorConfig};
use simlink_types::SimLinkError;

use crate::telemetry::LoggingConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub sensors: SensorConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default = "default_coordinates")]
    pub coordinates: CoordinateConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// rosbridge connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_uri")]
    pub uri: String,
    /// How long startup waits for the connection before carrying on without it.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_cmd_vel_topic")]
    pub cmd_vel_topic: String,
    #[serde(default = "default_cmd_vel_type")]
    pub cmd_vel_type: String,
}

/// Telemetry stream listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_stream_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_stream_port")]
    pub port: u16,
    /// Entity id stamped on the streamed body pose.
    #[serde(default)]
    pub entity_id: i32,
    #[serde(default)]
    pub byte_order: ByteOrder,
}

fn default_bus_uri() -> String {
    "ws://localhost:9090".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_cmd_vel_topic() -> String {
    "/robot0/cmd_vel".to_string()
}
fn default_cmd_vel_type() -> String {
    "geometry_msgs/Twist".to_string()
}
fn default_stream_enabled() -> bool {
    true
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_stream_port() -> u16 {
    8888
}
fn default_coordinates() -> CoordinateConfig {
    CoordinateConfig::new(100.0, 300.0, 1.3, [2500.0, -7500.0])
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            sensors: SensorConfig::default(),
            stream: StreamConfig::default(),
            coordinates: default_coordinates(),
            driver: DriverConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            uri: default_bus_uri(),
            connect_timeout_ms: default_connect_timeout_ms(),
            cmd_vel_topic: default_cmd_vel_topic(),
            cmd_vel_type: default_cmd_vel_type(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: default_stream_enabled(),
            bind_address: default_bind_address(),
            port: default_stream_port(),
            entity_id: 0,
            byte_order: ByteOrder::default(),
        }
    }
}

impl BridgeConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Load from `path`.  Returns `Ok(None)` if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>, SimLinkError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).map_err(|e| {
            SimLinkError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut config: Self = toml::from_str(&raw).map_err(|e| {
            SimLinkError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.apply_env_overrides();
        config.driver.validate()?;
        Ok(Some(config))
    }

    /// Load from `path`, falling back to [`from_env`][Self::from_env] when the
    /// file is missing.
    pub fn load_or_default(path: &Path) -> Result<Self, SimLinkError> {
        Ok(Self::load_from(path)?.unwrap_or_else(Self::from_env))
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SimLinkError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| SimLinkError::Serialization(format!("failed to encode config: {e}")))?;
        fs::write(path, raw)?;
        Ok(())
    }

    /// Apply `SIMLINK_*` overrides.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `SIMLINK_BUS_URI` | `bus.uri` |
    /// | `SIMLINK_STREAM_PORT` | `stream.port` |
    /// | `SIMLINK_SENSOR_RATE_HZ` | `sensors.rate_hz` |
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SIMLINK_BUS_URI") {
            self.bus.uri = v;
        }
        if let Ok(v) = std::env::var("SIMLINK_STREAM_PORT")
            && let Ok(port) = v.parse::<u16>()
        {
            self.stream.port = port;
        }
        if let Ok(v) = std::env::var("SIMLINK_SENSOR_RATE_HZ")
            && let Ok(rate) = v.parse::<f64>()
            && rate > 0.0
        {
            self.sensors.rate_hz = rate;
        }
    }

    pub fn stream_address(&self) -> String {
        format!("{}:{}", self.stream.bind_address, self.stream.port)
    }
}
