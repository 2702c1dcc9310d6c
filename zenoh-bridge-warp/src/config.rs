//! Configuration for the WARP bridge.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use warp_bridge_common::{Format, LoggingConfig, ZenohConfig, load_config, parse_config};

use crate::error::{BridgeError, Result};
use crate::mapper::{Position, map_position};
use crate::poller::PollSettings;

/// The only access type the HTTP API supports.
pub const ACCESS_TYPE_ON_PREMISE: &str = "OnPremise";

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarpBridgeConfig {
    /// Zenoh connection settings.
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Charger settings.
    pub warp: WarpConfig,
}

/// Charger and publishing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarpConfig {
    /// Charger host name or address, optionally with port.
    pub host: String,

    /// How the charger is reached. Only "OnPremise" is supported.
    #[serde(default = "default_access_type")]
    pub access_type: String,

    /// Position relative to the inverter: 0 (AC output) or 1 (AC input).
    #[serde(default)]
    pub position: i64,

    /// Whether `/Position` is declared and published.
    #[serde(default = "default_true")]
    pub publish_position: bool,

    /// Device instance, also used to build the service name.
    #[serde(default = "default_device_instance")]
    pub device_instance: u32,

    /// Service name base; the instance is appended (`<base>.http_40`).
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Key expression prefix; the instance is appended (`<prefix>/http_40`).
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Product name published on `/ProductName`.
    #[serde(default = "default_product_name")]
    pub product_name: String,

    /// Custom name published on `/CustomName`. Empty uses the product name.
    #[serde(default)]
    pub custom_name: String,

    /// Connection description published on `/Mgmt/Connection`.
    #[serde(default = "default_connection")]
    pub connection: String,

    /// Update period in milliseconds (default: 2000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// HTTP request timeout in milliseconds (default: 5000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Sign-of-life log period in minutes, 0 disables it (default: 5).
    #[serde(default = "default_sign_of_life_mins")]
    pub sign_of_life_mins: u64,

    /// Nominal grid voltage published on `/Ac/Voltage` (default: 230).
    #[serde(default = "default_nominal_voltage")]
    pub nominal_voltage: f64,

    /// Charging mode published on `/Mode` (default: 0).
    #[serde(default)]
    pub mode: i64,

    /// Payload format for property updates.
    #[serde(default)]
    pub format: Format,
}

fn default_access_type() -> String {
    ACCESS_TYPE_ON_PREMISE.to_string()
}

fn default_true() -> bool {
    true
}

fn default_device_instance() -> u32 {
    40
}

fn default_service_name() -> String {
    "com.victronenergy.evcharger".to_string()
}

fn default_key_prefix() -> String {
    warp_bridge_common::KEY_PREFIX.to_string()
}

fn default_product_name() -> String {
    "WARP2 Smart".to_string()
}

fn default_connection() -> String {
    "WARP2 Smart HTTP service".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_sign_of_life_mins() -> u64 {
    5
}

fn default_nominal_voltage() -> f64 {
    230.0
}

impl WarpBridgeConfig {
    /// Load and validate configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: WarpBridgeConfig = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn from_json5(content: &str) -> Result<Self> {
        let config: WarpBridgeConfig = parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.warp.validate()
    }
}

impl WarpConfig {
    /// Validate the charger settings.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(BridgeError::config("warp.host must not be empty"));
        }

        if self.access_type != ACCESS_TYPE_ON_PREMISE {
            return Err(BridgeError::config(format!(
                "access_type '{}' is not supported, only '{}'",
                self.access_type, ACCESS_TYPE_ON_PREMISE
            )));
        }

        map_position(self.position)?;

        if self.poll_interval_ms == 0 {
            return Err(BridgeError::config("poll_interval_ms must be > 0"));
        }

        if self.request_timeout_ms == 0 {
            return Err(BridgeError::config("request_timeout_ms must be > 0"));
        }

        if !self.nominal_voltage.is_finite() || self.nominal_voltage < 0.0 {
            return Err(BridgeError::config("nominal_voltage must be a non-negative number"));
        }

        self.sign_of_life()?;

        Ok(())
    }

    /// Validated position.
    pub fn position(&self) -> Result<Position> {
        map_position(self.position)
    }

    /// Service name the bridge registers under.
    pub fn device_service_name(&self) -> String {
        format!("{}.http_{:02}", self.service_name, self.device_instance)
    }

    /// Key expression prefix properties are published under.
    pub fn device_key_prefix(&self) -> String {
        format!(
            "{}/http_{:02}",
            self.key_prefix.trim_end_matches('/'),
            self.device_instance
        )
    }

    /// HTTP request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Heartbeat period, `None` when disabled.
    pub fn sign_of_life(&self) -> Result<Option<Duration>> {
        if self.sign_of_life_mins == 0 {
            return Ok(None);
        }

        self.sign_of_life_mins
            .checked_mul(60)
            .map(|secs| Some(Duration::from_secs(secs)))
            .ok_or_else(|| {
                BridgeError::config(format!(
                    "sign_of_life_mins {} is too large",
                    self.sign_of_life_mins
                ))
            })
    }

    /// Scheduler settings derived from this configuration.
    pub fn poll_settings(&self) -> Result<PollSettings> {
        let position = self.position()?;

        Ok(PollSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            sign_of_life: self.sign_of_life()?,
            position: self.publish_position.then_some(position),
            nominal_voltage: self.nominal_voltage,
            mode: self.mode,
        })
    }
}
