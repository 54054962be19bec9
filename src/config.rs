//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - DeviceConfig: name reported in alarm payloads.
//!     - ServerConfig / PollingConfig: where the api listens, how often we tick.
//!     - StorageConfig / LimitsConfig: registry file and capacity ceilings.
//!     - SensorsConfig: GPIO pins, I2C address and the 1-wire sysfs directory.
//!     - OutputConfig: named relay outputs.
//!
//! only fixed hardware wiring lives here. sensors, alarms and webhooks
//! are runtime state managed through the rest api (see storage.rs).
//!
//! ==============================================================================

use crate::registry::Limits;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HostConfig {
    pub device: DeviceConfig,
    pub server: ServerConfig,
    pub polling: PollingConfig,
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
    pub sensors: SensorsConfig,
    pub outputs: Vec<OutputConfig>,
    pub webhooks: WebhookClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { name: "sensor-hub".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub tick_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { tick_ms: 2000 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("data").join("registry.json") }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_sensors: usize,
    pub max_alarms: usize,
    pub max_webhooks: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            max_sensors: limits.sensors,
            max_alarms: limits.alarms,
            max_webhooks: limits.webhooks,
        }
    }
}

impl From<&LimitsConfig> for Limits {
    fn from(cfg: &LimitsConfig) -> Self {
        Limits {
            sensors: cfg.max_sensors,
            alarms: cfg.max_alarms,
            webhooks: cfg.max_webhooks,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorsConfig {
    pub dht22_gpio_pin: u8,
    pub pir_gpio_pin: u8,
    /// bh1750 address, "0x23" or "0x5C"
    pub light_i2c_address: String,
    pub w1_devices: PathBuf,
}

impl SensorsConfig {
    pub fn light_address(&self) -> u8 {
        let trimmed = self.light_i2c_address.trim_start_matches("0x").trim_start_matches("0X");
        u8::from_str_radix(trimmed, 16).unwrap_or_else(|_| {
            warn!("Invalid light_i2c_address '{}', using 0x23", self.light_i2c_address);
            0x23
        })
    }
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            dht22_gpio_pin: 4,
            pir_gpio_pin: 27,
            light_i2c_address: "0x23".to_string(),
            w1_devices: PathBuf::from("/sys/bus/w1/devices"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub name: String,
    pub gpio_pin: u8,
    /// sainsmart style relays switch on when the input goes LOW
    #[serde(default)]
    pub active_low: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebhookClientConfig {
    pub timeout_seconds: u64,
}

impl Default for WebhookClientConfig {
    fn default() -> Self {
        Self { timeout_seconds: 10 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: false }
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: HostConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback. `SENSOR_HUB_CONFIG` wins over the usual paths.
    pub fn load_or_default() -> Self {
        let mut paths = vec![PathBuf::from("config").join("host.toml")];
        if let Ok(custom) = std::env::var("SENSOR_HUB_CONFIG") {
            paths.insert(0, PathBuf::from(custom));
        }

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        info!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("[CONFIG] Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        warn!("[CONFIG] No config file found - using defaults");
        Self::default()
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        info!("Device: {}", self.device.name);
        info!("  API bind: {}", self.server.bind);
        info!("  Tick: {}ms", self.polling.tick_ms);
        info!("  Registry file: {}", self.storage.path.display());
        info!(
            "  Capacity: {} sensors / {} alarms / {} webhooks",
            self.limits.max_sensors, self.limits.max_alarms, self.limits.max_webhooks
        );
        info!(
            "  DHT22 GPIO {} | PIR GPIO {} | BH1750 {} | 1-Wire {}",
            self.sensors.dht22_gpio_pin,
            self.sensors.pir_gpio_pin,
            self.sensors.light_i2c_address,
            self.sensors.w1_devices.display()
        );
        for output in &self.outputs {
            info!("  Output '{}' on GPIO {}", output.name, output.gpio_pin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: HostConfig = toml::from_str(
            r#"
[device]
name = "greenhouse"

[limits]
max_alarms = 3

[[outputs]]
name = "pump"
gpio_pin = 17
active_low = true
"#,
        )
        .unwrap();

        assert_eq!(config.device.name, "greenhouse");
        assert_eq!(config.limits.max_alarms, 3);
        assert_eq!(config.limits.max_sensors, 10);
        assert_eq!(config.polling.tick_ms, 2000);
        assert_eq!(config.outputs.len(), 1);
        assert!(config.outputs[0].active_low);
        assert_eq!(Limits::from(&config.limits).alarms, 3);
    }

    #[test]
    fn test_light_address_parsing() {
        let mut sensors = SensorsConfig::default();
        assert_eq!(sensors.light_address(), 0x23);
        sensors.light_i2c_address = "0x5C".into();
        assert_eq!(sensors.light_address(), 0x5C);
        sensors.light_i2c_address = "bogus".into();
        assert_eq!(sensors.light_address(), 0x23);
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(HostConfig::load("/nonexistent/host.toml").is_err());
    }
}
