//! Host configuration management

use crate::table::DeviceTable;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSettings,
    #[serde(default)]
    pub worker: WorkerSettings,
    /// Emulated devices to register at startup
    #[serde(default)]
    pub devices: Vec<DeviceTable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    #[serde(default = "HostSettings::default_log_level")]
    pub log_level: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl HostSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Run non-standard transfers on a worker thread
    #[serde(default = "WorkerSettings::default_enabled")]
    pub enabled: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
        }
    }
}

impl WorkerSettings {
    fn default_enabled() -> bool {
        true
    }
}

impl HostConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    return Err(anyhow!(
                        "No configuration file found at {}",
                        default.display()
                    ));
                }
                default
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: HostConfig = toml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("guest-usb").join("host.toml")
        } else {
            PathBuf::from(".config/guest-usb/host.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.host.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.host.log_level,
                valid_levels.join(", ")
            ));
        }

        let mut locations = HashSet::new();
        for (index, device) in self.devices.iter().enumerate() {
            Self::validate_device(device)
                .with_context(|| format!("Invalid device entry #{}", index))?;

            let location = (device.vendor_id, device.product_id, device.bus, device.port);
            if !locations.insert(location) {
                return Err(anyhow!(
                    "Device entry #{} repeats {:04x}:{:04x} on bus {} port {}",
                    index,
                    device.vendor_id,
                    device.product_id,
                    device.bus,
                    device.port
                ));
            }
        }

        Ok(())
    }

    /// Validate one descriptor table
    fn validate_device(device: &DeviceTable) -> Result<()> {
        if device.configurations.is_empty() {
            return Err(anyhow!(
                "Device {:04x}:{:04x} has no configurations",
                device.vendor_id,
                device.product_id
            ));
        }

        for config in &device.configurations {
            let mut settings = HashSet::new();
            for interface in &config.interfaces {
                if !settings.insert((interface.number, interface.alternate_setting)) {
                    return Err(anyhow!(
                        "Configuration {} lists interface {} alternate setting {} twice",
                        config.value,
                        interface.number,
                        interface.alternate_setting
                    ));
                }

                for endpoint in &interface.endpoints {
                    if endpoint.address & 0x0f == 0 {
                        return Err(anyhow!(
                            "Interface {} uses endpoint address {:#04x}, which is reserved for control",
                            interface.number,
                            endpoint.address
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{ConfigurationTable, EndpointTable, InterfaceTable};

    fn device() -> DeviceTable {
        DeviceTable {
            vendor_id: 0x1234,
            product_id: 0x5678,
            configurations: vec![ConfigurationTable {
                interfaces: vec![InterfaceTable {
                    endpoints: vec![EndpointTable::default()],
                    ..InterfaceTable::default()
                }],
                ..ConfigurationTable::default()
            }],
            ..DeviceTable::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.host.log_level, "info");
        assert!(config.worker.enabled);
        assert!(config.devices.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = HostConfig::default();
        config.host.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.host.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_device_tables() {
        let mut config = HostConfig {
            devices: vec![device()],
            ..HostConfig::default()
        };
        assert!(config.validate().is_ok());

        config.devices[0].configurations[0].interfaces[0].endpoints[0].address = 0x80;
        assert!(config.validate().is_err());

        config.devices[0] = device();
        let duplicate = config.devices[0].configurations[0].interfaces[0].clone();
        config.devices[0].configurations[0].interfaces.push(duplicate);
        assert!(config.validate().is_err());

        config.devices[0].configurations.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_repeated_location() {
        let mut config = HostConfig {
            devices: vec![device(), device()],
            ..HostConfig::default()
        };
        let message = format!("{:#}", config.validate().unwrap_err());
        assert!(message.contains("Device entry #1 repeats 1234:5678"));

        // Same identity on another port is a second device
        config.devices[1].port = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = HostConfig {
            devices: vec![device()],
            ..HostConfig::default()
        };
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = HostConfig::parse(&toml_str).unwrap();

        assert_eq!(parsed.host.log_level, config.host.log_level);
        assert_eq!(parsed.devices, config.devices);
    }

    #[test]
    fn test_parse_sections() {
        let config = HostConfig::parse(
            r#"
            [host]
            log_level = "debug"

            [worker]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.host.log_level, "debug");
        assert!(!config.worker.enabled);
    }
}
