// src/settings.rs
//
// Persisted configuration: the broker settings (`mqtt_config.json`) and the
// list of port routes (`serial_config.json`), both under the config directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::io::serial::utils::{
    default_data_bits, default_stop_bits, to_serialport_data_bits, to_serialport_stop_bits,
};
use crate::io::serial::Parity;

pub const BUS_CONFIG_FILE: &str = "mqtt_config.json";
pub const ROUTE_CONFIG_FILE: &str = "serial_config.json";

// ============================================================================
// Bus configuration
// ============================================================================

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    pub broker: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl BusConfig {
    /// Normalise blank credentials to `None` and check the remaining fields.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.broker = self.broker.trim().to_string();
        if self.broker.is_empty() {
            return Err(ConfigError::EmptyBroker);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidBrokerPort(self.port));
        }
        self.username = non_blank(self.username);
        self.password = non_blank(self.password);
        self.credentials()?;
        Ok(self)
    }

    /// Credentials to present to the broker, if any.
    /// Only one of the pair being set is a configuration error.
    pub fn credentials(&self) -> Result<Option<(&str, &str)>, ConfigError> {
        let username = self.username.as_deref().filter(|u| !u.trim().is_empty());
        let password = self.password.as_deref().filter(|p| !p.trim().is_empty());
        match (username, password) {
            (Some(u), Some(p)) => Ok(Some((u, p))),
            (None, None) => Ok(None),
            _ => Err(ConfigError::PartialCredentials),
        }
    }

    /// `host:port` form used in log lines and errors
    pub fn address(&self) -> String {
        format!("{}:{}", self.broker, self.port)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Route configuration
// ============================================================================

/// One serial port bridged to an outbound/inbound topic pair.
///
/// Field names on disk follow the route file written by `configure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Informational only (the OS the route was captured on)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(rename = "selected_port")]
    pub port: String,
    #[serde(rename = "baudrate")]
    pub baud_rate: u32,
    /// Topic that bytes read from the port are published to
    #[serde(rename = "send_topic")]
    pub outbound_topic: String,
    /// Topic whose messages are written to the port
    #[serde(rename = "receive_topic")]
    pub inbound_topic: String,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
}

impl RouteConfig {
    pub fn new(
        port: impl Into<String>,
        baud_rate: u32,
        outbound_topic: impl Into<String>,
        inbound_topic: impl Into<String>,
    ) -> Self {
        Self {
            system: None,
            port: port.into(),
            baud_rate,
            outbound_topic: outbound_topic.into(),
            inbound_topic: inbound_topic.into(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::None,
        }
    }

    /// Validate a single route in isolation. `index` is its position in the file.
    pub fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.port.trim().is_empty() {
            return Err(ConfigError::EmptyPort(index));
        }
        if self.outbound_topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic {
                port: self.port.clone(),
                field: "send_topic",
            });
        }
        if self.inbound_topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic {
                port: self.port.clone(),
                field: "receive_topic",
            });
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::InvalidBaudRate {
                port: self.port.clone(),
                baud_rate: self.baud_rate,
            });
        }
        to_serialport_data_bits(self.data_bits)
            .and_then(|_| to_serialport_stop_bits(self.stop_bits))
            .map_err(|reason| ConfigError::InvalidLineSettings {
                port: self.port.clone(),
                reason,
            })?;
        Ok(())
    }

    /// `8N1`-style summary of the line settings
    pub fn line_summary(&self) -> String {
        format!("{}{}{}", self.data_bits, self.parity.letter(), self.stop_bits)
    }
}

// ============================================================================
// Loading and saving
// ============================================================================

pub fn bus_config_path(config_dir: &Path) -> PathBuf {
    config_dir.join(BUS_CONFIG_FILE)
}

pub fn route_config_path(config_dir: &Path) -> PathBuf {
    config_dir.join(ROUTE_CONFIG_FILE)
}

/// Load and validate the broker settings. A missing file is reported as
/// `ConfigError::Missing` so the caller can decide whether to prompt.
pub fn load_bus_config(config_dir: &Path) -> Result<BusConfig, ConfigError> {
    let path = bus_config_path(config_dir);
    if !path.exists() {
        return Err(ConfigError::Missing(path));
    }
    let config: BusConfig = read_json(&path)?;
    config.validate()
}

/// Load the route list. A missing file means no routes; the bridge then idles.
pub fn load_routes(config_dir: &Path) -> Result<Vec<RouteConfig>, ConfigError> {
    let path = route_config_path(config_dir);
    if !path.exists() {
        return Ok(Vec::new());
    }
    read_json(&path)
}

pub fn save_bus_config(config_dir: &Path, config: &BusConfig) -> Result<PathBuf, String> {
    write_json(&bus_config_path(config_dir), config)
}

pub fn save_routes(config_dir: &Path, routes: &[RouteConfig]) -> Result<PathBuf, String> {
    write_json(&route_config_path(config_dir), &routes)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let malformed = |reason: String| ConfigError::Malformed {
        path: path.to_path_buf(),
        reason,
    };
    let contents = std::fs::read_to_string(path).map_err(|e| malformed(e.to_string()))?;
    serde_json::from_str(&contents).map_err(|e| malformed(e.to_string()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<PathBuf, String> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("Failed to create config dir {}: {}", dir.display(), e))?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize {}: {}", path.display(), e))?;
    std::fs::write(path, json).map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
    Ok(path.to_path_buf())
}
