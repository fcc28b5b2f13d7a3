// src/error.rs
//
// Error taxonomy for the bridge.
//
// ConfigError is fatal at startup. Of the runtime errors only Connect is fatal
// (and only for the first connection attempt); everything else is caught at
// the boundary of the relay or message that produced it.

use std::path::PathBuf;

use thiserror::Error;

/// Malformed or missing configuration. The process does not start.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration file {0} not found")]
    Missing(PathBuf),

    #[error("configuration file {path} is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("broker address is empty")]
    EmptyBroker,

    #[error("broker port {0} is outside 1-65535")]
    InvalidBrokerPort(u16),

    #[error("username and password must both be set or both be empty")]
    PartialCredentials,

    #[error("serial port {0} is configured by more than one route")]
    DuplicatePort(String),

    #[error("route #{0} has an empty port identifier")]
    EmptyPort(usize),

    #[error("route for {port} has an empty {field}")]
    EmptyTopic { port: String, field: &'static str },

    #[error("route for {port} has invalid baud rate {baud_rate}")]
    InvalidBaudRate { port: String, baud_rate: u32 },

    #[error("route for {port} has invalid line settings: {reason}")]
    InvalidLineSettings { port: String, reason: String },
}

/// Runtime errors produced by the bridge engine.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("MQTT connection to {broker} failed: {reason}")]
    Connect { broker: String, reason: String },

    #[error("failed to open serial port {port}: {reason}")]
    PortOpen { port: String, reason: String },

    #[error("serial I/O error on {port}: {source}")]
    PortIo {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("subscribe to {topics} failed: {reason}")]
    Subscribe { topics: String, reason: String },

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("write to {port} failed: {reason}")]
    Write { port: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn port_io(port: &str, source: std::io::Error) -> Self {
        BridgeError::PortIo {
            port: port.to_string(),
            source,
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_io_keeps_source() {
        use std::error::Error as _;
        let err = BridgeError::port_io(
            "/dev/ttyUSB0",
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"),
        );
        assert_eq!(err.to_string(), "serial I/O error on /dev/ttyUSB0: gone");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_config_error_messages() {
        assert_eq!(
            ConfigError::DuplicatePort("COM3".into()).to_string(),
            "serial port COM3 is configured by more than one route"
        );
        assert_eq!(
            ConfigError::EmptyTopic {
                port: "COM3".into(),
                field: "send_topic"
            }
            .to_string(),
            "route for COM3 has an empty send_topic"
        );
    }
}
