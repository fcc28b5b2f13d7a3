// src/io/serial/port.rs
//
// Opening serial ports for routes, and listing the ports the OS knows about.

use std::io::{Read, Write};
use std::time::Duration;

use super::utils::{to_serialport_data_bits, to_serialport_parity, to_serialport_stop_bits};
use crate::error::{BridgeError, BridgeResult};
use crate::settings::RouteConfig;

// ============================================================================
// Traits
// ============================================================================

/// An open serial connection as seen by the relays.
pub trait SerialLink: Read + Write + Send {
    /// Number of received bytes waiting to be read.
    fn bytes_to_read(&mut self) -> std::io::Result<u32>;
}

impl SerialLink for Box<dyn serialport::SerialPort> {
    fn bytes_to_read(&mut self) -> std::io::Result<u32> {
        (**self).bytes_to_read().map_err(std::io::Error::from)
    }
}

/// Opens the port described by a route.
pub trait PortOpener: Send + Sync {
    fn open(&self, route: &RouteConfig, timeout: Duration) -> BridgeResult<Box<dyn SerialLink>>;
}

/// Opens real OS serial ports through the serialport crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemPortOpener;

impl PortOpener for SystemPortOpener {
    fn open(&self, route: &RouteConfig, timeout: Duration) -> BridgeResult<Box<dyn SerialLink>> {
        let open_error = |reason: String| BridgeError::PortOpen {
            port: route.port.clone(),
            reason,
        };
        let data_bits = to_serialport_data_bits(route.data_bits).map_err(open_error)?;
        let stop_bits = to_serialport_stop_bits(route.stop_bits).map_err(open_error)?;

        let port = serialport::new(&route.port, route.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(to_serialport_parity(route.parity))
            .timeout(timeout)
            .open()
            .map_err(|e| open_error(e.to_string()))?;

        Ok(Box::new(port))
    }
}

/// Write `payload` in full through a port opened just for this write.
/// The handle is closed when this returns.
pub fn write_once(
    opener: &dyn PortOpener,
    route: &RouteConfig,
    payload: &[u8],
    timeout: Duration,
) -> BridgeResult<()> {
    let mut link = opener.open(route, timeout)?;
    link.write_all(payload)
        .and_then(|_| link.flush())
        .map_err(|e| BridgeError::Write {
            port: route.port.clone(),
            reason: e.to_string(),
        })
}

// ============================================================================
// Port enumeration
// ============================================================================

/// Information about an available serial port
#[derive(Clone, Debug)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// One-line description for terminal output
    pub fn describe(&self) -> String {
        let mut line = format!("{} ({})", self.port_name, self.port_type);
        if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            line.push_str(&format!(" {:04x}:{:04x}", vid, pid));
        }
        if let Some(ref product) = self.product {
            line.push_str(&format!(" {}", product));
        }
        line
    }
}

/// List available serial ports
///
/// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.* devices.
/// The tty devices block on open waiting for carrier detect.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, String> {
    let ports =
        serialport::available_ports().map_err(|e| format!("Failed to enumerate ports: {}", e))?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    "USB".to_string(),
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::PciPort => {
                    ("PCI".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::Unknown => {
                    ("Unknown".to_string(), None, None, None, None, None)
                }
            };
            SerialPortInfo {
                port_name: p.port_name,
                port_type,
                manufacturer,
                product,
                serial_number,
                vid,
                pid,
            }
        })
        .collect())
}


#[cfg(test)]
mod tests {
    use super::testing::FakeOpener;
    use super::*;

    #[test]
    fn test_write_once_writes_full_payload() {
        let opener = FakeOpener::default();
        let device = opener.with_device("P1");
        let route = RouteConfig::new("P1", 9600, "s/out", "s/in");

        write_once(&opener, &route, &[0x01, 0x02], Duration::from_secs(1)).unwrap();

        let dev = device.lock().unwrap();
        assert_eq!(dev.written, vec![0x01, 0x02]);
        assert_eq!(dev.opens, 1);
    }

    #[test]
    fn test_write_once_reports_open_and_write_errors() {
        let opener = FakeOpener::default();
        let route = RouteConfig::new("missing", 9600, "s/out", "s/in");
        assert!(matches!(
            write_once(&opener, &route, b"x", Duration::from_secs(1)),
            Err(BridgeError::PortOpen { .. })
        ));

        let device = opener.with_device("busy");
        device.lock().unwrap().fail_writes = true;
        let route = RouteConfig::new("busy", 9600, "s/out", "s/in");
        assert!(matches!(
            write_once(&opener, &route, b"x", Duration::from_secs(1)),
            Err(BridgeError::Write { .. })
        ));
    }

    #[test]
    fn test_port_info_describe() {
        let info = SerialPortInfo {
            port_name: "/dev/ttyUSB0".to_string(),
            port_type: "USB".to_string(),
            manufacturer: None,
            product: Some("CP2102".to_string()),
            serial_number: None,
            vid: Some(0x10c4),
            pid: Some(0xea60),
        };
        assert_eq!(info.describe(), "/dev/ttyUSB0 (USB) 10c4:ea60 CP2102");
    }
}
