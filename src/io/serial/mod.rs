// src/io/serial/mod.rs
//
// Serial port access for the bridge.
//
// Features:
// - Opening ports with per-route line settings (SystemPortOpener)
// - A narrow SerialLink trait so relays can be driven by in-memory ports in tests
// - Port enumeration for onboarding and the `ports` command

pub mod port;
pub(crate) mod utils;

pub use port::{list_serial_ports, PortOpener, SerialLink, SerialPortInfo, SystemPortOpener};
pub use utils::Parity;
