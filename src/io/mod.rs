// src/io/mod.rs
//
// Device I/O for the bridge. Only serial ports are bridged; the MQTT side
// lives in `crate::bus`.

pub mod serial;
