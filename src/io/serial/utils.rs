// src/io/serial/utils.rs
//
// Line settings for serial routes and their conversion to the serialport
// crate's types. Conversions are strict: an out-of-range value is a route
// configuration error, never silently replaced.

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity as SpParity, StopBits};

// ============================================================================
// Types
// ============================================================================

/// Parity setting for a route's serial port
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl Parity {
    /// Single-letter form used in `8N1`-style log output
    pub fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        }
    }
}

pub fn default_data_bits() -> u8 {
    8
}

pub fn default_stop_bits() -> u8 {
    1
}

// ============================================================================
// Conversion Functions
// ============================================================================

pub fn to_serialport_parity(p: Parity) -> SpParity {
    match p {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Convert a data bits count (5-8) to serialport's DataBits
pub fn to_serialport_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(format!("data_bits must be 5-8, got {}", other)),
    }
}

/// Convert a stop bits count (1-2) to serialport's StopBits
pub fn to_serialport_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(format!("stop_bits must be 1 or 2, got {}", other)),
    }
}

// ============================================================================
// Tests
// ============================================================================
