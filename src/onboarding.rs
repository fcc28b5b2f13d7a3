// src/onboarding.rs
//
// Interactive first-run capture: broker settings when `mqtt_config.json` is
// missing, and the route list written by `serial-bridge configure`.
//
// Prompts read from any `BufRead` and write to any `Write` so they can be
// driven from tests. Invalid answers are reported and asked again.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, BridgeResult, ConfigError};
use crate::io::serial::list_serial_ports;
use crate::settings::{self, BusConfig, RouteConfig};

/// Operating system name recorded with each captured route
pub fn system_type() -> &'static str {
    if cfg!(target_os = "windows") {
        "Windows"
    } else if cfg!(target_os = "linux") {
        "Linux"
    } else if cfg!(target_os = "macos") {
        "macOS"
    } else {
        "Unknown"
    }
}

/// Print `prompt` and read one trimmed line. End of input is an error.
fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, prompt: &str) -> io::Result<String> {
    write!(output, "{}", prompt)?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "input closed before configuration was complete",
        ));
    }
    Ok(line.trim().to_string())
}

fn ask_non_empty<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    prompt: &str,
    what: &str,
) -> io::Result<String> {
    loop {
        let answer = ask(input, output, prompt)?;
        if !answer.is_empty() {
            return Ok(answer);
        }
        writeln!(output, "Error: {} must not be empty, please try again", what)?;
    }
}

// ============================================================================
// Broker settings
// ============================================================================

pub fn prompt_bus_config<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> io::Result<BusConfig> {
    let broker = ask_non_empty(input, output, "MQTT broker address: ", "broker address")?;

    let port = loop {
        let answer = ask(input, output, "MQTT broker port: ")?;
        match answer.parse::<u16>() {
            Ok(port) if port > 0 => break port,
            _ => writeln!(output, "Error: port must be a number between 1 and 65535")?,
        }
    };

    loop {
        let username = ask(input, output, "MQTT username (leave blank for no authentication): ")?;
        let password = ask(input, output, "MQTT password (leave blank for no authentication): ")?;
        let config = BusConfig {
            broker: broker.clone(),
            port,
            username: Some(username),
            password: Some(password),
        };
        match config.validate() {
            Ok(config) => return Ok(config),
            Err(e) => writeln!(output, "Error: {}", e)?,
        }
    }
}

/// Load the broker settings, prompting for them on a terminal when the file
/// does not exist yet. A non-interactive run with no file is a config error.
pub fn ensure_bus_config(config_dir: &Path, interactive: bool) -> BridgeResult<BusConfig> {
    match settings::load_bus_config(config_dir) {
        Err(ConfigError::Missing(path)) if interactive => {
            tlog!("[config] {} not found; asking for broker settings", path.display());
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let mut output = io::stdout();
            let config = prompt_bus_config(&mut input, &mut output)?;
            match settings::save_bus_config(config_dir, &config) {
                Ok(saved) => tlog!("[config] Broker settings saved to {}", saved.display()),
                Err(e) => tlog!(error: "[config] {}", e),
            }
            Ok(config)
        }
        other => Ok(other?),
    }
}

// ============================================================================
// Routes
// ============================================================================

/// Ask for routes until the user declines to add another.
///
/// Ports must come from `available` and may only be used once.
pub fn prompt_routes<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    available: &[String],
) -> io::Result<Vec<RouteConfig>> {
    let mut routes: Vec<RouteConfig> = Vec::new();

    loop {
        let port = loop {
            let answer = ask(input, output, "Serial port to use (e.g. COM3 or /dev/ttyUSB0): ")?;
            if !available.contains(&answer) {
                writeln!(output, "Error: {} is not in the list of available ports", answer)?;
            } else if routes.iter().any(|r| r.port == answer) {
                writeln!(output, "Error: {} already has a route", answer)?;
            } else {
                break answer;
            }
        };

        let baud_rate = loop {
            let answer = ask(input, output, "Baud rate (e.g. 9600, 115200): ")?;
            match answer.parse::<u32>() {
                Ok(baud) if baud > 0 => break baud,
                _ => writeln!(output, "Error: baud rate must be a positive integer")?,
            }
        };

        let outbound = ask_non_empty(
            input,
            output,
            "Topic to publish port data to (e.g. serial/send/data): ",
            "publish topic",
        )?;
        let inbound = ask_non_empty(
            input,
            output,
            "Topic to write to the port from (e.g. serial/receive/commands): ",
            "subscribe topic",
        )?;

        let mut route = RouteConfig::new(port, baud_rate, outbound, inbound);
        route.system = Some(system_type().to_string());
        routes.push(route);

        let more = ask(input, output, "Add another serial port? (y/n): ")?.to_lowercase();
        if more != "y" && more != "yes" {
            return Ok(routes);
        }
    }
}

/// `serial-bridge configure`: list ports, prompt for routes and write the
/// route file. Returns the file written, or `None` when nothing was saved.
pub fn configure_routes(config_dir: &Path) -> BridgeResult<Option<PathBuf>> {
    let ports = list_serial_ports().map_err(|e| BridgeError::Io(io::Error::other(e)))?;
    let available: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();

    writeln!(output, "System: {}", system_type())?;
    if available.is_empty() {
        writeln!(output, "No serial ports available; nothing to configure")?;
        return Ok(None);
    }
    writeln!(output, "Available ports:")?;
    for port in &ports {
        writeln!(output, "  {}", port.describe())?;
    }

    let routes = prompt_routes(&mut input, &mut output, &available)?;
    if routes.is_empty() {
        writeln!(output, "No routes added")?;
        return Ok(None);
    }
    let path = settings::save_routes(config_dir, &routes).map_err(|e| BridgeError::Io(io::Error::other(e)))?;
    writeln!(output, "Saved {} route(s) to {}", routes.len(), path.display())?;
    Ok(Some(path))
}
