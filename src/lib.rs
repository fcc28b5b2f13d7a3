// src/lib.rs
//
// serial-bridge: relays raw byte streams between serial ports and an MQTT
// broker, one route (port + outbound topic + inbound topic) per port.

#[macro_use]
mod logging;

pub mod backoff;
pub mod bridge;
pub mod bus;
pub mod error;
pub mod io;
pub mod onboarding;
pub mod relay;
pub mod routes;
pub mod settings;

pub use bridge::{shutdown_signal, Bridge, BridgeOptions};
pub use error::{BridgeError, BridgeResult, ConfigError};
pub use logging::{init_file_logging, stop_file_logging, LOG_FILE_NAME};

use std::io::IsTerminal;

/// Run the bridge until SIGINT/SIGTERM.
///
/// Startup errors (configuration, first broker connection) are logged and
/// returned; the caller turns them into a failing exit status.
pub async fn run(options: BridgeOptions) -> BridgeResult<()> {
    if let Err(e) = init_file_logging(&options.log_dir) {
        tlog!(warn: "[setup] {}; logging to console only", e);
    }

    let result = start(options).await;
    if let Err(ref e) = result {
        tlog!(error: "[setup] {}", e);
    }

    stop_file_logging();
    result
}

async fn start(options: BridgeOptions) -> BridgeResult<()> {
    let interactive = std::io::stdin().is_terminal();
    let config_dir = options.config_dir.clone();
    // May prompt on stdin, so keep it off the async workers
    let bus = tokio::task::spawn_blocking(move || onboarding::ensure_bus_config(&config_dir, interactive))
        .await
        .map_err(|e| BridgeError::Io(std::io::Error::other(e)))??;

    let routes = settings::load_routes(&options.config_dir)?;
    if routes.is_empty() {
        tlog!(
            warn: "[config] No routes in {}; the bridge will stay connected but idle",
            settings::route_config_path(&options.config_dir).display()
        );
    }

    Bridge::new(bus, routes, options)?.run(shutdown_signal()).await
}
