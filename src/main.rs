// src/main.rs

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serial_bridge_lib::bus::{default_client_id, SessionOptions};
use serial_bridge_lib::io::serial::list_serial_ports;
use serial_bridge_lib::relay::RestartPolicy;
use serial_bridge_lib::{onboarding, BridgeOptions};

#[derive(Parser, Debug)]
#[command(name = "serial-bridge", version, about = "Relay serial ports to and from an MQTT broker")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge (default)
    Run(RunArgs),
    /// Choose serial ports and topics and write the route file
    Configure {
        #[arg(long, default_value = "config")]
        config_dir: PathBuf,
    },
    /// List available serial ports
    Ports,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Directory holding mqtt_config.json and serial_config.json
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Directory for mqtt_serial_bridge.log
    #[arg(long, default_value = "log")]
    log_dir: PathBuf,

    /// MQTT client id (random when omitted)
    #[arg(long)]
    client_id: Option<String>,

    /// MQTT keep-alive in seconds
    #[arg(long, default_value_t = 60)]
    keep_alive: u64,

    /// Restarts allowed per serial relay before it is given up on
    #[arg(long, default_value_t = 5)]
    max_restarts: u32,
}

impl RunArgs {
    fn into_options(self) -> BridgeOptions {
        let session = SessionOptions {
            client_id: self.client_id.unwrap_or_else(default_client_id),
            keep_alive: Duration::from_secs(self.keep_alive),
            ..SessionOptions::default()
        };
        let restart = RestartPolicy {
            max_restarts: self.max_restarts,
            ..RestartPolicy::default()
        };
        BridgeOptions {
            config_dir: self.config_dir,
            log_dir: self.log_dir,
            session,
            restart,
            ..BridgeOptions::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        None => serial_bridge_lib::run(cli.run.into_options()).await,
        Some(Command::Run(args)) => serial_bridge_lib::run(args.into_options()).await,
        Some(Command::Configure { config_dir }) => onboarding::configure_routes(&config_dir).map(|_| ()),
        Some(Command::Ports) => print_ports(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_ports() -> serial_bridge_lib::BridgeResult<()> {
    let ports = list_serial_ports()
        .map_err(|e| serial_bridge_lib::BridgeError::Io(std::io::Error::other(e)))?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port.describe());
    }
    Ok(())
}
