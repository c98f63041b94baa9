//! Command line sender for TinyG boards
//!
//! ```bash
//! cender ports
//! cender --port /dev/ttyUSB0 probe
//! cender --port /dev/ttyUSB0 send part.nc
//! cender --port /dev/ttyUSB0 --board tinyg-0.96 export ~/backups
//! ```

use anyhow::{bail, Context, Result};
use cender::firmware::tinyg::probe_port;
use cender::{
    init_logging, list_ports, load_config, BoardEvent, BoardType, ControllerBoard, VERSION,
};
use cender_core::{ConnectionEvent, ErrorEvent, MachineEvent, ProgrammeEvent};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

/// How long configuration discovery may take after the connect echo
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "cender")]
#[command(version, about = "Stream G-code to TinyG CNC controllers", long_about = None)]
struct Cli {
    /// Serial device, overrides the configured port
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Board variant, e.g. tinyg-0.96 or tinyg-0.97
    #[arg(short, long, global = true)]
    board: Option<BoardType>,

    /// Configuration file (.toml or .json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports that look like CNC boards
    Ports,

    /// Check whether a TinyG answers on the port
    Probe,

    /// Stream a G-code file and wait for the board to finish it
    Send {
        /// G-code file
        file: PathBuf,
    },

    /// Save the board settings to a timestamped file
    Export {
        /// Target directory
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Run the homing cycle on every installed axis
    Home,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    init_logging(&config.common.log_level, cli.json)?;
    tracing::info!("cender {}", VERSION);

    if let Some(port) = cli.port {
        config.connection.port = port;
    }
    if let Some(board) = cli.board {
        config.common.board_type = board;
    }

    match cli.command {
        Commands::Ports => return print_ports(),
        Commands::Probe => {
            let found = probe_port(&config.connection).await?;
            println!(
                "{}: {}",
                config.connection.port,
                if found { "TinyG found" } else { "no answer" }
            );
            return Ok(());
        }
        _ => {}
    }

    let board = ControllerBoard::new(config.shared());
    let mut rx = board.bus().receiver();
    board.connect().await.context("Failed to connect")?;
    wait_for_discovery(&mut rx).await?;

    let outcome = match cli.command {
        Commands::Ports | Commands::Probe => Ok(()),
        Commands::Send { file } => stream_file(&board, &mut rx, file).await,
        Commands::Export { dir } => {
            let path = board.export_settings_to(&dir).await?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Home => {
            if board.state().installed_homes.is_empty() || config_disables_homing(&board) {
                Err(anyhow::anyhow!("Board has no usable home switches"))
            } else {
                board.find_home();
                wait_until_idle(&mut rx).await
            }
        }
    };

    board.disconnect();
    outcome
}

fn config_disables_homing(board: &ControllerBoard) -> bool {
    board.config().read().common.disable_homing
}

fn print_ports() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match port.manufacturer {
            Some(manufacturer) => {
                println!("{}\t{} ({})", port.port_name, port.description, manufacturer)
            }
            None => println!("{}\t{}", port.port_name, port.description),
        }
    }
    Ok(())
}

async fn next_event(rx: &mut broadcast::Receiver<BoardEvent>) -> Result<BoardEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Ok(event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Dropped {} board events", skipped);
            }
            Err(RecvError::Closed) => bail!("Board event bus closed"),
        }
    }
}

async fn wait_for_discovery(rx: &mut broadcast::Receiver<BoardEvent>) -> Result<()> {
    let discovery = async {
        loop {
            match next_event(rx).await? {
                BoardEvent::Connection(ConnectionEvent::ConfigFetched) => return Ok(()),
                BoardEvent::Connection(ConnectionEvent::DisconnectReceived) => {
                    bail!("Board disconnected during configuration discovery")
                }
                _ => {}
            }
        }
    };
    tokio::time::timeout(DISCOVERY_TIMEOUT, discovery)
        .await
        .context("Timed out fetching the board configuration")?
}

async fn stream_file(
    board: &ControllerBoard,
    rx: &mut broadcast::Receiver<BoardEvent>,
    file: PathBuf,
) -> Result<()> {
    board
        .send_file(&file)
        .await
        .with_context(|| format!("Failed to stream {}", file.display()))?;

    loop {
        match next_event(rx).await? {
            BoardEvent::Programme(ProgrammeEvent::Progress { progress }) => {
                tracing::info!("Progress {}%", progress);
            }
            BoardEvent::Programme(ProgrammeEvent::EndOfFile) => break,
            BoardEvent::Machine(MachineEvent::LimitHit { axis, direction }) => {
                tracing::warn!("Limit hit on {} {:?}", axis, direction);
            }
            BoardEvent::Error(ErrorEvent::ErrorReceived { code, message, .. }) => {
                tracing::error!("Board error {}: {}", code, message);
            }
            BoardEvent::Connection(ConnectionEvent::DisconnectReceived) => {
                bail!("Board disconnected while streaming")
            }
            _ => {}
        }
    }

    wait_until_idle(rx).await?;
    if let Some(elapsed) = board.elapsed() {
        tracing::info!("Finished in {:.1}s", elapsed.as_secs_f64());
    }
    Ok(())
}

async fn wait_until_idle(rx: &mut broadcast::Receiver<BoardEvent>) -> Result<()> {
    loop {
        match next_event(rx).await? {
            BoardEvent::Machine(MachineEvent::Idle) => return Ok(()),
            BoardEvent::Connection(ConnectionEvent::DisconnectReceived) => {
                bail!("Board disconnected before going idle")
            }
            _ => {}
        }
    }
}
