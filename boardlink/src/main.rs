//! boardlink - serial chessboard to UCI engine bridge.
//!
//! Opens the board controller's serial port, launches a UCI engine and then
//! relays: every `FEN:<position>` line from the board is answered with
//! `MOVE:<uci>` computed by the engine. Anything else the board sends is
//! logged and ignored.
//!
//! Startup failures (serial port or engine) exit with a non-zero status.
//! Ctrl-C stops the loop; the engine is quit and the port closed on the way
//! out regardless of why the loop ended.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use engine::{EngineConfig, UciEngine};

mod config;
mod controller;
mod error;
mod line_buffer;
mod protocol;
mod serial;

use config::LoopSettings;
use controller::Controller;
use error::{BridgeError, BridgeResult};
use serial::{SerialLink, SerialPort};

/// Top-level CLI arguments.
///
/// With no subcommand the bridge runs until interrupted.
#[derive(Parser)]
#[command(name = "boardlink", about = "Bridge a serial chessboard to a UCI engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    bridge: BridgeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports on this machine and exit.
    Ports,
}

/// Overrides for the bridge. Unset values fall back to env vars, then defaults.
#[derive(clap::Args, Debug)]
struct BridgeArgs {
    /// Serial device of the board controller [env: BOARDLINK_SERIAL_PORT]
    #[arg(short, long)]
    port: Option<String>,

    /// Serial baud rate [env: BOARDLINK_BAUD_RATE]
    #[arg(short, long)]
    baud: Option<u32>,

    /// UCI engine executable; Stockfish is searched for if omitted [env: BOARDLINK_ENGINE_PATH]
    #[arg(short, long)]
    engine: Option<PathBuf>,

    /// Thinking time per move in milliseconds [env: BOARDLINK_MOVE_TIME_MS]
    #[arg(short = 't', long)]
    move_time: Option<u64>,

    /// Engine search threads
    #[arg(long)]
    threads: Option<u32>,

    /// Engine hash table size in MB
    #[arg(long)]
    hash: Option<u32>,

    /// Engine skill level (0-20)
    #[arg(long)]
    skill: Option<u8>,
}

fn print_ports() -> anyhow::Result<()> {
    let ports = serial::list_ports().context("failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{}\t{}", port.name, port.kind);
    }
    Ok(())
}

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves.
async fn interrupt_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Launch the engine. On failure the already-open `link` is closed first.
async fn start_engine<L: SerialLink>(
    link: &mut L,
    config: EngineConfig,
) -> BridgeResult<UciEngine> {
    match UciEngine::spawn(config).await {
        Ok(engine) => Ok(engine),
        Err(e) => {
            if let Err(close_err) = link.close().await {
                tracing::warn!("Failed to close serial port: {}", close_err);
            }
            Err(BridgeError::EngineLaunch(e))
        }
    }
}

async fn run_bridge(args: BridgeArgs) -> BridgeResult<()> {
    let port_name = args.port.unwrap_or_else(config::get_serial_port);
    let baud_rate = args.baud.unwrap_or_else(config::get_baud_rate);

    let mut link = SerialPort::open(&port_name, baud_rate).map_err(|source| {
        BridgeError::SerialOpen {
            port: port_name.clone(),
            source,
        }
    })?;
    tracing::info!("Opened serial {} at {}", link.name(), baud_rate);

    let engine_config = EngineConfig {
        path: args.engine.or_else(config::get_engine_path),
        threads: args.threads,
        hash_mb: args.hash,
        skill_level: args.skill,
        ..Default::default()
    };
    let engine = start_engine(&mut link, engine_config).await?;
    tracing::info!(
        "Engine started: {}",
        engine.name().unwrap_or("<unnamed engine>")
    );

    let settings = LoopSettings {
        move_time_ms: args.move_time.unwrap_or_else(config::get_move_time_ms),
        ..Default::default()
    };
    tracing::debug!("Loop settings: {:?}", settings);

    let mut controller = Controller::new(link, engine, settings);
    let result = controller.run(interrupt_signal()).await;
    controller.shutdown().await;
    result
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Ports) => print_ports(),
        None => run_bridge(cli.bridge).await.map_err(anyhow::Error::from),
    };

    match result {
        Ok(()) => {
            tracing::info!("Exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
