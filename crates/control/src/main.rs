//! mirrorctl
//!
//! Command-line front end for device connections, screen mirroring and
//! remote shell commands.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use control::config::Config;
use control::Controller;
use protocol::{CommandResult, DeviceId, SessionOptions, SessionState};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Exit status used when a remote command was killed after timing out.
const TIMED_OUT_EXIT: u8 = 124;

/// mirrorctl - control network-attached Android devices.
#[derive(Parser, Debug)]
#[command(name = "mirrorctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Check whether a device accepts TCP connections
    Probe {
        /// Device address (host or host:port)
        address: String,
    },

    /// Connect the transport to a device
    Connect {
        /// Device address (host or host:port)
        address: String,
    },

    /// Disconnect the transport from a device
    Disconnect {
        /// Device address (host or host:port)
        address: String,
    },

    /// List devices the transport reports as online
    Devices {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Check whether a device grants superuser elevation
    Root {
        /// Device identifier
        device: String,
    },

    /// Run a shell command on a device
    Exec {
        /// Device identifier
        device: String,

        /// Run the command as superuser
        #[arg(long, short)]
        root: bool,

        /// Kill the command after this many seconds
        #[arg(long, short)]
        timeout: Option<u64>,

        /// Command line to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Connect to a device and mirror its screen until interrupted
    Mirror {
        /// Device address (host or host:port)
        address: String,

        /// Limit the larger video dimension, in pixels
        #[arg(long, short = 'm')]
        max_size: Option<u32>,

        /// Video bit rate in Mbps
        #[arg(long, short = 'b')]
        bit_rate: Option<u32>,

        /// Crop region as width:height:x:y
        #[arg(long)]
        crop: Option<String>,

        /// Turn the device screen off while mirroring
        #[arg(long)]
        turn_screen_off: bool,

        /// Keep the device awake while mirroring
        #[arg(long)]
        stay_awake: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    let _log_guard = init_tracing(&config, cli.verbose)?;
    if let Some(config_path) = &cli.config {
        tracing::debug!(path = %config_path.display(), "Using config file");
    }

    if let Commands::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(ExitCode::SUCCESS);
    }

    let controller = Controller::new(config)?;

    match cli.command {
        Commands::Probe { address } => {
            let address = controller.parse_address(&address)?;
            if controller.probe_reachable(&address).await {
                println!("{address} is reachable");
            } else {
                println!("{address} is not reachable");
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Connect { address } => {
            let address = controller.parse_address(&address)?;
            let state = controller.connect(&address).await;
            println!("{address}: {state}");
            if !state.is_connected() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Disconnect { address } => {
            let address = controller.parse_address(&address)?;
            if controller.disconnect(&address).await {
                println!("disconnected {address}");
            } else {
                eprintln!("Error: failed to disconnect {address}");
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Devices { json } => {
            let devices = controller.list_connected().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No devices connected");
            } else {
                for device in devices {
                    println!("{device}");
                }
            }
        }
        Commands::Root { device } => {
            let device = DeviceId::new(device);
            if controller.has_root_access(&device).await {
                println!("{device}: root available");
            } else {
                println!("{device}: root not available");
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Exec {
            device,
            root,
            timeout,
            command,
        } => {
            let device = DeviceId::new(device);
            let result = controller
                .execute(
                    &device,
                    &command.join(" "),
                    root,
                    timeout.map(Duration::from_secs),
                )
                .await?;
            print!("{}", result.stdout);
            eprint!("{}", result.stderr);
            if !result.success() {
                return Ok(ExitCode::from(exit_status(&result)));
            }
        }
        Commands::Mirror {
            address,
            max_size,
            bit_rate,
            crop,
            turn_screen_off,
            stay_awake,
        } => {
            let options = SessionOptions {
                max_size,
                bit_rate_mbps: bit_rate,
                crop,
                turn_screen_off,
                stay_awake,
            };
            let state = run_mirror(&controller, &address, options).await;
            controller.shutdown().await;
            if matches!(state?, SessionState::Failed { .. }) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Config => {}
    }

    Ok(ExitCode::SUCCESS)
}

/// Connects, mirrors until the server exits or the user interrupts, and
/// returns the session's final state.
async fn run_mirror(
    controller: &Controller,
    address: &str,
    options: SessionOptions,
) -> anyhow::Result<SessionState> {
    let address = controller.parse_address(address)?;
    let state = controller.connect(&address).await;
    if !state.is_connected() {
        anyhow::bail!("Failed to connect to {address}: {state}");
    }

    let device_id = address.device_id();
    let session = controller
        .start(&device_id, options)
        .await
        .with_context(|| format!("Failed to start mirroring {device_id}"))?;
    let mut output = session.output();

    tracing::info!(device_id = %device_id, session_id = %session.id(), "Mirroring, press Ctrl-C to stop");

    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            line = output.next_line() => match line {
                Some(line) => println!("{line}"),
                None => break,
            },
            () = &mut shutdown => {
                tracing::info!("Received shutdown signal");
                break;
            }
        }
    }

    controller.stop(&device_id).await?;
    let state = session.wait().await;
    println!("{device_id}: session {state}");
    Ok(state)
}

/// Initializes tracing to stderr, or to the configured log file.
///
/// The returned guard must be held until exit so buffered lines are flushed.
fn init_tracing(config: &Config, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.logging.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let Some(log_file) = &config.logging.log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = log_file
        .file_name()
        .with_context(|| format!("log_file has no file name: {}", log_file.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Maps a remote command result to a local exit status.
///
/// Codes outside the range a process can report become 1.
fn exit_status(result: &CommandResult) -> u8 {
    if result.was_killed() {
        TIMED_OUT_EXIT
    } else {
        u8::try_from(result.exit_code).unwrap_or(1)
    }
}
