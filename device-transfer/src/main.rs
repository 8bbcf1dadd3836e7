//! Device Transfer - Main entry point
//!
//! Pulls device directories into a host tree, or pushes a local path back.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use device_transfer::{
    config::Config,
    daemon::shutdown::{spawn_cancel_watch, ShutdownCoordinator},
    utils, AdbBridge, ProgressSnapshot, TransferEngine, TransferReport, TransferStatus,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Device-control executable (overrides config)
    #[arg(long, value_name = "PATH", global = true)]
    adb: Option<PathBuf>,

    /// Print progress snapshots as JSON lines on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pull one or more device paths into a local directory
    Pull {
        /// Device serial
        #[arg(short, long)]
        device: String,

        /// Local directory receiving one entry per source
        #[arg(long, value_name = "DIR")]
        dest: PathBuf,

        /// Device paths to pull
        #[arg(required = true)]
        sources: Vec<String>,
    },

    /// Push a local file or directory to the device
    Push {
        /// Device serial
        #[arg(short, long)]
        device: String,

        local: PathBuf,

        remote: String,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(adb) = args.adb {
        config.device.executable = adb;
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }

    // Initialize logging
    utils::logger::init(&config.log.level, config.log.is_json())?;

    tracing::info!(
        "Starting device-transfer v{} (device tool: {})",
        env!("CARGO_PKG_VERSION"),
        config.device.executable.display()
    );

    let bridge = Arc::new(AdbBridge::new(config.device.executable.clone()));
    let engine = Arc::new(TransferEngine::new(bridge, config.transfer.clone()));

    let shutdown_coordinator = Arc::new(ShutdownCoordinator::new());
    let cancel_watch = spawn_cancel_watch(&shutdown_coordinator, Arc::clone(&engine));
    let signal_handle = {
        let coordinator = Arc::clone(&shutdown_coordinator);
        tokio::spawn(async move { coordinator.wait_for_signal().await })
    };

    let json = args.json;
    let on_progress = move |snapshot: ProgressSnapshot| print_progress(&snapshot, json);

    let report = match args.command {
        Commands::Pull {
            device,
            dest,
            sources,
        } => engine.run_transfer(&device, &sources, &dest, on_progress).await?,
        Commands::Push {
            device,
            local,
            remote,
        } => engine.run_restore(&device, &local, &remote, on_progress).await?,
        Commands::ShowConfig => {
            print!("{}", config.to_toml()?);
            return Ok(ExitCode::SUCCESS);
        }
    };

    signal_handle.abort();
    cancel_watch.abort();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(exit_code(&report))
}

fn print_progress(snapshot: &ProgressSnapshot, json: bool) {
    if json {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("Failed to serialize progress: {}", e),
        }
    } else {
        tracing::info!(
            "[{}/{}] {}% {} {} {}",
            snapshot.current,
            snapshot.total,
            snapshot.overall_percent,
            snapshot.current_file,
            snapshot.speed,
            snapshot.eta
        );
    }
}

fn exit_code(report: &TransferReport) -> ExitCode {
    match report.status {
        TransferStatus::Cancelled => ExitCode::from(130),
        TransferStatus::Completed if report.success => ExitCode::SUCCESS,
        TransferStatus::Completed => ExitCode::FAILURE,
    }
}
