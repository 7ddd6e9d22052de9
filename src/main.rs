//! Amuse orchestrator - operator entry point

use amuse_orchestrator::hardware::{Capabilities, DetectedHardware};
use amuse_orchestrator::session::UnavailableRuntime;
use amuse_orchestrator::{
    DownloadQueue, DownloadStatus, HardwareInventory, SettingsStore, SystemPlatform, Transfer,
    metrics,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "amuse-orchestrator")]
#[command(about = "Device inventory, hardware profiles and model downloads", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to settings file (.json or .toml)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,

    /// Print a Prometheus metrics snapshot before exiting
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect devices and print them as JSON
    Inventory,
    /// Print the hardware profile resolved for this machine
    Profile,
    /// Install catalog templates and wait for them to finish
    Download {
        /// Template ids from the settings catalog
        #[arg(required = true)]
        templates: Vec<Uuid>,

        /// Download again even when already installed
        #[arg(long)]
        force: bool,
    },
}

#[derive(Serialize)]
struct InventoryReport {
    #[serde(flatten)]
    hardware: DetectedHardware,
    capabilities: Capabilities,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
    }

    let prometheus_handle = if cli.metrics {
        Some(metrics::setup_metrics()?)
    } else {
        None
    };

    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let settings = Arc::new(SettingsStore::open(&settings_path)?);
    tracing::info!(path = ?settings_path, "Settings loaded");

    match cli.command {
        Command::Inventory => {
            let inventory = detect(settings).await?;
            if let Err(e) = inventory.refresh_live_metrics() {
                tracing::warn!(error = %e, "Live metrics unavailable");
            }
            let report = InventoryReport {
                hardware: inventory.hardware(),
                capabilities: inventory.capabilities(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Profile => {
            let inventory = detect(settings).await?;
            match inventory.hardware_profile() {
                Some(profile) => println!("{}", serde_json::to_string_pretty(&profile)?),
                None => anyhow::bail!("No hardware profiles configured"),
            }
        }
        Command::Download { templates, force } => {
            download(settings, &templates, force).await?;
        }
    }

    if let Some(handle) = prometheus_handle {
        println!("{}", handle.render());
    }

    Ok(())
}

async fn detect(settings: Arc<SettingsStore>) -> Result<Arc<HardwareInventory>> {
    // No native inference runtime is linked into the operator tool, so
    // accelerated providers probe as unsupported
    let inventory = Arc::new(HardwareInventory::new(
        Arc::new(SystemPlatform::new()),
        Arc::new(UnavailableRuntime),
        settings,
    ));

    let detector = inventory.clone();
    tokio::task::spawn_blocking(move || detector.detect())
        .await
        .context("Hardware detection task failed")?;

    Ok(inventory)
}

async fn download(settings: Arc<SettingsStore>, templates: &[Uuid], force: bool) -> Result<()> {
    let queue = DownloadQueue::start(settings, Transfer::new()?);

    let ids = templates
        .iter()
        .map(|&template| queue.enqueue(template, force))
        .collect::<Result<Vec<_>, _>>()?;

    // Print progress until every entry is done
    let mut events = queue.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let Some(progress) = event.progress {
                println!(
                    "{} {} {:.1}% (total {:.1}%)",
                    event.entry_id, progress.file, progress.file_percent, progress.total_percent
                );
            }
        }
    });

    let wait_all = async {
        let mut failed = 0;
        for &id in &ids {
            if let Some(entry) = queue.wait(id).await {
                match entry.status {
                    DownloadStatus::Installed => println!("{} installed", entry.name),
                    _ => {
                        failed += 1;
                        println!(
                            "{} {:?}: {}",
                            entry.name,
                            entry.status,
                            entry.error_message.unwrap_or_default()
                        );
                    }
                }
            }
        }
        failed
    };

    let failed = tokio::select! {
        failed = wait_all => failed,
        _ = shutdown_signal() => {
            tracing::info!("Canceling downloads, partial files are kept for resume");
            for &id in &ids {
                queue.cancel(id);
            }
            for &id in &ids {
                queue.wait(id).await;
            }
            ids.len()
        }
    };

    printer.abort();
    queue.shutdown().await;

    if failed > 0 {
        anyhow::bail!("{} of {} downloads did not install", failed, ids.len());
    }
    Ok(())
}

fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("Amuse").join("settings.json"))
        .unwrap_or_else(|| PathBuf::from("settings.json"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
