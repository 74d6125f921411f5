//! dankd: DankLinux system daemon
//!
//! Serves subsystem state (brightness, network, printers, plugins) to shell
//! clients over a newline-delimited JSON Unix socket.
//!
//! Usage:
//!   dankd                          # Socket under $XDG_RUNTIME_DIR
//!   dankd --verbose --print-docs   # Debug logging plus the method table
//!   dankd --socket /tmp/dank.sock  # Explicit socket path

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dank_protocol::{API_VERSION, METHOD_DOCS};
use dank_server::{
    DankServer, InitConfig, ManagerRegistry, ServiceKind, cups_factory, spawn_initializers,
};
use dank_services::plugins::{PluginsService, default_plugins_dir};
use dank_transport::socket::{cleanup_stale_sockets, socket_path};
use dank_transport::{TransportConfig, TransportServer};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dankd", about = "DankLinux system daemon", version)]
struct Cli {
    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file (defaults to $XDG_STATE_HOME/dankd/dankd.log if no path given)
    #[arg(long, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,

    /// Log the method table at startup
    #[arg(long)]
    print_docs: bool,

    /// Seconds between network manager init attempts
    #[arg(long, default_value = "30")]
    network_retry_secs: u64,

    /// Root of the sysfs class tree used for brightness and network
    #[arg(long, default_value = dank_server::init::DEFAULT_SYSFS_ROOT)]
    sysfs_root: PathBuf,

    /// Installed plugins directory
    #[arg(long)]
    plugins_dir: Option<PathBuf>,

    /// Socket path (defaults to <runtime dir>/danklinux-<pid>.sock)
    #[arg(long)]
    socket: Option<PathBuf>,
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let Some(ref log_file_arg) = cli.log_file else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(());
    };

    let log_path = if log_file_arg == "DEFAULT" {
        dirs::state_dir()
            .or_else(dirs::cache_dir)
            .unwrap_or_else(std::env::temp_dir)
            .join("dankd/dankd.log")
    } else {
        PathBuf::from(log_file_arg)
    };
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();

    eprintln!("Logging to {}", log_path.display());
    Ok(())
}

fn print_docs() {
    info!("Methods:");
    for (method, doc) in METHOD_DOCS {
        info!("  {method:<28} {doc}");
    }
}

async fn wait_for_shutdown() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    info!("dankd {} (API version {API_VERSION})", env!("CARGO_PKG_VERSION"));
    if cli.print_docs {
        print_docs();
    }

    cleanup_stale_sockets();

    let registry = Arc::new(ManagerRegistry::new().with_lazy(ServiceKind::Cups, cups_factory()));

    let plugins_dir = cli
        .plugins_dir
        .clone()
        .or_else(default_plugins_dir)
        .unwrap_or_else(|| PathBuf::from("plugins"));
    debug!("Plugins directory: {}", plugins_dir.display());
    let server = Arc::new(DankServer::new(registry.clone(), PluginsService::new(plugins_dir)));

    let config = TransportConfig {
        socket_path: cli.socket.clone().unwrap_or_else(socket_path),
    };
    let mut transport = TransportServer::start(config, server)
        .await
        .context("Failed to start socket server")?;

    let mut initializers = spawn_initializers(
        registry.clone(),
        InitConfig {
            sysfs_root: cli.sysfs_root.clone(),
            network_retry: Duration::from_secs(cli.network_retry_secs.max(1)),
        },
    );

    info!("Ready on {}", transport.socket_path().display());
    wait_for_shutdown().await;

    info!("Shutting down...");
    initializers.abort_all();
    transport.stop().await;
    registry.close_all().await;
    info!("Stopped");
    Ok(())
}
