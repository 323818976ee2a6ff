//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Subcommand;
use tracing::{info, warn};
use undertow_core::{ContentSource, SessionRegistry, UndertowConfig};
use undertow_sim::{SimulatedEngine, scan_library};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
        /// Process-local storage root, purged on exit
        #[arg(long)]
        storage_dir: Option<PathBuf>,
        /// Seconds to wait for torrent metadata
        #[arg(long)]
        acquire_timeout: Option<u64>,
        /// Directory of local media served by the simulated engine
        #[arg(long)]
        library: Option<PathBuf>,
    },
    /// Print the normalized identifier of a magnet link or hash
    Identify {
        /// Magnet link or raw content hash
        source: String,
    },
    /// List the identifiers of a local media directory
    Library {
        /// Directory to scan
        dir: PathBuf,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve {
            host,
            port,
            storage_dir,
            acquire_timeout,
            library,
        } => {
            let mut config = UndertowConfig::from_env();
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = storage_dir {
                config.session.storage_dir = dir;
            }
            if let Some(seconds) = acquire_timeout {
                config.session.acquire_timeout = Duration::from_secs(seconds);
            }
            serve(config, library.as_deref()).await
        }
        Commands::Identify { source } => identify(&source),
        Commands::Library { dir } => list_library(&dir).await,
    }
}

/// Runs the server until Ctrl-C or SIGTERM, then purges all sessions.
///
/// # Errors
/// - Library directory could not be scanned
/// - Storage root could not be created
/// - Listener could not bind
pub async fn serve(config: UndertowConfig, library: Option<&Path>) -> anyhow::Result<()> {
    let engine = Arc::new(SimulatedEngine::new(config.simulation.clone()));
    if let Some(dir) = library {
        let catalog = scan_library(dir)
            .await
            .with_context(|| format!("Failed to scan library {}", dir.display()))?;
        info!("Loaded {} library titles from {}", catalog.len(), dir.display());
        for content in catalog {
            engine.add_content(content);
        }
    }

    let registry = Arc::new(SessionRegistry::new(engine, config.session.clone())?);
    install_panic_cleanup(registry.clone());

    let served = undertow_web::run_server(&config.server, registry.clone(), shutdown_signal()).await;

    registry.shutdown_all();
    served.context("HTTP server failed")?;
    info!("Shutdown complete");
    Ok(())
}

/// Purges sessions and exits when any thread panics.
fn install_panic_cleanup(registry: Arc<SessionRegistry>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        previous(panic_info);
        registry.shutdown_all();
        std::process::exit(1);
    }));
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Print the normalized identifier for `source`
///
/// # Errors
/// - Input is neither a magnet link nor a content hash
pub fn identify(source: &str) -> anyhow::Result<()> {
    let source = ContentSource::parse(source)?;
    println!("{}", source.identifier());
    Ok(())
}

/// Print every title found in `dir` with its identifier
///
/// # Errors
/// - Directory could not be read
pub async fn list_library(dir: &Path) -> anyhow::Result<()> {
    let catalog = scan_library(dir)
        .await
        .with_context(|| format!("Failed to scan library {}", dir.display()))?;

    if catalog.is_empty() {
        println!("No media found in {}", dir.display());
        return Ok(());
    }
    for content in catalog {
        println!("{}  {}", content.identifier, content.name);
    }
    Ok(())
}
