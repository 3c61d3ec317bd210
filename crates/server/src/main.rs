use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use turnstile_server::api::{self, AppState};
use turnstile_server::config::TurnstileConfig;
use turnstile_server::{store_factory, sweeper, telemetry};

/// Usage admission HTTP server.
#[derive(Parser, Debug)]
#[command(name = "turnstile-server", about = "HTTP server for usage admission")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "turnstile.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or update the counter store schema, then exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration from TOML file, or use defaults if the file does not exist.
    let config = TurnstileConfig::load(Path::new(&cli.config))?;

    telemetry::init(&config.logging);

    if !Path::new(&cli.config).exists() {
        info!(path = %cli.config, "config file not found, using defaults");
    }

    if let Some(Commands::Migrate) = cli.command {
        return run_migrate(&config).await;
    }

    let store = store_factory::create_store(&config.store).await?;
    info!(backend = %config.store.backend, "counter store ready");

    let engine = Arc::new(config.engine_builder()?.store(store).build()?);
    let retention = config.retention();

    let sweeper_handle = if config.maintenance.enabled {
        let interval = Duration::from_secs(config.maintenance.sweep_interval_seconds.max(1));
        Some(sweeper::spawn(Arc::clone(&engine), interval, retention))
    } else {
        None
    };

    let app = api::router(AppState { engine, retention });

    let host = cli.host.unwrap_or(config.server.host);
    let port = cli.port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "turnstile-server listening");

    // Serve with graceful shutdown on SIGINT / SIGTERM.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = sweeper_handle {
        handle.abort();
    }

    info!("turnstile-server shut down");
    Ok(())
}

/// Connect to the configured store, which brings its schema up to date.
async fn run_migrate(config: &TurnstileConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.store.backend == "memory" {
        info!("memory backend has no schema, nothing to migrate");
        return Ok(());
    }
    store_factory::create_store(&config.store).await?;
    info!(backend = %config.store.backend, "migrations complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
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
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
