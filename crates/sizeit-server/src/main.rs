//! # size-it Server
//!
//! Planning poker server: sessions, live rooms and server-sent events.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! size-it
//!
//! # Picks up ./size-it.toml when present
//! size-it
//!
//! # Run with an explicit config file
//! size-it --config /etc/size-it.toml
//!
//! # Run with environment variables
//! SIZE_IT__PORT=8080 SIZE_IT__HOST=0.0.0.0 size-it
//! ```

mod config;
mod error;
mod handlers;
mod metrics;
mod render;
mod store;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "size_it=debug,sizeit_live=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match config_path() {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting size-it server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    // Start the server
    handlers::run_server(config, shutdown).await?;

    Ok(())
}

/// Value of `--config`, if given.
fn config_path() -> Option<String> {
    std::env::args().skip_while(|arg| arg != "--config").nth(1)
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        () = ctrl_c => tracing::info!("Received Ctrl-C - initiating graceful shutdown"),
        () = terminate => tracing::info!("Received SIGTERM - initiating graceful shutdown"),
    }

    shutdown.cancel();
}
