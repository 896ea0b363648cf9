//! WorkLogix Server - Main entry point.
//!
//! Starts the task timer service with:
//! - Structured JSON logging
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Configuration
//!
//! See [`worklogix_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! # Development mode (no auth, in-process task registry)
//! WORKLOGIX_UNSAFE_NO_AUTH=true cargo run --bin worklogix-server
//!
//! # Production mode
//! WORKLOGIX_API_TOKEN="secret-token" \
//! WORKLOGIX_TASK_SERVICE_URL="https://app.worklogix.io/api" \
//! WORKLOGIX_TASK_SERVICE_TOKEN="service-token" \
//! PORT=8080 \
//! cargo run --release --bin worklogix-server
//! ```

use std::process::ExitCode;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use worklogix_server::config::Config;
use worklogix_server::routes::{create_router, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Required environment variables (when auth enabled):");
            eprintln!("  WORKLOGIX_API_TOKEN          - Bearer token for REST and WebSocket clients");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                         - HTTP server port (default: 8080)");
            eprintln!("  RUST_LOG                     - Log level filter (default: info)");
            eprintln!("  WORKLOGIX_UNSAFE_NO_AUTH     - Disable auth (dev only, set to 'true')");
            eprintln!("  WORKLOGIX_TASK_SERVICE_URL   - External task service base URL");
            eprintln!("  WORKLOGIX_TASK_SERVICE_TOKEN - Bearer token for the task service");
            eprintln!("  WORKLOGIX_CHANNEL_CAPACITY   - Change channel capacity (default: 1000)");
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => {
            info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "Server error");
            ExitCode::from(1)
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let auth_mode = if config.unsafe_no_auth {
        "disabled (UNSAFE)"
    } else {
        "enabled"
    };
    info!(
        port = config.port,
        auth_mode = auth_mode,
        task_backend = if config.task_service_url.is_some() { "remote" } else { "registry" },
        channel_capacity = config.channel_capacity,
        "WorkLogix server starting"
    );

    let port = config.port;
    let state = AppState::new(config).context("failed to initialize application state")?;
    let app = create_router(state);

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    info!(port, address = %bind_addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated unexpectedly")?;

    info!("Server shutting down gracefully");
    Ok(())
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` (default `info,tower_http=debug`).
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
