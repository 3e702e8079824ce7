use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::{LogFormat, LoggingConfig, TurnstileConfig};
use turnstile::http::HttpServer;
use turnstile::ratelimit::RateLimiter;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "turnstile")]
#[command(about = "HTTP service with sliding window admission control", version)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(short, long)]
    listen_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.listen_addr {
        config.server.listen_addr = addr;
    }

    init_tracing(&config.logging)?;

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        info!(path = %path.display(), "Loaded configuration file");
    }
    info!(
        listen_addr = %config.server.listen_addr,
        requests_per_window = config.rate_limiting.requests_per_window,
        window_seconds = config.rate_limiting.window_seconds,
        bypass_paths = ?config.rate_limiting.bypass_paths,
        "Configuration loaded"
    );

    // Initialize the rate limiter and its eviction sweep
    let limit = config.rate_limiting.window_limit()?;
    let rate_limiter = Arc::new(RateLimiter::with_bypass_paths(
        limit,
        config.rate_limiting.bypass_paths.iter().cloned(),
    ));
    let sweeper = rate_limiter.spawn_sweeper();
    info!("Rate limiter initialized");

    let server = HttpServer::new(config.server.listen_addr, rate_limiter);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server_task = tokio::spawn(server.serve_with_shutdown(async move {
        let _ = stop_rx.await;
    }));

    tokio::select! {
        result = &mut server_task => {
            sweeper.shutdown().await;
            return Ok(result??);
        }
        _ = shutdown_signal() => {}
    }

    let _ = stop_tx.send(());
    match tokio::time::timeout(config.server.shutdown_timeout(), &mut server_task).await {
        Ok(result) => result??,
        Err(_) => {
            warn!(
                timeout_secs = config.server.shutdown_timeout_secs,
                "Graceful shutdown timed out, dropping open connections"
            );
            server_task.abort();
        }
    }

    sweeper.shutdown().await;

    info!("Turnstile stopped");
    Ok(())
}

/// Install the global subscriber for the configured level and format.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&logging.level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
