//! annomirror-web - webhook receiver and read-only JSON API
//!
//! Refuses to start without a webhook secret.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use annomirror_common::config::MirrorConfig;
use annomirror_common::db::init_database;
use annomirror_common::webhook::WebhookVerifier;
use annomirror_sync::RemoteClient;
use annomirror_web::{build_router, AppState};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

/// Command-line arguments for annomirror-web
#[derive(Parser, Debug)]
#[command(name = "annomirror-web")]
#[command(about = "Webhook receiver and read API for the annotation mirror")]
#[command(version)]
struct Args {
    /// Config file (overrides ANNOMIRROR_CONFIG and the per-user file)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `[server] bind`
    #[arg(short, long, env = "ANNOMIRROR_BIND")]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "annomirror_web=info,annomirror_common=info,tower_http=info".into()),
        )
        .init();

    info!(
        "Starting annomirror-web v{}",
        env!("CARGO_PKG_VERSION")
    );

    let args = Args::parse();
    let config = MirrorConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    let secret = config
        .webhook
        .require_secret()
        .context("Webhook endpoint cannot run unsigned")?;
    let verifier = WebhookVerifier::new(
        secret.as_bytes(),
        &config.remote.web_url,
        config.webhook.max_body_bytes,
    )
    .context("Invalid webhook configuration")?;

    info!("Database path: {}", config.database.path.display());
    let pool = init_database(&config.database.path)
        .await
        .context("Failed to open database")?;

    let remote = RemoteClient::new(&config.remote).context("Failed to create remote client")?;
    let state = AppState::new(pool, verifier, Arc::new(remote));
    let app = build_router(state);

    let addr = match args.bind {
        Some(addr) => addr,
        None => config
            .server
            .bind
            .parse()
            .with_context(|| format!("Invalid server.bind address: {}", config.server.bind))?,
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("annomirror-web listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
