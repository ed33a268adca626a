//! hview binary — thin CLI shell over the [`hview_server`] library crate.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use hview_server::store::S3Store;
use hview_server::{api, AppContext, Config};

/// Read-only inspection server for H-files in S3-compatible object stores.
#[derive(Parser)]
#[command(name = "hview", version, about, long_about = None)]
struct Cli {
    /// Bind address (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Verbose logging (overrides DEBUG)
    #[arg(long)]
    debug: bool,
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Error: {message}");
            std::process::exit(1);
        }
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.debug {
        config.debug = true;
    }

    // Structured logging; DEBUG=true (or --debug) lowers the default level,
    // RUST_LOG overrides everything.
    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| tracing_subscriber::EnvFilter::new(format!("hview_server={default_level}")),
        ))
        .with_target(false)
        .init();

    let store = Arc::new(S3Store::new(&config));
    let ctx = AppContext::new(store);

    // CORS is wide open: the browser UI is served from elsewhere.
    let app = api::router(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive());

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await.unwrap_or_else(|e| {
        error!(bind = %bind, error = %e, "Could not bind listen address");
        std::process::exit(1);
    });

    info!(host = %config.host, port = config.port, "http://{bind}");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.unwrap();
}
