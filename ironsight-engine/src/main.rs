//! Ironsight engine - main entry point
//!
//! Loads the bootstrap config, starts the ingest/fusion/scoring pipeline
//! and serves the HTTP/SSE control surface until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ironsight_common::config::{ConfigResolver, ConfigSource};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ironsight_engine::api::{self, AppContext};
use ironsight_engine::config::EngineConfig;
use ironsight_engine::{Pipeline, SharedState};

/// Command-line arguments for ironsight-engine
#[derive(Parser, Debug)]
#[command(name = "ironsight-engine")]
#[command(about = "Arrow impact localization and scoring engine")]
#[command(version)]
struct Args {
    /// Bootstrap config file (TOML)
    #[arg(short, long, env = "IRONSIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP port, overriding the config file
    #[arg(short, long, env = "IRONSIGHT_HTTP_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config comes first: it carries the default log level. Until it is
    // loaded a scoped subscriber keeps the resolver's messages visible.
    let (source, mut config) =
        tracing::subscriber::with_default(bootstrap_subscriber(), || -> Result<_> {
            let source = ConfigResolver::new("ironsight")
                .resolve(args.config.as_deref())
                .context("Failed to resolve config file")?;
            let config = EngineConfig::load(&source).context("Failed to load configuration")?;
            Ok((source, config))
        })?;
    if let Some(port) = args.port {
        config.http.port = port;
    }

    init_tracing(&config.logging.level);
    match &source {
        ConfigSource::File(path) => info!("Configuration loaded from {}", path.display()),
        ConfigSource::Defaults => info!("No config file found, running on compiled defaults"),
    }
    info!(
        "Starting Ironsight engine v{} ({} node(s))",
        env!("CARGO_PKG_VERSION"),
        config.nodes.len()
    );

    let state = Arc::new(SharedState::new(config.events.capacity));
    let pipeline = Pipeline::start(&config, Arc::clone(&state))
        .await
        .context("Failed to start pipeline")?;
    for addr in pipeline.node_addrs() {
        info!("Listening for hit bundles on udp://{}", addr);
    }

    let addr = SocketAddr::new(config.http.bind, config.http.port);
    let config = Arc::new(config);
    let ctx = AppContext::new(pipeline.handle(), state, config)
        .context("Failed to build API context")?;

    api::run(addr, ctx, shutdown_signal())
        .await
        .context("Server error")?;

    pipeline.shutdown();
    info!("Shutdown complete");
    Ok(())
}

/// Stderr subscriber used while the config file is being located
fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ironsight_engine=info,ironsight_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
}

/// `RUST_LOG` wins; otherwise the config level applies to our crates
fn init_tracing(level: &str) {
    let default_filter = if level.contains('=') {
        level.to_string()
    } else {
        format!(
            "ironsight_engine={0},ironsight_common={0},tower_http={0}",
            level
        )
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
