//! Registry Memory
//!
//! Runs an in-memory network service registry behind the REST API.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use registry_memory::{ApiServer, ApiServerConfig, MemoryRegistry, RegistryConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// In-memory network service registry
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of this registry, recorded in call paths
    #[arg(long, env = "REGISTRY_NAME", default_value = "registry")]
    name: String,

    /// Comma-separated addresses to listen on
    #[arg(
        long,
        env = "LISTEN_ON",
        default_value = "0.0.0.0:5002",
        value_delimiter = ','
    )]
    listen_on: Vec<SocketAddr>,

    /// Default and maximum endpoint lifetime in seconds (0 = default)
    #[arg(long, env = "EXPIRE_PERIOD_SECS", default_value = "60")]
    expire_period_secs: u64,

    /// Lifetime of tokens recorded in call paths, in seconds
    #[arg(long, env = "MAX_TOKEN_LIFETIME_SECS", default_value = "600")]
    max_token_lifetime_secs: u64,

    /// Events buffered per watcher before it is disconnected
    #[arg(long, env = "WATCH_BUFFER", default_value = "1024")]
    watch_buffer: usize,

    /// Upper bound on a single REST call in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    request_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    info!("Starting Registry Memory");
    info!("  Version: {}", registry_memory::VERSION);
    info!("  Name: {}", args.name);
    info!("  Listen on: {:?}", args.listen_on);
    info!("  Expire period: {}s", args.expire_period_secs);

    let config = RegistryConfig {
        name: args.name.clone(),
        expire_period: Duration::from_secs(args.expire_period_secs),
        watch_buffer: args.watch_buffer,
        max_token_lifetime: Duration::from_secs(args.max_token_lifetime_secs),
        ..Default::default()
    };

    let registry = MemoryRegistry::new(config).context("invalid registry configuration")?;
    registry.start();

    let api_server = Arc::new(ApiServer::new(
        ApiServerConfig {
            listen_on: args.listen_on.clone(),
            request_timeout: Duration::from_secs(args.request_timeout_secs),
        },
        registry.clone(),
    ));
    let listeners = api_server.bind().await.context("failed to start REST API")?;

    let server = api_server.clone();
    let serving = tokio::spawn(async move { server.serve(listeners).await });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    registry.shutdown().await;
    api_server.shutdown();
    match serving.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("REST API stopped with error: {}", e),
        Err(e) => error!("REST API task failed: {}", e),
    }

    info!("Registry shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("tower=warn".parse()?)
        .add_directive("axum=info".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}
