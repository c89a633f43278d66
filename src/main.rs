//! entity-cache: budgeted image and volume cache service.
//!
//! Runs the cache behind an admin HTTP API, with a synthetic loader standing
//! in for format-specific decoders.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use entity_cache::cache::EntityCache;
use entity_cache::config::{Cli, Config};
use entity_cache::loader::synthetic::SyntheticLoader;
use entity_cache::metrics::CacheMetrics;
use entity_cache::server::admin_api::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "entity_cache=debug,tower_http=debug"
    } else {
        "entity_cache=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("entity-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    let config = Arc::new(config);

    info!(
        max_budget_bytes = config.cache.max_budget_bytes,
        frame_bytes = ?config.loader.frame_bytes(),
        volume_bytes = ?config.loader.volume_bytes(),
        "Configuration loaded"
    );

    // Initialize the cache.
    let metrics = Arc::new(CacheMetrics::new()?);
    let cache = EntityCache::builder()
        .with_max_budget(config.cache.max_budget_bytes)
        .with_metrics(metrics)
        .build()?;

    let loader = Arc::new(SyntheticLoader::new(config.loader.clone()));

    // Build application state.
    let state = Arc::new(AppState {
        cache,
        loader,
        config: config.clone(),
        start_time: Instant::now(),
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    info!(addr = %listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
