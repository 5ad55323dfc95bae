//! Mosaic tiler - an on-demand map tile server over raster imagery.
//!
//! This binary wires configuration, the catalog, storage, and the renderer
//! together and starts the HTTP server.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mosaic_tiler::{
    catalog::MemoryCatalog,
    create_s3_client,
    raster::{HandlePool, ObjectStore},
    server::{create_router, RouterConfig},
    tile::{RenderParams, TileRenderer},
    Config,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Configuration:");
    info!("  Catalog: {}", config.catalog.display());
    if let Some(ref endpoint) = config.s3_endpoint {
        info!("  S3 endpoint: {}", endpoint);
    }
    info!("  S3 region: {}", config.s3_region);
    if let Some(ref root) = config.imagery_root {
        info!("  Imagery root: {}", root.display());
    }
    info!(
        "  Limits: {} open handles, {} concurrent renders",
        config.max_open_handles, config.max_renders
    );
    info!(
        "  Caches: {}MB tiles, {}MB byte-range per source",
        config.tile_cache_bytes / (1024 * 1024),
        config.block_cache_bytes / (1024 * 1024)
    );
    info!(
        "  Rendering: {:?} kernel, {:?} blend, {:?} default format, quality {}",
        config.kernel, config.blend, config.format, config.jpeg_quality
    );

    // Load the catalog up front: a bad descriptor file should fail startup,
    // not the first request
    let catalog = match MemoryCatalog::from_file(&config.catalog).await {
        Ok(catalog) => {
            info!("Loaded {} source descriptor(s)", catalog.len());
            catalog
        }
        Err(e) => {
            error!("Failed to load catalog: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Storage: S3 client plus optional local root
    let s3_client = create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;
    let store = ObjectStore::new(Some(s3_client), config.imagery_root.clone());

    let pool = HandlePool::with_capacity(
        store,
        config.max_open_handles,
        config.block_size,
        config.block_cache_bytes,
    );

    let renderer = Arc::new(TileRenderer::with_settings(
        catalog,
        pool,
        config.tile_cache_bytes,
        config.max_renders,
    ));

    let defaults = RenderParams {
        kernel: config.kernel,
        blend: config.blend,
        format: config.format,
        quality: config.jpeg_quality,
    };

    let router_config = RouterConfig {
        cors_origins: config.cors_origins.clone(),
        cache_max_age: config.cache_max_age,
        enable_tracing: !config.no_tracing,
    };

    let router = create_router(renderer.clone(), defaults, router_config);

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("Server listening on http://{}", addr);
    info!("  Tiles:  http://{}/tiles/{{z}}/{{x}}/{{y}}.png", addr);
    info!("  Health: http://{}/health", addr);

    let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());

    if let Err(e) = serve.await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    // Drop pooled handles and cached tiles before exiting
    renderer.shutdown().await;

    info!("Shutdown complete");
    ExitCode::SUCCESS
}

/// Initialize the tracing subscriber.
///
/// Respects `RUST_LOG` when set; otherwise `--verbose` selects debug level.
fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "mosaic_tiler=debug,tower_http=debug"
    } else {
        "mosaic_tiler=info"
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolve when the process receives ctrl-c.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    } else {
        info!("Shutdown signal received, draining");
    }
}
