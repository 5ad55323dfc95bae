//! Router configuration.
//!
//! # Route Structure
//!
//! ```text
//! /health                      - Health check
//! /tiles/{z}/{x}/{y}.{ext}     - Tile endpoint (ext: png, jpg)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mosaic_tiler::server::{create_router, RouterConfig};
//! use mosaic_tiler::tile::{RenderParams, TileRenderer};
//!
//! let renderer = Arc::new(TileRenderer::new(catalog, pool));
//! let router = create_router(renderer.clone(), RenderParams::default(), RouterConfig::default());
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! renderer.shutdown().await;
//! ```

use std::sync::Arc;

use axum::{routing::get, Router};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{health_handler, tile_handler, AppState};
use crate::catalog::CatalogClient;
use crate::raster::RasterStore;
use crate::tile::{RenderParams, TileRenderer};

// =============================================================================
// Router Configuration
// =============================================================================

/// Knobs for the HTTP surface, independent of rendering options.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// CORS origins to allow; `None` allows any
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds for tile responses
    pub cache_max_age: u32,

    /// Attach a tower-http trace layer to every request
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: 3600,
            enable_tracing: true,
        }
    }
}

// =============================================================================
// Router Creation
// =============================================================================

/// Build the service router around a renderer.
///
/// The renderer arrives as an `Arc` so the caller can keep a handle for
/// draining shared resources at shutdown.
pub fn create_router<S, C>(
    renderer: Arc<TileRenderer<S, C>>,
    defaults: RenderParams,
    config: RouterConfig,
) -> Router
where
    S: RasterStore + 'static,
    C: CatalogClient + 'static,
{
    let state = AppState::new(renderer, defaults, config.cache_max_age);

    let cors = match &config.cors_origins {
        Some(origins) => {
            let origins: Vec<http::HeaderValue> = origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET])
                .allow_headers([CONTENT_TYPE])
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET])
            .allow_headers([CONTENT_TYPE]),
    };

    let router = Router::new()
        .route("/health", get(health_handler::<S, C>))
        .route("/tiles/{z}/{x}/{filename}", get(tile_handler::<S, C>))
        .layer(cors)
        .with_state(state);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}
