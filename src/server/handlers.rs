//! HTTP request handlers for the tile API.
//!
//! # Endpoints
//!
//! - `GET /tiles/{z}/{x}/{y}.{ext}` - Render a tile (ext: png, jpg)
//! - `GET /health` - Health check with cache statistics

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::catalog::CatalogClient;
use crate::error::RenderError;
use crate::geo::TileCoordinate;
use crate::raster::RasterStore;
use crate::tile::{OutputFormat, RenderParams, TileRenderer};

// =============================================================================
// Application State
// =============================================================================

/// State every handler borrows: the renderer plus response defaults.
pub struct AppState<S: RasterStore + 'static, C: CatalogClient + 'static> {
    pub renderer: Arc<TileRenderer<S, C>>,

    /// Rendering parameters used when the request doesn't override them
    pub defaults: RenderParams,

    /// Cache-Control max-age in seconds for tile responses
    pub cache_max_age: u32,
}

impl<S: RasterStore, C: CatalogClient> AppState<S, C> {
    pub fn new(
        renderer: Arc<TileRenderer<S, C>>,
        defaults: RenderParams,
        cache_max_age: u32,
    ) -> Self {
        Self {
            renderer,
            defaults,
            cache_max_age,
        }
    }
}

impl<S: RasterStore, C: CatalogClient> Clone for AppState<S, C> {
    fn clone(&self) -> Self {
        Self {
            renderer: Arc::clone(&self.renderer),
            defaults: self.defaults,
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path segments of a tile request.
///
/// The final segment arrives as a filename: `{y}` bare or `{y}.{ext}`.
#[derive(Debug, Deserialize)]
pub struct TilePathParams {
    pub z: u8,
    pub x: u32,
    pub filename: String,
}

impl TilePathParams {
    /// Parse the Y coordinate and output format from the filename.
    ///
    /// A missing extension falls back to the configured default format.
    pub fn y_and_format(&self, default: OutputFormat) -> Option<(u32, OutputFormat)> {
        match self.filename.rsplit_once('.') {
            Some((y_str, ext)) => {
                let y = y_str.parse().ok()?;
                let format = OutputFormat::from_extension(ext)?;
                Some((y, format))
            }
            None => {
                let y = self.filename.parse().ok()?;
                Some((y, default))
            }
        }
    }
}

/// Optional query-string options for tile requests.
#[derive(Debug, Deserialize)]
pub struct TileQueryParams {
    /// JPEG quality (1-100); falls back to the configured default
    #[serde(default)]
    pub quality: Option<u8>,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON body attached to every error status.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Stable identifier, e.g. "invalid_request" or "catalog_error"
    pub error: String,

    /// Human-readable detail
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// Health probe payload: liveness plus cache and pool statistics.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub tile_cache_entries: usize,
    pub tile_cache_bytes: usize,
    pub open_handles: usize,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Newtype to implement `IntoResponse` for pipeline errors.
pub struct HandlerError(pub RenderError);

impl From<RenderError> for HandlerError {
    fn from(err: RenderError) -> Self {
        Self(err)
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self.0 {
            RenderError::InvalidCoordinate { .. } => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                self.0.to_string(),
            ),
            RenderError::Catalog(_) => (
                StatusCode::BAD_GATEWAY,
                "catalog_error",
                self.0.to_string(),
            ),
            RenderError::Encoding(_) | RenderError::CacheCorruption { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "render_error",
                self.0.to_string(),
            ),
        };

        if status.is_server_error() {
            error!("{message}");
        } else {
            warn!("{message}");
        }

        (status, Json(ErrorResponse::new(error_type, message))).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle tile requests.
///
/// # Endpoint
///
/// `GET /tiles/{z}/{x}/{y}.{ext}`
///
/// # Response
///
/// - `200 OK`: encoded tile; fully transparent when no imagery covers it
/// - `400 Bad Request`: malformed coordinate or unknown extension
/// - `502 Bad Gateway`: catalog unavailable
/// - `500 Internal Server Error`: encoding failure
///
/// # Headers
///
/// - `Content-Type: image/png` or `image/jpeg`
/// - `Cache-Control: public, max-age={cache_max_age}`
/// - `X-Tile-Cache-Hit: true|false`
pub async fn tile_handler<S: RasterStore, C: CatalogClient>(
    State(state): State<AppState<S, C>>,
    Path(params): Path<TilePathParams>,
    Query(query): Query<TileQueryParams>,
) -> Result<Response, HandlerError> {
    let (y, format) = params
        .y_and_format(state.defaults.format)
        .ok_or(RenderError::InvalidCoordinate {
            zoom: params.z,
            x: params.x,
            y: 0,
        })?;

    let coord = TileCoordinate::new(params.z, params.x, y)?;

    let render_params = RenderParams {
        format,
        quality: query.quality.unwrap_or(state.defaults.quality),
        ..state.defaults
    };

    let tile = state.renderer.render(coord, render_params).await?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, tile.content_type)
        .header(
            header::CACHE_CONTROL,
            format!("public, max-age={}", state.cache_max_age),
        )
        .header("X-Tile-Cache-Hit", tile.cache_hit.to_string())
        .body(axum::body::Body::from(tile.data))
        .map_err(|e| RenderError::Encoding(e.to_string()))?;

    Ok(response)
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
pub async fn health_handler<S: RasterStore, C: CatalogClient>(
    State(state): State<AppState<S, C>>,
) -> Json<HealthResponse> {
    let (cache_bytes, _, cache_entries) = state.renderer.cache_stats().await;
    let open_handles = state.renderer.open_handles().await;

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tile_cache_entries: cache_entries,
        tile_cache_bytes: cache_bytes,
        open_handles,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn params(z: u8, x: u32, filename: &str) -> TilePathParams {
        TilePathParams {
            z,
            x,
            filename: filename.to_string(),
        }
    }

    #[test]
    fn test_filename_with_png_extension() {
        let p = params(3, 1, "5.png");
        assert_eq!(
            p.y_and_format(OutputFormat::Jpeg),
            Some((5, OutputFormat::Png))
        );
    }

    #[test]
    fn test_filename_with_jpg_extension() {
        let p = params(3, 1, "5.jpg");
        assert_eq!(
            p.y_and_format(OutputFormat::Png),
            Some((5, OutputFormat::Jpeg))
        );
    }

    #[test]
    fn test_filename_without_extension_uses_default() {
        let p = params(3, 1, "5");
        assert_eq!(
            p.y_and_format(OutputFormat::Jpeg),
            Some((5, OutputFormat::Jpeg))
        );
    }

    #[test]
    fn test_filename_rejects_unknown_extension() {
        let p = params(3, 1, "5.webp");
        assert_eq!(p.y_and_format(OutputFormat::Png), None);
    }

    #[test]
    fn test_filename_rejects_garbage() {
        let p = params(3, 1, "five.png");
        assert_eq!(p.y_and_format(OutputFormat::Png), None);
    }
}
