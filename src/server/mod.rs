//! Axum-based HTTP server.
//!
//! The HTTP layer is deliberately thin: it parses tile paths, delegates to
//! [`TileRenderer`](crate::tile::TileRenderer), and maps pipeline errors to
//! status codes. Tiles outside imagery coverage are a 200 with a fully
//! transparent image, never a 404 — only genuine failures produce error
//! statuses.

mod handlers;
mod routes;

pub use handlers::{
    health_handler, tile_handler, AppState, ErrorResponse, HandlerError, HealthResponse,
    TilePathParams, TileQueryParams,
};
pub use routes::{create_router, RouterConfig};
