//! # Mosaic Tiler
//!
//! An on-demand map tile server over aerial and satellite raster imagery.
//!
//! Given a Web Mercator tile coordinate, the service resolves which source
//! rasters cover it, reads the minimal pixel windows from each (via ranged
//! reads against S3 or local files), reprojects and resamples every source
//! onto the tile grid, composites overlaps by priority, and encodes the
//! result as PNG or JPEG. Nothing is pre-tiled: every tile is synthesized
//! per request and memoized in a bounded cache.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`io`] - Byte-range readers (S3, local file) and the block cache
//! - [`geo`] - CRS transforms, georeferencing, and the XYZ tile grid
//! - [`catalog`] - Source descriptors and the catalog client
//! - [`raster`] - Storage dispatch, the handle pool, and windowed reads
//! - [`tile`] - Reprojection, compositing, encoding, caching, rendering
//! - [`server`] - Axum HTTP surface
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use mosaic_tiler::catalog::MemoryCatalog;
//! use mosaic_tiler::geo::TileCoordinate;
//! use mosaic_tiler::raster::{HandlePool, ObjectStore};
//! use mosaic_tiler::tile::{RenderParams, TileRenderer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let catalog = MemoryCatalog::from_file("catalog.json").await.unwrap();
//!     let store = ObjectStore::new(None, None);
//!     let pool = HandlePool::new(store);
//!     let renderer = TileRenderer::new(catalog, pool);
//!
//!     let coord = TileCoordinate::new(10, 5, 3).unwrap();
//!     let tile = renderer.render(coord, RenderParams::default()).await.unwrap();
//!     println!("{} bytes of {}", tile.data.len(), tile.content_type);
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod geo;
pub mod io;
pub mod raster;
pub mod server;
pub mod tile;

// Re-export commonly used types
pub use catalog::{CatalogClient, CatalogError, MemoryCatalog, RasterMeta, SourceDescriptor};
pub use config::Config;
pub use error::{IoError, RenderError, SourceError};
pub use geo::{Bounds, Crs, GeoTransform, PointTransform, TileCoordinate, TILE_SIZE};
pub use io::{create_s3_client, BlockCache, FileRangeReader, RangeReader, S3RangeReader};
pub use raster::{HandlePool, ObjectStore, PixelWindow, RasterHandle, RasterStore, StoreReader};
pub use server::{create_router, AppState, RouterConfig};
pub use tile::{
    composite, reproject, source_set_fingerprint, BlendMode, CompositeTile, OutputFormat,
    RenderParams, ReprojectedTile, ResampleKernel, TileCache, TileCacheKey, TileEncoder,
    TileRenderer, TileResponse,
};
