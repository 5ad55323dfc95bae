//! Tile rendering pipeline.
//!
//! Everything between a tile coordinate and encoded image bytes lives here:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          TileRenderer                            │
//! │   resolve → acquire → read → reproject → composite → encode      │
//! │        │                                                │        │
//! │        ▼                                                ▼        │
//! │  ┌────────────┐   ┌──────────────┐   ┌───────────┐  ┌─────────┐  │
//! │  │ Catalog    │   │ HandlePool + │   │ TileCache │  │ Encoder │  │
//! │  │ (ordered   │   │ windowed     │   │ (encoded  │  │ PNG/JPEG│  │
//! │  │  sources)  │   │ reads        │   │  bytes)   │  │         │  │
//! │  └────────────┘   └──────────────┘   └───────────┘  └─────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileRenderer`]: per-request orchestrator with render coalescing
//! - [`reproject`]: per-pixel CRS transform + resampling onto the tile grid
//! - [`composite`]: priority-ordered painter's merge with validity masks
//! - [`TileEncoder`]: PNG/JPEG serialization of the composite
//! - [`TileCache`]: byte-budget LRU over encoded tiles

mod cache;
mod composite;
mod encoder;
mod renderer;
mod reproject;

pub use cache::{source_set_fingerprint, TileCache, TileCacheKey, DEFAULT_TILE_CACHE_CAPACITY};
pub use composite::{composite, BlendMode, CompositeTile};
pub use encoder::{
    clamp_quality, is_valid_quality, OutputFormat, TileEncoder, DEFAULT_JPEG_QUALITY,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use renderer::{RenderParams, TileRenderer, TileResponse};
pub use reproject::{reproject, ReprojectedTile, ResampleKernel};
