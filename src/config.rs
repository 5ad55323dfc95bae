//! Configuration for the mosaic tiler.
//!
//! Every option is a clap CLI flag with a `MOSAIC_`-prefixed environment
//! fallback, and everything except the catalog path has a sensible default.
//!
//! # Environment Variables
//!
//! - `MOSAIC_HOST` - Server bind address (default: 0.0.0.0)
//! - `MOSAIC_PORT` - Server port (default: 3000)
//! - `MOSAIC_CATALOG` - Path to the source catalog JSON file (required)
//! - `MOSAIC_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `MOSAIC_S3_REGION` - AWS region (default: us-east-1)
//! - `MOSAIC_IMAGERY_ROOT` - Root directory for relative raster paths
//! - `MOSAIC_MAX_OPEN_HANDLES` - Max concurrently open rasters (default: 64)
//! - `MOSAIC_BLOCK_SIZE` - Byte-range cache block size (default: 256KB)
//! - `MOSAIC_BLOCK_CACHE_BYTES` - Byte-range cache budget per source
//! - `MOSAIC_TILE_CACHE_BYTES` - Tile cache budget (default: 100MB)
//! - `MOSAIC_KERNEL` - Resampling kernel: nearest | bilinear
//! - `MOSAIC_BLEND` - Blend mode: over | average
//! - `MOSAIC_FORMAT` - Default output format: png | jpeg
//! - `MOSAIC_JPEG_QUALITY` - Default JPEG quality (default: 80)
//! - `MOSAIC_MAX_RENDERS` - Concurrent render limit (default: 32)
//! - `MOSAIC_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)

use std::path::PathBuf;

use clap::Parser;

use crate::io::DEFAULT_BLOCK_SIZE;
use crate::tile::{
    BlendMode, OutputFormat, ResampleKernel, DEFAULT_JPEG_QUALITY, DEFAULT_TILE_CACHE_CAPACITY,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default maximum number of concurrently open raster handles.
pub const DEFAULT_MAX_OPEN_HANDLES: usize = 64;

/// Default byte-range cache budget per source (25.6MB).
pub const DEFAULT_BLOCK_CACHE_BYTES: usize = 100 * DEFAULT_BLOCK_SIZE;

/// Default concurrent render limit.
pub const DEFAULT_MAX_RENDERS: usize = 32;

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Mosaic tiler - an on-demand map tile server over raster imagery.
///
/// Renders Web Mercator XYZ tiles by mosaicking the source rasters listed
/// in a catalog, reprojecting and compositing per request. Sources may live
/// in S3-compatible object storage or on the local filesystem.
#[derive(Parser, Debug, Clone)]
#[command(name = "mosaic-tiler")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Address the HTTP listener binds to.
    #[arg(long, default_value = DEFAULT_HOST, env = "MOSAIC_HOST")]
    pub host: String,

    /// TCP port to serve on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "MOSAIC_PORT")]
    pub port: u16,

    // =========================================================================
    // Catalog & Storage Configuration
    // =========================================================================
    /// Path to the source catalog (a JSON array of source descriptors).
    #[arg(long, env = "MOSAIC_CATALOG")]
    pub catalog: PathBuf,

    /// Endpoint URL for S3-compatible storage (MinIO and friends).
    #[arg(long, env = "MOSAIC_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region the imagery buckets live in.
    #[arg(long, default_value = DEFAULT_REGION, env = "MOSAIC_S3_REGION")]
    pub s3_region: String,

    /// Root directory that relative raster paths resolve against.
    #[arg(long, env = "MOSAIC_IMAGERY_ROOT")]
    pub imagery_root: Option<PathBuf>,

    // =========================================================================
    // Resource Limits
    // =========================================================================
    /// Maximum number of concurrently open raster handles.
    #[arg(long, default_value_t = DEFAULT_MAX_OPEN_HANDLES, env = "MOSAIC_MAX_OPEN_HANDLES")]
    pub max_open_handles: usize,

    /// Block size in bytes for the byte-range cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "MOSAIC_BLOCK_SIZE")]
    pub block_size: usize,

    /// Byte-range cache budget per source, in bytes.
    #[arg(long, default_value_t = DEFAULT_BLOCK_CACHE_BYTES, env = "MOSAIC_BLOCK_CACHE_BYTES")]
    pub block_cache_bytes: usize,

    /// Tile cache budget in bytes.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_CAPACITY, env = "MOSAIC_TILE_CACHE_BYTES")]
    pub tile_cache_bytes: usize,

    /// Maximum number of render pipelines executing at once.
    #[arg(long, default_value_t = DEFAULT_MAX_RENDERS, env = "MOSAIC_MAX_RENDERS")]
    pub max_renders: usize,

    // =========================================================================
    // Rendering Configuration
    // =========================================================================
    /// Resampling kernel for reprojection.
    #[arg(long, value_enum, default_value = "bilinear", env = "MOSAIC_KERNEL")]
    pub kernel: ResampleKernel,

    /// Blend mode for overlapping sources.
    #[arg(long, value_enum, default_value = "over", env = "MOSAIC_BLEND")]
    pub blend: BlendMode,

    /// Default output format when the request doesn't pick one.
    #[arg(long, value_enum, default_value = "png", env = "MOSAIC_FORMAT")]
    pub format: OutputFormat,

    /// Default JPEG quality for tile encoding (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "MOSAIC_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "MOSAIC_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Comma-separated list of allowed CORS origins; unset allows any.
    #[arg(long, env = "MOSAIC_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Log at debug level.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Turn off per-request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Check the option values against each other; an `Err` names the
    /// offending option.
    pub fn validate(&self) -> Result<(), String> {
        if self.catalog.as_os_str().is_empty() {
            return Err("Catalog path is required. Set --catalog or MOSAIC_CATALOG".to_string());
        }

        if self.max_open_handles == 0 {
            return Err("max_open_handles must be greater than 0".to_string());
        }
        if self.max_renders == 0 {
            return Err("max_renders must be greater than 0".to_string());
        }

        if self.block_size < 1024 || self.block_size > 16 * 1024 * 1024 {
            return Err("block_size must be between 1KB and 16MB".to_string());
        }
        if self.block_cache_bytes < self.block_size {
            return Err("block_cache_bytes must hold at least one block".to_string());
        }
        if self.tile_cache_bytes == 0 {
            return Err("tile_cache_bytes must be greater than 0".to_string());
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Tests
// =============================================================================
