//! Source catalog: which rasters cover a given area, and in what order.
//!
//! The catalog is a network-backed, best-effort service in production; the
//! pipeline only depends on the [`CatalogClient`] trait. [`MemoryCatalog`]
//! implements it over a descriptor list loaded from a JSON file, which is
//! both the standalone deployment mode and the test double.
//!
//! # Ordering
//!
//! `resolve` returns candidates ordered by descending priority score, ties
//! broken by ascending source identifier. The compositor consumes sources
//! in exactly this order, so the ordering is part of the rendering contract:
//! reordering the catalog changes which pixels win.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::{Bounds, Crs, GeoTransform};

// =============================================================================
// Errors
// =============================================================================

/// The catalog could not be queried (I/O, parse, or service failure).
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CatalogError(pub String);

// =============================================================================
// Descriptors
// =============================================================================

/// Georeferencing and pixel layout for one source raster.
///
/// Sources are stored as raw gridded rasters: 8-bit samples, row-major,
/// band-interleaved. Three bands are RGB with an optional nodata value;
/// four bands are RGBA where alpha carries the validity mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterMeta {
    pub width: u32,
    pub height: u32,
    pub bands: u8,
    /// EPSG code of the raster's native CRS
    pub epsg: u32,
    pub transform: GeoTransform,
    /// Sample value marking invalid pixels in 3-band rasters
    #[serde(default)]
    pub nodata: Option<u8>,
}

impl RasterMeta {
    pub fn crs(&self) -> Crs {
        Crs::from_epsg(self.epsg)
    }

    /// Size in bytes the stored object must have for this layout.
    pub fn expected_bytes(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.bands as u64
    }

    /// Full raster extent in its native CRS.
    pub fn native_bounds(&self) -> Bounds {
        self.transform.bounds(self.width, self.height)
    }
}

/// One candidate source raster, as resolved by the catalog.
///
/// Descriptors are immutable once resolved for a request; downstream stages
/// share them by `Arc` rather than copying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Stable identifier, also the tie-break key for equal priorities
    pub id: String,
    /// Storage location: `s3://bucket/key`, `file:///path`, or a bare path
    pub location: String,
    /// Approximate coverage in WGS84 degrees
    pub footprint: Bounds,
    /// Higher scores win overlaps (recency, resolution, curation)
    pub priority: f64,
    /// Native ground resolution in meters per pixel
    pub resolution: f64,
    pub meta: RasterMeta,
}

// =============================================================================
// CatalogClient
// =============================================================================

/// Client interface to the source catalog service.
///
/// `resolve` takes a WGS84 bounding box and returns every source whose
/// footprint intersects it, already ordered for compositing. The service is
/// best-effort: implementations may be slow or fail outright, and the
/// orchestrator treats failure as a request error (distinct from an empty
/// result, which just means no coverage).
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn resolve(&self, bounds: &Bounds) -> Result<Vec<Arc<SourceDescriptor>>, CatalogError>;
}

// =============================================================================
// MemoryCatalog
// =============================================================================

/// In-memory catalog over a fixed descriptor list.
pub struct MemoryCatalog {
    descriptors: Vec<Arc<SourceDescriptor>>,
}

impl MemoryCatalog {
    pub fn new(descriptors: Vec<SourceDescriptor>) -> Self {
        Self {
            descriptors: descriptors.into_iter().map(Arc::new).collect(),
        }
    }

    /// Load descriptors from a JSON file (an array of [`SourceDescriptor`]).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = tokio::fs::read(path.as_ref())
            .await
            .map_err(|e| CatalogError(format!("read {}: {e}", path.as_ref().display())))?;

        let descriptors: Vec<SourceDescriptor> = serde_json::from_slice(&raw)
            .map_err(|e| CatalogError(format!("parse {}: {e}", path.as_ref().display())))?;

        Ok(Self::new(descriptors))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[async_trait]
impl CatalogClient for MemoryCatalog {
    async fn resolve(&self, bounds: &Bounds) -> Result<Vec<Arc<SourceDescriptor>>, CatalogError> {
        let mut matched: Vec<Arc<SourceDescriptor>> = self
            .descriptors
            .iter()
            .filter(|d| d.footprint.intersects(bounds))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(matched)
    }
}

// =============================================================================
// Tests
// =============================================================================
