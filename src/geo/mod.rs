//! Coordinate reference systems, affine georeferencing, and bounds math.
//!
//! CRS transforms are pure Rust via `proj4rs` with projection definitions
//! looked up from the `crs-definitions` EPSG database, so the service needs
//! no native PROJ/GDAL installation.

mod mercator;

pub use mercator::{TileCoordinate, EARTH_RADIUS, MERCATOR_MAX, TILE_SIZE};

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

// =============================================================================
// CRS
// =============================================================================

/// A coordinate reference system identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs(u32);

impl Crs {
    /// Web Mercator, the destination CRS of every tile.
    pub const WEB_MERCATOR: Crs = Crs(3857);

    /// WGS84 geographic coordinates, used for catalog footprints.
    pub const WGS84: Crs = Crs(4326);

    pub fn from_epsg(code: u32) -> Self {
        Crs(code)
    }

    pub fn epsg(&self) -> u32 {
        self.0
    }

    /// PROJ4 definition string from the crs-definitions database.
    pub fn proj_string(&self) -> Option<&'static str> {
        u16::try_from(self.0)
            .ok()
            .and_then(crs_definitions::from_code)
            .map(|def| def.proj4)
    }

    /// Whether this CRS uses geographic (lon/lat degree) coordinates.
    pub fn is_geographic(&self) -> bool {
        if let Some(proj_str) = self.proj_string() {
            proj_str.contains("+proj=longlat")
        } else {
            // 4xxx codes are overwhelmingly geographic
            self.0 == 4326 || (4000..5000).contains(&self.0)
        }
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

// =============================================================================
// Point Transform
// =============================================================================

/// A reusable point transform between two CRSes.
///
/// Construction resolves both projections once; `apply` is then cheap enough
/// to call per destination pixel. proj4rs works in radians for geographic
/// CRSes, so degree conversion happens at the edges.
pub struct PointTransform {
    source: Option<Proj>,
    target: Option<Proj>,
    source_geographic: bool,
    target_geographic: bool,
}

impl PointTransform {
    /// Build a transform from `source` to `target`.
    ///
    /// Identical EPSG codes produce an identity transform that skips proj4rs
    /// entirely.
    pub fn new(source: Crs, target: Crs) -> Result<Self, String> {
        if source == target {
            return Ok(Self {
                source: None,
                target: None,
                source_geographic: false,
                target_geographic: false,
            });
        }

        let source_str = source
            .proj_string()
            .ok_or_else(|| format!("{source} is not in the crs-definitions database"))?;
        let target_str = target
            .proj_string()
            .ok_or_else(|| format!("{target} is not in the crs-definitions database"))?;

        let source_proj = Proj::from_proj_string(source_str)
            .map_err(|e| format!("Invalid projection {source}: {e:?}"))?;
        let target_proj = Proj::from_proj_string(target_str)
            .map_err(|e| format!("Invalid projection {target}: {e:?}"))?;

        Ok(Self {
            source: Some(source_proj),
            target: Some(target_proj),
            source_geographic: source.is_geographic(),
            target_geographic: target.is_geographic(),
        })
    }

    /// Whether this transform is the identity.
    pub fn is_identity(&self) -> bool {
        self.source.is_none()
    }

    /// Transform a single point.
    pub fn apply(&self, x: f64, y: f64) -> Result<(f64, f64), String> {
        let (Some(source), Some(target)) = (&self.source, &self.target) else {
            return Ok((x, y));
        };

        let (x_in, y_in) = if self.source_geographic {
            (x.to_radians(), y.to_radians())
        } else {
            (x, y)
        };

        let mut point = (x_in, y_in, 0.0);
        transform(source, target, &mut point).map_err(|e| format!("transform failed: {e:?}"))?;

        if self.target_geographic {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }
}

// =============================================================================
// Bounds
// =============================================================================

/// An axis-aligned bounding box in some CRS.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Whether two boxes overlap. Edge-touching boxes count as intersecting,
    /// so a window exactly at a footprint boundary is not rejected.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Reproject this box by transforming its corners and edge midpoints and
    /// taking the envelope. Midpoints matter for projections that bow the
    /// edges (e.g. mercator → conic).
    pub fn transform_envelope(&self, transform: &PointTransform) -> Result<Bounds, String> {
        if transform.is_identity() {
            return Ok(*self);
        }

        let mid_x = (self.min_x + self.max_x) / 2.0;
        let mid_y = (self.min_y + self.max_y) / 2.0;
        let samples = [
            (self.min_x, self.min_y),
            (self.min_x, self.max_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (mid_x, self.min_y),
            (mid_x, self.max_y),
            (self.min_x, mid_y),
            (self.max_x, mid_y),
        ];

        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;

        for (x, y) in samples {
            let (tx, ty) = transform.apply(x, y)?;
            min_x = min_x.min(tx);
            min_y = min_y.min(ty);
            max_x = max_x.max(tx);
            max_y = max_y.max(ty);
        }

        Ok(Bounds::new(min_x, min_y, max_x, max_y))
    }
}

// =============================================================================
// GeoTransform
// =============================================================================

/// North-up affine georeferencing for a raster.
///
/// Maps pixel (col, row) to world coordinates in the raster's CRS:
///
/// ```text
/// x = origin_x + col * pixel_width
/// y = origin_y - row * pixel_height
/// ```
///
/// `origin_x`/`origin_y` locate the outer corner of the top-left pixel.
/// Rotated or sheared rasters are not supported and are rejected when the
/// source is opened.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    /// Pixel width in CRS units, positive.
    pub pixel_width: f64,
    /// Pixel height in CRS units, positive (rows grow downward).
    pub pixel_height: f64,
}

impl GeoTransform {
    /// World coordinates of a fractional pixel position.
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width,
            self.origin_y - row * self.pixel_height,
        )
    }

    /// Fractional pixel position of a world coordinate.
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (self.origin_y - y) / self.pixel_height,
        )
    }

    /// Full extent of a raster with these dimensions.
    pub fn bounds(&self, width: u32, height: u32) -> Bounds {
        Bounds::new(
            self.origin_x,
            self.origin_y - height as f64 * self.pixel_height,
            self.origin_x + width as f64 * self.pixel_width,
            self.origin_y,
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
