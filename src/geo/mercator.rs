use serde::{Deserialize, Serialize};

use crate::error::RenderError;

use super::Bounds;

/// WGS84 equatorial radius in meters, the sphere Web Mercator is built on.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Half-width of the Web Mercator extent (π · R) in meters.
pub const MERCATOR_MAX: f64 = 20_037_508.342_789_244;

/// Output tiles are square, this many pixels on a side.
pub const TILE_SIZE: u32 = 256;

/// A cell of the standard Web Mercator XYZ tiling scheme.
///
/// `x` runs west → east and `y` north → south, both in `0..2^zoom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoordinate {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoordinate {
    /// Create a tile coordinate, validating it against the zoom level's grid.
    pub fn new(zoom: u8, x: u32, y: u32) -> Result<Self, RenderError> {
        if zoom > 30 {
            return Err(RenderError::InvalidCoordinate { zoom, x, y });
        }
        let n = 1u64 << zoom;
        if (x as u64) >= n || (y as u64) >= n {
            return Err(RenderError::InvalidCoordinate { zoom, x, y });
        }
        Ok(Self { zoom, x, y })
    }

    /// This tile's extent in Web Mercator (EPSG:3857) meters.
    pub fn mercator_bounds(&self) -> Bounds {
        let n = (1u64 << self.zoom) as f64;
        let span = 2.0 * MERCATOR_MAX / n;

        let min_x = -MERCATOR_MAX + self.x as f64 * span;
        let max_y = MERCATOR_MAX - self.y as f64 * span;

        Bounds::new(min_x, max_y - span, min_x + span, max_y)
    }

    /// This tile's extent in WGS84 degrees, for catalog footprint queries.
    pub fn wgs84_bounds(&self) -> Bounds {
        let m = self.mercator_bounds();
        let (min_lon, min_lat) = mercator_to_lon_lat(m.min_x, m.min_y);
        let (max_lon, max_lat) = mercator_to_lon_lat(m.max_x, m.max_y);
        Bounds::new(min_lon, min_lat, max_lon, max_lat)
    }

    /// Ground resolution of this tile in mercator meters per pixel.
    pub fn resolution(&self) -> f64 {
        self.mercator_bounds().width() / TILE_SIZE as f64
    }
}

impl std::fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Spherical mercator inverse: meters to lon/lat degrees.
fn mercator_to_lon_lat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (y / EARTH_RADIUS).sinh().atan().to_degrees();
    (lon, lat)
}
