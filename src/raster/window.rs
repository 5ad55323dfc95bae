use bytes::Bytes;

use crate::error::SourceError;
use crate::geo::Bounds;
use crate::io::RangeReader;

use super::handle::RasterHandle;

/// Extra pixels read around the requested window so bilinear sampling has
/// a full neighborhood at the window edges.
const WINDOW_MARGIN: i64 = 1;

/// A rectangular pixel window read from one source raster.
///
/// The buffer is row-major and band-interleaved, exactly as stored, with a
/// per-pixel validity mask derived from the alpha band (4-band sources) or
/// the nodata value (3-band sources). Windows are per-request and freed by
/// the reprojector once sampled.
pub struct PixelWindow {
    /// Source this window was read from
    pub source_id: String,
    /// Column of the window origin in global raster coordinates
    pub col_off: i64,
    /// Row of the window origin in global raster coordinates
    pub row_off: i64,
    /// Window width in pixels
    pub width: usize,
    /// Window height in pixels
    pub height: usize,
    /// Stored band count (3 or 4)
    pub bands: usize,
    pixels: Bytes,
    mask: Vec<bool>,
}

impl PixelWindow {
    /// Sample one band of one pixel, window-local coordinates.
    #[inline]
    pub fn sample(&self, col: usize, row: usize, band: usize) -> u8 {
        self.pixels[(row * self.width + col) * self.bands + band]
    }

    /// Whether the pixel at window-local coordinates carries data.
    #[inline]
    pub fn is_valid(&self, col: usize, row: usize) -> bool {
        self.mask[row * self.width + col]
    }

    /// RGB triple of one pixel, window-local coordinates.
    #[inline]
    pub fn rgb(&self, col: usize, row: usize) -> [u8; 3] {
        let base = (row * self.width + col) * self.bands;
        [
            self.pixels[base],
            self.pixels[base + 1],
            self.pixels[base + 2],
        ]
    }
}

impl<R: RangeReader + 'static> RasterHandle<R> {
    /// Read the minimal pixel window covering `bounds` (in the source's
    /// native CRS).
    ///
    /// The window is clamped to the raster extent with a one-pixel margin
    /// for resampling support; a request that merely touches the footprint
    /// edge yields a valid, appropriately clipped window. Fails with
    /// [`SourceError::OutOfBounds`] only when the intersection is empty,
    /// which the catalog's footprint filter should have prevented.
    pub async fn read_window(&self, bounds: &Bounds) -> Result<PixelWindow, SourceError> {
        let meta = self.meta();
        let width = meta.width as i64;
        let height = meta.height as i64;

        // Fractional pixel rect of the requested bounds (row 0 at the top)
        let (col0f, row0f) = meta.transform.geo_to_pixel(bounds.min_x, bounds.max_y);
        let (col1f, row1f) = meta.transform.geo_to_pixel(bounds.max_x, bounds.min_y);

        let col0 = (col0f.floor() as i64 - WINDOW_MARGIN).max(0);
        let row0 = (row0f.floor() as i64 - WINDOW_MARGIN).max(0);
        let col1 = (col1f.ceil() as i64 + WINDOW_MARGIN).min(width);
        let row1 = (row1f.ceil() as i64 + WINDOW_MARGIN).min(height);

        if col0 >= col1 || row0 >= row1 {
            return Err(SourceError::OutOfBounds {
                id: self.id().to_string(),
                col_off: col0,
                row_off: row0,
                window_cols: (col1f - col0f).ceil().max(0.0) as usize,
                window_rows: (row1f - row0f).ceil().max(0.0) as usize,
                width: meta.width,
                height: meta.height,
            });
        }

        let win_w = (col1 - col0) as usize;
        let win_h = (row1 - row0) as usize;
        let bands = meta.bands as usize;
        let row_bytes = win_w * bands;

        // One ranged read per window row; the block cache coalesces the
        // underlying fetches across rows and across neighboring tiles.
        let mut pixels = Vec::with_capacity(win_h * row_bytes);
        for row in row0..row1 {
            let offset = ((row * width + col0) as u64) * bands as u64;
            let data = self.reader().read_exact_at(offset, row_bytes).await?;
            pixels.extend_from_slice(&data);
        }

        let mask = build_mask(&pixels, win_w, win_h, bands, meta.nodata);

        Ok(PixelWindow {
            source_id: self.id().to_string(),
            col_off: col0,
            row_off: row0,
            width: win_w,
            height: win_h,
            bands,
            pixels: Bytes::from(pixels),
            mask,
        })
    }
}

/// Derive the validity mask from alpha or nodata.
fn build_mask(
    pixels: &[u8],
    width: usize,
    height: usize,
    bands: usize,
    nodata: Option<u8>,
) -> Vec<bool> {
    let mut mask = vec![true; width * height];

    if bands == 4 {
        for (i, valid) in mask.iter_mut().enumerate() {
            *valid = pixels[i * bands + 3] > 0;
        }
    } else if let Some(nodata) = nodata {
        for (i, valid) in mask.iter_mut().enumerate() {
            let base = i * bands;
            *valid = !(pixels[base] == nodata
                && pixels[base + 1] == nodata
                && pixels[base + 2] == nodata);
        }
    }

    mask
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{RasterMeta, SourceDescriptor};
    use crate::error::IoError;
    use crate::geo::GeoTransform;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct MemoryReader {
        data: Bytes,
        identifier: String,
    }

    #[async_trait]
    impl RangeReader for MemoryReader {
        async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
            if offset + len as u64 > self.data.len() as u64 {
                return Err(IoError::RangeOutOfBounds {
                    offset,
                    requested: len as u64,
                    size: self.data.len() as u64,
                });
            }
            Ok(self.data.slice(offset as usize..offset as usize + len))
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn identifier(&self) -> &str {
            &self.identifier
        }
    }

    /// 8x8 RGB raster over mercator meters: origin (0, 80), 10m pixels.
    /// Pixel (col, row) has r = col * 10, g = row * 10, b = 7.
    fn test_handle(nodata: Option<u8>) -> RasterHandle<MemoryReader> {
        let mut data = Vec::with_capacity(8 * 8 * 3);
        for row in 0..8u8 {
            for col in 0..8u8 {
                data.push(col * 10);
                data.push(row * 10);
                data.push(7);
            }
        }

        let descriptor = Arc::new(SourceDescriptor {
            id: "grid".to_string(),
            location: "mem://grid".to_string(),
            footprint: Bounds::new(-1.0, -1.0, 1.0, 1.0),
            priority: 1.0,
            resolution: 10.0,
            meta: RasterMeta {
                width: 8,
                height: 8,
                bands: 3,
                epsg: 3857,
                transform: GeoTransform {
                    origin_x: 0.0,
                    origin_y: 80.0,
                    pixel_width: 10.0,
                    pixel_height: 10.0,
                },
                nodata,
            },
        });

        let reader = MemoryReader {
            data: Bytes::from(data),
            identifier: "mem://grid".to_string(),
        };

        RasterHandle::open(descriptor, reader, 64, 1024).unwrap()
    }

    #[tokio::test]
    async fn test_full_window() {
        let handle = test_handle(None);
        let window = handle
            .read_window(&Bounds::new(0.0, 0.0, 80.0, 80.0))
            .await
            .unwrap();

        assert_eq!((window.col_off, window.row_off), (0, 0));
        assert_eq!((window.width, window.height), (8, 8));
        assert_eq!(window.rgb(3, 2), [30, 20, 7]);
        assert!(window.is_valid(0, 0));
    }

    #[tokio::test]
    async fn test_partial_window_offsets() {
        let handle = test_handle(None);
        // Covers pixels cols 2..4, rows 2..4, plus the one-pixel margin
        let window = handle
            .read_window(&Bounds::new(20.0, 40.0, 40.0, 60.0))
            .await
            .unwrap();

        assert_eq!((window.col_off, window.row_off), (1, 1));
        assert_eq!((window.width, window.height), (4, 4));
        // Window-local (1, 1) is global pixel (2, 2)
        assert_eq!(window.rgb(1, 1), [20, 20, 7]);
    }

    #[tokio::test]
    async fn test_window_at_footprint_edge() {
        let handle = test_handle(None);
        // Bounds extending past the eastern edge clamp instead of failing
        let window = handle
            .read_window(&Bounds::new(60.0, 0.0, 120.0, 40.0))
            .await
            .unwrap();

        assert!(window.col_off >= 0);
        assert_eq!(window.col_off + window.width as i64, 8);
    }

    #[tokio::test]
    async fn test_disjoint_window_is_out_of_bounds() {
        let handle = test_handle(None);
        let result = handle
            .read_window(&Bounds::new(500.0, 500.0, 600.0, 600.0))
            .await;
        assert!(matches!(result, Err(SourceError::OutOfBounds { .. })));
    }

    #[tokio::test]
    async fn test_nodata_mask() {
        // 2x2 RGB raster where pixel (1, 0) is solid nodata
        let data = vec![
            10, 10, 10, /**/ 0, 0, 0, //
            30, 30, 30, /**/ 40, 40, 40,
        ];
        let descriptor = Arc::new(SourceDescriptor {
            id: "nodata".to_string(),
            location: "mem://nodata".to_string(),
            footprint: Bounds::new(-1.0, -1.0, 1.0, 1.0),
            priority: 1.0,
            resolution: 10.0,
            meta: RasterMeta {
                width: 2,
                height: 2,
                bands: 3,
                epsg: 3857,
                transform: GeoTransform {
                    origin_x: 0.0,
                    origin_y: 20.0,
                    pixel_width: 10.0,
                    pixel_height: 10.0,
                },
                nodata: Some(0),
            },
        });
        let reader = MemoryReader {
            data: Bytes::from(data),
            identifier: "mem://nodata".to_string(),
        };
        let handle = RasterHandle::open(descriptor, reader, 64, 1024).unwrap();

        let window = handle
            .read_window(&Bounds::new(0.0, 0.0, 20.0, 20.0))
            .await
            .unwrap();

        assert!(window.is_valid(0, 0));
        assert!(!window.is_valid(1, 0));
        assert!(window.is_valid(0, 1));
        assert!(window.is_valid(1, 1));

        // A nodata value that matches no pixel masks nothing
        let full = test_handle(Some(255));
        let window = full
            .read_window(&Bounds::new(0.0, 0.0, 80.0, 80.0))
            .await
            .unwrap();
        assert!(window.is_valid(0, 0));
    }

    #[tokio::test]
    async fn test_alpha_mask() {
        // 2x2 RGBA raster, one transparent pixel
        let data = vec![
            10, 10, 10, 255, /**/ 20, 20, 20, 0, //
            30, 30, 30, 255, /**/ 40, 40, 40, 255,
        ];
        let descriptor = Arc::new(SourceDescriptor {
            id: "rgba".to_string(),
            location: "mem://rgba".to_string(),
            footprint: Bounds::new(-1.0, -1.0, 1.0, 1.0),
            priority: 1.0,
            resolution: 10.0,
            meta: RasterMeta {
                width: 2,
                height: 2,
                bands: 4,
                epsg: 3857,
                transform: GeoTransform {
                    origin_x: 0.0,
                    origin_y: 20.0,
                    pixel_width: 10.0,
                    pixel_height: 10.0,
                },
                nodata: None,
            },
        });
        let reader = MemoryReader {
            data: Bytes::from(data),
            identifier: "mem://rgba".to_string(),
        };
        let handle = RasterHandle::open(descriptor, reader, 64, 1024).unwrap();

        let window = handle
            .read_window(&Bounds::new(0.0, 0.0, 20.0, 20.0))
            .await
            .unwrap();

        assert!(window.is_valid(0, 0));
        assert!(!window.is_valid(1, 0));
        assert!(window.is_valid(1, 1));
    }
}
