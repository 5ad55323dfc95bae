//! Tile encoding.
//!
//! The composited RGBA buffer is serialized to PNG (lossless, alpha
//! preserved, the right choice for imagery with transparent no-data areas)
//! or JPEG (lossy, smaller, validity flattened over black). Encoding is
//! deterministic, so rendering the same tile twice produces byte-identical
//! output and cache round-trips are exact.

use std::io::Cursor;

use bytes::Bytes;
use clap::ValueEnum;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};

use crate::error::RenderError;
use crate::geo::TILE_SIZE;

use super::composite::CompositeTile;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// Output Format
// =============================================================================

/// Wire format of encoded tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpeg,
}

impl OutputFormat {
    /// MIME type for HTTP responses.
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }

    /// Resolve a URL path extension to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "png" => Some(OutputFormat::Png),
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            _ => None,
        }
    }
}

// =============================================================================
// Tile Encoder
// =============================================================================

/// Encoder from composited pixels to output image bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TileEncoder;

impl TileEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode a composite tile.
    ///
    /// Quality applies to JPEG only and is clamped to the valid range.
    pub fn encode(
        &self,
        tile: &CompositeTile,
        format: OutputFormat,
        quality: u8,
    ) -> Result<Bytes, RenderError> {
        match format {
            OutputFormat::Png => self.encode_png(tile),
            OutputFormat::Jpeg => self.encode_jpeg(tile, clamp_quality(quality)),
        }
    }

    fn encode_png(&self, tile: &CompositeTile) -> Result<Bytes, RenderError> {
        let mut out = Cursor::new(Vec::new());
        let encoder = PngEncoder::new(&mut out);

        encoder
            .write_image(&tile.rgba, TILE_SIZE, TILE_SIZE, ExtendedColorType::Rgba8)
            .map_err(|e| RenderError::Encoding(e.to_string()))?;

        Ok(Bytes::from(out.into_inner()))
    }

    fn encode_jpeg(&self, tile: &CompositeTile, quality: u8) -> Result<Bytes, RenderError> {
        // JPEG has no alpha channel; flatten invalid pixels to black
        let size = TILE_SIZE as usize;
        let mut rgb = Vec::with_capacity(size * size * 3);
        for px in tile.rgba.chunks_exact(4) {
            if px[3] > 0 {
                rgb.extend_from_slice(&px[..3]);
            } else {
                rgb.extend_from_slice(&[0, 0, 0]);
            }
        }

        let mut out = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut out, quality);

        encoder
            .write_image(&rgb, TILE_SIZE, TILE_SIZE, ExtendedColorType::Rgb8)
            .map_err(|e| RenderError::Encoding(e.to_string()))?;

        Ok(Bytes::from(out.into_inner()))
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Validate JPEG quality parameter.
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to the valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
