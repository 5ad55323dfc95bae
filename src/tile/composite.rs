//! Compositing of reprojected source contributions into one tile.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::geo::TILE_SIZE;

use super::reproject::ReprojectedTile;

// =============================================================================
// Blend Mode
// =============================================================================

/// How overlapping sources combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    /// Painter's algorithm: the highest-priority valid pixel wins and
    /// lower-priority sources only fill where it is invalid.
    Over,
    /// Average every valid contribution. Only for explicitly configured
    /// styles; never the default.
    Average,
}

// =============================================================================
// Composite Tile
// =============================================================================

/// The merged pixel buffer for one tile coordinate.
///
/// RGBA, row-major. Alpha is 255 where some source contributed a pixel and
/// 0 where none did, so tiles outside all coverage come out fully
/// transparent.
pub struct CompositeTile {
    pub rgba: Vec<u8>,
}

impl CompositeTile {
    /// A fully transparent tile, the "no data here" result.
    pub fn transparent() -> Self {
        Self {
            rgba: vec![0u8; TILE_SIZE as usize * TILE_SIZE as usize * 4],
        }
    }

    #[inline]
    pub fn is_valid(&self, col: usize, row: usize) -> bool {
        self.rgba[(row * TILE_SIZE as usize + col) * 4 + 3] > 0
    }

    #[inline]
    pub fn rgb(&self, col: usize, row: usize) -> [u8; 3] {
        let base = (row * TILE_SIZE as usize + col) * 4;
        [self.rgba[base], self.rgba[base + 1], self.rgba[base + 2]]
    }

    /// Whether any pixel carries data.
    pub fn has_data(&self) -> bool {
        self.rgba.chunks_exact(4).any(|px| px[3] > 0)
    }
}

// =============================================================================
// Compositing
// =============================================================================

/// Merge reprojected tiles, already ordered highest priority first.
///
/// The ordering is established once per request when the catalog resolves,
/// and callers must not reorder on completion: the slice index, not arrival
/// time, decides who wins.
pub fn composite(tiles: &[ReprojectedTile], blend: BlendMode) -> CompositeTile {
    let size = TILE_SIZE as usize;
    let mut out = CompositeTile::transparent();

    match blend {
        BlendMode::Over => {
            for tile in tiles {
                for i in 0..size * size {
                    let base = i * 4;
                    if out.rgba[base + 3] == 0 && tile.rgba[base + 3] > 0 {
                        out.rgba[base..base + 4].copy_from_slice(&tile.rgba[base..base + 4]);
                    }
                }
            }
        }
        BlendMode::Average => {
            for i in 0..size * size {
                let base = i * 4;
                let mut acc = [0u32; 3];
                let mut count = 0u32;
                for tile in tiles {
                    if tile.rgba[base + 3] > 0 {
                        acc[0] += tile.rgba[base] as u32;
                        acc[1] += tile.rgba[base + 1] as u32;
                        acc[2] += tile.rgba[base + 2] as u32;
                        count += 1;
                    }
                }
                if count > 0 {
                    out.rgba[base] = (acc[0] / count) as u8;
                    out.rgba[base + 1] = (acc[1] / count) as u8;
                    out.rgba[base + 2] = (acc[2] / count) as u8;
                    out.rgba[base + 3] = 255;
                }
            }
        }
    }

    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// A reprojected tile with a uniform color, valid inside `valid_cols`.
    fn uniform(id: &str, priority: f64, rgb: [u8; 3], valid_cols: std::ops::Range<usize>) -> ReprojectedTile {
        let size = TILE_SIZE as usize;
        let mut rgba = vec![0u8; size * size * 4];
        for row in 0..size {
            for col in valid_cols.clone() {
                let base = (row * size + col) * 4;
                rgba[base..base + 3].copy_from_slice(&rgb);
                rgba[base + 3] = 255;
            }
        }
        ReprojectedTile {
            source_id: id.to_string(),
            priority,
            rgba,
        }
    }

    #[test]
    fn test_empty_input_is_transparent() {
        let out = composite(&[], BlendMode::Over);
        assert!(!out.has_data());
        assert!(!out.is_valid(0, 0));
    }

    #[test]
    fn test_highest_priority_wins_everywhere() {
        let a = uniform("a", 2.0, [10, 10, 10], 0..256);
        let b = uniform("b", 1.0, [200, 200, 200], 0..256);

        let out = composite(&[a, b], BlendMode::Over);
        for &(c, r) in &[(0, 0), (128, 128), (255, 255)] {
            assert_eq!(out.rgb(c, r), [10, 10, 10]);
        }
    }

    #[test]
    fn test_lower_priority_fills_gaps_only() {
        // "a" covers the west half, "b" everything
        let a = uniform("a", 2.0, [10, 10, 10], 0..128);
        let b = uniform("b", 1.0, [200, 200, 200], 0..256);

        let out = composite(&[a, b], BlendMode::Over);
        assert_eq!(out.rgb(10, 10), [10, 10, 10]);
        assert_eq!(out.rgb(200, 10), [200, 200, 200]);
    }

    #[test]
    fn test_no_source_leaves_transparent() {
        let a = uniform("a", 2.0, [10, 10, 10], 0..64);
        let b = uniform("b", 1.0, [200, 200, 200], 64..128);

        let out = composite(&[a, b], BlendMode::Over);
        assert!(out.is_valid(10, 0));
        assert!(out.is_valid(100, 0));
        assert!(!out.is_valid(200, 0));
    }

    #[test]
    fn test_order_decides_not_arrival() {
        // Permuting the order changes the winner; validity never leaks
        let a = uniform("a", 2.0, [10, 10, 10], 0..256);
        let b = uniform("b", 1.0, [200, 200, 200], 0..256);

        let ab = composite(&[a, b], BlendMode::Over);
        assert_eq!(ab.rgb(0, 0), [10, 10, 10]);

        let a = uniform("a", 2.0, [10, 10, 10], 0..256);
        let b = uniform("b", 1.0, [200, 200, 200], 0..256);
        let ba = composite(&[b, a], BlendMode::Over);
        assert_eq!(ba.rgb(0, 0), [200, 200, 200]);
    }

    #[test]
    fn test_average_blend() {
        let a = uniform("a", 2.0, [100, 0, 0], 0..256);
        let b = uniform("b", 1.0, [200, 0, 0], 0..256);

        let out = composite(&[a, b], BlendMode::Average);
        assert_eq!(out.rgb(50, 50), [150, 0, 0]);
    }

    #[test]
    fn test_average_skips_invalid() {
        let a = uniform("a", 2.0, [100, 0, 0], 0..128);
        let b = uniform("b", 1.0, [200, 0, 0], 0..256);

        let out = composite(&[a, b], BlendMode::Average);
        // Overlap averages; east half only has "b"
        assert_eq!(out.rgb(50, 50), [150, 0, 0]);
        assert_eq!(out.rgb(200, 50), [200, 0, 0]);
    }
}
