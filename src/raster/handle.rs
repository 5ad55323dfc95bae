use std::sync::Arc;

use crate::catalog::{RasterMeta, SourceDescriptor};
use crate::error::SourceError;
use crate::io::{BlockCache, RangeReader};

/// An open, reusable connection to one source raster's pixel data.
///
/// A handle pairs the catalog's descriptor with a block-cached reader over
/// the stored bytes. Opening validates the descriptor's layout against the
/// stored object, so a handle that exists is a handle whose geometry can be
/// trusted. Handles are owned by the [`HandlePool`](super::HandlePool) and
/// shared by `Arc`: all reads go through `&self`, so one handle serves any
/// number of concurrent requests.
pub struct RasterHandle<R: RangeReader + 'static> {
    descriptor: Arc<SourceDescriptor>,
    reader: BlockCache<R>,
}

impl<R: RangeReader + 'static> RasterHandle<R> {
    /// Open a handle: wrap the reader in a block cache and validate the
    /// stored object against the descriptor's metadata.
    ///
    /// Fails with [`SourceError::Unavailable`] when the layout is invalid or
    /// the object size disagrees with it (a truncated or corrupt upload).
    pub(crate) fn open(
        descriptor: Arc<SourceDescriptor>,
        reader: R,
        block_size: usize,
        block_budget: usize,
    ) -> Result<Self, SourceError> {
        let meta = &descriptor.meta;

        if meta.bands != 3 && meta.bands != 4 {
            return Err(SourceError::Unavailable {
                id: descriptor.id.clone(),
                reason: format!("unsupported band count {}", meta.bands),
            });
        }

        if meta.width == 0 || meta.height == 0 {
            return Err(SourceError::Unavailable {
                id: descriptor.id.clone(),
                reason: format!("degenerate dimensions {}x{}", meta.width, meta.height),
            });
        }

        if meta.transform.pixel_width <= 0.0 || meta.transform.pixel_height <= 0.0 {
            return Err(SourceError::Unavailable {
                id: descriptor.id.clone(),
                reason: "non-positive pixel size in geotransform".to_string(),
            });
        }

        let expected = meta.expected_bytes();
        if reader.size() != expected {
            return Err(SourceError::Unavailable {
                id: descriptor.id.clone(),
                reason: format!(
                    "stored size {} does not match layout ({} expected)",
                    reader.size(),
                    expected
                ),
            });
        }

        Ok(Self {
            descriptor,
            reader: BlockCache::with_budget(reader, block_size, block_budget),
        })
    }

    pub fn descriptor(&self) -> &Arc<SourceDescriptor> {
        &self.descriptor
    }

    pub fn meta(&self) -> &RasterMeta {
        &self.descriptor.meta
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub(crate) fn reader(&self) -> &BlockCache<R> {
        &self.reader
    }
}
