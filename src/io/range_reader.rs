use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Trait for reading byte ranges from a raster object.
///
/// This abstraction keeps the windowed reader and the rest of the pipeline
/// protocol-agnostic: a source may live on local disk, in object storage,
/// or behind any service that can serve ranged reads. Implementations must
/// be thread-safe.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Get the total size of the object in bytes.
    fn size(&self) -> u64;

    /// Get a unique identifier for this object (for logging and cache keys).
    ///
    /// For S3, this is `s3://bucket/key`; for local files, the path.
    fn identifier(&self) -> &str;
}
