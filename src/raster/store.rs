use std::path::PathBuf;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;
use url::Url;

use crate::error::IoError;
use crate::io::{FileRangeReader, RangeReader, S3RangeReader};

// =============================================================================
// RasterStore Trait
// =============================================================================

/// Trait for creating range readers from source locations.
///
/// This abstraction lets the handle pool work with different storage
/// backends without being tied to a specific implementation, and lets tests
/// substitute in-memory readers.
#[async_trait]
pub trait RasterStore: Send + Sync {
    /// The type of range reader this store creates.
    type Reader: RangeReader + 'static;

    /// Create a range reader for the given source location.
    async fn create_reader(&self, location: &str) -> Result<Self::Reader, IoError>;
}

// =============================================================================
// ObjectStore
// =============================================================================

/// Production store dispatching on the location scheme.
///
/// - `s3://bucket/key` → ranged S3 reads
/// - `file:///path` or a bare path → local file reads, optionally resolved
///   against a configured root directory
pub struct ObjectStore {
    s3: Option<Client>,
    local_root: Option<PathBuf>,
}

impl ObjectStore {
    pub fn new(s3: Option<Client>, local_root: Option<PathBuf>) -> Self {
        Self { s3, local_root }
    }

    fn resolve_local(&self, path: &str) -> PathBuf {
        let path = PathBuf::from(path);
        match (&self.local_root, path.is_absolute()) {
            (Some(root), false) => root.join(path),
            _ => path,
        }
    }
}

#[async_trait]
impl RasterStore for ObjectStore {
    type Reader = StoreReader;

    async fn create_reader(&self, location: &str) -> Result<Self::Reader, IoError> {
        match Url::parse(location) {
            Ok(url) if url.scheme() == "s3" => {
                let client = self
                    .s3
                    .as_ref()
                    .ok_or_else(|| IoError::S3("no S3 client configured".to_string()))?;

                let bucket = url
                    .host_str()
                    .ok_or_else(|| IoError::S3(format!("missing bucket in {location}")))?
                    .to_string();
                let key = url.path().trim_start_matches('/').to_string();
                if key.is_empty() {
                    return Err(IoError::S3(format!("missing key in {location}")));
                }

                let reader = S3RangeReader::new(client.clone(), bucket, key).await?;
                Ok(StoreReader::S3(reader))
            }
            Ok(url) if url.scheme() == "file" => {
                let reader = FileRangeReader::new(url.path()).await?;
                Ok(StoreReader::File(reader))
            }
            Ok(url) => Err(IoError::NotFound(format!(
                "unsupported location scheme '{}' in {location}",
                url.scheme()
            ))),
            // Bare paths don't parse as URLs; treat them as local files
            Err(_) => {
                let reader = FileRangeReader::new(self.resolve_local(location)).await?;
                Ok(StoreReader::File(reader))
            }
        }
    }
}

// =============================================================================
// StoreReader
// =============================================================================

/// Reader created by [`ObjectStore`], one variant per backend.
pub enum StoreReader {
    S3(S3RangeReader),
    File(FileRangeReader),
}

#[async_trait]
impl RangeReader for StoreReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        match self {
            StoreReader::S3(r) => r.read_exact_at(offset, len).await,
            StoreReader::File(r) => r.read_exact_at(offset, len).await,
        }
    }

    fn size(&self) -> u64 {
        match self {
            StoreReader::S3(r) => r.size(),
            StoreReader::File(r) => r.size(),
        }
    }

    fn identifier(&self) -> &str {
        match self {
            StoreReader::S3(r) => r.identifier(),
            StoreReader::File(r) => r.identifier(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_s3_location_without_client() {
        let store = ObjectStore::new(None, None);
        let result = store.create_reader("s3://imagery/scene.raw").await;
        assert!(matches!(result, Err(IoError::S3(_))));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let store = ObjectStore::new(None, None);
        let result = store.create_reader("ftp://host/scene.raw").await;
        assert!(matches!(result, Err(IoError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_bare_path_is_local() {
        let store = ObjectStore::new(None, None);
        // Resolves as a local path; the file does not exist
        let result = store.create_reader("/no/such/scene.raw").await;
        assert!(matches!(result, Err(IoError::NotFound(_))));
    }

    #[test]
    fn test_local_root_resolution() {
        let store = ObjectStore::new(None, Some(PathBuf::from("/imagery")));
        assert_eq!(
            store.resolve_local("scenes/a.raw"),
            PathBuf::from("/imagery/scenes/a.raw")
        );
        // Absolute paths bypass the root
        assert_eq!(store.resolve_local("/tmp/b.raw"), PathBuf::from("/tmp/b.raw"));
    }
}
