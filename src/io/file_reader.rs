use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::RangeReader;
use crate::error::IoError;

/// Local-filesystem implementation of [`RangeReader`].
///
/// Useful for development and for deployments where the imagery lives on a
/// mounted volume. The file size is read once at creation; each range read
/// opens a fresh handle so the reader stays `Sync` without interior locking.
pub struct FileRangeReader {
    path: PathBuf,
    size: u64,
    identifier: String,
}

impl FileRangeReader {
    /// Create a new FileRangeReader for the given path.
    ///
    /// Returns `IoError::NotFound` if the file does not exist.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let identifier = path.display().to_string();

        let meta = tokio::fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IoError::NotFound(identifier.clone())
            } else {
                IoError::File(e.to_string())
            }
        })?;

        if !meta.is_file() {
            return Err(IoError::NotFound(identifier));
        }

        Ok(Self {
            path,
            size: meta.len(),
            identifier,
        })
    }
}

#[async_trait]
impl RangeReader for FileRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        if offset + len as u64 > self.size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }

        if len == 0 {
            return Ok(Bytes::new());
        }

        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| IoError::File(e.to_string()))?;

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| IoError::File(e.to_string()))?;

        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| IoError::File(e.to_string()))?;

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
