use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::RangeReader;
use crate::error::IoError;

/// Ranged reads against one raster object in S3-compatible storage.
///
/// Construction issues a single HEAD to learn the object size; every read
/// after that maps onto one HTTP `Range` GET. Works against AWS S3 and
/// anything speaking its API (MinIO, GCS interop).
#[derive(Clone)]
pub struct S3RangeReader {
    client: Client,
    bucket: String,
    key: String,
    size: u64,
    identifier: String,
}

impl S3RangeReader {
    /// Open a reader for `bucket`/`key`, verifying the object exists.
    ///
    /// A missing object maps to [`IoError::NotFound`] so the handle pool can
    /// report the source as unavailable rather than as a storage fault.
    pub async fn new(client: Client, bucket: String, key: String) -> Result<Self, IoError> {
        let identifier = format!("s3://{bucket}/{key}");

        let head = client
            .head_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let missing = e.as_service_error().is_some_and(|se| se.is_not_found())
                    || e.raw_response().is_some_and(|r| r.status().as_u16() == 404);
                if missing {
                    IoError::NotFound(identifier.clone())
                } else {
                    IoError::S3(e.to_string())
                }
            })?;

        Ok(Self {
            size: head.content_length().unwrap_or(0) as u64,
            client,
            bucket,
            key,
            identifier,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl RangeReader for S3RangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let end = offset + len as u64;
        if end > self.size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }
        if len == 0 {
            return Ok(Bytes::new());
        }

        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            // HTTP ranges are inclusive on both ends
            .range(format!("bytes={}-{}", offset, end - 1))
            .send()
            .await
            .map_err(|e| IoError::S3(e.to_string()))?;

        let body = object
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?;

        Ok(body.into_bytes())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Build an S3 client, optionally pointed at a custom endpoint.
///
/// A custom endpoint (MinIO and friends) also switches the client to
/// path-style addressing, which those services expect. Pass `None` to use
/// AWS S3 proper.
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()));
    if let Some(endpoint) = endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    let sdk_config = loader.load().await;

    let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
    if endpoint_url.is_some() {
        builder = builder.force_path_style(true);
    }
    Client::from_conf(builder.build())
}
