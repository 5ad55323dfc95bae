//! I/O layer: byte-range access to raster objects plus block caching.
//!
//! Every raster source, regardless of where it lives (S3, local disk), is
//! accessed through the [`RangeReader`] trait. The [`BlockCache`] wraps a
//! reader and turns many small overlapping reads into few cached block
//! fetches, which is what makes adjacent tile requests cheap.

mod block_cache;
mod file_reader;
mod range_reader;
mod s3_reader;

pub use block_cache::{BlockCache, DEFAULT_BLOCK_SIZE};
pub use file_reader::FileRangeReader;
pub use range_reader::RangeReader;
pub use s3_reader::{create_s3_client, S3RangeReader};
