use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::{Mutex, Notify, RwLock};

use super::RangeReader;
use crate::error::IoError;

/// Default block size: 256KB.
/// Large enough to amortize object-storage latency, small enough to not
/// waste bandwidth on narrow pixel windows.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Default cache budget per source: 100 blocks of 256KB = 25.6MB.
const DEFAULT_CACHE_BUDGET: usize = 100 * DEFAULT_BLOCK_SIZE;

/// Block-based byte-range cache wrapping any [`RangeReader`].
///
/// Windowed reads against a raster issue one ranged read per pixel row, and
/// neighboring tiles request heavily overlapping ranges. The block cache
/// amortizes those into few, larger fetches:
///
/// - Fixed-size blocks with LRU eviction inside a byte budget
/// - Singleflight: concurrent requests for the same block share one fetch
/// - Reads spanning multiple blocks are reassembled transparently
///
/// Fetches run in detached tasks, so a caller that is cancelled mid-read
/// (client disconnect, request timeout) never strands other tasks waiting
/// on the same block.
pub struct BlockCache<R> {
    inner: Arc<R>,
    block_size: usize,
    /// Shared with detached fetch tasks
    shared: Arc<CacheShared>,
}

struct CacheShared {
    /// Fetched blocks by block index
    blocks: RwLock<LruCache<u64, Bytes>>,
    /// Singleflight registry of fetches currently running
    in_flight: Mutex<HashMap<u64, Arc<InFlightBlock>>>,
}

/// Shared state for one in-flight block fetch.
struct InFlightBlock {
    notify: Notify,
    result: Mutex<Option<Result<Bytes, IoError>>>,
}

impl<R: RangeReader + 'static> BlockCache<R> {
    /// Create a new BlockCache with the default block size and budget.
    pub fn new(inner: R) -> Self {
        Self::with_budget(inner, DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_BUDGET)
    }

    /// Create a new BlockCache with a custom block size and byte budget.
    ///
    /// The budget is rounded down to a whole number of blocks (at least one).
    pub fn with_budget(inner: R, block_size: usize, budget_bytes: usize) -> Self {
        let capacity = (budget_bytes / block_size).max(1);
        Self {
            inner: Arc::new(inner),
            block_size,
            shared: Arc::new(CacheShared {
                blocks: RwLock::new(LruCache::new(
                    std::num::NonZeroUsize::new(capacity).expect("capacity is at least 1"),
                )),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get a block from cache or fetch it from the underlying reader.
    ///
    /// If multiple tasks request the same block concurrently, only one fetch
    /// is performed and all tasks share the result.
    async fn get_block(&self, block_idx: u64) -> Result<Bytes, IoError> {
        loop {
            // Fast path: check cache
            {
                let blocks = self.shared.blocks.read().await;
                if let Some(data) = blocks.peek(&block_idx) {
                    return Ok(data.clone());
                }
            }

            // Slow path: join an in-flight fetch or become the leader
            let (state, leader) = {
                let mut in_flight = self.shared.in_flight.lock().await;
                match in_flight.get(&block_idx) {
                    Some(state) => (state.clone(), false),
                    None => {
                        let state = Arc::new(InFlightBlock {
                            notify: Notify::new(),
                            result: Mutex::new(None),
                        });
                        in_flight.insert(block_idx, state.clone());
                        (state, true)
                    }
                }
            };

            if leader {
                // Run the fetch and all bookkeeping in a detached task: if
                // this caller is cancelled, waiters still get the result.
                let inner = self.inner.clone();
                let shared = self.shared.clone();
                let block_size = self.block_size;
                let task_state = state.clone();

                tokio::spawn(async move {
                    let result = fetch_block(inner.as_ref(), block_size, block_idx).await;

                    {
                        let mut blocks = shared.blocks.write().await;
                        let mut in_flight = shared.in_flight.lock().await;

                        if let Ok(ref data) = result {
                            blocks.put(block_idx, data.clone());
                        }

                        let mut slot = task_state.result.lock().await;
                        *slot = Some(result);
                        in_flight.remove(&block_idx);
                    }

                    task_state.notify.notify_waiters();
                });
            }

            // Register for the wakeup before checking the slot, so a result
            // parked between the check and the await is never missed.
            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let slot = state.result.lock().await;
                if let Some(ref result) = *slot {
                    return result.clone();
                }
            }

            notified.await;

            let slot = state.result.lock().await;
            if let Some(ref result) = *slot {
                return result.clone();
            }
            // Spurious wakeup; loop back
        }
    }
}

/// Read one whole block from the underlying source.
///
/// The final block of an object is allowed to be short.
async fn fetch_block<R: RangeReader>(
    inner: &R,
    block_size: usize,
    block_idx: u64,
) -> Result<Bytes, IoError> {
    let offset = block_idx * block_size as u64;
    let available = inner.size().saturating_sub(offset);
    if available == 0 {
        return Err(IoError::RangeOutOfBounds {
            offset,
            requested: block_size as u64,
            size: inner.size(),
        });
    }

    let len = available.min(block_size as u64) as usize;
    inner.read_exact_at(offset, len).await
}

#[async_trait]
impl<R: RangeReader + 'static> RangeReader for BlockCache<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let size = self.inner.size();
        if offset + len as u64 > size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            });
        }
        if len == 0 {
            return Ok(Bytes::new());
        }

        let block_size = self.block_size as u64;
        let end = offset + len as u64;
        let first = offset / block_size;
        let last = (end - 1) / block_size;

        // Common case: the whole range sits inside one block
        if first == last {
            let block = self.get_block(first).await?;
            let start = (offset - first * block_size) as usize;
            return Ok(block.slice(start..start + len));
        }

        // Stitch the range together across blocks
        let mut assembled = BytesMut::with_capacity(len);
        for idx in first..=last {
            let block = self.get_block(idx).await?;
            let block_start = idx * block_size;
            let from = offset.saturating_sub(block_start) as usize;
            let to = (end - block_start).min(block.len() as u64) as usize;
            assembled.extend_from_slice(&block[from..to]);
        }
        Ok(assembled.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
