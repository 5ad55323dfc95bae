use std::collections::HashMap;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::debug;

use crate::catalog::SourceDescriptor;
use crate::error::SourceError;
use crate::io::{RangeReader, DEFAULT_BLOCK_SIZE};

use super::handle::RasterHandle;
use super::store::RasterStore;

/// Default maximum number of concurrently open raster handles.
const DEFAULT_MAX_OPEN_HANDLES: usize = 64;

/// Default byte-range cache budget per handle: 100 blocks of 256KB.
const DEFAULT_BLOCK_BUDGET: usize = 100 * DEFAULT_BLOCK_SIZE;

/// Bounded pool of open raster handles.
///
/// The pool:
/// - Caches open handles with LRU eviction at a fixed cap, so the process
///   never holds more than `max_open` sources open at once
/// - Uses singleflight to guarantee at most one open per source is in
///   flight; concurrent acquires for the same source share the result
/// - Shares handles by `Arc` — all supported backends are safe for
///   concurrent reads, so sharing is the normal path, and an evicted handle
///   stays alive until its last borrower drops it
///
/// Opens run in detached tasks: a request cancelled while waiting for an
/// open neither aborts the open nor strands other waiters.
pub struct HandlePool<S: RasterStore> {
    store: Arc<S>,
    shared: Arc<PoolShared<S::Reader>>,
    block_size: usize,
    block_budget: usize,
}

struct PoolShared<R: RangeReader + 'static> {
    /// Open handles indexed by source id
    cache: RwLock<LruCache<String, Arc<RasterHandle<R>>>>,
    /// In-flight opens for the singleflight pattern
    in_flight: Mutex<HashMap<String, Arc<InFlightOpen<R>>>>,
}

/// Shared state for one in-flight open.
struct InFlightOpen<R: RangeReader + 'static> {
    notify: Notify,
    result: Mutex<Option<Result<Arc<RasterHandle<R>>, SourceError>>>,
}

impl<S: RasterStore + 'static> HandlePool<S> {
    /// Create a pool with default capacity settings.
    pub fn new(store: S) -> Self {
        Self::with_capacity(
            store,
            DEFAULT_MAX_OPEN_HANDLES,
            DEFAULT_BLOCK_SIZE,
            DEFAULT_BLOCK_BUDGET,
        )
    }

    /// Create a pool with custom capacity settings.
    ///
    /// # Arguments
    /// * `store` - Storage backend for creating readers
    /// * `max_open` - Maximum number of concurrently open handles
    /// * `block_size` - Block size for each handle's byte-range cache
    /// * `block_budget` - Byte budget for each handle's byte-range cache
    pub fn with_capacity(
        store: S,
        max_open: usize,
        block_size: usize,
        block_budget: usize,
    ) -> Self {
        Self {
            store: Arc::new(store),
            shared: Arc::new(PoolShared {
                cache: RwLock::new(LruCache::new(
                    std::num::NonZeroUsize::new(max_open.max(1)).expect("max_open is at least 1"),
                )),
                in_flight: Mutex::new(HashMap::new()),
            }),
            block_size,
            block_budget,
        }
    }

    /// Acquire a handle for the given source, opening it if necessary.
    ///
    /// Concurrent acquires for the same source serialize on a single open
    /// and share the resulting handle. When the pool is at capacity, the
    /// least-recently-used handle is evicted to make room.
    pub async fn acquire(
        &self,
        descriptor: &Arc<SourceDescriptor>,
    ) -> Result<Arc<RasterHandle<S::Reader>>, SourceError> {
        // Fast path: already open
        {
            let mut cache = self.shared.cache.write().await;
            if let Some(handle) = cache.get(&descriptor.id) {
                return Ok(handle.clone());
            }
        }

        loop {
            let (state, leader) = {
                let mut in_flight = self.shared.in_flight.lock().await;
                match in_flight.get(&descriptor.id) {
                    Some(state) => (state.clone(), false),
                    None => {
                        let state = Arc::new(InFlightOpen {
                            notify: Notify::new(),
                            result: Mutex::new(None),
                        });
                        in_flight.insert(descriptor.id.clone(), state.clone());
                        (state, true)
                    }
                }
            };

            if leader {
                let store = self.store.clone();
                let shared = self.shared.clone();
                let descriptor = descriptor.clone();
                let block_size = self.block_size;
                let block_budget = self.block_budget;
                let task_state = state.clone();

                // Detached: completes even if every waiter is cancelled
                tokio::spawn(async move {
                    let result =
                        open_handle(store.as_ref(), &descriptor, block_size, block_budget).await;

                    {
                        let mut cache = shared.cache.write().await;
                        let mut in_flight = shared.in_flight.lock().await;

                        if let Ok(ref handle) = result {
                            if let Some((evicted_id, _)) =
                                cache.push(descriptor.id.clone(), handle.clone())
                            {
                                if evicted_id != descriptor.id {
                                    debug!(source = %evicted_id, "evicted idle raster handle");
                                }
                            }
                        }

                        let mut slot = task_state.result.lock().await;
                        *slot = Some(result);
                        in_flight.remove(&descriptor.id);
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

    /// Number of currently open handles.
    pub async fn open_count(&self) -> usize {
        let cache = self.shared.cache.read().await;
        cache.len()
    }

    /// Drop a specific handle from the pool (e.g. after a corrupt read).
    pub async fn invalidate(&self, source_id: &str) {
        let mut cache = self.shared.cache.write().await;
        cache.pop(source_id);
    }

    /// Drain the pool, dropping all pooled handles.
    ///
    /// Handles still borrowed by in-flight requests stay alive until those
    /// requests finish.
    pub async fn drain(&self) {
        let mut cache = self.shared.cache.write().await;
        cache.clear();
    }
}

/// Open one handle against the store.
async fn open_handle<S: RasterStore>(
    store: &S,
    descriptor: &Arc<SourceDescriptor>,
    block_size: usize,
    block_budget: usize,
) -> Result<Arc<RasterHandle<S::Reader>>, SourceError> {
    let reader = store
        .create_reader(&descriptor.location)
        .await
        .map_err(|e| SourceError::Unavailable {
            id: descriptor.id.clone(),
            reason: e.to_string(),
        })?;

    let handle = RasterHandle::open(descriptor.clone(), reader, block_size, block_budget)?;
    Ok(Arc::new(handle))
}

// =============================================================================
// Tests
// =============================================================================
