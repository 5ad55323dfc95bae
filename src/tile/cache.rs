//! Cache for fully rendered, encoded tiles.
//!
//! Tiles are keyed by coordinate, source-set fingerprint, and rendering
//! parameters. The fingerprint ties entries to the catalog state at render
//! time, so a catalog update naturally misses the cache instead of serving
//! stale mosaics. Eviction is least-recently-used within a byte budget.
//! Failed renders are never cached; a transient source failure is retried
//! by the next request for the same tile.

use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::catalog::SourceDescriptor;
use crate::geo::TileCoordinate;

use super::composite::BlendMode;
use super::encoder::OutputFormat;
use super::reproject::ResampleKernel;

/// Default cache budget: 100MB
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 100 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: usize = 10_000;

// =============================================================================
// Fingerprint
// =============================================================================

/// Fingerprint an ordered source set.
///
/// SHA-256 over the (id, priority) pairs in resolve order. Any change to
/// the set, its ordering, or its priorities produces a different digest.
pub fn source_set_fingerprint(sources: &[Arc<SourceDescriptor>]) -> Arc<str> {
    let mut hasher = Sha256::new();
    for source in sources {
        hasher.update(source.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(source.priority.to_le_bytes());
    }
    Arc::from(hex::encode(hasher.finalize()))
}

// =============================================================================
// Cache Key
// =============================================================================

/// Cache key for encoded tiles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileCacheKey {
    pub coord: TileCoordinate,
    pub fingerprint: Arc<str>,
    pub kernel: ResampleKernel,
    pub blend: BlendMode,
    pub format: OutputFormat,
    pub quality: u8,
}

impl std::fmt::Display for TileCacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}/{:?}/{:?}/q{}",
            self.coord,
            &self.fingerprint[..8.min(self.fingerprint.len())],
            self.kernel,
            self.format,
            self.quality
        )
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

/// LRU cache for encoded tiles with a byte-size budget.
///
/// Thread-safe; share across tasks via `Arc`. The LRU map and the running
/// byte total live under one lock so they can never disagree.
pub struct TileCache {
    inner: Mutex<CacheInner>,
    max_bytes: usize,
}

struct CacheInner {
    entries: LruCache<TileCacheKey, Bytes>,
    bytes: usize,
}

impl TileCache {
    /// Create a cache with the default budget (100MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_CACHE_CAPACITY)
    }

    /// Create a cache with the specified byte budget.
    pub fn with_capacity(max_bytes: usize) -> Self {
        Self::with_capacity_and_entries(max_bytes, DEFAULT_MAX_ENTRIES)
    }

    /// Create a cache with a byte budget and a maximum entry count.
    pub fn with_capacity_and_entries(max_bytes: usize, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(
                    std::num::NonZeroUsize::new(max_entries.max(1)).expect("at least one entry"),
                ),
                bytes: 0,
            }),
            max_bytes,
        }
    }

    /// Get a tile from the cache, marking it recently used.
    pub async fn get(&self, key: &TileCacheKey) -> Option<Bytes> {
        self.inner.lock().await.entries.get(key).cloned()
    }

    /// Check for a tile without updating LRU order.
    pub async fn contains(&self, key: &TileCacheKey) -> bool {
        self.inner.lock().await.entries.contains(key)
    }

    /// Store a tile, evicting least-recently-used entries until the cache
    /// fits its budget again.
    pub async fn put(&self, key: TileCacheKey, data: Bytes) {
        let mut inner = self.inner.lock().await;

        // Replacing an entry returns the old value; count it out first
        if let Some(old) = inner.entries.put(key, data.clone()) {
            inner.bytes -= old.len();
        }
        inner.bytes += data.len();

        while inner.bytes > self.max_bytes {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => inner.bytes -= evicted.len(),
                None => break,
            }
        }
    }

    /// Remove a tile, returning it if it existed.
    pub async fn remove(&self, key: &TileCacheKey) -> Option<Bytes> {
        let mut inner = self.inner.lock().await;
        let removed = inner.entries.pop(key);
        if let Some(ref data) = removed {
            inner.bytes -= data.len();
        }
        removed
    }

    /// Clear all entries.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.bytes = 0;
    }

    /// Current number of cached tiles.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Current total size of cached tiles in bytes.
    pub async fn size(&self) -> usize {
        self.inner.lock().await.bytes
    }

    /// The byte budget.
    pub fn capacity(&self) -> usize {
        self.max_bytes
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RasterMeta;
    use crate::geo::{Bounds, GeoTransform};

    fn key_at(z: u8, x: u32, y: u32, fingerprint: &str) -> TileCacheKey {
        TileCacheKey {
            coord: TileCoordinate::new(z, x, y).unwrap(),
            fingerprint: Arc::from(fingerprint),
            kernel: ResampleKernel::Bilinear,
            blend: BlendMode::Over,
            format: OutputFormat::Png,
            quality: 80,
        }
    }

    fn payload(size: usize) -> Bytes {
        Bytes::from(vec![0xABu8; size])
    }

    fn descriptor(id: &str, priority: f64) -> Arc<SourceDescriptor> {
        Arc::new(SourceDescriptor {
            id: id.to_string(),
            location: format!("mem://{id}"),
            footprint: Bounds::new(-180.0, -90.0, 180.0, 90.0),
            priority,
            resolution: 10.0,
            meta: RasterMeta {
                width: 4,
                height: 4,
                bands: 3,
                epsg: 3857,
                transform: GeoTransform {
                    origin_x: 0.0,
                    origin_y: 40.0,
                    pixel_width: 10.0,
                    pixel_height: 10.0,
                },
                nodata: None,
            },
        })
    }

    #[tokio::test]
    async fn test_roundtrip_is_byte_identical() {
        let cache = TileCache::new();
        let key = key_at(3, 1, 2, "abc");
        let data = payload(1000);

        assert!(cache.get(&key).await.is_none());
        cache.put(key.clone(), data.clone()).await;
        assert_eq!(cache.get(&key).await, Some(data));
        assert!(cache.contains(&key).await);
    }

    #[tokio::test]
    async fn test_keys_distinguish_format_and_fingerprint() {
        let cache = TileCache::new();

        let png = key_at(0, 0, 0, "abc");
        let mut jpeg = png.clone();
        jpeg.format = OutputFormat::Jpeg;
        let other_sources = key_at(0, 0, 0, "xyz");

        cache.put(png.clone(), Bytes::from_static(b"png")).await;
        cache.put(jpeg.clone(), Bytes::from_static(b"jpg")).await;

        assert_eq!(cache.get(&png).await, Some(Bytes::from_static(b"png")));
        assert_eq!(cache.get(&jpeg).await, Some(Bytes::from_static(b"jpg")));
        assert!(cache.get(&other_sources).await.is_none());
    }

    #[tokio::test]
    async fn test_byte_accounting() {
        let cache = TileCache::with_capacity(10_000);

        assert_eq!(cache.size().await, 0);
        cache.put(key_at(1, 0, 0, "a"), payload(1000)).await;
        cache.put(key_at(1, 1, 0, "a"), payload(2000)).await;
        assert_eq!(cache.size().await, 3000);

        // Replacing an entry accounts for the old bytes
        cache.put(key_at(1, 0, 0, "a"), payload(500)).await;
        assert_eq!(cache.size().await, 2500);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_budget_evicts_least_recently_used() {
        let cache = TileCache::with_capacity_and_entries(1000, 100);

        cache.put(key_at(2, 0, 0, "a"), payload(400)).await;
        cache.put(key_at(2, 1, 0, "a"), payload(400)).await;
        assert_eq!(cache.size().await, 800);

        // The third insert busts the budget; the oldest entry goes
        cache.put(key_at(2, 2, 0, "a"), payload(400)).await;

        assert!(cache.size().await <= 1000);
        assert!(!cache.contains(&key_at(2, 0, 0, "a")).await);
        assert!(cache.contains(&key_at(2, 1, 0, "a")).await);
        assert!(cache.contains(&key_at(2, 2, 0, "a")).await);
    }

    #[tokio::test]
    async fn test_get_refreshes_recency() {
        let cache = TileCache::with_capacity_and_entries(1500, 100);

        cache.put(key_at(2, 0, 0, "a"), payload(500)).await;
        cache.put(key_at(2, 1, 0, "a"), payload(500)).await;
        cache.put(key_at(2, 2, 0, "a"), payload(500)).await;

        // Touching the first entry makes the second the eviction victim
        cache.get(&key_at(2, 0, 0, "a")).await;
        cache.put(key_at(2, 3, 0, "a"), payload(500)).await;

        assert!(cache.contains(&key_at(2, 0, 0, "a")).await);
        assert!(!cache.contains(&key_at(2, 1, 0, "a")).await);
        assert!(cache.contains(&key_at(2, 2, 0, "a")).await);
        assert!(cache.contains(&key_at(2, 3, 0, "a")).await);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let cache = TileCache::with_capacity(10_000);
        let key = key_at(0, 0, 0, "a");
        let data = payload(1000);

        cache.put(key.clone(), data.clone()).await;
        assert_eq!(cache.remove(&key).await, Some(data));
        assert_eq!(cache.size().await, 0);
        assert!(cache.remove(&key).await.is_none());

        cache.put(key_at(1, 0, 0, "a"), payload(100)).await;
        cache.put(key_at(1, 1, 0, "a"), payload(200)).await;
        cache.clear().await;
        assert!(cache.is_empty().await);
        assert_eq!(cache.size().await, 0);
    }

    #[test]
    fn test_fingerprint_stable() {
        let sources = vec![descriptor("a", 2.0), descriptor("b", 1.0)];
        let f1 = source_set_fingerprint(&sources);
        let f2 = source_set_fingerprint(&sources);
        assert_eq!(f1, f2);
    }

    #[test]
    fn test_fingerprint_sensitive_to_order_and_priority() {
        let ab = source_set_fingerprint(&[descriptor("a", 2.0), descriptor("b", 1.0)]);
        let ba = source_set_fingerprint(&[descriptor("b", 1.0), descriptor("a", 2.0)]);
        assert_ne!(ab, ba);

        let bumped = source_set_fingerprint(&[descriptor("a", 3.0), descriptor("b", 1.0)]);
        assert_ne!(ab, bumped);
    }

    #[test]
    fn test_fingerprint_empty_set() {
        let empty = source_set_fingerprint(&[]);
        let one = source_set_fingerprint(&[descriptor("a", 1.0)]);
        assert_ne!(empty, one);
        assert_eq!(empty.len(), 64);
    }
}
