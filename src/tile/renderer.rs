//! Tile renderer: the per-request orchestrator.
//!
//! One render walks the full pipeline:
//!
//! ```text
//! resolve sources -> acquire handles -> read windows -> reproject
//!     -> composite -> encode -> cache -> respond
//! ```
//!
//! Per-source stages run concurrently and are joined before compositing;
//! results are slotted back into catalog order, so sources completing out
//! of order can never change who wins an overlap. A source that fails to
//! open, read, or reproject is logged and dropped, degrading the mosaic
//! instead of failing the tile; with no usable sources at all the tile is
//! rendered fully transparent, which is the correct answer outside imagery
//! coverage, not an error.
//!
//! Renders are coalesced per cache key: concurrent requests for the same
//! uncached tile await a single pipeline execution. The winning render runs
//! in a detached task under a global concurrency limit, so a disconnecting
//! client neither cancels work other requests are waiting on nor corrupts
//! shared state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::catalog::{CatalogClient, SourceDescriptor};
use crate::error::{RenderError, SourceError};
use crate::geo::{Crs, PointTransform, TileCoordinate};
use crate::raster::{HandlePool, RasterStore};

use super::cache::{source_set_fingerprint, TileCache, TileCacheKey};
use super::composite::{composite, BlendMode, CompositeTile};
use super::encoder::{clamp_quality, OutputFormat, TileEncoder, DEFAULT_JPEG_QUALITY};
use super::reproject::{reproject, ReprojectedTile, ResampleKernel};

/// Default cap on concurrently executing render pipelines.
const DEFAULT_MAX_CONCURRENT_RENDERS: usize = 32;

// =============================================================================
// Render Parameters
// =============================================================================

/// Per-request rendering options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParams {
    pub kernel: ResampleKernel,
    pub blend: BlendMode,
    pub format: OutputFormat,
    /// JPEG quality (1-100); ignored for PNG
    pub quality: u8,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            kernel: ResampleKernel::Bilinear,
            blend: BlendMode::Over,
            format: OutputFormat::Png,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl RenderParams {
    pub fn with_format(format: OutputFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }
}

// =============================================================================
// Tile Response
// =============================================================================

/// Response from the renderer.
#[derive(Debug, Clone)]
pub struct TileResponse {
    /// Encoded tile bytes
    pub data: Bytes,

    /// MIME type matching the encoding
    pub content_type: &'static str,

    /// Whether this tile was served from the tile cache
    pub cache_hit: bool,
}

// =============================================================================
// Tile Renderer
// =============================================================================

/// Orchestrates tile rendering over a catalog, a handle pool, and the tile
/// cache.
///
/// This is an owned context object: construct it once at startup and pass
/// it (via `Arc`) to whatever serves requests. There is no ambient global
/// state, which keeps tests hermetic.
pub struct TileRenderer<S: RasterStore + 'static, C: CatalogClient + 'static> {
    catalog: Arc<C>,
    pool: Arc<HandlePool<S>>,
    cache: Arc<TileCache>,
    encoder: TileEncoder,
    limiter: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashMap<TileCacheKey, Arc<InFlightRender>>>>,
    /// Pipeline executions since startup (coalesced waiters don't count)
    renders_executed: Arc<AtomicU64>,
}

/// Shared state for one in-flight render.
struct InFlightRender {
    notify: Notify,
    result: Mutex<Option<Result<Bytes, RenderError>>>,
}

impl<S: RasterStore + 'static, C: CatalogClient + 'static> TileRenderer<S, C> {
    /// Create a renderer with default cache capacity and concurrency.
    pub fn new(catalog: C, pool: HandlePool<S>) -> Self {
        Self::with_settings(
            catalog,
            pool,
            super::cache::DEFAULT_TILE_CACHE_CAPACITY,
            DEFAULT_MAX_CONCURRENT_RENDERS,
        )
    }

    /// Create a renderer with a custom tile cache budget and render
    /// concurrency limit.
    pub fn with_settings(
        catalog: C,
        pool: HandlePool<S>,
        cache_capacity: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            pool: Arc::new(pool),
            cache: Arc::new(TileCache::with_capacity(cache_capacity)),
            encoder: TileEncoder::new(),
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            renders_executed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Render one tile, serving from cache when possible.
    pub async fn render(
        &self,
        coord: TileCoordinate,
        params: RenderParams,
    ) -> Result<TileResponse, RenderError> {
        // Resolve the source set first: the cache key depends on it
        let sources = self
            .catalog
            .resolve(&coord.wgs84_bounds())
            .await
            .map_err(|e| RenderError::Catalog(e.to_string()))?;

        let key = TileCacheKey {
            coord,
            fingerprint: source_set_fingerprint(&sources),
            kernel: params.kernel,
            blend: params.blend,
            format: params.format,
            quality: clamp_quality(params.quality),
        };

        if let Some(data) = self.cache.get(&key).await {
            if data.is_empty() {
                // An empty entry can only come from corruption; drop it and
                // fall through to a fresh render
                warn!(key = %key, "corrupt cached tile, invalidating");
                self.cache.remove(&key).await;
            } else {
                debug!(tile = %coord, "tile cache hit");
                return Ok(TileResponse {
                    data,
                    content_type: key.format.content_type(),
                    cache_hit: true,
                });
            }
        }

        let data = self.render_coalesced(key.clone(), sources, params).await?;

        Ok(TileResponse {
            data,
            content_type: key.format.content_type(),
            cache_hit: false,
        })
    }

    /// Run the pipeline with at-most-one render per key in flight.
    ///
    /// The second and later callers for the same key await the first
    /// caller's result rather than rendering again.
    async fn render_coalesced(
        &self,
        key: TileCacheKey,
        sources: Vec<Arc<SourceDescriptor>>,
        params: RenderParams,
    ) -> Result<Bytes, RenderError> {
        loop {
            let (state, leader) = {
                let mut in_flight = self.in_flight.lock().await;
                match in_flight.get(&key) {
                    Some(state) => (state.clone(), false),
                    None => {
                        let state = Arc::new(InFlightRender {
                            notify: Notify::new(),
                            result: Mutex::new(None),
                        });
                        in_flight.insert(key.clone(), state.clone());
                        (state, true)
                    }
                }
            };

            if leader {
                let pool = self.pool.clone();
                let cache = self.cache.clone();
                let in_flight = self.in_flight.clone();
                let limiter = self.limiter.clone();
                let encoder = self.encoder;
                let task_key = key.clone();
                let task_state = state.clone();
                let task_sources = sources.clone();
                let renders = self.renders_executed.clone();

                // Detached: completes even if every requester disconnects
                tokio::spawn(async move {
                    renders.fetch_add(1, Ordering::SeqCst);
                    let result = execute_pipeline(
                        pool,
                        limiter,
                        encoder,
                        task_key.coord,
                        task_sources,
                        params,
                    )
                    .await;

                    if let Ok(ref data) = result {
                        cache.put(task_key.clone(), data.clone()).await;
                    }

                    {
                        let mut in_flight = in_flight.lock().await;
                        let mut slot = task_state.result.lock().await;
                        *slot = Some(result);
                        in_flight.remove(&task_key);
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

    /// Tile cache statistics as `(current_size, capacity, entry_count)`.
    pub async fn cache_stats(&self) -> (usize, usize, usize) {
        let size = self.cache.size().await;
        let capacity = self.cache.capacity();
        let count = self.cache.len().await;
        (size, capacity, count)
    }

    /// Number of currently open raster handles.
    pub async fn open_handles(&self) -> usize {
        self.pool.open_count().await
    }

    /// Total pipeline executions since startup. Requests that were served
    /// from cache or coalesced onto another render don't count.
    pub fn renders_executed(&self) -> u64 {
        self.renders_executed.load(Ordering::SeqCst)
    }

    /// Clear the tile cache.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Drain shared resources for shutdown: pooled handles and the tile
    /// cache. In-flight renders finish against their borrowed handles.
    pub async fn shutdown(&self) {
        self.pool.drain().await;
        self.cache.clear().await;
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Execute the render pipeline for one tile.
async fn execute_pipeline<S: RasterStore + 'static>(
    pool: Arc<HandlePool<S>>,
    limiter: Arc<Semaphore>,
    encoder: TileEncoder,
    coord: TileCoordinate,
    sources: Vec<Arc<SourceDescriptor>>,
    params: RenderParams,
) -> Result<Bytes, RenderError> {
    // The semaphore never closes, so acquire cannot fail in practice
    let _permit = limiter
        .acquire()
        .await
        .map_err(|e| RenderError::Encoding(format!("render limiter closed: {e}")))?;

    if sources.is_empty() {
        debug!(tile = %coord, "no sources intersect tile, rendering empty");
        return encoder.encode(&CompositeTile::transparent(), params.format, params.quality);
    }

    debug!(tile = %coord, sources = sources.len(), "rendering tile");

    // Fan out per source; each task owns its full acquire/read/reproject
    // chain so slow sources overlap instead of serializing
    let mut join = JoinSet::new();
    for (index, source) in sources.iter().enumerate() {
        let pool = pool.clone();
        let source = source.clone();
        let kernel = params.kernel;
        join.spawn(async move {
            let result = render_source(pool.as_ref(), &source, &coord, kernel).await;
            (index, result)
        });
    }

    // Completion order is arbitrary; the slot index restores the priority
    // order the catalog established before any work started
    let mut slots: Vec<Option<ReprojectedTile>> = (0..sources.len()).map(|_| None).collect();
    while let Some(joined) = join.join_next().await {
        match joined {
            Ok((index, Ok(tile))) => slots[index] = Some(tile),
            Ok((index, Err(err))) => log_source_failure(&sources[index].id, &err),
            Err(e) => warn!(tile = %coord, "source task panicked: {e}"),
        }
    }

    let contributions: Vec<ReprojectedTile> = slots.into_iter().flatten().collect();
    if contributions.is_empty() {
        debug!(tile = %coord, "all sources degraded, rendering empty");
    }

    let tile = composite(&contributions, params.blend);
    encoder.encode(&tile, params.format, params.quality)
}

/// Acquire, read, and reproject one source's contribution.
async fn render_source<S: RasterStore + 'static>(
    pool: &HandlePool<S>,
    source: &Arc<SourceDescriptor>,
    coord: &TileCoordinate,
    kernel: ResampleKernel,
) -> Result<ReprojectedTile, SourceError> {
    let handle = pool.acquire(source).await?;

    let to_source = PointTransform::new(Crs::WEB_MERCATOR, source.meta.crs()).map_err(|reason| {
        SourceError::Projection {
            id: source.id.clone(),
            reason,
        }
    })?;

    let source_bounds = coord
        .mercator_bounds()
        .transform_envelope(&to_source)
        .map_err(|reason| SourceError::Projection {
            id: source.id.clone(),
            reason,
        })?;

    let window = handle.read_window(&source_bounds).await?;

    reproject(&window, &source.meta, coord, kernel, source.priority)
}

/// Per-source failures degrade the composite; they are never fatal.
fn log_source_failure(id: &str, err: &SourceError) {
    match err {
        // A window that misses its own footprint means the catalog's
        // pre-filter lied; worth a louder log than a flaky read
        SourceError::OutOfBounds { .. } => {
            error!(source = %id, "window outside source extent: {err}")
        }
        _ => warn!(source = %id, "skipping source: {err}"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogError, MemoryCatalog, RasterMeta};
    use crate::error::IoError;
    use crate::geo::{Bounds, GeoTransform, TILE_SIZE};
    use crate::io::RangeReader;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // -------------------------------------------------------------------------
    // Fixtures
    // -------------------------------------------------------------------------

    struct MemoryReader {
        data: Bytes,
        identifier: String,
        read_count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RangeReader for MemoryReader {
        async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
            self.read_count.fetch_add(1, Ordering::SeqCst);
            if offset + len as u64 > self.data.len() as u64 {
                return Err(IoError::RangeOutOfBounds {
                    offset,
                    requested: len as u64,
                    size: self.data.len() as u64,
                });
            }
            Ok(self.data.slice(offset as usize..offset as usize + len))
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn identifier(&self) -> &str {
            &self.identifier
        }
    }

    /// In-memory store mapping locations to raster bytes. Locations absent
    /// from the map fail to open.
    struct MemoryStore {
        rasters: HashMap<String, Bytes>,
        read_count: Arc<AtomicUsize>,
    }

    impl MemoryStore {
        fn new(rasters: HashMap<String, Bytes>) -> Self {
            Self {
                rasters,
                read_count: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl RasterStore for MemoryStore {
        type Reader = MemoryReader;

        async fn create_reader(&self, location: &str) -> Result<Self::Reader, IoError> {
            let data = self
                .rasters
                .get(location)
                .cloned()
                .ok_or_else(|| IoError::NotFound(location.to_string()))?;
            Ok(MemoryReader {
                data,
                identifier: location.to_string(),
                read_count: self.read_count.clone(),
            })
        }
    }

    /// A solid-color mercator raster exactly covering `tile` at 64px.
    fn solid_source(
        id: &str,
        priority: f64,
        tile: &TileCoordinate,
        rgb: [u8; 3],
    ) -> (SourceDescriptor, Bytes) {
        let bounds = tile.mercator_bounds();
        let px = 64u32;
        let mut data = Vec::with_capacity((px * px * 3) as usize);
        for _ in 0..px * px {
            data.extend_from_slice(&rgb);
        }

        let descriptor = SourceDescriptor {
            id: id.to_string(),
            location: format!("mem://{id}"),
            footprint: Bounds::new(-180.0, -90.0, 180.0, 90.0),
            priority,
            resolution: bounds.width() / px as f64,
            meta: RasterMeta {
                width: px,
                height: px,
                bands: 3,
                epsg: 3857,
                transform: GeoTransform {
                    origin_x: bounds.min_x,
                    origin_y: bounds.max_y,
                    pixel_width: bounds.width() / px as f64,
                    pixel_height: bounds.height() / px as f64,
                },
                nodata: None,
            },
        };

        (descriptor, Bytes::from(data))
    }

    fn renderer_with(
        descriptors: Vec<SourceDescriptor>,
        rasters: HashMap<String, Bytes>,
    ) -> TileRenderer<MemoryStore, MemoryCatalog> {
        let store = MemoryStore::new(rasters);
        let pool = HandlePool::with_capacity(store, 16, 64 * 1024, 1024 * 1024);
        let catalog = MemoryCatalog::new(descriptors);
        TileRenderer::new(catalog, pool)
    }

    fn decode_rgba(data: &Bytes) -> image::RgbaImage {
        image::load_from_memory(data).unwrap().into_rgba8()
    }

    // -------------------------------------------------------------------------
    // Tests
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_no_coverage_renders_transparent_not_error() {
        let renderer = renderer_with(vec![], HashMap::new());
        let coord = TileCoordinate::new(4, 3, 5).unwrap();

        let response = renderer.render(coord, RenderParams::default()).await.unwrap();
        assert_eq!(response.content_type, "image/png");

        let img = decode_rgba(&response.data);
        assert_eq!(img.dimensions(), (TILE_SIZE, TILE_SIZE));
        assert!(img.pixels().all(|p| p[3] == 0));
    }

    #[tokio::test]
    async fn test_highest_priority_source_wins() {
        let coord = TileCoordinate::new(3, 2, 2).unwrap();
        let (a, a_data) = solid_source("a", 2.0, &coord, [10, 20, 30]);
        let (b, b_data) = solid_source("b", 1.0, &coord, [200, 200, 200]);

        let renderer = renderer_with(
            vec![a, b],
            HashMap::from([
                ("mem://a".to_string(), a_data),
                ("mem://b".to_string(), b_data),
            ]),
        );

        let response = renderer.render(coord, RenderParams::default()).await.unwrap();
        let img = decode_rgba(&response.data);
        let px = img.get_pixel(128, 128);
        assert_eq!([px[0], px[1], px[2]], [10, 20, 30]);
    }

    #[tokio::test]
    async fn test_unavailable_source_degrades_to_remaining() {
        let coord = TileCoordinate::new(3, 2, 2).unwrap();
        let (a, _a_data) = solid_source("a", 2.0, &coord, [10, 20, 30]);
        let (b, b_data) = solid_source("b", 1.0, &coord, [200, 210, 220]);

        // "a" has no stored bytes, so opening it fails
        let renderer = renderer_with(
            vec![a, b],
            HashMap::from([("mem://b".to_string(), b_data)]),
        );

        let response = renderer.render(coord, RenderParams::default()).await.unwrap();
        let img = decode_rgba(&response.data);
        let px = img.get_pixel(50, 50);
        assert_eq!([px[0], px[1], px[2]], [200, 210, 220]);
    }

    #[tokio::test]
    async fn test_all_sources_failing_renders_transparent() {
        let coord = TileCoordinate::new(3, 2, 2).unwrap();
        let (a, _) = solid_source("a", 2.0, &coord, [10, 20, 30]);

        let renderer = renderer_with(vec![a], HashMap::new());

        let response = renderer.render(coord, RenderParams::default()).await.unwrap();
        let img = decode_rgba(&response.data);
        assert!(img.pixels().all(|p| p[3] == 0));
    }

    #[tokio::test]
    async fn test_render_is_idempotent_and_cached() {
        let coord = TileCoordinate::new(3, 2, 2).unwrap();
        let (a, a_data) = solid_source("a", 1.0, &coord, [5, 6, 7]);

        let renderer = renderer_with(vec![a], HashMap::from([("mem://a".to_string(), a_data)]));

        let first = renderer.render(coord, RenderParams::default()).await.unwrap();
        assert!(!first.cache_hit);

        let second = renderer.render(coord, RenderParams::default()).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(first.data, second.data);
    }

    #[tokio::test]
    async fn test_rerender_after_cache_clear_is_byte_identical() {
        let coord = TileCoordinate::new(3, 2, 2).unwrap();
        let (a, a_data) = solid_source("a", 1.0, &coord, [5, 6, 7]);

        let renderer = renderer_with(vec![a], HashMap::from([("mem://a".to_string(), a_data)]));

        let first = renderer.render(coord, RenderParams::default()).await.unwrap();
        renderer.clear_cache().await;
        let second = renderer.render(coord, RenderParams::default()).await.unwrap();

        assert!(!second.cache_hit);
        assert_eq!(first.data, second.data);
    }

    #[tokio::test]
    async fn test_concurrent_requests_coalesce_to_one_render() {
        let coord = TileCoordinate::new(3, 2, 2).unwrap();
        let (a, a_data) = solid_source("a", 1.0, &coord, [5, 6, 7]);

        let renderer = Arc::new(renderer_with(
            vec![a],
            HashMap::from([("mem://a".to_string(), a_data)]),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let renderer = renderer.clone();
            handles.push(tokio::spawn(async move {
                renderer.render(coord, RenderParams::default()).await
            }));
        }

        let mut outputs = Vec::new();
        for handle in handles {
            outputs.push(handle.await.unwrap().unwrap().data);
        }
        assert!(outputs.windows(2).all(|w| w[0] == w[1]));

        // All eight requests coalesced onto a single pipeline execution
        assert_eq!(renderer.renders_executed(), 1);

        // A fresh key renders again
        renderer.clear_cache().await;
        renderer
            .render(coord, RenderParams::default())
            .await
            .unwrap();
        assert_eq!(renderer.renders_executed(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_triggers_rerender() {
        let coord = TileCoordinate::new(3, 2, 2).unwrap();
        let (a, a_data) = solid_source("a", 1.0, &coord, [5, 6, 7]);

        let renderer = renderer_with(vec![a], HashMap::from([("mem://a".to_string(), a_data)]));

        // Render once to learn the key, then poison the entry
        let first = renderer.render(coord, RenderParams::default()).await.unwrap();

        let sources = renderer
            .catalog
            .resolve(&coord.wgs84_bounds())
            .await
            .unwrap();
        let key = TileCacheKey {
            coord,
            fingerprint: source_set_fingerprint(&sources),
            kernel: ResampleKernel::Bilinear,
            blend: BlendMode::Over,
            format: OutputFormat::Png,
            quality: 80,
        };
        renderer.cache.put(key.clone(), Bytes::new()).await;

        let recovered = renderer.render(coord, RenderParams::default()).await.unwrap();
        assert!(!recovered.cache_hit);
        assert_eq!(recovered.data, first.data);
    }

    #[tokio::test]
    async fn test_catalog_failure_is_request_error() {
        struct BrokenCatalog;

        #[async_trait]
        impl CatalogClient for BrokenCatalog {
            async fn resolve(
                &self,
                _bounds: &Bounds,
            ) -> Result<Vec<Arc<SourceDescriptor>>, CatalogError> {
                Err(CatalogError("catalog offline".to_string()))
            }
        }

        let store = MemoryStore::new(HashMap::new());
        let pool = HandlePool::with_capacity(store, 16, 64 * 1024, 1024 * 1024);
        let renderer = TileRenderer::new(BrokenCatalog, pool);

        let coord = TileCoordinate::new(1, 0, 0).unwrap();
        let result = renderer.render(coord, RenderParams::default()).await;
        assert!(matches!(result, Err(RenderError::Catalog(_))));
    }

    #[tokio::test]
    async fn test_jpeg_format_and_content_type() {
        let coord = TileCoordinate::new(3, 2, 2).unwrap();
        let (a, a_data) = solid_source("a", 1.0, &coord, [90, 91, 92]);

        let renderer = renderer_with(vec![a], HashMap::from([("mem://a".to_string(), a_data)]));

        let response = renderer
            .render(coord, RenderParams::with_format(OutputFormat::Jpeg))
            .await
            .unwrap();

        assert_eq!(response.content_type, "image/jpeg");
        assert_eq!(response.data[0], 0xFF);
        assert_eq!(response.data[1], 0xD8);
    }
}
