//! Raster access: storage dispatch, pooled handles, and windowed reads.
//!
//! Opening a raster is expensive (a HEAD plus metadata validation, and on
//! some backends a connection), so open handles are a pooled, process-wide
//! resource with a hard cap. The pipeline borrows a handle for the duration
//! of one windowed read and never retains it across requests.
//!
//! - [`RasterStore`] / [`ObjectStore`]: create range readers from source
//!   locations (S3 or local files), dispatched on the location scheme
//! - [`RasterHandle`]: an opened raster (validated metadata + block-cached
//!   reader), safe for concurrent reads
//! - [`HandlePool`]: bounded LRU pool with singleflight opens
//! - [`PixelWindow`]: the pixel buffer + validity mask a windowed read
//!   produces

mod handle;
mod pool;
mod store;
mod window;

pub use handle::RasterHandle;
pub use pool::HandlePool;
pub use store::{ObjectStore, RasterStore, StoreReader};
pub use window::PixelWindow;
