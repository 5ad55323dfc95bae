use thiserror::Error;

/// I/O errors that can occur when reading from raster storage
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Error from the local filesystem
    #[error("File error: {0}")]
    File(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),
}

/// Per-source errors. All of these are recoverable at the request level:
/// the orchestrator drops the failing source and continues with the rest.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The source could not be opened (missing object, storage failure,
    /// or stored bytes inconsistent with the catalog metadata).
    #[error("Source unavailable: {id}: {reason}")]
    Unavailable { id: String, reason: String },

    /// I/O failure while reading pixel data from an open source
    #[error("Read error: {0}")]
    Read(#[from] IoError),

    /// The requested window does not intersect the source's extent.
    ///
    /// The catalog pre-filters by footprint, so this indicates a contract
    /// violation upstream. It is logged and the source skipped, never
    /// surfaced to the client.
    #[error(
        "Window out of bounds for {id}: window {window_cols}x{window_rows} at \
         ({col_off}, {row_off}), raster is {width}x{height}"
    )]
    OutOfBounds {
        id: String,
        col_off: i64,
        row_off: i64,
        window_cols: usize,
        window_rows: usize,
        width: u32,
        height: u32,
    },

    /// Coordinate transform setup or evaluation failed for this source
    #[error("Projection error for {id}: {reason}")]
    Projection { id: String, reason: String },
}

impl SourceError {
    /// Identifier of the source this error belongs to, when known.
    pub fn source_id(&self) -> Option<&str> {
        match self {
            SourceError::Unavailable { id, .. }
            | SourceError::OutOfBounds { id, .. }
            | SourceError::Projection { id, .. } => Some(id),
            SourceError::Read(_) => None,
        }
    }
}

/// Request-level errors. Unlike [`SourceError`], these fail the whole tile.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// Tile coordinate outside the valid grid for its zoom level
    #[error("Invalid tile coordinate: z={zoom} x={x} y={y}")]
    InvalidCoordinate { zoom: u8, x: u32, y: u32 },

    /// The catalog service could not be queried
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Encoding the composited tile failed
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A cached tile failed validation; the entry has been invalidated
    #[error("Cache corruption for key {key}")]
    CacheCorruption { key: String },
}
