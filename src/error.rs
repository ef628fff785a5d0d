use thiserror::Error;

/// Failure to acquire archive bytes over the network or from disk.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("HTTP {status}: {reason}")]
    Http { status: u16, reason: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("error loading {name}: {source}")]
    File {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// The buffer could not be opened as an MBTiles archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("corrupt archive: {0}")]
    Corrupt(String),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-tile lookup failure. Never shown to the user; the placeholder is drawn instead.
#[derive(Debug, Error)]
pub enum TileError {
    #[error("tile query failed at {z}/{x}/{row}: {source}")]
    Query {
        z: u8,
        x: u32,
        row: u32,
        #[source]
        source: rusqlite::Error,
    },
    #[error("tile decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record has no soldier_id")]
    MissingId,
    #[error("invalid coordinates for soldier {id}: lat={lat:?} lon={lon:?}")]
    InvalidCoordinates {
        id: String,
        lat: Option<f64>,
        lon: Option<f64>,
    },
    #[error("malformed message: {0}")]
    Malformed(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum MetadataError {
    #[error("bounds must have 4 comma separated numbers, got {0:?}")]
    Bounds(String),
    #[error("archive has no tiles")]
    NoTiles,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("nothing to export")]
    Empty,
    #[error("could not write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not encode image: {0}")]
    Image(#[from] image::ImageError),
}

/// A recorded session could not be loaded for replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Record(#[from] RecordError),
}
