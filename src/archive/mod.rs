//! MBTiles archive reader.
//!
//! An archive is a SQLite database with a `metadata(name, value)` key/value
//! table and a `tiles(zoom_level, tile_column, tile_row, tile_data)` table.
//! Rows use the TMS convention (row 0 at the bottom); callers working in
//! slippy-map `{z,x,y}` coordinates go through [`tms_row`].

pub mod loader;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{ArchiveError, MetadataError, TileError};
use crate::geo::MapBounds;

const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Inclusive zoom levels present in the tiles table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomRange {
    pub min: u8,
    pub max: u8,
}

/// Convert a slippy-map row to the archive's flipped row
#[inline]
pub fn tms_row(z: u8, y: u32) -> u32 {
    ((1u64 << z) - 1 - y as u64) as u32
}

/// A loaded, immutable tile archive.
///
/// Owns its database connection and the scratch file backing it; dropping
/// the archive tears both down.
pub struct TileArchive {
    conn: Connection,
    metadata: HashMap<String, String>,
    zoom_range: Option<ZoomRange>,
    bounds: Option<MapBounds>,
    size_bytes: usize,
    _backing: NamedTempFile,
}

impl TileArchive {
    /// Open an archive from a complete byte buffer. The buffer is copied, never mutated.
    pub fn open(bytes: &[u8]) -> Result<Self, ArchiveError> {
        if bytes.len() < SQLITE_MAGIC.len() || &bytes[..SQLITE_MAGIC.len()] != SQLITE_MAGIC {
            return Err(ArchiveError::Corrupt("not an SQLite database".into()));
        }

        let mut backing = tempfile::Builder::new()
            .prefix("tac-map-")
            .suffix(".mbtiles")
            .tempfile()?;
        backing.write_all(bytes)?;
        backing.flush()?;

        let conn = Connection::open_with_flags(
            backing.path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(corrupt)?;

        let tables = list_tables(&conn).map_err(corrupt)?;
        for required in ["metadata", "tiles"] {
            if !tables.contains(required) {
                return Err(ArchiveError::Corrupt(format!("missing `{required}` table")));
            }
        }

        let metadata = read_metadata(&conn).map_err(corrupt)?;
        let zoom_range = read_zoom_range(&conn).map_err(corrupt)?;

        let bounds = match metadata.get("bounds") {
            Some(raw) => match raw.parse::<MapBounds>() {
                Ok(b) => Some(b),
                Err(e) => {
                    warn!("{e}; bounds-based features disabled");
                    None
                }
            },
            None => None,
        };

        if zoom_range.is_none() {
            warn!("{}", MetadataError::NoTiles);
        }

        info!(
            name = metadata.get("name").map(String::as_str).unwrap_or("?"),
            bytes = bytes.len(),
            ?zoom_range,
            ?bounds,
            "archive opened"
        );

        Ok(Self {
            conn,
            metadata,
            zoom_range,
            bounds,
            size_bytes: bytes.len(),
            _backing: backing,
        })
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata.get("name").map(String::as_str)
    }

    pub fn format(&self) -> Option<&str> {
        self.metadata.get("format").map(String::as_str)
    }

    /// `None` when the archive holds no tiles (partial load)
    pub fn zoom_range(&self) -> Option<ZoomRange> {
        self.zoom_range
    }

    /// `None` when absent or malformed
    pub fn bounds(&self) -> Option<MapBounds> {
        self.bounds
    }

    /// Raw tile bytes at archive coordinates (row already flipped)
    pub fn tile(&self, zoom: u8, column: u32, row: u32) -> Result<Option<Vec<u8>>, TileError> {
        let query = |source| TileError::Query {
            z: zoom,
            x: column,
            row,
            source,
        };
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
            )
            .map_err(query)?;
        let data: Option<Option<Vec<u8>>> = stmt
            .query_row(params![zoom, column, row], |r| r.get(0))
            .optional()
            .map_err(query)?;

        Ok(data.flatten().filter(|d| !d.is_empty()))
    }

    /// Number of tiles at each zoom level
    pub fn tile_count_by_zoom(&self) -> Result<BTreeMap<u8, u64>, ArchiveError> {
        let mut stmt = self
            .conn
            .prepare("SELECT zoom_level, COUNT(*) FROM tiles GROUP BY zoom_level")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, u8>(0)?, r.get::<_, i64>(1)?)))?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let (z, n) = row?;
            counts.insert(z, n.max(0) as u64);
        }
        Ok(counts)
    }

    pub fn tile_count(&self) -> Result<u64, ArchiveError> {
        Ok(self.tile_count_by_zoom()?.values().sum())
    }
}

impl Drop for TileArchive {
    fn drop(&mut self) {
        debug!(bytes = self.size_bytes, "archive released");
    }
}

fn corrupt(e: rusqlite::Error) -> ArchiveError {
    ArchiveError::Corrupt(e.to_string())
}

fn list_tables(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type IN ('table', 'view')")?;
    let names = stmt.query_map([], |r| r.get::<_, String>(0))?;
    names.collect()
}

fn read_metadata(conn: &Connection) -> rusqlite::Result<HashMap<String, String>> {
    let mut stmt = conn.prepare("SELECT name, value FROM metadata")?;
    let mut rows = stmt.query([])?;
    let mut meta = HashMap::new();
    while let Some(row) = rows.next()? {
        let Some(name) = row.get::<_, Option<String>>(0)? else {
            continue;
        };
        let value = match row.get_ref(1)? {
            ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
            ValueRef::Integer(i) => i.to_string(),
            ValueRef::Real(f) => f.to_string(),
            ValueRef::Null | ValueRef::Blob(_) => continue,
        };
        meta.insert(name, value);
    }
    Ok(meta)
}

fn read_zoom_range(conn: &Connection) -> rusqlite::Result<Option<ZoomRange>> {
    let mut stmt = conn.prepare("SELECT DISTINCT zoom_level FROM tiles ORDER BY zoom_level")?;
    let zooms = stmt
        .query_map([], |r| r.get::<_, u8>(0))?
        .collect::<rusqlite::Result<Vec<u8>>>()?;
    Ok(match (zooms.first(), zooms.last()) {
        (Some(&min), Some(&max)) => Some(ZoomRange { min, max }),
        _ => None,
    })
}
