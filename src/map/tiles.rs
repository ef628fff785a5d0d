//! Tile provision for the basemap.
//!
//! The renderer only knows [`TileProvider`]; the archive-backed provider is
//! injected into a [`TileLayer`] which decodes and caches images.

use std::num::NonZeroUsize;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use lru::LruCache;
use rayon::prelude::*;
use tracing::debug;

use crate::archive::{tms_row, TileArchive, ZoomRange};
use crate::error::TileError;
use crate::map::projection::TileCoord;

/// Anything that can hand out encoded tile images by slippy-map address
pub trait TileProvider {
    fn fetch_tile(&self, z: u8, x: u32, y: u32) -> Option<Vec<u8>>;

    /// Zoom levels worth requesting; `None` means there is nothing to draw
    fn zoom_range(&self) -> Option<ZoomRange> {
        None
    }
}

/// Serves tiles out of the currently loaded archive, if any
#[derive(Default)]
pub struct ArchiveTileProvider {
    archive: Option<TileArchive>,
}

impl ArchiveTileProvider {
    pub fn new() -> Self {
        Self { archive: None }
    }

    pub fn archive(&self) -> Option<&TileArchive> {
        self.archive.as_ref()
    }

    /// Replace the active archive. The previous one is dropped before returning.
    pub fn swap(&mut self, archive: Option<TileArchive>) {
        // Tear the old archive down before the new one becomes visible
        drop(self.archive.take());
        self.archive = archive;
    }
}

impl TileProvider for ArchiveTileProvider {
    fn fetch_tile(&self, z: u8, x: u32, y: u32) -> Option<Vec<u8>> {
        let archive = self.archive.as_ref()?;
        if z >= 32 || u64::from(y) >= 1u64 << z {
            return None;
        }
        match archive.tile(z, x, tms_row(z, y)) {
            Ok(data) => data,
            Err(e) => {
                debug!("{e}");
                None
            }
        }
    }

    fn zoom_range(&self) -> Option<ZoomRange> {
        self.archive.as_ref()?.zoom_range()
    }
}

/// Decode PNG/JPEG bytes to RGBA
pub fn decode_tile(bytes: &[u8]) -> Result<RgbaImage, TileError> {
    Ok(image::load_from_memory(bytes)?.into_rgba8())
}

/// Decoded, cached tiles on top of a provider
pub struct TileLayer<P: TileProvider> {
    provider: P,
    generation: u64,
    cache: LruCache<(u64, TileCoord), Arc<RgbaImage>>,
    placeholder: Arc<RgbaImage>,
}

impl<P: TileProvider> TileLayer<P> {
    pub fn new(provider: P, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            generation: 0,
            cache: LruCache::new(capacity),
            placeholder: Arc::new(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0]))),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 1x1 transparent image used whenever a tile cannot be shown
    pub fn placeholder(&self) -> Arc<RgbaImage> {
        Arc::clone(&self.placeholder)
    }

    pub fn is_placeholder(&self, tile: &Arc<RgbaImage>) -> bool {
        Arc::ptr_eq(tile, &self.placeholder)
    }

    /// Drop every cached tile so the next frame refetches
    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.cache.clear();
    }

    /// Decoded tile or the placeholder; never fails
    pub fn tile(&mut self, coord: TileCoord) -> Arc<RgbaImage> {
        let key = (self.generation, coord);
        if let Some(img) = self.cache.get(&key) {
            return Arc::clone(img);
        }
        let img = self.decode_or_placeholder(self.provider.fetch_tile(coord.z, coord.x, coord.y));
        self.cache.put(key, Arc::clone(&img));
        img
    }

    /// Fetch every uncached tile in `coords` and decode the batch in parallel
    pub fn prefetch(&mut self, coords: &[TileCoord]) {
        let generation = self.generation;
        let pending: Vec<(TileCoord, Option<Vec<u8>>)> = coords
            .iter()
            .filter(|c| !self.cache.contains(&(generation, **c)))
            .map(|c| (*c, self.provider.fetch_tile(c.z, c.x, c.y)))
            .collect();
        if pending.is_empty() {
            return;
        }

        let placeholder = Arc::clone(&self.placeholder);
        let decoded: Vec<(TileCoord, Arc<RgbaImage>)> = pending
            .into_par_iter()
            .map(|(coord, bytes)| {
                let img = match bytes.as_deref().map(decode_tile) {
                    Some(Ok(img)) => Arc::new(img),
                    Some(Err(e)) => {
                        debug!(?coord, "{e}");
                        Arc::clone(&placeholder)
                    }
                    None => Arc::clone(&placeholder),
                };
                (coord, img)
            })
            .collect();

        for (coord, img) in decoded {
            self.insert_decoded(generation, coord, img);
        }
    }

    /// Store a decoded tile unless it was produced for a replaced archive
    pub fn insert_decoded(&mut self, generation: u64, coord: TileCoord, img: Arc<RgbaImage>) -> bool {
        if generation != self.generation {
            debug!(?coord, generation, current = self.generation, "stale tile discarded");
            return false;
        }
        self.cache.put((generation, coord), img);
        true
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    fn decode_or_placeholder(&self, bytes: Option<Vec<u8>>) -> Arc<RgbaImage> {
        match bytes.as_deref().map(decode_tile) {
            Some(Ok(img)) => Arc::new(img),
            Some(Err(e)) => {
                debug!("{e}");
                self.placeholder()
            }
            None => self.placeholder(),
        }
    }
}

impl TileLayer<ArchiveTileProvider> {
    pub fn archive(&self) -> Option<&TileArchive> {
        self.provider.archive()
    }

    /// Install a new archive (or none) and force a full redraw
    pub fn swap_archive(&mut self, archive: Option<TileArchive>) {
        self.provider.swap(archive);
        self.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::fixtures::{mbtiles, png};

    fn coord(z: u8, x: u32, y: u32) -> TileCoord {
        TileCoord { z, x, y }
    }

    #[test]
    fn test_fetch_flips_rows() {
        let red = png([255, 0, 0, 255]);
        let bytes = mbtiles(None, &[(3, 5, tms_row(3, 2), red.clone())]);
        let mut provider = ArchiveTileProvider::new();
        provider.swap(Some(TileArchive::open(&bytes).unwrap()));

        assert_eq!(provider.fetch_tile(3, 5, 2), Some(red));
        assert_eq!(provider.fetch_tile(3, 5, tms_row(3, 2)), None);
        assert_eq!(provider.fetch_tile(3, 5, 99), None);
    }

    #[test]
    fn test_no_archive_gives_placeholder() {
        let mut layer = TileLayer::new(ArchiveTileProvider::new(), 16);
        let tile = layer.tile(coord(4, 1, 1));
        assert!(layer.is_placeholder(&tile));
        assert_eq!(tile.dimensions(), (1, 1));
        assert_eq!(tile.get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn test_undecodable_bytes_give_placeholder() {
        let bytes = mbtiles(None, &[(0, 0, 0, b"not an image".to_vec())]);
        let mut layer = TileLayer::new(ArchiveTileProvider::new(), 16);
        layer.swap_archive(Some(TileArchive::open(&bytes).unwrap()));
        let tile = layer.tile(coord(0, 0, 0));
        assert!(layer.is_placeholder(&tile));
    }

    #[test]
    fn test_tile_decodes_and_caches() {
        let bytes = mbtiles(None, &[(1, 0, tms_row(1, 0), png([0, 255, 0, 255]))]);
        let mut layer = TileLayer::new(ArchiveTileProvider::new(), 16);
        layer.swap_archive(Some(TileArchive::open(&bytes).unwrap()));

        let tile = layer.tile(coord(1, 0, 0));
        assert!(!layer.is_placeholder(&tile));
        assert_eq!(tile.get_pixel(0, 0).0, [0, 255, 0, 255]);
        assert_eq!(layer.cached_len(), 1);

        let again = layer.tile(coord(1, 0, 0));
        assert!(Arc::ptr_eq(&tile, &again));
    }

    #[test]
    fn test_prefetch_fills_cache() {
        let bytes = mbtiles(
            None,
            &[
                (1, 0, tms_row(1, 0), png([1, 1, 1, 255])),
                (1, 1, tms_row(1, 0), png([2, 2, 2, 255])),
            ],
        );
        let mut layer = TileLayer::new(ArchiveTileProvider::new(), 16);
        layer.swap_archive(Some(TileArchive::open(&bytes).unwrap()));
        layer.prefetch(&[coord(1, 0, 0), coord(1, 1, 0), coord(1, 0, 1)]);
        assert_eq!(layer.cached_len(), 3);
        assert_eq!(layer.tile(coord(1, 1, 0)).get_pixel(0, 0).0, [2, 2, 2, 255]);
    }

    #[test]
    fn test_swap_discards_stale_results() {
        let mut layer = TileLayer::new(ArchiveTileProvider::new(), 16);
        let before = layer.generation();
        layer.swap_archive(None);
        assert_eq!(layer.generation(), before + 1);

        let late = Arc::new(RgbaImage::new(2, 2));
        assert!(!layer.insert_decoded(before, coord(0, 0, 0), late));
        assert_eq!(layer.cached_len(), 0);
    }
}
