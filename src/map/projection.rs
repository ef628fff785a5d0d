use std::f64::consts::PI;

use crate::geo::{LatLon, MapBounds};

/// Latitude limit of the square Web Mercator world
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// A slippy-map tile address (`y` counted from the top)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

/// Viewport representing the visible map area and zoom level.
///
/// Pixels are braille dots: two per terminal column, four per row.
#[derive(Debug, Clone)]
pub struct Viewport {
    /// Center longitude (-180 to 180)
    pub center_lon: f64,
    /// Center latitude
    pub center_lat: f64,
    /// Slippy-map zoom level, may be fractional
    pub zoom: f64,
    /// Canvas pixel width
    pub width: usize,
    /// Canvas pixel height
    pub height: usize,
    /// Pixels one tile spans at an integer zoom
    pub tile_size: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

/// Normalized Web Mercator coordinates in `0..1`
#[inline]
fn mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = (lon + 180.0) / 360.0;
    let lat_rad = lat * PI / 180.0;
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0;
    (x, y)
}

#[inline]
fn inverse_mercator(x: f64, y: f64) -> (f64, f64) {
    let lon = x * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y)).sinh().atan() * 180.0 / PI;
    (lon, lat)
}

impl Viewport {
    pub fn new(center_lon: f64, center_lat: f64, zoom: f64, width: usize, height: usize) -> Self {
        Self {
            center_lon,
            center_lat,
            zoom,
            width,
            height,
            tile_size: 64.0,
            min_zoom: 0.0,
            max_zoom: 21.0,
        }
    }

    pub fn with_tile_size(mut self, tile_size: f64) -> Self {
        self.tile_size = tile_size.max(8.0);
        self
    }

    pub fn with_zoom_limits(mut self, min_zoom: f64, max_zoom: f64) -> Self {
        self.set_zoom_limits(min_zoom, max_zoom);
        self
    }

    pub fn set_zoom_limits(&mut self, min_zoom: f64, max_zoom: f64) {
        self.min_zoom = min_zoom.min(max_zoom);
        self.max_zoom = max_zoom;
        self.zoom = self.zoom.clamp(self.min_zoom, self.max_zoom);
    }

    /// Size of the whole world in pixels at the current zoom
    #[inline]
    fn world_size(&self) -> f64 {
        self.tile_size * 2f64.powf(self.zoom)
    }

    pub fn center(&self) -> LatLon {
        LatLon::new(self.center_lat, self.center_lon)
    }

    /// Recenter without changing zoom
    pub fn set_center(&mut self, at: LatLon) {
        self.center_lat = at.lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
        self.center_lon = at.lon;
    }

    /// Pan the viewport by pixel delta
    pub fn pan(&mut self, dx: i32, dy: i32) {
        let world = self.world_size();
        let (cx, cy) = mercator(self.center_lon, self.center_lat);
        let x = cx + dx as f64 / world;
        let y = (cy + dy as f64 / world).clamp(0.0, 1.0);
        let (mut lon, lat) = inverse_mercator(x, y);

        // Wrap longitude
        if lon > 180.0 {
            lon -= 360.0;
        } else if lon < -180.0 {
            lon += 360.0;
        }

        self.center_lon = lon;
        self.center_lat = lat;
    }

    pub fn zoom_in(&mut self) {
        self.zoom = (self.zoom + 1.0).min(self.max_zoom);
    }

    pub fn zoom_out(&mut self) {
        self.zoom = (self.zoom - 1.0).max(self.min_zoom);
    }

    /// Zoom in towards a specific pixel location
    pub fn zoom_in_at(&mut self, px: i32, py: i32) {
        self.zoom_at(px, py, 1.0);
    }

    /// Zoom out from a specific pixel location
    pub fn zoom_out_at(&mut self, px: i32, py: i32) {
        self.zoom_at(px, py, -1.0);
    }

    /// Zoom by `delta` levels keeping the point under the cursor fixed
    fn zoom_at(&mut self, px: i32, py: i32, delta: f64) {
        let (lon, lat) = self.unproject(px, py);

        self.zoom = (self.zoom + delta).clamp(self.min_zoom, self.max_zoom);

        let (new_px, new_py) = self.project(lon, lat);
        self.pan(new_px - px, new_py - py);
    }

    /// Unproject pixel coordinates back to geographic coordinates (lon, lat)
    pub fn unproject(&self, px: i32, py: i32) -> (f64, f64) {
        let world = self.world_size();
        let (cx, cy) = mercator(self.center_lon, self.center_lat);
        let x = (px as f64 - self.width as f64 / 2.0) / world + cx;
        let y = (py as f64 - self.height as f64 / 2.0) / world + cy;
        inverse_mercator(x, y)
    }

    /// Project a geographic coordinate (lon, lat) to pixel coordinates
    pub fn project(&self, lon: f64, lat: f64) -> (i32, i32) {
        let (x, y) = self.project_f(lon, lat);
        (x.round() as i32, y.round() as i32)
    }

    /// Sub-pixel projection
    pub fn project_f(&self, lon: f64, lat: f64) -> (f64, f64) {
        let world = self.world_size();
        let (x, y) = mercator(lon, lat);
        let (cx, cy) = mercator(self.center_lon, self.center_lat);
        (
            (x - cx) * world + self.width as f64 / 2.0,
            (y - cy) * world + self.height as f64 / 2.0,
        )
    }

    /// Check if a projected point is visible in the viewport
    pub fn is_visible(&self, px: i32, py: i32) -> bool {
        px >= -10 && px < self.width as i32 + 10 && py >= -10 && py < self.height as i32 + 10
    }

    /// Check if a line segment might be visible (rough bounding box check)
    pub fn line_might_be_visible(&self, p1: (i32, i32), p2: (i32, i32)) -> bool {
        let min_x = p1.0.min(p2.0);
        let max_x = p1.0.max(p2.0);
        let min_y = p1.1.min(p2.1);
        let max_y = p1.1.max(p2.1);

        max_x >= 0 && min_x < self.width as i32 && max_y >= 0 && min_y < self.height as i32
    }

    /// Geographic extent currently on screen
    pub fn visible_extent(&self) -> MapBounds {
        let (west, north) = self.unproject(0, 0);
        let (east, south) = self.unproject(self.width as i32, self.height as i32);
        MapBounds {
            west,
            south,
            east,
            north,
        }
    }

    /// Integer zoom used to pick tiles, clamped to what the archive holds
    pub fn tile_zoom(&self, archive_min: u8, archive_max: u8) -> u8 {
        (self.zoom.round().max(0.0) as u8).clamp(archive_min, archive_max.max(archive_min))
    }

    /// Map a screen pixel to a tile at zoom `z` plus the fractional position inside it
    pub fn pixel_to_tile(&self, px: f64, py: f64, z: u8) -> Option<(TileCoord, f64, f64)> {
        let world = self.world_size();
        let (cx, cy) = mercator(self.center_lon, self.center_lat);
        let x = (px - self.width as f64 / 2.0) / world + cx;
        let y = (py - self.height as f64 / 2.0) / world + cy;
        if !(0.0..1.0).contains(&y) {
            return None;
        }
        let n = (1u64 << z) as f64;
        let x = x.rem_euclid(1.0) * n;
        let y = y * n;
        let (tx, ty) = (x.floor(), y.floor());
        Some((
            TileCoord {
                z,
                x: tx as u32,
                y: ty as u32,
            },
            x - tx,
            y - ty,
        ))
    }

    /// All tiles at zoom `z` that intersect the viewport
    pub fn visible_tiles(&self, z: u8) -> Vec<TileCoord> {
        let world = self.world_size();
        let (cx, cy) = mercator(self.center_lon, self.center_lat);
        let n = 1i64 << z;
        let to_tile = |p: f64, c: f64, extent: usize| {
            (((p - extent as f64 / 2.0) / world + c) * n as f64).floor() as i64
        };
        let x0 = to_tile(0.0, cx, self.width);
        let x1 = to_tile(self.width as f64, cx, self.width);
        let y0 = to_tile(0.0, cy, self.height).max(0);
        let y1 = to_tile(self.height as f64, cy, self.height).min(n - 1);

        let mut tiles = Vec::new();
        for ty in y0..=y1 {
            for tx in x0..=x1 {
                let coord = TileCoord {
                    z,
                    x: tx.rem_euclid(n) as u32,
                    y: ty as u32,
                };
                if !tiles.contains(&coord) {
                    tiles.push(coord);
                }
            }
        }
        tiles
    }

    /// Center on `bounds` at the deepest zoom that still shows all of it
    pub fn fit_bounds(&mut self, bounds: &MapBounds, max_zoom: f64, padding_px: f64) {
        let (x0, y0) = mercator(bounds.west, bounds.north);
        let (x1, y1) = mercator(bounds.east, bounds.south);
        let span_x = (x1 - x0).abs().max(1e-12);
        let span_y = (y1 - y0).abs().max(1e-12);
        let avail_w = (self.width as f64 - 2.0 * padding_px).max(1.0);
        let avail_h = (self.height as f64 - 2.0 * padding_px).max(1.0);

        let scale = (avail_w / (span_x * self.tile_size)).min(avail_h / (span_y * self.tile_size));
        let ideal = scale.log2().floor();
        self.zoom = ideal.clamp(self.min_zoom, max_zoom.min(self.max_zoom));

        let (lon, lat) = inverse_mercator((x0 + x1) / 2.0, (y0 + y1) / 2.0);
        self.center_lon = lon;
        self.center_lat = lat;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_center() {
        let vp = Viewport::new(0.0, 0.0, 1.0, 100, 100);
        let (x, y) = vp.project(0.0, 0.0);
        assert_eq!(x, 50);
        assert_eq!(y, 50);
    }

    #[test]
    fn test_pan() {
        let mut vp = Viewport::new(0.0, 0.0, 1.0, 100, 100);
        vp.pan(10, 0);
        assert!(vp.center_lon > 0.0);
        vp.pan(0, 10);
        assert!(vp.center_lat < 0.0);
    }

    #[test]
    fn test_unproject_inverts_project() {
        let vp = Viewport::new(77.1946, 28.5471, 15.0, 200, 120);
        let (px, py) = vp.project_f(77.1956, 28.5481);
        let (lon, lat) = vp.unproject(px.round() as i32, py.round() as i32);
        assert!((lon - 77.1956).abs() < 1e-4);
        assert!((lat - 28.5481).abs() < 1e-4);
    }

    #[test]
    fn test_zoom_at_keeps_cursor_point() {
        let mut vp = Viewport::new(10.0, 10.0, 5.0, 200, 200);
        let before = vp.unproject(150, 60);
        vp.zoom_in_at(150, 60);
        let after = vp.unproject(150, 60);
        assert_eq!(vp.zoom, 6.0);
        assert!((before.0 - after.0).abs() < 0.1);
        assert!((before.1 - after.1).abs() < 0.1);
    }

    #[test]
    fn test_zoom_limits() {
        let mut vp = Viewport::new(0.0, 0.0, 15.0, 100, 100).with_zoom_limits(10.0, 16.0);
        vp.zoom_in();
        vp.zoom_in();
        assert_eq!(vp.zoom, 16.0);
        vp.set_zoom_limits(10.0, 12.0);
        assert_eq!(vp.zoom, 12.0);
    }

    #[test]
    fn test_world_at_zoom_zero_is_one_tile() {
        let vp = Viewport::new(0.0, 0.0, 0.0, 64, 64);
        assert_eq!(vp.visible_tiles(0), vec![TileCoord { z: 0, x: 0, y: 0 }]);
    }

    #[test]
    fn test_pixel_to_tile() {
        let vp = Viewport::new(0.0, 0.0, 1.0, 128, 128);
        let (tile, fx, fy) = vp.pixel_to_tile(96.0, 32.0, 1).unwrap();
        assert_eq!(tile, TileCoord { z: 1, x: 1, y: 0 });
        assert!((fx - 0.5).abs() < 1e-9 && (fy - 0.5).abs() < 1e-9);
        assert!(vp.pixel_to_tile(64.0, -1.0, 1).is_none());
    }

    #[test]
    fn test_fit_bounds_contains_box() {
        let bounds = MapBounds {
            west: 77.0,
            south: 28.5,
            east: 77.3,
            north: 28.6,
        };
        let mut vp = Viewport::new(0.0, 0.0, 3.0, 200, 120).with_zoom_limits(0.0, 21.0);
        vp.fit_bounds(&bounds, 18.0, 4.0);

        let (wx, ny) = vp.project(bounds.west, bounds.north);
        let (ex, sy) = vp.project(bounds.east, bounds.south);
        assert!(wx >= 0 && ex <= 200 && ny >= 0 && sy <= 120);
        assert!((vp.center_lon - 77.15).abs() < 1e-6);
    }
}
