use crate::annotation::AnnotationLayer;
use crate::braille::BrailleCanvas;
use crate::map::geometry::{draw_circle, draw_dashed_line, draw_polyline, draw_ring};
use crate::map::projection::Viewport;
use crate::map::tiles::{TileLayer, TileProvider};
use crate::overlay::DistanceOverlay;
use crate::sync::{Marker, Rgb, SyncEngine};

/// What opacity fades towards
const BACKDROP: Rgb = Rgb(0x10, 0x10, 0x10);

/// Stroke widths at or above this are drawn heavy
const HEAVY_STROKE: u32 = 5;

const HEADINGS: [char; 8] = ['↑', '↗', '→', '↘', '↓', '↙', '←', '↖'];

/// Glyph for a compass heading, clockwise from north
pub fn heading_glyph(deg: f64) -> char {
    let sector = ((deg.rem_euclid(360.0) + 22.5) / 45.0) as usize % HEADINGS.len();
    HEADINGS[sector]
}

/// Blend `color` over the dark backdrop
pub fn fade(color: Rgb, opacity: f32) -> Rgb {
    let a = opacity.clamp(0.0, 1.0);
    let mix = |c: u8, b: u8| (f32::from(c) * a + f32::from(b) * (1.0 - a)).round() as u8;
    Rgb(mix(color.0, BACKDROP.0), mix(color.1, BACKDROP.1), mix(color.2, BACKDROP.2))
}

/// A braille layer inked in one colour
pub struct InkLayer {
    pub color: Rgb,
    pub canvas: BrailleCanvas,
}

/// Text placed on a character cell
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub x: u16,
    pub y: u16,
    pub text: String,
    pub color: Rgb,
    pub bold: bool,
}

/// Everything the map widget paints, back to front
pub struct MapLayers {
    pub width: usize,
    pub height: usize,
    /// Per-cell background sampled from the basemap, row-major
    pub basemap: Vec<Option<Rgb>>,
    pub ink: Vec<InkLayer>,
    pub labels: Vec<Label>,
}

impl MapLayers {
    fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            basemap: vec![None; width * height],
            ink: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn background(&self, cx: usize, cy: usize) -> Option<Rgb> {
        if cx >= self.width || cy >= self.height {
            return None;
        }
        self.basemap[cy * self.width + cx]
    }

    /// Canvas for `color`, created on first use so layers keep draw order
    fn canvas(&mut self, color: Rgb) -> &mut BrailleCanvas {
        let idx = match self.ink.iter().position(|l| l.color == color) {
            Some(i) => i,
            None => {
                self.ink.push(InkLayer {
                    color,
                    canvas: BrailleCanvas::new(self.width, self.height),
                });
                self.ink.len() - 1
            }
        };
        &mut self.ink[idx].canvas
    }

    fn label(&mut self, px: i32, py: i32, dx: u16, text: impl Into<String>, color: Rgb, bold: bool) {
        if px < 0 || py < 0 {
            return;
        }
        let (x, y) = ((px / 2) as u16, (py / 4) as u16);
        if (x as usize) < self.width && (y as usize) < self.height {
            self.labels.push(Label {
                x: x.saturating_add(dx),
                y,
                text: text.into(),
                color,
                bold,
            });
        }
    }
}

/// Unit state, overlays and annotations for one frame
pub struct Scene<'a> {
    pub sync: &'a SyncEngine,
    pub overlay: &'a DistanceOverlay,
    pub annotations: &'a AnnotationLayer,
}

/// Display settings for map layers
#[derive(Clone)]
pub struct DisplaySettings {
    pub show_basemap: bool,
    pub show_labels: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            show_basemap: true,
            show_labels: true,
        }
    }
}

/// Composes the basemap and every overlay into [`MapLayers`]
#[derive(Default)]
pub struct MapRenderer {
    pub settings: DisplaySettings,
}

impl MapRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `cols`/`rows` are character cells; `viewport` must be sized to match.
    /// `frame` drives the out-of-bounds pulse.
    pub fn render<P: TileProvider>(
        &self,
        cols: usize,
        rows: usize,
        viewport: &Viewport,
        tiles: &mut TileLayer<P>,
        scene: &Scene<'_>,
        frame: u64,
    ) -> MapLayers {
        let mut layers = MapLayers::new(cols, rows);

        if self.settings.show_basemap {
            self.render_basemap(&mut layers, viewport, tiles);
        }

        for trail in scene.sync.visible_trails() {
            let canvas = layers.canvas(trail.color);
            let points = trail.points.iter().map(|p| (p.lon, p.lat));
            draw_polyline(canvas, points, viewport, trail.emphasized);
        }

        for line in scene.overlay.lines() {
            let from = viewport.project(line.from.lon, line.from.lat);
            let to = viewport.project(line.to.lon, line.to.lat);
            if viewport.line_might_be_visible(from, to) {
                draw_dashed_line(layers.canvas(line.color), from, to, 3, 2);
            }
            if self.settings.show_labels {
                let (px, py) = viewport.project(line.label_at.lon, line.label_at.lat);
                if viewport.is_visible(px, py) {
                    layers.label(px, py, 0, line.label.clone(), line.color, false);
                }
            }
        }

        for stroke in scene.annotations.strokes() {
            let color = fade(stroke.style.color, stroke.style.opacity);
            let points = stroke.points.iter().map(|p| (p.lon, p.lat));
            let heavy = stroke.style.width >= HEAVY_STROKE;
            let canvas = layers.canvas(color);
            if stroke.points.len() == 1 {
                let (px, py) = viewport.project(stroke.points[0].lon, stroke.points[0].lat);
                draw_circle(canvas, px, py, if heavy { 1 } else { 0 });
            } else {
                draw_polyline(canvas, points, viewport, heavy);
            }
        }

        let selected = scene.sync.selected();
        for marker in scene.sync.markers().in_bounds() {
            let opacity = scene.sync.marker_opacity(&marker.id);
            self.render_marker(&mut layers, viewport, marker, opacity, selected == Some(marker.id.as_str()));
        }
        let pulse = (frame / 8 % 3) as i32;
        for marker in scene.sync.markers().out_of_bounds() {
            let opacity = scene.sync.marker_opacity(&marker.id);
            self.render_out_of_bounds(&mut layers, viewport, marker, opacity, pulse);
        }

        // Layers whose every draw fell off screen
        layers.ink.retain(|l| !l.canvas.is_empty());
        layers
    }

    /// Sample one basemap pixel per character cell
    fn render_basemap<P: TileProvider>(&self, layers: &mut MapLayers, viewport: &Viewport, tiles: &mut TileLayer<P>) {
        let Some(range) = tiles.provider().zoom_range() else {
            return;
        };
        let z = viewport.tile_zoom(range.min, range.max);
        tiles.prefetch(&viewport.visible_tiles(z));

        for cy in 0..layers.height {
            for cx in 0..layers.width {
                let px = cx as f64 * 2.0 + 1.0;
                let py = cy as f64 * 4.0 + 2.0;
                let Some((coord, fx, fy)) = viewport.pixel_to_tile(px, py, z) else {
                    continue;
                };
                let tile = tiles.tile(coord);
                let (w, h) = tile.dimensions();
                let sx = ((fx * f64::from(w)) as u32).min(w - 1);
                let sy = ((fy * f64::from(h)) as u32).min(h - 1);
                let [r, g, b, a] = tile.get_pixel(sx, sy).0;
                if a > 0 {
                    layers.basemap[cy * layers.width + cx] = Some(Rgb(r, g, b));
                }
            }
        }
    }

    fn render_marker(&self, layers: &mut MapLayers, viewport: &Viewport, marker: &Marker, opacity: f32, selected: bool) {
        let (px, py) = viewport.project(marker.anchor.lon, marker.anchor.lat);
        if !viewport.is_visible(px, py) {
            return;
        }
        let color = fade(marker.color(), opacity);
        draw_circle(layers.canvas(color), px, py, if selected { 3 } else { 2 });
        layers.label(px, py, 0, heading_glyph(marker.heading_deg).to_string(), Rgb(0xFF, 0xFF, 0xFF), true);
        if self.settings.show_labels {
            layers.label(px, py, 2, marker.label.clone(), color, selected);
        }
    }

    fn render_out_of_bounds(&self, layers: &mut MapLayers, viewport: &Viewport, marker: &Marker, opacity: f32, pulse: i32) {
        let (px, py) = viewport.project(marker.anchor.lon, marker.anchor.lat);
        let color = fade(marker.color(), opacity);
        let canvas = layers.canvas(color);
        draw_circle(canvas, px, py, 1);
        draw_ring(canvas, px, py, 5 + pulse);
        layers.label(px, py, 2, format!("OUT {}", marker.label), color, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::fixtures::png;
    use crate::entity::TrackedEntity;
    use crate::geo::{LatLon, MapBounds};
    use crate::archive::ZoomRange;

    struct SolidTiles(Vec<u8>);

    impl TileProvider for SolidTiles {
        fn fetch_tile(&self, _z: u8, _x: u32, _y: u32) -> Option<Vec<u8>> {
            Some(self.0.clone())
        }

        fn zoom_range(&self) -> Option<ZoomRange> {
            Some(ZoomRange { min: 10, max: 18 })
        }
    }

    struct NoTiles;

    impl TileProvider for NoTiles {
        fn fetch_tile(&self, _z: u8, _x: u32, _y: u32) -> Option<Vec<u8>> {
            None
        }
    }

    fn viewport() -> Viewport {
        Viewport::new(77.1946, 28.5471, 16.0, 80, 40)
    }

    fn unit(id: &str, lat: f64, lon: f64) -> TrackedEntity {
        TrackedEntity::new(id, Some(LatLon::new(lat, lon)))
    }

    fn draw(sync: &SyncEngine, tiles: &mut TileLayer<impl TileProvider>) -> MapLayers {
        let overlay = {
            let mut o = DistanceOverlay::new("1");
            o.recompute(sync);
            o
        };
        let annotations = AnnotationLayer::new();
        let scene = Scene {
            sync,
            overlay: &overlay,
            annotations: &annotations,
        };
        MapRenderer::new().render(40, 10, &viewport(), tiles, &scene, 0)
    }

    #[test]
    fn test_heading_glyphs() {
        assert_eq!(heading_glyph(0.0), '↑');
        assert_eq!(heading_glyph(90.0), '→');
        assert_eq!(heading_glyph(200.0), '↓');
        assert_eq!(heading_glyph(-45.0), '↖');
        assert_eq!(heading_glyph(359.0), '↑');
    }

    #[test]
    fn test_fade() {
        assert_eq!(fade(Rgb(200, 100, 0), 1.0), Rgb(200, 100, 0));
        assert_eq!(fade(Rgb(200, 100, 0), 0.0), BACKDROP);
    }

    #[test]
    fn test_basemap_sampled_from_tiles() {
        let mut tiles = TileLayer::new(SolidTiles(png([10, 120, 30, 255])), 64);
        let layers = draw(&SyncEngine::new(0), &mut tiles);
        assert_eq!(layers.background(0, 0), Some(Rgb(10, 120, 30)));
        assert_eq!(layers.background(39, 9), Some(Rgb(10, 120, 30)));
        assert!(layers.ink.is_empty());

        let mut empty = TileLayer::new(NoTiles, 4);
        let layers = draw(&SyncEngine::new(0), &mut empty);
        assert!(layers.basemap.iter().all(Option::is_none));
    }

    #[test]
    fn test_markers_lines_and_labels() {
        let mut sync = SyncEngine::new(0);
        sync.apply(
            vec![
                unit("1", 28.5471, 77.1946).with_orientation(90.0),
                unit("7", 28.5473, 77.1948),
            ],
            LatLon::new(28.5471, 77.1946),
        );
        let layers = draw(&sync, &mut TileLayer::new(NoTiles, 4));

        assert!(layers.labels.iter().any(|l| l.text == "→"));
        assert!(layers.labels.iter().any(|l| l.text.ends_with(" m")));
        assert!(layers.ink.iter().any(|l| l.color == sync.color("7")));
    }

    #[test]
    fn test_out_of_bounds_marker_tagged() {
        let mut sync = SyncEngine::new(0);
        sync.set_bounds(Some(MapBounds {
            west: 77.19,
            south: 28.54,
            east: 77.20,
            north: 28.55,
        }));
        sync.apply(vec![unit("3", 10.0, 10.0)], LatLon::new(28.5471, 77.1946));
        let layers = draw(&sync, &mut TileLayer::new(NoTiles, 4));
        assert!(layers.labels.iter().any(|l| l.text.starts_with("OUT")));
        assert!(layers.ink.iter().all(|l| !l.canvas.is_empty()));
    }

    #[test]
    fn test_off_screen_strokes_leave_no_layer() {
        let sync = SyncEngine::new(0);
        let overlay = DistanceOverlay::new("1");
        let mut annotations = AnnotationLayer::new();
        let far = Viewport::new(10.0, 10.0, 16.0, 80, 40);
        annotations.set_tool(crate::annotation::Tool::Draw);
        annotations.pointer_down(5, 5, &far);
        annotations.pointer_move(30, 5, &far);
        annotations.pointer_up();

        let scene = Scene {
            sync: &sync,
            overlay: &overlay,
            annotations: &annotations,
        };
        let layers = MapRenderer::new().render(40, 10, &viewport(), &mut TileLayer::new(NoTiles, 4), &scene, 0);
        assert!(layers.ink.is_empty());
    }

    #[test]
    fn test_selection_dims_other_markers() {
        let mut sync = SyncEngine::new(0);
        sync.apply(
            vec![unit("1", 28.5471, 77.1946), unit("2", 28.5472, 77.1947)],
            LatLon::new(28.5471, 77.1946),
        );
        sync.select("2");
        let layers = draw(&sync, &mut TileLayer::new(NoTiles, 4));
        let dimmed = fade(sync.color("1"), crate::sync::DIMMED_OPACITY);
        assert!(layers.ink.iter().any(|l| l.color == dimmed));
    }

    #[test]
    fn test_selection_dims_out_of_bounds_markers() {
        let mut sync = SyncEngine::new(0);
        sync.set_bounds(Some(MapBounds {
            west: 77.19,
            south: 28.54,
            east: 77.20,
            north: 28.55,
        }));
        sync.apply(
            vec![unit("1", 28.5471, 77.1946), unit("3", 10.0, 10.0)],
            LatLon::new(28.5471, 77.1946),
        );
        sync.select("1");
        let layers = draw(&sync, &mut TileLayer::new(NoTiles, 4));

        let dimmed = fade(sync.color("3"), crate::sync::DIMMED_OPACITY);
        assert!(layers.ink.iter().any(|l| l.color == dimmed));
        assert!(!layers.ink.iter().any(|l| l.color == sync.color("3")));
        let tag = layers.labels.iter().find(|l| l.text == "OUT 3").unwrap();
        assert_eq!(tag.color, dimmed);
    }
}
