//! Freehand tactical annotations drawn over the map.
//!
//! Strokes are stored in geographic coordinates so they stay put while the
//! map pans and zooms. Export projects them again against the current view.

use std::fs;
use std::path::{Path, PathBuf};

use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject};
use glam::DVec2;
use image::{GrayImage, ImageFormat, Luma, Pixel, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use tracing::{debug, info};

use crate::error::ExportError;
use crate::geo::LatLon;
use crate::map::projection::Viewport;
use crate::sync::Rgb;

/// Erase picks a stroke when its nearest vertex is within this many pixels
pub const ERASE_RADIUS_PX: f64 = 6.0;

pub const PNG_FILE: &str = "tactical-plan.png";
pub const GEOJSON_FILE: &str = "tactical-plan.geojson";

pub const STROKE_COLORS: [(Rgb, &str); 10] = [
    (Rgb(0xFF, 0x00, 0x00), "Red"),
    (Rgb(0x00, 0xFF, 0x00), "Green"),
    (Rgb(0x00, 0x00, 0xFF), "Blue"),
    (Rgb(0xFF, 0xFF, 0x00), "Yellow"),
    (Rgb(0xFF, 0x00, 0xFF), "Magenta"),
    (Rgb(0x00, 0xFF, 0xFF), "Cyan"),
    (Rgb(0xFF, 0xFF, 0xFF), "White"),
    (Rgb(0x00, 0x00, 0x00), "Black"),
    (Rgb(0xFF, 0x80, 0x00), "Orange"),
    (Rgb(0x80, 0x00, 0xFF), "Purple"),
];

pub const STROKE_WIDTHS: [u32; 8] = [1, 2, 3, 5, 8, 12, 16, 20];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    Pan,
    Draw,
    Erase,
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Pan => "PAN",
            Tool::Draw => "DRAW",
            Tool::Erase => "ERASE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    pub color: Rgb,
    pub width: u32,
    pub opacity: f32,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            color: STROKE_COLORS[0].0,
            width: 3,
            opacity: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub style: StrokeStyle,
    pub points: Vec<LatLon>,
}

/// Files written by [`AnnotationLayer::export`]
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub png: PathBuf,
    pub geojson: PathBuf,
    pub strokes: usize,
}

#[derive(Debug)]
pub struct AnnotationLayer {
    tool: Tool,
    style: StrokeStyle,
    color_index: usize,
    width_index: usize,
    strokes: Vec<Stroke>,
    drawing: bool,
}

impl Default for AnnotationLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnotationLayer {
    pub fn new() -> Self {
        Self {
            tool: Tool::Pan,
            style: StrokeStyle::default(),
            color_index: 0,
            width_index: 2,
            strokes: Vec::new(),
            drawing: false,
        }
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    /// Switching tools finishes any stroke in progress
    pub fn set_tool(&mut self, tool: Tool) {
        self.pointer_up();
        self.tool = tool;
    }

    pub fn style(&self) -> StrokeStyle {
        self.style
    }

    pub fn color_name(&self) -> &'static str {
        STROKE_COLORS[self.color_index].1
    }

    pub fn cycle_color(&mut self) {
        self.color_index = (self.color_index + 1) % STROKE_COLORS.len();
        self.style.color = STROKE_COLORS[self.color_index].0;
    }

    pub fn cycle_width(&mut self) {
        self.width_index = (self.width_index + 1) % STROKE_WIDTHS.len();
        self.style.width = STROKE_WIDTHS[self.width_index];
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.style.opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn is_drawing(&self) -> bool {
        self.drawing
    }

    /// Returns true when the event was consumed by a drawing tool
    pub fn pointer_down(&mut self, px: i32, py: i32, viewport: &Viewport) -> bool {
        match self.tool {
            Tool::Pan => false,
            Tool::Draw => {
                let (lon, lat) = viewport.unproject(px, py);
                self.strokes.push(Stroke {
                    style: self.style,
                    points: vec![LatLon::new(lat, lon)],
                });
                self.drawing = true;
                true
            }
            Tool::Erase => {
                self.erase_at(px, py, viewport);
                true
            }
        }
    }

    pub fn pointer_move(&mut self, px: i32, py: i32, viewport: &Viewport) -> bool {
        if !self.drawing || self.tool != Tool::Draw {
            return false;
        }
        let (lon, lat) = viewport.unproject(px, py);
        let point = LatLon::new(lat, lon);
        if let Some(stroke) = self.strokes.last_mut() {
            if stroke.points.last() != Some(&point) {
                stroke.points.push(point);
            }
        }
        true
    }

    /// Pointer released or left the map
    pub fn pointer_up(&mut self) {
        if self.drawing {
            self.drawing = false;
            if let Some(stroke) = self.strokes.last() {
                debug!(points = stroke.points.len(), "stroke finished");
            }
        }
    }

    /// Remove the stroke owning the vertex nearest to the pointer, if close enough.
    ///
    /// Distance is measured on screen, so the geographic reach shrinks as the
    /// view zooms in.
    pub fn erase_at(&mut self, px: i32, py: i32, viewport: &Viewport) -> Option<Stroke> {
        let cursor = DVec2::new(px as f64, py as f64);
        let mut nearest: Option<(usize, f64)> = None;
        for (i, stroke) in self.strokes.iter().enumerate() {
            for p in &stroke.points {
                let (x, y) = viewport.project_f(p.lon, p.lat);
                let d = DVec2::new(x, y).distance(cursor);
                if nearest.map_or(true, |(_, best)| d < best) {
                    nearest = Some((i, d));
                }
            }
        }
        match nearest {
            Some((i, d)) if d <= ERASE_RADIUS_PX => {
                debug!(distance_px = d, "stroke erased");
                Some(self.strokes.remove(i))
            }
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
        self.drawing = false;
    }

    /// Paint every stroke onto a transparent canvas covering the visible map.
    ///
    /// `scale` is output pixels per viewport pixel.
    pub fn rasterize(&self, viewport: &Viewport, scale: f64) -> RgbaImage {
        let scale = scale.max(0.1);
        let w = ((viewport.width as f64 * scale).round() as u32).max(1);
        let h = ((viewport.height as f64 * scale).round() as u32).max(1);
        let mut canvas = RgbaImage::new(w, h);

        for stroke in &self.strokes {
            let pts: Vec<(f32, f32)> = stroke
                .points
                .iter()
                .map(|p| {
                    let (x, y) = viewport.project_f(p.lon, p.lat);
                    ((x * scale) as f32, (y * scale) as f32)
                })
                .collect();

            // Rasterize coverage first so overlapping segments don't stack alpha
            let mut mask = GrayImage::new(w, h);
            let width = stroke.style.width as f32 * scale as f32;
            match pts.as_slice() {
                [] => continue,
                [only] => thick_segment(&mut mask, *only, *only, width),
                _ => {
                    for pair in pts.windows(2) {
                        thick_segment(&mut mask, pair[0], pair[1], width);
                    }
                }
            }

            let Rgb(r, g, b) = stroke.style.color;
            let alpha = (stroke.style.opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
            let paint = Rgba([r, g, b, alpha]);
            for (x, y, m) in mask.enumerate_pixels() {
                if m.0[0] > 0 {
                    canvas.get_pixel_mut(x, y).blend(&paint);
                }
            }
        }
        canvas
    }

    /// GeoJSON `FeatureCollection` with one `LineString` per stroke
    pub fn to_geojson(&self) -> FeatureCollection {
        let features = self
            .strokes
            .iter()
            .map(|stroke| {
                let coords = stroke.points.iter().map(|p| vec![p.lon, p.lat]).collect();
                let mut props = JsonObject::new();
                props.insert("stroke".into(), stroke.style.color.hex().into());
                props.insert("stroke-width".into(), stroke.style.width.into());
                props.insert("stroke-opacity".into(), f64::from(stroke.style.opacity).into());
                Feature {
                    bbox: None,
                    geometry: Some(Geometry::new(geojson::Value::LineString(coords))),
                    id: None,
                    properties: Some(props),
                    foreign_members: None,
                }
            })
            .collect();
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    /// Write `tactical-plan.png` and `tactical-plan.geojson` into `dir`
    pub fn export(&self, dir: &Path, viewport: &Viewport, scale: f64) -> Result<ExportSummary, ExportError> {
        if self.strokes.is_empty() {
            return Err(ExportError::Empty);
        }
        fs::create_dir_all(dir).map_err(|source| ExportError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let png = dir.join(PNG_FILE);
        self.rasterize(viewport, scale).save_with_format(&png, ImageFormat::Png)?;

        // bbox records the area the PNG covers
        let mut collection = self.to_geojson();
        let extent = viewport.visible_extent();
        collection.bbox = Some(vec![extent.west, extent.south, extent.east, extent.north]);
        let plan = dir.join(GEOJSON_FILE);
        fs::write(&plan, GeoJson::from(collection).to_string()).map_err(|source| ExportError::Io {
            path: plan.display().to_string(),
            source,
        })?;

        info!(strokes = self.strokes.len(), png = %png.display(), "annotations exported");
        Ok(ExportSummary {
            png,
            geojson: plan,
            strokes: self.strokes.len(),
        })
    }
}

/// Line of the given width as a run of filled circles
fn thick_segment(mask: &mut GrayImage, start: (f32, f32), end: (f32, f32), width: f32) {
    let on = Luma([255u8]);
    if width <= 1.0 {
        draw_line_segment_mut(mask, start, end, on);
        return;
    }
    let radius = (width / 2.0).max(1.0) as i32;
    let (dx, dy) = (end.0 - start.0, end.1 - start.1);
    let length = (dx * dx + dy * dy).sqrt();
    let step = (radius as f32 * 0.5).max(0.5);
    let steps = (length / step).ceil() as i32;
    for i in 0..=steps {
        let t = if steps == 0 { 0.0 } else { i as f32 / steps as f32 };
        let x = start.0 + dx * t;
        let y = start.1 + dy * t;
        draw_filled_circle_mut(mask, (x.round() as i32, y.round() as i32), radius, on);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport() -> Viewport {
        Viewport::new(77.1946, 28.5471, 15.0, 200, 120)
    }

    fn draw(layer: &mut AnnotationLayer, vp: &Viewport, pts: &[(i32, i32)]) {
        layer.set_tool(Tool::Draw);
        let (x, y) = pts[0];
        layer.pointer_down(x, y, vp);
        for &(x, y) in &pts[1..] {
            layer.pointer_move(x, y, vp);
        }
        layer.pointer_up();
    }

    #[test]
    fn test_pan_tool_ignores_pointer() {
        let vp = viewport();
        let mut layer = AnnotationLayer::new();
        assert!(!layer.pointer_down(10, 10, &vp));
        assert!(!layer.pointer_move(20, 20, &vp));
        assert!(layer.strokes().is_empty());
    }

    #[test]
    fn test_draw_stroke_lifecycle() {
        let vp = viewport();
        let mut layer = AnnotationLayer::new();
        layer.cycle_color();
        draw(&mut layer, &vp, &[(10, 10), (20, 10), (20, 10), (30, 15)]);

        assert!(!layer.is_drawing());
        let stroke = &layer.strokes()[0];
        assert_eq!(stroke.points.len(), 3);
        assert_eq!(stroke.style.color, STROKE_COLORS[1].0);
        assert_eq!(stroke.style.width, 3);

        // Moving after release does nothing
        layer.pointer_move(40, 40, &vp);
        assert_eq!(layer.strokes()[0].points.len(), 3);
    }

    #[test]
    fn test_erase_within_radius_only() {
        let vp = viewport();
        let mut layer = AnnotationLayer::new();
        draw(&mut layer, &vp, &[(10, 10), (20, 10)]);
        draw(&mut layer, &vp, &[(100, 100), (110, 100)]);

        layer.set_tool(Tool::Erase);
        assert!(layer.erase_at(60, 60, &vp).is_none());
        assert_eq!(layer.strokes().len(), 2);

        assert!(layer.pointer_down(102, 101, &vp));
        assert_eq!(layer.strokes().len(), 1);
        assert_eq!(layer.strokes()[0].points.len(), 2);
    }

    #[test]
    fn test_erase_reach_follows_zoom() {
        let mut vp = viewport();
        let mut layer = AnnotationLayer::new();
        draw(&mut layer, &vp, &[(130, 60), (134, 60)]);

        // Zooming in spreads the same geographic gap over more pixels
        vp.zoom += 3.0;
        layer.set_tool(Tool::Erase);
        assert!(layer.erase_at(130, 55, &vp).is_none());
        vp.zoom -= 3.0;
        assert!(layer.erase_at(130, 55, &vp).is_some());
    }

    #[test]
    fn test_rasterize_paints_strokes() {
        let vp = viewport();
        let mut layer = AnnotationLayer::new();
        draw(&mut layer, &vp, &[(20, 20), (80, 20)]);

        let img = layer.rasterize(&vp, 2.0);
        assert_eq!(img.dimensions(), (400, 240));
        let px = img.get_pixel(100, 40).0;
        assert!(px[0] > 200 && px[3] > 0, "{px:?}");
        assert_eq!(img.get_pixel(100, 200).0[3], 0);
    }

    #[test]
    fn test_export_writes_both_files() {
        let vp = viewport();
        let dir = tempfile::tempdir().unwrap();
        let mut layer = AnnotationLayer::new();
        assert!(matches!(layer.export(dir.path(), &vp, 1.0), Err(ExportError::Empty)));

        draw(&mut layer, &vp, &[(20, 20), (80, 20)]);
        let summary = layer.export(dir.path(), &vp, 1.0).unwrap();
        assert_eq!(summary.strokes, 1);
        assert!(summary.png.ends_with(PNG_FILE));

        let decoded = image::open(&summary.png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 120));

        let text = fs::read_to_string(&summary.geojson).unwrap();
        let parsed: GeoJson = text.parse().unwrap();
        match parsed {
            GeoJson::FeatureCollection(fc) => {
                assert_eq!(fc.features.len(), 1);
                let bbox = fc.bbox.unwrap();
                let c = vp.center();
                assert!(bbox[0] < c.lon && c.lon < bbox[2]);
                assert!(bbox[1] < c.lat && c.lat < bbox[3]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_clear_and_cycling() {
        let vp = viewport();
        let mut layer = AnnotationLayer::new();
        draw(&mut layer, &vp, &[(1, 1), (2, 2)]);
        layer.clear();
        assert!(layer.strokes().is_empty());

        for _ in 0..STROKE_WIDTHS.len() {
            layer.cycle_width();
        }
        assert_eq!(layer.style().width, 3);
        for _ in 0..STROKE_COLORS.len() {
            layer.cycle_color();
        }
        assert_eq!(layer.color_name(), "Red");
    }
}
