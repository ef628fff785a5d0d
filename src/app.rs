use std::time::Instant;

use tac_map::annotation::Tool;
use tac_map::config::ViewerConfig;
use tac_map::logging::LogTail;
use tac_map::map::MapRenderer;
use tac_map::session::MapSession;

/// Columns reserved for the side panels
pub const SIDE_PANEL_WIDTH: u16 = 36;

/// Markers within this many braille pixels of a click are picked
const PICK_RADIUS_PX: f64 = 4.0;

/// Braille pixel size of the map area for a terminal of `width x height` cells
pub fn map_pixel_size(width: usize, height: usize) -> (usize, usize) {
    // Border (2 cells each way), status bar (1 row), side panels
    let inner_width = width.saturating_sub(2 + SIDE_PANEL_WIDTH as usize);
    let inner_height = height.saturating_sub(3);
    (inner_width * 2, inner_height * 4)
}

/// Terminal cell to braille pixel inside the bordered map block
fn cell_to_pixel(col: u16, row: u16) -> (i32, i32) {
    let px = (col.saturating_sub(1) as i32) * 2;
    let py = (row.saturating_sub(1) as i32) * 4;
    (px, py)
}

/// Application state
pub struct App {
    pub session: MapSession,
    pub map_renderer: MapRenderer,
    pub logs: Option<LogTail>,
    pub should_quit: bool,
    /// Last mouse position for drag tracking
    pub last_mouse: Option<(u16, u16)>,
    /// Current mouse position for cursor marker
    pub mouse_pos: Option<(u16, u16)>,
    /// Frame counter for the out-of-bounds pulse
    pub frame: u64,
    dragged: bool,
}

impl App {
    pub fn new(config: ViewerConfig, width: usize, height: usize) -> Self {
        let (pw, ph) = map_pixel_size(width, height);
        Self {
            session: MapSession::new(config, pw, ph),
            map_renderer: MapRenderer::new(),
            logs: None,
            should_quit: false,
            last_mouse: None,
            mouse_pos: None,
            frame: 0,
            dragged: false,
        }
    }

    pub fn with_logs(mut self, logs: LogTail) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Advance one frame: drain channels, replay, update queue and log tail
    pub fn tick(&mut self, now: Instant) -> bool {
        self.frame = self.frame.wrapping_add(1);
        if let Some(logs) = &mut self.logs {
            logs.drain();
        }
        self.session.update(now)
    }

    /// Update viewport size when terminal resizes
    pub fn resize(&mut self, width: usize, height: usize) {
        let (pw, ph) = map_pixel_size(width, height);
        self.session.resize(pw, ph);
    }

    pub fn pan(&mut self, dx: i32, dy: i32) {
        self.session.viewport.pan(dx, dy);
    }

    pub fn zoom_in(&mut self) {
        self.session.viewport.zoom_in();
    }

    pub fn zoom_out(&mut self) {
        self.session.viewport.zoom_out();
    }

    /// Zoom in towards a screen position (terminal column/row)
    pub fn zoom_in_at(&mut self, col: u16, row: u16) {
        let (px, py) = cell_to_pixel(col, row);
        self.session.viewport.zoom_in_at(px, py);
    }

    pub fn zoom_out_at(&mut self, col: u16, row: u16) {
        let (px, py) = cell_to_pixel(col, row);
        self.session.viewport.zoom_out_at(px, py);
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.session.annotations.set_tool(tool);
    }

    /// Current zoom level as a string
    pub fn zoom_level(&self) -> String {
        format!("z{:.1}", self.session.viewport.zoom)
    }

    /// Current center coordinates as a string
    pub fn center_coords(&self) -> String {
        let c = self.session.viewport.center();
        format!(
            "{:.4}°{}, {:.4}°{}",
            c.lat.abs(),
            if c.lat >= 0.0 { "N" } else { "S" },
            c.lon.abs(),
            if c.lon >= 0.0 { "E" } else { "W" }
        )
    }

    /// Left button pressed on the map
    pub fn pointer_down(&mut self, col: u16, row: u16) {
        let (px, py) = cell_to_pixel(col, row);
        self.last_mouse = Some((col, row));
        self.dragged = false;
        self.session
            .annotations
            .pointer_down(px, py, &self.session.viewport);
    }

    /// Drag: pans with the pan tool, otherwise extends the stroke or erases
    pub fn handle_drag(&mut self, col: u16, row: u16) {
        let (px, py) = cell_to_pixel(col, row);
        match self.session.annotations.tool() {
            Tool::Pan => {
                if let Some((last_x, last_y)) = self.last_mouse {
                    let dx = (last_x as i32 - col as i32) * 2;
                    let dy = (last_y as i32 - row as i32) * 4;
                    self.pan(dx, dy);
                }
            }
            Tool::Draw => {
                self.session
                    .annotations
                    .pointer_move(px, py, &self.session.viewport);
            }
            Tool::Erase => {
                self.session
                    .annotations
                    .erase_at(px, py, &self.session.viewport);
            }
        }
        self.dragged = true;
        self.last_mouse = Some((col, row));
    }

    /// Button released; a click without drag in pan mode picks a marker
    pub fn end_drag(&mut self) {
        if !self.dragged && self.session.annotations.tool() == Tool::Pan {
            if let Some((col, row)) = self.last_mouse {
                let (px, py) = cell_to_pixel(col, row);
                if let Some(id) = self.marker_at(px, py) {
                    self.session.select(&id);
                }
            }
        }
        self.session.annotations.pointer_up();
        self.last_mouse = None;
        self.dragged = false;
    }

    /// Nearest marker to a braille pixel, out-of-bounds markers included
    pub fn marker_at(&self, px: i32, py: i32) -> Option<String> {
        let vp = &self.session.viewport;
        let markers = self.session.sync.markers();
        markers
            .in_bounds()
            .chain(markers.out_of_bounds())
            .map(|m| {
                let (x, y) = vp.project_f(m.anchor.lon, m.anchor.lat);
                let d = ((x - px as f64).powi(2) + (y - py as f64).powi(2)).sqrt();
                (m, d)
            })
            .filter(|(_, d)| *d <= PICK_RADIUS_PX)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(m, _)| m.id.clone())
    }

    /// Info popup for the selected marker, with its true coordinates
    pub fn info_popup(&self) -> Option<String> {
        let sync = &self.session.sync;
        sync.selected()
            .and_then(|id| sync.markers().get(id))
            .map(|m| m.popup())
    }

    pub fn set_mouse_pos(&mut self, col: u16, row: u16) {
        self.mouse_pos = Some((col, row));
    }

    /// Mouse position in braille pixel coordinates (for the cursor marker)
    pub fn mouse_pixel_pos(&self) -> Option<(i32, i32)> {
        self.mouse_pos.map(|(col, row)| cell_to_pixel(col, row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tac_map::entity::TrackedEntity;
    use tac_map::geo::{LatLon, MapBounds};

    fn app() -> App {
        App::new(ViewerConfig::default(), 120, 40)
    }

    #[test]
    fn test_map_pixel_size() {
        assert_eq!(map_pixel_size(120, 40), ((120 - 38) * 2, 37 * 4));
        assert_eq!(map_pixel_size(10, 2), (0, 0));
    }

    #[test]
    fn test_draw_tool_records_stroke() {
        let mut app = app();
        app.set_tool(Tool::Draw);
        app.pointer_down(10, 10);
        app.handle_drag(14, 12);
        app.handle_drag(20, 12);
        app.end_drag();

        let strokes = app.session.annotations.strokes();
        assert_eq!(strokes.len(), 1);
        assert_eq!(strokes[0].points.len(), 3);
        assert!(!app.session.annotations.is_drawing());
    }

    #[test]
    fn test_pan_drag_moves_view() {
        let mut app = app();
        let before = app.session.viewport.center();
        app.pointer_down(30, 10);
        app.handle_drag(20, 10);
        app.end_drag();
        assert!(app.session.viewport.center().lon > before.lon);
        assert!(app.session.annotations.strokes().is_empty());
    }

    #[test]
    fn test_click_selects_marker() {
        let mut app = app();
        let at = app.session.viewport.center();
        app.session.sync.apply(
            vec![TrackedEntity::new("4", Some(LatLon::new(at.lat, at.lon)))],
            at,
        );
        let (px, py) = app.session.viewport.project(at.lon, at.lat);
        let (col, row) = ((px / 2 + 1) as u16, (py / 4 + 1) as u16);

        app.pointer_down(col, row);
        app.end_drag();
        assert_eq!(app.session.sync.selected(), Some("4"));
    }

    #[test]
    fn test_click_out_of_bounds_marker_shows_true_position() {
        let mut app = app();
        let at = app.session.viewport.center();
        app.session.sync.set_bounds(Some(MapBounds {
            west: at.lon - 0.01,
            south: at.lat - 0.01,
            east: at.lon + 0.01,
            north: at.lat + 0.01,
        }));
        app.session
            .sync
            .apply(vec![TrackedEntity::new("3", Some(LatLon::new(10.5, 20.25)))], at);
        assert!(app.info_popup().is_none());

        let (px, py) = app.session.viewport.project(at.lon, at.lat);
        let (col, row) = ((px / 2 + 1) as u16, (py / 4 + 1) as u16);
        app.pointer_down(col, row);
        app.end_drag();

        assert_eq!(app.session.sync.selected(), Some("3"));
        let popup = app.info_popup().unwrap();
        assert!(popup.contains("OUT OF BOUNDS"));
        assert!(popup.contains("Original Lat: 10.500000"));
        assert!(popup.contains("Original Lng: 20.250000"));
    }
}
