use crate::app::{App, SIDE_PANEL_WIDTH};
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Widget, Wrap},
    Frame,
};
use tac_map::map::{MapLayers, Scene};
use tac_map::replay::format_clock;
use tac_map::sync::Rgb;

fn rgb(c: Rgb) -> Color {
    Color::Rgb(c.0, c.1, c.2)
}

fn panel(title: &str) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(Span::styled(
            format!(" {title} "),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
}

/// Render the UI
pub fn render(frame: &mut Frame, app: &mut App) {
    let area = frame.area();

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),    // Map + panels
            Constraint::Length(1), // Status bar
        ])
        .split(area);
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(10), Constraint::Length(SIDE_PANEL_WIDTH)])
        .split(rows[0]);

    render_map(frame, app, cols[0]);
    render_side_panels(frame, app, cols[1]);
    render_status_bar(frame, app, rows[1]);
}

fn render_map(frame: &mut Frame, app: &mut App, area: Rect) {
    let title = app
        .session
        .tiles
        .archive()
        .and_then(|a| a.name())
        .map(|n| format!("Tactical Map: {n}"))
        .unwrap_or_else(|| "Tactical Map".to_owned());
    let block = panel(&title);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    // Braille gives 2x4 resolution per character
    let (pw, ph) = (inner.width as usize * 2, inner.height as usize * 4);
    if (pw, ph) != (app.session.viewport.width, app.session.viewport.height) {
        app.session.resize(pw, ph);
    }

    let session = &mut app.session;
    let scene = Scene {
        sync: &session.sync,
        overlay: &session.overlay,
        annotations: &session.annotations,
    };
    let layers = app.map_renderer.render(
        inner.width as usize,
        inner.height as usize,
        &session.viewport,
        &mut session.tiles,
        &scene,
        app.frame,
    );

    let cursor_pos = app.mouse_pixel_pos().and_then(|(px, py)| {
        let cx = (px / 2) as u16;
        let cy = (py / 4) as u16;
        (px >= 0 && py >= 0 && cx < inner.width && cy < inner.height).then_some((cx, cy))
    });

    frame.render_widget(MapWidget { layers, cursor_pos }, inner);
}

/// Basemap backgrounds, braille ink and text labels
struct MapWidget {
    layers: MapLayers,
    cursor_pos: Option<(u16, u16)>,
}

impl Widget for MapWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let rows = (area.height as usize).min(self.layers.height);
        let cols = (area.width as usize).min(self.layers.width);

        for cy in 0..rows {
            for cx in 0..cols {
                if let Some(bg) = self.layers.background(cx, cy) {
                    buf[(area.x + cx as u16, area.y + cy as u16)].set_bg(rgb(bg));
                }
            }
        }

        // Later layers win shared cells
        for layer in &self.layers.ink {
            for (cx, cy, ch) in layer.canvas.glyphs() {
                if cx < cols && cy < rows {
                    buf[(area.x + cx as u16, area.y + cy as u16)]
                        .set_char(ch)
                        .set_fg(rgb(layer.color));
                }
            }
        }

        for label in &self.layers.labels {
            if label.y >= area.height {
                continue;
            }
            let mut style = Style::default().fg(rgb(label.color));
            if label.bold {
                style = style.add_modifier(Modifier::BOLD);
            }
            for (i, ch) in label.text.chars().enumerate() {
                let x = label.x as usize + i;
                if x >= area.width as usize {
                    break;
                }
                buf[(area.x + x as u16, area.y + label.y)].set_char(ch).set_style(style);
            }
        }

        if let Some((cx, cy)) = self.cursor_pos {
            buf[(area.x + cx, area.y + cy)].set_char('╋').set_fg(Color::Red);
        }
    }
}

fn render_side_panels(frame: &mut Frame, app: &App, area: Rect) {
    let session = &app.session;
    let show_loader = !session.status.map_loaded || !session.status.message.is_empty();
    let oob = session.sync.out_of_bounds().len();

    let mut constraints = Vec::new();
    if show_loader {
        constraints.push(Constraint::Length(4));
    }
    constraints.push(Constraint::Min(6));
    if oob > 0 {
        constraints.push(Constraint::Length(oob.min(6) as u16 + 2));
    }
    let popup = app.info_popup();
    if popup.is_some() {
        constraints.push(Constraint::Length(7));
    }
    if session.replay.is_some() {
        constraints.push(Constraint::Length(5));
    }
    constraints.push(Constraint::Length(8));

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);
    let mut next = chunks.iter().copied();

    if show_loader {
        if let Some(rect) = next.next() {
            render_loader(frame, app, rect);
        }
    }
    if let Some(rect) = next.next() {
        render_units(frame, app, rect);
    }
    if oob > 0 {
        if let Some(rect) = next.next() {
            render_bounds(frame, app, rect);
        }
    }
    if let Some(text) = popup {
        if let Some(rect) = next.next() {
            render_popup(frame, &text, rect);
        }
    }
    if session.replay.is_some() {
        if let Some(rect) = next.next() {
            render_replay(frame, app, rect);
        }
    }
    if let Some(rect) = next.next() {
        render_logs(frame, app, rect);
    }
}

fn render_loader(frame: &mut Frame, app: &App, area: Rect) {
    let status = &app.session.status;
    let block = panel("MBTiles");
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(1)])
        .split(inner);
    let message = if status.message.is_empty() {
        "No map loaded (o: reload)".to_owned()
    } else {
        status.message.clone()
    };
    let color = if status.is_error() { Color::Red } else { Color::Gray };
    frame.render_widget(Paragraph::new(Span::styled(message, Style::default().fg(color))), parts[0]);
    frame.render_widget(
        Gauge::default()
            .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
            .percent(u16::from(status.progress.min(100))),
        parts[1],
    );
}

fn render_units(frame: &mut Frame, app: &App, area: Rect) {
    let sync = &app.session.sync;
    let items: Vec<ListItem> = sync
        .sorted_units()
        .into_iter()
        .map(|unit| {
            let color = rgb(sync.color(&unit.id));
            let trail = sync.trail(&unit.id).map_or(0, <[_]>::len);
            let mut spans = vec![
                Span::styled("● ", Style::default().fg(color)),
                Span::styled(format!("{:<10}", unit.label()), Style::default().fg(Color::White)),
                Span::styled(format!(" {trail:>4} pts"), Style::default().fg(Color::DarkGray)),
            ];
            if unit.hit_status {
                spans.push(Span::styled(" HIT", Style::default().fg(Color::Red)));
            }
            if sync.is_out_of_bounds(&unit.id) {
                spans.push(Span::styled(" OUT", Style::default().fg(Color::Yellow)));
            }
            let mut item = ListItem::new(Line::from(spans));
            if sync.selected() == Some(unit.id.as_str()) {
                item = item.style(Style::default().add_modifier(Modifier::REVERSED));
            }
            item
        })
        .collect();
    let title = format!("Units ({})", sync.units().len());
    frame.render_widget(List::new(items).block(panel(&title)), area);
}

fn render_bounds(frame: &mut Frame, app: &App, area: Rect) {
    let sync = &app.session.sync;
    let mut ids: Vec<&String> = sync.out_of_bounds().keys().collect();
    ids.sort();
    let lines: Vec<Line> = ids
        .into_iter()
        .filter_map(|id| sync.out_of_bounds().get(id).map(|rec| (id, rec)))
        .map(|(id, rec)| {
            Line::from(vec![
                Span::styled(format!("{id:<6}"), Style::default().fg(rgb(sync.color(id)))),
                Span::styled(
                    format!("{:.5}, {:.5}", rec.original.lat, rec.original.lon),
                    Style::default().fg(Color::Gray),
                ),
            ])
        })
        .collect();
    frame.render_widget(Paragraph::new(lines).block(panel("Out of bounds")), area);
}

/// Selected marker details, one field per line
fn render_popup(frame: &mut Frame, text: &str, area: Rect) {
    let lines: Vec<Line> = text
        .split("  ")
        .map(|part| Line::from(Span::styled(part.to_owned(), Style::default().fg(Color::White))))
        .collect();
    frame.render_widget(
        Paragraph::new(lines).wrap(Wrap { trim: true }).block(panel("Info")),
        area,
    );
}

fn render_replay(frame: &mut Frame, app: &App, area: Rect) {
    let Some(replay) = &app.session.replay else {
        return;
    };
    let block = panel("AAR");
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(1), Constraint::Length(1)])
        .split(inner);
    let state = if replay.is_playing() { "▶ playing" } else { "⏸ paused" };
    frame.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled(state, Style::default().fg(Color::Green)),
            Span::styled(format!("  {}x", replay.speed()), Style::default().fg(Color::Yellow)),
        ])),
        parts[0],
    );
    frame.render_widget(
        Gauge::default()
            .gauge_style(Style::default().fg(Color::Cyan).bg(Color::Black))
            .ratio(replay.progress())
            .label(format!(
                "{} / {}",
                format_clock(replay.current_ms()),
                format_clock(replay.duration_ms())
            )),
        parts[1],
    );
    frame.render_widget(
        Paragraph::new(Span::styled(
            "spc play [ ] ±10s < > speed",
            Style::default().fg(Color::DarkGray),
        )),
        parts[2],
    );
}

fn render_logs(frame: &mut Frame, app: &App, area: Rect) {
    let height = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = app
        .logs
        .iter()
        .flat_map(|logs| logs.recent(height))
        .map(|l| Line::from(Span::styled(l.to_owned(), Style::default().fg(Color::DarkGray))))
        .collect();
    frame.render_widget(Paragraph::new(lines).block(panel("Log")), area);
}

fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let session = &app.session;
    let annotations = &session.annotations;
    let style = annotations.style();
    let tracking = session.sync.path_tracking();

    let mut spans = vec![
        Span::styled(" Zoom: ", Style::default().fg(Color::DarkGray)),
        Span::styled(app.zoom_level(), Style::default().fg(Color::Yellow)),
        Span::styled(" | ", Style::default().fg(Color::DarkGray)),
        Span::styled(app.center_coords(), Style::default().fg(Color::Cyan)),
        Span::styled(" | ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            annotations.tool().name(),
            Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(" {} {}px", annotations.color_name(), style.width),
            Style::default().fg(rgb(style.color)),
        ),
        Span::styled(" | ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            if tracking { "[T]racking " } else { "[t]racking " },
            Style::default().fg(if tracking { Color::Green } else { Color::DarkGray }),
        ),
    ];
    if session.replay.is_some() {
        spans.push(Span::styled("AAR ", Style::default().fg(Color::Yellow)));
    }
    if let Some(notice) = session.notice() {
        spans.push(Span::styled(format!("| {notice} "), Style::default().fg(Color::White)));
    }
    spans.push(Span::styled(
        "| p/d/e:tool f:fit n:next s:export q:quit",
        Style::default().fg(Color::DarkGray),
    ));

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
