mod app;
mod ui;

use anyhow::Result;
use app::App;
use clap::Parser;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::execute;
use ratatui::DefaultTerminal;
use std::time::{Duration, Instant};
use tac_map::annotation::Tool;
use tac_map::config::{Cli, ViewerConfig};
use tac_map::logging;
use tac_map::replay::ReplayCommand;
use tracing::{info, warn};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let logs = logging::init(cli.log_file.as_deref())?;
    let config = ViewerConfig::from(cli);

    let mut terminal = ratatui::init();
    terminal.clear()?;
    execute!(std::io::stdout(), EnableMouseCapture)?;

    let result = run(&mut terminal, config, logs);

    let _ = execute!(std::io::stdout(), DisableMouseCapture);
    ratatui::restore();

    result
}

/// Handle mouse events for panning, zooming and the annotation tools
fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    app.set_mouse_pos(mouse.column, mouse.row);

    match mouse.kind {
        MouseEventKind::ScrollUp => app.zoom_in_at(mouse.column, mouse.row),
        MouseEventKind::ScrollDown => app.zoom_out_at(mouse.column, mouse.row),
        // Horizontal scroll for panning (trackpad two-finger swipe)
        MouseEventKind::ScrollLeft => app.pan(-15, 0),
        MouseEventKind::ScrollRight => app.pan(15, 0),
        MouseEventKind::Down(MouseButton::Left) => app.pointer_down(mouse.column, mouse.row),
        MouseEventKind::Drag(MouseButton::Left) => app.handle_drag(mouse.column, mouse.row),
        MouseEventKind::Up(MouseButton::Left) => app.end_drag(),
        _ => {}
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    let session = &mut app.session;
    match key.code {
        KeyCode::Char('q') => app.quit(),

        // Pan with hjkl or arrow keys
        KeyCode::Left | KeyCode::Char('h') => app.pan(-10, 0),
        KeyCode::Right | KeyCode::Char('l') => app.pan(10, 0),
        KeyCode::Up | KeyCode::Char('k') => app.pan(0, -6),
        KeyCode::Down | KeyCode::Char('j') => app.pan(0, 6),

        // Zoom
        KeyCode::Char('+') | KeyCode::Char('=') => app.zoom_in(),
        KeyCode::Char('-') | KeyCode::Char('_') => app.zoom_out(),
        KeyCode::Char('f') => {
            if !session.fit_bounds() {
                session.set_notice("Archive declares no bounds");
            }
        }

        // Units
        KeyCode::Char('t') => {
            session.toggle_path_tracking();
        }
        KeyCode::Char('n') => session.cycle_selection(true),
        KeyCode::Char('N') => session.cycle_selection(false),
        KeyCode::Esc => session.clear_selection(),

        // Annotations
        KeyCode::Char('p') => app.set_tool(Tool::Pan),
        KeyCode::Char('d') => app.set_tool(Tool::Draw),
        KeyCode::Char('e') => app.set_tool(Tool::Erase),
        KeyCode::Char('c') => session.annotations.cycle_color(),
        KeyCode::Char('w') => session.annotations.cycle_width(),
        KeyCode::Char('x') => {
            session.annotations.clear();
            session.set_notice("Annotations cleared");
        }
        KeyCode::Char('s') => match session.export_annotations() {
            Ok(summary) => info!(png = %summary.png.display(), strokes = summary.strokes, "annotations exported"),
            Err(e) => warn!("annotation export failed: {e}"),
        },

        // Layers
        KeyCode::Char('b') => {
            let settings = &mut app.map_renderer.settings;
            settings.show_basemap = !settings.show_basemap;
        }
        KeyCode::Char('L') => {
            let settings = &mut app.map_renderer.settings;
            settings.show_labels = !settings.show_labels;
        }
        KeyCode::Char('o') => {
            if !session.reload_archive() {
                session.set_notice("No archive source configured");
            }
        }

        // Replay
        KeyCode::Char(' ') => {
            session.control_replay(ReplayCommand::TogglePlay);
        }
        KeyCode::Char('[') => {
            session.control_replay(ReplayCommand::Rewind);
        }
        KeyCode::Char(']') => {
            session.control_replay(ReplayCommand::FastForward);
        }
        KeyCode::Char('<') => {
            session.control_replay(ReplayCommand::Slower);
        }
        KeyCode::Char('>') => {
            session.control_replay(ReplayCommand::Faster);
        }
        KeyCode::Char('0') => {
            session.control_replay(ReplayCommand::Restart);
        }
        KeyCode::Char('G') => {
            session.control_replay(ReplayCommand::SkipToEnd);
        }

        _ => {}
    }
}

fn run(terminal: &mut DefaultTerminal, config: ViewerConfig, logs: logging::LogTail) -> Result<()> {
    let size = terminal.size()?;
    let mut app = App::new(config, size.width as usize, size.height as usize).with_logs(logs);
    app.session.init();

    loop {
        app.tick(Instant::now());

        terminal.draw(|frame| ui::render(frame, &mut app))?;

        // ~60fps
        if event::poll(Duration::from_millis(16))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => handle_key(&mut app, key),
                Event::Mouse(mouse) => handle_mouse(&mut app, mouse),
                Event::Resize(width, height) => app.resize(width as usize, height as usize),
                _ => {}
            }
        }

        if app.should_quit {
            break;
        }
    }

    app.session.teardown();
    Ok(())
}
