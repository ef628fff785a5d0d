//! One mounted map: owns the archive, the tile layer, every piece of derived
//! unit state and the channels feeding them. All mutation happens on the
//! thread that calls [`MapSession::update`].

use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::annotation::{AnnotationLayer, ExportSummary};
use crate::archive::loader::{ArchiveLoader, LoadEventKind, LoadSource, LoaderStatus};
use crate::archive::TileArchive;
use crate::config::ViewerConfig;
use crate::entity::{StreamMessage, TrackedEntity};
use crate::error::{ArchiveError, ExportError};
use crate::map::projection::Viewport;
use crate::map::tiles::{ArchiveTileProvider, TileLayer};
use crate::overlay::DistanceOverlay;
use crate::replay::{ReplayCommand, ReplayTimeline};
use crate::stream::{spawn_reader, StreamEvent, Update, UpdateQueue, UpdateThrottle};
use crate::sync::SyncEngine;

/// Lowest zoom a loaded archive may be viewed at
const ARCHIVE_MIN_ZOOM: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Active,
    TornDown,
}

pub struct MapSession {
    config: ViewerConfig,
    lifecycle: Lifecycle,
    pub viewport: Viewport,
    pub tiles: TileLayer<ArchiveTileProvider>,
    loader: ArchiveLoader,
    /// Source of the most recent load, for progress text and reloads
    source: Option<LoadSource>,
    pub status: LoaderStatus,
    pub sync: SyncEngine,
    pub overlay: DistanceOverlay,
    pub annotations: AnnotationLayer,
    stream: Option<Receiver<StreamEvent>>,
    throttle: UpdateThrottle,
    queue: UpdateQueue,
    units: Vec<TrackedEntity>,
    pub replay: Option<ReplayTimeline>,
    notice: Option<String>,
}

impl MapSession {
    /// `width`/`height` are the map area in braille pixels
    pub fn new(config: ViewerConfig, width: usize, height: usize) -> Self {
        let viewport = Viewport::new(config.center.lon, config.center.lat, config.zoom, width, height)
            .with_tile_size(config.tile_size)
            .with_zoom_limits(config.min_zoom, config.max_zoom);
        Self {
            viewport,
            tiles: TileLayer::new(ArchiveTileProvider::new(), config.tile_cache),
            loader: ArchiveLoader::new(),
            source: None,
            status: LoaderStatus::default(),
            sync: SyncEngine::new(config.max_trail_points),
            overlay: DistanceOverlay::new(config.reference_id.clone()),
            annotations: AnnotationLayer::new(),
            stream: None,
            throttle: UpdateThrottle::new(config.throttle),
            queue: UpdateQueue::new(config.debounce, config.batch_size),
            units: Vec::new(),
            replay: None,
            notice: None,
            lifecycle: Lifecycle::Created,
            config,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// Start the configured archive load, unit stream and replay.
    /// Runs once; later calls return false.
    pub fn init(&mut self) -> bool {
        if self.lifecycle != Lifecycle::Created {
            return false;
        }
        self.lifecycle = Lifecycle::Active;

        if let Some(source) = self.config.archive.clone() {
            self.load_archive(source);
        }
        if let Some(input) = self.config.stream.clone() {
            self.stream = Some(spawn_reader(input));
        }
        if let Some(path) = self.config.replay.clone() {
            match ReplayTimeline::from_file(&path) {
                Ok(timeline) => {
                    let state = timeline.current_state();
                    self.replay = Some(timeline);
                    self.apply_units(state);
                }
                Err(e) => {
                    warn!("{e}");
                    self.notice = Some(format!("Replay unavailable: {e}"));
                }
            }
        }
        info!("map session initialised");
        true
    }

    /// Release the archive and drop every derived map. Runs once.
    pub fn teardown(&mut self) {
        if self.lifecycle != Lifecycle::Active {
            return;
        }
        self.stream = None;
        self.queue.clear();
        self.units.clear();
        self.replay = None;
        self.sync.reset();
        self.sync.set_bounds(None);
        self.overlay.recompute(&self.sync);
        self.tiles.swap_archive(None);
        self.status = LoaderStatus::default();
        self.lifecycle = Lifecycle::TornDown;
        info!("map session torn down");
    }

    pub fn resize(&mut self, width: usize, height: usize) {
        self.viewport.width = width;
        self.viewport.height = height;
    }

    pub fn load_archive(&mut self, source: LoadSource) {
        self.status.started(&source);
        self.loader.start(source.clone());
        self.source = Some(source);
    }

    /// Fetch the last archive source again; false when nothing was ever loaded
    pub fn reload_archive(&mut self) -> bool {
        match self.source.clone() {
            Some(source) => {
                self.load_archive(source);
                true
            }
            None => false,
        }
    }

    /// Open freshly acquired archive bytes and make them the active basemap.
    /// On failure the previous archive and map state stay in place.
    pub fn accept_archive(&mut self, bytes: &[u8]) -> Result<(), ArchiveError> {
        let archive = match TileArchive::open(bytes) {
            Ok(archive) => archive,
            Err(e) => {
                warn!("archive rejected: {e}");
                self.status.rejected(&e.to_string());
                return Err(e);
            }
        };
        let zooms = archive.zoom_range();
        let bounds = archive.bounds();

        self.tiles.swap_archive(Some(archive));
        if let Some(z) = zooms {
            self.viewport.set_zoom_limits(
                f64::from(z.min).max(ARCHIVE_MIN_ZOOM),
                f64::from(z.max).min(self.config.max_zoom),
            );
        }
        if let Some(b) = &bounds {
            self.viewport
                .fit_bounds(b, self.viewport.max_zoom, self.config.fit_padding_px);
        }
        self.sync.set_bounds(bounds);
        self.sync.refresh(self.viewport.center());
        self.overlay.recompute(&self.sync);
        self.status.loaded();
        Ok(())
    }

    /// Frame the archive bounds; false when the archive declares none
    pub fn fit_bounds(&mut self) -> bool {
        let Some(bounds) = self.sync.bounds().copied() else {
            return false;
        };
        self.viewport
            .fit_bounds(&bounds, self.config.fit_max_zoom, self.config.fit_padding_px);
        true
    }

    /// Drain loader and stream channels, advance the replay and apply one
    /// batch of queued updates. Returns whether anything visible changed.
    pub fn update(&mut self, now: Instant) -> bool {
        let mut dirty = self.poll_loader();
        dirty |= self.poll_stream(now);

        let replay_state = self
            .replay
            .as_mut()
            .and_then(|r| if r.tick(now) { Some(r.current_state()) } else { None });
        if let Some(state) = replay_state {
            dirty |= self.apply_units(state);
        }

        let batch = self.queue.drain_batch(now);
        if !batch.is_empty() {
            for update in batch {
                update.apply_to(&mut self.units);
            }
            dirty |= self.sync_units();
        }
        dirty
    }

    fn poll_loader(&mut self) -> bool {
        let events = self.loader.poll();
        let dirty = !events.is_empty();
        for event in events {
            match event.kind {
                LoadEventKind::Progress(progress) => {
                    if let Some(source) = &self.source {
                        self.status.progress(source, progress);
                    }
                }
                LoadEventKind::Finished(bytes) => {
                    // Failure is already reflected in the loader status
                    let _ = self.accept_archive(&bytes);
                }
                LoadEventKind::Failed(e) => {
                    warn!("archive load failed: {e}");
                    if let Some(source) = &self.source {
                        self.status.failed(source, &e);
                    }
                }
            }
        }
        dirty
    }

    fn poll_stream(&mut self, now: Instant) -> bool {
        let Some(rx) = &self.stream else {
            return false;
        };
        let mut messages = Vec::new();
        let mut closed = false;
        loop {
            match rx.try_recv() {
                Ok(StreamEvent::Message(msg)) => messages.push(msg),
                Ok(StreamEvent::Closed) | Err(TryRecvError::Disconnected) => {
                    info!("unit stream closed");
                    closed = true;
                    break;
                }
                Ok(StreamEvent::Failed(e)) => {
                    warn!("unit stream failed: {e}");
                    self.notice = Some(format!("Stream error: {e}"));
                    closed = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }
        if closed {
            self.stream = None;
        }

        let mut dirty = false;
        for msg in messages {
            dirty |= self.handle_message(msg, now);
        }
        dirty
    }

    /// Route one stream message. Session recordings skip the rate limiter.
    fn handle_message(&mut self, msg: StreamMessage, now: Instant) -> bool {
        match msg {
            StreamMessage::Session { frames, duration } => {
                let timeline = ReplayTimeline::new(frames, duration);
                info!(
                    frames = timeline.frame_count(),
                    duration_ms = timeline.duration_ms(),
                    "session recording received"
                );
                let state = timeline.current_state();
                self.replay = Some(timeline);
                self.queue.clear();
                self.apply_units(state)
            }
            StreamMessage::Frame(_) | StreamMessage::Movement(_) if self.replay.is_some() => {
                debug!("live update ignored during replay");
                false
            }
            StreamMessage::Frame(list) if list.is_empty() => {
                debug!("frame without valid records dropped");
                false
            }
            StreamMessage::Frame(list) => {
                if self.throttle.accept(now) {
                    self.queue.push(Update::Replace(list), now);
                } else {
                    debug!("frame throttled");
                }
                false
            }
            StreamMessage::Movement(unit) => {
                if self.throttle.accept(now) {
                    self.queue.push(Update::Upsert(unit), now);
                } else {
                    debug!(id = %unit.id, "movement throttled");
                }
                false
            }
        }
    }

    fn apply_units(&mut self, units: Vec<TrackedEntity>) -> bool {
        self.units = units;
        self.sync_units()
    }

    fn sync_units(&mut self) -> bool {
        let report = self.sync.apply(self.units.clone(), self.viewport.center());
        if !report.is_empty() {
            debug!(
                changed = report.changed.len(),
                removed = report.removed.len(),
                ops = report.ops.len(),
                "units synced"
            );
        }
        self.overlay.recompute(&self.sync);
        self.follow_selection();
        !report.is_empty()
    }

    fn follow_selection(&mut self) {
        if let Some(focus) = self.sync.selection_focus() {
            self.viewport.set_center(focus);
        }
    }

    /// Returns whether the playhead moved
    pub fn control_replay(&mut self, command: ReplayCommand) -> bool {
        let Some(replay) = self.replay.as_mut() else {
            return false;
        };
        if !replay.control(command) {
            return false;
        }
        let state = replay.current_state();
        self.apply_units(state);
        true
    }

    pub fn select(&mut self, id: &str) {
        self.sync.select(id);
        self.follow_selection();
    }

    pub fn cycle_selection(&mut self, forward: bool) {
        self.sync.cycle_selection(forward);
        self.follow_selection();
    }

    pub fn clear_selection(&mut self) {
        self.sync.clear_selection();
    }

    pub fn toggle_path_tracking(&mut self) -> bool {
        let on = self.sync.toggle_path_tracking();
        self.overlay.recompute(&self.sync);
        self.follow_selection();
        info!(on, "path tracking toggled");
        on
    }

    pub fn export_annotations(&mut self) -> Result<ExportSummary, ExportError> {
        let result = self.annotations.export(
            &self.config.export_dir,
            &self.viewport,
            self.config.export_scale,
        );
        self.notice = Some(match &result {
            Ok(summary) => format!("Exported {} strokes to {}", summary.strokes, summary.png.display()),
            Err(e) => format!("Export failed: {e}"),
        });
        result
    }

    /// One-line message for the status bar
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn set_notice(&mut self, text: impl Into<String>) {
        self.notice = Some(text.into());
    }

    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    pub fn queued_updates(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for MapSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
