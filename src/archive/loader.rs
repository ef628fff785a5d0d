//! Background acquisition of archive bytes with progress reporting.
//!
//! Each load runs on its own reader thread and reports through a channel the
//! UI loop drains once per frame. A newer load supersedes an older one: the
//! older thread is left to finish, its events are simply dropped.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::LoadError;

const CHUNK_SIZE: usize = 64 * 1024;
const MIB: f64 = 1_048_576.0;

/// Where archive bytes come from
#[derive(Debug, Clone, PartialEq)]
pub enum LoadSource {
    Url(String),
    File(PathBuf),
}

impl LoadSource {
    fn label(&self) -> String {
        match self {
            LoadSource::Url(url) => url.clone(),
            LoadSource::File(path) => file_name(path),
        }
    }
}

/// Identifies one load request; later tickets supersede earlier ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoadTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadProgress {
    /// Total size known
    Percent(u8),
    /// No `Content-Length`; bytes read so far
    Bytes(u64),
}

#[derive(Debug)]
pub enum LoadEventKind {
    Progress(LoadProgress),
    Finished(Vec<u8>),
    Failed(LoadError),
}

#[derive(Debug)]
pub struct LoadEvent {
    pub ticket: LoadTicket,
    pub kind: LoadEventKind,
}

/// Starts loads and filters their events down to the current one
pub struct ArchiveLoader {
    tx: Sender<LoadEvent>,
    rx: Receiver<LoadEvent>,
    next_ticket: u64,
    current: Option<(LoadTicket, LoadSource)>,
}

impl ArchiveLoader {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            next_ticket: 0,
            current: None,
        }
    }

    pub fn load_from_url(&mut self, url: impl Into<String>) -> LoadTicket {
        self.start(LoadSource::Url(url.into()))
    }

    pub fn load_from_file(&mut self, path: impl Into<PathBuf>) -> LoadTicket {
        self.start(LoadSource::File(path.into()))
    }

    pub fn start(&mut self, source: LoadSource) -> LoadTicket {
        self.next_ticket += 1;
        let ticket = LoadTicket(self.next_ticket);
        self.current = Some((ticket, source.clone()));

        info!(?source, ticket = ticket.0, "archive load started");
        let tx = self.tx.clone();
        thread::spawn(move || {
            let emit = |kind| {
                // Receiver gone means the viewer shut down; nothing left to report to
                let _ = tx.send(LoadEvent { ticket, kind });
            };
            let result = match &source {
                LoadSource::Url(url) => fetch_url(url, |p| emit(LoadEventKind::Progress(p))),
                LoadSource::File(path) => read_file(path, |p| emit(LoadEventKind::Progress(p))),
            };
            match result {
                Ok(bytes) => emit(LoadEventKind::Finished(bytes)),
                Err(e) => emit(LoadEventKind::Failed(e)),
            }
        });
        ticket
    }

    /// The source of the load whose events are still accepted
    pub fn current_source(&self) -> Option<&LoadSource> {
        self.current.as_ref().map(|(_, s)| s)
    }

    /// Drain pending events, discarding those from superseded loads
    pub fn poll(&mut self) -> Vec<LoadEvent> {
        let current = self.current.as_ref().map(|(t, _)| *t);
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            if Some(event.ticket) != current {
                debug!(ticket = event.ticket.0, "dropping event from superseded load");
                continue;
            }
            let terminal = matches!(
                event.kind,
                LoadEventKind::Finished(_) | LoadEventKind::Failed(_)
            );
            events.push(event);
            if terminal {
                self.current = None;
                break;
            }
        }
        events
    }

    /// Block until the current load finishes (used by headless callers and tests)
    pub fn wait(&mut self, timeout: Duration) -> Option<Result<Vec<u8>, LoadError>> {
        let (ticket, _) = self.current.clone()?;
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            let event = self.rx.recv_timeout(remaining).ok()?;
            if event.ticket != ticket {
                continue;
            }
            match event.kind {
                LoadEventKind::Progress(_) => continue,
                LoadEventKind::Finished(bytes) => {
                    self.current = None;
                    return Some(Ok(bytes));
                }
                LoadEventKind::Failed(e) => {
                    self.current = None;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl Default for ArchiveLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a stream to completion in fixed-size chunks, reporting progress per chunk.
/// Chunks are only joined once the stream ends.
pub fn read_chunked<R: Read>(
    mut reader: R,
    total: Option<u64>,
    mut on_progress: impl FnMut(LoadProgress),
) -> io::Result<Vec<u8>> {
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut loaded: u64 = 0;
    let mut last_percent = None;

    loop {
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        chunk.truncate(n);
        loaded += n as u64;
        chunks.push(chunk);

        match total.filter(|t| *t > 0) {
            Some(total) => {
                let pct = ((loaded as f64 / total as f64) * 100.0).round().min(100.0) as u8;
                if last_percent != Some(pct) {
                    last_percent = Some(pct);
                    on_progress(LoadProgress::Percent(pct));
                }
            }
            None => on_progress(LoadProgress::Bytes(loaded)),
        }
    }

    Ok(chunks.concat())
}

fn fetch_url(url: &str, on_progress: impl FnMut(LoadProgress)) -> Result<Vec<u8>, LoadError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(None::<Duration>)
        .build()
        .map_err(|e| LoadError::Network(e.to_string()))?;
    let response = client
        .get(url)
        .send()
        .map_err(|e| LoadError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        warn!(%url, %status, "archive fetch rejected");
        return Err(LoadError::Http {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
        });
    }

    let total = response.content_length();
    read_chunked(response, total, on_progress).map_err(|e| LoadError::Network(e.to_string()))
}

fn read_file(path: &Path, on_progress: impl FnMut(LoadProgress)) -> Result<Vec<u8>, LoadError> {
    let file_err = |source| LoadError::File {
        name: file_name(path),
        source,
    };
    let file = File::open(path).map_err(file_err)?;
    let total = file.metadata().ok().map(|m| m.len());
    read_chunked(file, total, on_progress).map_err(file_err)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// User-facing loader panel state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoaderStatus {
    pub message: String,
    pub progress: u8,
    pub map_loaded: bool,
}

impl LoaderStatus {
    pub fn is_error(&self) -> bool {
        self.message.starts_with("Error")
    }

    pub fn started(&mut self, source: &LoadSource) {
        self.message = format!("Loading {}…", source.label());
        self.progress = 0;
    }

    pub fn progress(&mut self, source: &LoadSource, progress: LoadProgress) {
        match (source, progress) {
            (LoadSource::Url(_), LoadProgress::Percent(pct)) => {
                self.progress = pct;
                self.message = format!("Loading map: {pct}%");
            }
            (LoadSource::Url(_), LoadProgress::Bytes(n)) => {
                self.message = format!("Loading map: {} MB", (n as f64 / MIB).round());
            }
            (LoadSource::File(_), LoadProgress::Percent(pct)) => {
                self.progress = pct;
                self.message = format!("Loading {}: {pct}%", source.label());
            }
            (LoadSource::File(_), LoadProgress::Bytes(n)) => {
                self.message = format!(
                    "Loading {}: {} MB processed",
                    source.label(),
                    (n as f64 / MIB).round()
                );
            }
        }
    }

    /// Acquisition failed; prior map state stays as it was
    pub fn failed(&mut self, source: &LoadSource, error: &LoadError) {
        self.progress = 0;
        self.message = match (source, error) {
            (LoadSource::File(_), LoadError::File { name, .. }) => format!("Error loading {name}"),
            _ => format!("Error: {error}"),
        };
    }

    /// Bytes arrived but the archive would not open
    pub fn rejected(&mut self, reason: &str) {
        self.progress = 0;
        self.message = format!("Error loading MBTiles: {reason}");
    }

    pub fn loaded(&mut self) {
        self.message.clear();
        self.progress = 100;
        self.map_loaded = true;
    }
}
