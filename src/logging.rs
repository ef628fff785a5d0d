use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const TAIL_LINES: usize = 200;

/// Forwards formatted log records to the log panel; the terminal owns stdout
#[derive(Clone)]
struct ChannelWriter {
    sender: Sender<String>,
}

impl std::io::Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(text) = std::str::from_utf8(buf) {
            let _ = self.sender.send(text.to_owned());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Most recent log lines, for the log panel
pub struct LogTail {
    rx: Receiver<String>,
    lines: VecDeque<String>,
}

impl LogTail {
    fn new(rx: Receiver<String>) -> Self {
        Self {
            rx,
            lines: VecDeque::with_capacity(TAIL_LINES),
        }
    }

    /// Pull whatever the subscriber has written since the last frame
    pub fn drain(&mut self) {
        while let Ok(chunk) = self.rx.try_recv() {
            for line in chunk.lines().filter(|l| !l.trim().is_empty()) {
                if self.lines.len() == TAIL_LINES {
                    self.lines.pop_front();
                }
                self.lines.push_back(line.to_owned());
            }
        }
    }

    /// Newest last
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &str> {
        self.lines.iter().skip(self.lines.len().saturating_sub(n)).map(String::as_str)
    }
}

/// Install the global subscriber: compact records into the log panel, plus a
/// full copy in `log_file` when given. `RUST_LOG` overrides the `info` default.
pub fn init(log_file: Option<&Path>) -> Result<LogTail> {
    let (tx, rx) = mpsc::channel::<String>();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let panel = fmt::layer()
        .compact()
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .with_writer(move || ChannelWriter { sender: tx.clone() });

    let file = match log_file {
        Some(path) => {
            let f = File::create(path).with_context(|| format!("creating log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(f)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(panel)
        .with(file)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(LogTail::new(rx))
}
