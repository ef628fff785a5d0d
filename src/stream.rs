//! Live unit stream: a reader thread, the rate limiter in front of the sync
//! engine and the per-frame update queue.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::entity::{StreamMessage, TrackedEntity};

#[derive(Debug, Clone, PartialEq)]
pub enum StreamInput {
    Stdin,
    File(PathBuf),
}

impl StreamInput {
    /// `-` reads standard input
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            StreamInput::Stdin
        } else {
            StreamInput::File(PathBuf::from(arg))
        }
    }
}

#[derive(Debug)]
pub enum StreamEvent {
    Message(StreamMessage),
    Closed,
    Failed(String),
}

/// Read newline-delimited JSON on a background thread
pub fn spawn_reader(input: StreamInput) -> Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let reader: Box<dyn BufRead> = match &input {
            StreamInput::Stdin => Box::new(BufReader::new(io::stdin())),
            StreamInput::File(path) => match File::open(path) {
                Ok(f) => Box::new(BufReader::new(f)),
                Err(e) => {
                    let _ = tx.send(StreamEvent::Failed(format!("{}: {e}", path.display())));
                    return;
                }
            },
        };
        info!(?input, "unit stream opened");
        for (n, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    let _ = tx.send(StreamEvent::Failed(e.to_string()));
                    return;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let mut bytes = line.into_bytes();
            match StreamMessage::parse(&mut bytes) {
                Ok(msg) => {
                    if tx.send(StreamEvent::Message(msg)).is_err() {
                        return;
                    }
                }
                Err(e) => warn!(line = n + 1, "{e}"),
            }
        }
        debug!("unit stream reached end of input");
        let _ = tx.send(StreamEvent::Closed);
    });
    rx
}

/// Drops messages that arrive too soon after the last accepted one
#[derive(Debug, Clone)]
pub struct UpdateThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl UpdateThrottle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

/// One change to the unit list
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// New full list
    Replace(Vec<TrackedEntity>),
    /// Insert or move a single unit
    Upsert(TrackedEntity),
}

impl Update {
    pub fn apply_to(self, units: &mut Vec<TrackedEntity>) {
        match self {
            Update::Replace(list) => *units = list,
            Update::Upsert(unit) => {
                units.retain(|u| u.id != unit.id);
                units.push(unit);
            }
        }
    }
}

/// Collects accepted updates and hands them out a few per frame once the
/// stream has been quiet for the debounce window
#[derive(Debug)]
pub struct UpdateQueue {
    pending: VecDeque<Update>,
    last_push: Option<Instant>,
    debounce: Duration,
    batch_size: usize,
}

impl UpdateQueue {
    pub fn new(debounce: Duration, batch_size: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            last_push: None,
            debounce,
            batch_size: batch_size.max(1),
        }
    }

    pub fn push(&mut self, update: Update, now: Instant) {
        self.pending.push_back(update);
        self.last_push = Some(now);
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        !self.pending.is_empty()
            && self
                .last_push
                .map_or(true, |t| now.saturating_duration_since(t) >= self.debounce)
    }

    /// Up to one batch of updates, oldest first
    pub fn drain_batch(&mut self, now: Instant) -> Vec<Update> {
        if !self.is_ready(now) {
            return Vec::new();
        }
        let n = self.batch_size.min(self.pending.len());
        self.pending.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::LatLon;
    use std::io::Write;

    fn unit(id: &str, lat: f64) -> TrackedEntity {
        TrackedEntity::new(id, Some(LatLon::new(lat, 0.0)))
    }

    #[test]
    fn test_throttle() {
        let t0 = Instant::now();
        let mut throttle = UpdateThrottle::new(Duration::from_millis(100));
        assert!(throttle.accept(t0));
        assert!(!throttle.accept(t0 + Duration::from_millis(50)));
        assert!(throttle.accept(t0 + Duration::from_millis(100)));
        assert!(!throttle.accept(t0 + Duration::from_millis(199)));

        let mut open = UpdateThrottle::new(Duration::ZERO);
        assert!(open.accept(t0));
        assert!(open.accept(t0));
    }

    #[test]
    fn test_queue_debounce_and_batches() {
        let t0 = Instant::now();
        let mut queue = UpdateQueue::new(Duration::from_millis(50), 2);
        for i in 0..5 {
            queue.push(Update::Upsert(unit(&i.to_string(), 1.0)), t0);
        }
        assert!(queue.drain_batch(t0 + Duration::from_millis(10)).is_empty());

        let later = t0 + Duration::from_millis(60);
        let first = queue.drain_batch(later);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0], Update::Upsert(unit("0", 1.0)));
        assert_eq!(queue.drain_batch(later).len(), 2);
        assert_eq!(queue.drain_batch(later).len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_upsert_and_replace() {
        let mut units = vec![unit("1", 1.0), unit("2", 2.0)];
        Update::Upsert(unit("1", 5.0)).apply_to(&mut units);
        assert_eq!(units.len(), 2);
        assert_eq!(units[1], unit("1", 5.0));

        Update::Replace(vec![unit("3", 3.0)]).apply_to(&mut units);
        assert_eq!(units, vec![unit("3", 3.0)]);
    }

    #[test]
    fn test_reader_parses_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type":"soldier_movement","soldier_id":"1","gps":{{"lat":1,"lng":2}}}}"#).unwrap();
        writeln!(file, "garbage").unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"type":"frame_data","soldiers":[]}}"#).unwrap();
        file.flush().unwrap();

        let rx = spawn_reader(StreamInput::File(file.path().to_path_buf()));
        let events: Vec<StreamEvent> = rx.iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], StreamEvent::Message(StreamMessage::Movement(e)) if e.id == "1"));
        assert!(matches!(&events[1], StreamEvent::Message(StreamMessage::Frame(v)) if v.is_empty()));
        assert!(matches!(events[2], StreamEvent::Closed));
    }

    #[test]
    fn test_reader_missing_file() {
        let rx = spawn_reader(StreamInput::File("/nonexistent/units.jsonl".into()));
        assert!(matches!(rx.recv().unwrap(), StreamEvent::Failed(_)));
    }
}
