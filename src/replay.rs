//! After-action review: scrub and play back a recorded session.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::info;

use crate::entity::{parse_frames, Frame, StreamMessage, TrackedEntity};
use crate::error::{RecordError, ReplayError};

/// Rewind and fast-forward jump
pub const SEEK_STEP_MS: f64 = 10_000.0;

pub const SPEEDS: [f64; 6] = [0.25, 0.5, 1.0, 2.0, 4.0, 8.0];
const NORMAL_SPEED: usize = 2;

/// Transport controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayCommand {
    TogglePlay,
    Rewind,
    FastForward,
    Restart,
    SkipToEnd,
    Faster,
    Slower,
}

#[derive(Debug, Clone)]
pub struct ReplayTimeline {
    frames: Vec<Frame>,
    duration_ms: f64,
    current_ms: f64,
    playing: bool,
    speed_index: usize,
    last_tick: Option<Instant>,
}

impl ReplayTimeline {
    pub fn new(mut frames: Vec<Frame>, duration_ms: f64) -> Self {
        frames.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        let last = frames.last().map_or(0.0, |f| f.timestamp);
        Self {
            frames,
            duration_ms: duration_ms.max(last).max(0.0),
            current_ms: 0.0,
            playing: false,
            speed_index: NORMAL_SPEED,
            last_tick: None,
        }
    }

    /// Load `{ "duration": ms, "frames": [...] }`, or a `session_data` message
    pub fn from_file(path: &Path) -> Result<Self, ReplayError> {
        let mut bytes = fs::read(path).map_err(|source| ReplayError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let timeline = Self::from_slice(&mut bytes)?;
        info!(
            path = %path.display(),
            frames = timeline.frames.len(),
            duration_ms = timeline.duration_ms,
            "replay loaded"
        );
        Ok(timeline)
    }

    pub fn from_slice(bytes: &mut [u8]) -> Result<Self, RecordError> {
        let mut value: Value =
            simd_json::serde::from_slice(bytes).map_err(|e| RecordError::Malformed(e.to_string()))?;
        if let Some(Value::Array(frames)) = value.get_mut("frames").map(Value::take) {
            let duration = value.get("duration").and_then(Value::as_f64).unwrap_or(0.0);
            return Ok(Self::new(parse_frames(frames), duration));
        }
        match StreamMessage::from_value(value)? {
            StreamMessage::Session { frames, duration } => Ok(Self::new(frames, duration)),
            _ => Err(RecordError::Malformed("replay file holds no frames".into())),
        }
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    pub fn current_ms(&self) -> f64 {
        self.current_ms
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn speed(&self) -> f64 {
        SPEEDS[self.speed_index]
    }

    pub fn progress(&self) -> f64 {
        if self.duration_ms <= 0.0 {
            0.0
        } else {
            (self.current_ms / self.duration_ms).clamp(0.0, 1.0)
        }
    }

    /// Latest record per unit among frames stamped at or before `t_ms`
    pub fn state_at(&self, t_ms: f64) -> Vec<TrackedEntity> {
        let mut order: Vec<TrackedEntity> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for frame in self.frames.iter().take_while(|f| f.timestamp <= t_ms) {
            for unit in &frame.soldiers {
                let stamp = unit.timestamp.unwrap_or(frame.timestamp);
                match index.get(unit.id.as_str()) {
                    Some(&i) => {
                        let held = order[i].timestamp.unwrap_or(f64::NEG_INFINITY);
                        if held < stamp {
                            order[i] = unit.clone();
                        }
                    }
                    None => {
                        index.insert(unit.id.as_str(), order.len());
                        order.push(unit.clone());
                    }
                }
            }
        }
        order
    }

    pub fn current_state(&self) -> Vec<TrackedEntity> {
        self.state_at(self.current_ms)
    }

    pub fn toggle_play(&mut self) {
        if !self.playing && self.current_ms >= self.duration_ms {
            self.current_ms = 0.0;
        }
        self.playing = !self.playing;
        self.last_tick = None;
    }

    pub fn pause(&mut self) {
        self.playing = false;
        self.last_tick = None;
    }

    pub fn seek(&mut self, t_ms: f64) {
        self.current_ms = t_ms.clamp(0.0, self.duration_ms);
    }

    pub fn rewind(&mut self) {
        self.seek(self.current_ms - SEEK_STEP_MS);
    }

    pub fn fast_forward(&mut self) {
        self.seek(self.current_ms + SEEK_STEP_MS);
    }

    pub fn restart(&mut self) {
        self.pause();
        self.current_ms = 0.0;
    }

    pub fn skip_to_end(&mut self) {
        self.pause();
        self.current_ms = self.duration_ms;
    }

    pub fn faster(&mut self) {
        self.speed_index = (self.speed_index + 1).min(SPEEDS.len() - 1);
    }

    pub fn slower(&mut self) {
        self.speed_index = self.speed_index.saturating_sub(1);
    }

    /// Returns whether the playhead moved
    pub fn control(&mut self, command: ReplayCommand) -> bool {
        let before = self.current_ms;
        match command {
            ReplayCommand::TogglePlay => self.toggle_play(),
            ReplayCommand::Rewind => self.rewind(),
            ReplayCommand::FastForward => self.fast_forward(),
            ReplayCommand::Restart => self.restart(),
            ReplayCommand::SkipToEnd => self.skip_to_end(),
            ReplayCommand::Faster => self.faster(),
            ReplayCommand::Slower => self.slower(),
        }
        self.current_ms != before
    }

    /// Move the playhead by wall-clock `elapsed` at the current speed.
    /// Returns whether the playhead moved.
    pub fn advance(&mut self, elapsed: Duration) -> bool {
        if !self.playing {
            return false;
        }
        let before = self.current_ms;
        let next = before + elapsed.as_secs_f64() * 1000.0 * self.speed();
        if next >= self.duration_ms {
            self.current_ms = self.duration_ms;
            self.pause();
        } else {
            self.current_ms = next;
        }
        self.current_ms != before
    }

    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.playing {
            return false;
        }
        let elapsed = self
            .last_tick
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
        self.last_tick = Some(now);
        self.advance(elapsed)
    }
}

/// `mm:ss` for a millisecond offset
pub fn format_clock(ms: f64) -> String {
    let secs = (ms.max(0.0) / 1000.0).floor() as u64;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::LatLon;

    fn unit(id: &str, lat: f64, ts: Option<f64>) -> TrackedEntity {
        let mut u = TrackedEntity::new(id, Some(LatLon::new(lat, 0.0)));
        u.timestamp = ts;
        u
    }

    fn timeline() -> ReplayTimeline {
        ReplayTimeline::new(
            vec![
                Frame {
                    timestamp: 10_000.0,
                    soldiers: vec![unit("1", 2.0, Some(10_000.0))],
                },
                Frame {
                    timestamp: 0.0,
                    soldiers: vec![unit("1", 1.0, Some(0.0)), unit("2", 5.0, Some(0.0))],
                },
                Frame {
                    timestamp: 20_000.0,
                    soldiers: vec![unit("2", 6.0, Some(20_000.0))],
                },
            ],
            30_000.0,
        )
    }

    #[test]
    fn test_state_is_latest_per_unit() {
        let tl = timeline();
        assert!(tl.state_at(-1.0).is_empty());

        let at_start = tl.state_at(0.0);
        assert_eq!(at_start.len(), 2);
        assert_eq!(at_start[0].position, Some(LatLon::new(1.0, 0.0)));

        let mid = tl.state_at(15_000.0);
        assert_eq!(mid[0].position, Some(LatLon::new(2.0, 0.0)));
        assert_eq!(mid[1].position, Some(LatLon::new(5.0, 0.0)));

        let end = tl.state_at(30_000.0);
        assert_eq!(end[1].position, Some(LatLon::new(6.0, 0.0)));
    }

    #[test]
    fn test_older_record_does_not_win() {
        let tl = ReplayTimeline::new(
            vec![
                Frame {
                    timestamp: 0.0,
                    soldiers: vec![unit("1", 1.0, Some(500.0))],
                },
                Frame {
                    timestamp: 100.0,
                    soldiers: vec![unit("1", 9.0, Some(200.0))],
                },
            ],
            1000.0,
        );
        assert_eq!(tl.state_at(1000.0)[0].position, Some(LatLon::new(1.0, 0.0)));
    }

    #[test]
    fn test_playback_controls() {
        let mut tl = timeline();
        assert!(!tl.advance(Duration::from_millis(50)));

        tl.toggle_play();
        assert!(tl.advance(Duration::from_millis(50)));
        assert!((tl.current_ms() - 50.0).abs() < 1e-6);

        tl.faster();
        tl.advance(Duration::from_millis(50));
        assert!((tl.current_ms() - 150.0).abs() < 1e-6);

        tl.fast_forward();
        assert!((tl.current_ms() - 10_150.0).abs() < 1e-6);
        tl.rewind();
        tl.rewind();
        assert_eq!(tl.current_ms(), 0.0);

        tl.advance(Duration::from_secs(60));
        assert_eq!(tl.current_ms(), 30_000.0);
        assert!(!tl.is_playing());
        assert_eq!(tl.progress(), 1.0);

        // Play at the end starts over
        tl.toggle_play();
        assert_eq!(tl.current_ms(), 0.0);

        tl.skip_to_end();
        assert_eq!(tl.current_ms(), 30_000.0);
        tl.restart();
        assert_eq!(tl.current_ms(), 0.0);
        assert!(!tl.is_playing());
    }

    #[test]
    fn test_speed_limits() {
        let mut tl = timeline();
        for _ in 0..10 {
            tl.slower();
        }
        assert_eq!(tl.speed(), SPEEDS[0]);
        for _ in 0..10 {
            tl.faster();
        }
        assert_eq!(tl.speed(), 8.0);
    }

    #[test]
    fn test_parse_replay_formats() {
        let mut doc = br#"{"duration": 5000, "frames": [
            {"timestamp": 0, "soldiers": [{"soldier_id": "1", "gps": {"lat": 1, "lng": 1}}]},
            {"timestamp": 1000, "soldiers": [{"soldier_id": "1", "gps": {"lat": 2, "lng": 1}}]}
        ]}"#
        .to_vec();
        let tl = ReplayTimeline::from_slice(&mut doc).unwrap();
        assert_eq!(tl.frame_count(), 2);
        assert_eq!(tl.duration_ms(), 5000.0);
        assert_eq!(tl.state_at(1000.0)[0].position, Some(LatLon::new(2.0, 1.0)));

        let mut msg = br#"{"type": "session_data", "soldiers": [{"timestamp": 2500, "soldiers": []}]}"#.to_vec();
        let tl = ReplayTimeline::from_slice(&mut msg).unwrap();
        assert_eq!(tl.duration_ms(), 2500.0);

        let mut bad = br#"{"type": "frame_data", "soldiers": []}"#.to_vec();
        assert!(ReplayTimeline::from_slice(&mut bad).is_err());
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0.0), "00:00");
        assert_eq!(format_clock(61_500.0), "01:01");
    }
}
