//! Tracked units and the wire records they are decoded from.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::RecordError;
use crate::geo::LatLon;

/// A unit on the map, keyed by `id`
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntity {
    pub id: String,
    pub team: Option<String>,
    pub call_sign: Option<String>,
    pub position: Option<LatLon>,
    /// Clockwise from north
    pub orientation_deg: f64,
    pub hit_status: bool,
    /// Milliseconds into the session, when the record carries one
    pub timestamp: Option<f64>,
    pub extra: Map<String, Value>,
}

impl TrackedEntity {
    pub fn new(id: impl Into<String>, position: Option<LatLon>) -> Self {
        Self {
            id: id.into(),
            team: None,
            call_sign: None,
            position,
            orientation_deg: 0.0,
            hit_status: false,
            timestamp: None,
            extra: Map::new(),
        }
    }

    pub fn with_orientation(mut self, deg: f64) -> Self {
        self.orientation_deg = deg;
        self
    }

    pub fn with_hit(mut self, hit: bool) -> Self {
        self.hit_status = hit;
        self
    }

    pub fn with_call_sign(mut self, call_sign: impl Into<String>) -> Self {
        self.call_sign = Some(call_sign.into());
        self
    }

    /// Call sign if present, otherwise the id
    pub fn label(&self) -> &str {
        self.call_sign.as_deref().unwrap_or(&self.id)
    }

    /// Numeric id for display ordering; non-numeric ids sort as 0
    pub fn sort_key(&self) -> (i64, &str) {
        (self.id.parse().unwrap_or(0), self.id.as_str())
    }

    /// Parse a record from a JSON value, normalizing the coordinate layout
    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        let raw: RawRecord =
            serde_json::from_value(value).map_err(|e| RecordError::Malformed(e.to_string()))?;
        raw.normalize()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawCoords {
    #[serde(default)]
    latitude: Option<Value>,
    #[serde(default)]
    longitude: Option<Value>,
    #[serde(default)]
    lat: Option<Value>,
    #[serde(default)]
    lng: Option<Value>,
}

impl RawCoords {
    fn resolve(&self) -> (Option<f64>, Option<f64>) {
        let lat = number(&self.latitude).or_else(|| number(&self.lat));
        let lon = number(&self.longitude).or_else(|| number(&self.lng));
        (lat, lon)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawImu {
    #[serde(default)]
    yaw: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    soldier_id: Option<Value>,
    #[serde(default)]
    gps: Option<RawCoords>,
    #[serde(default)]
    position: Option<RawCoords>,
    #[serde(default)]
    latitude: Option<Value>,
    #[serde(default)]
    longitude: Option<Value>,
    #[serde(default)]
    hit_status: Option<Value>,
    #[serde(default)]
    imu: Option<RawImu>,
    #[serde(default)]
    team: Option<Value>,
    #[serde(default)]
    call_sign: Option<Value>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl RawRecord {
    fn normalize(self) -> Result<TrackedEntity, RecordError> {
        let id = self
            .soldier_id
            .as_ref()
            .and_then(text)
            .filter(|s| !s.is_empty())
            .ok_or(RecordError::MissingId)?;

        // First layout present wins, even if its fields turn out unusable
        let (lat, lon) = if let Some(gps) = &self.gps {
            gps.resolve()
        } else if let Some(pos) = &self.position {
            pos.resolve()
        } else {
            (number(&self.latitude), number(&self.longitude))
        };
        let position = match (lat, lon) {
            (Some(lat), Some(lon)) if LatLon::new(lat, lon).is_valid() => LatLon::new(lat, lon),
            _ => return Err(RecordError::InvalidCoordinates { id, lat, lon }),
        };

        Ok(TrackedEntity {
            id,
            team: self.team.as_ref().and_then(text),
            call_sign: self.call_sign.as_ref().and_then(text),
            position: Some(position),
            orientation_deg: self.imu.and_then(|imu| number(&imu.yaw)).unwrap_or(0.0),
            hit_status: self.hit_status.as_ref().is_some_and(truthy),
            timestamp: number(&self.timestamp),
            extra: self.extra,
        })
    }
}

fn number(v: &Option<Value>) -> Option<f64> {
    v.as_ref().and_then(Value::as_f64).filter(|n| n.is_finite())
}

fn text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Keep the valid records of a list; the rest are logged and dropped
pub fn parse_records(values: Vec<Value>) -> Vec<TrackedEntity> {
    values
        .into_iter()
        .filter_map(|v| match TrackedEntity::from_value(v) {
            Ok(entity) => Some(entity),
            Err(e) => {
                warn!("dropping record: {e}");
                None
            }
        })
        .collect()
}

/// One recorded instant of a session
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub timestamp: f64,
    pub soldiers: Vec<TrackedEntity>,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    soldiers: Vec<Value>,
}

impl RawFrame {
    fn into_frame(self) -> Frame {
        let timestamp = number(&self.timestamp).unwrap_or(0.0);
        let mut soldiers = parse_records(self.soldiers);
        for s in &mut soldiers {
            // Records without their own stamp inherit the frame's
            s.timestamp.get_or_insert(timestamp);
        }
        Frame { timestamp, soldiers }
    }
}

pub fn parse_frames(values: Vec<Value>) -> Vec<Frame> {
    values
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<RawFrame>(v) {
            Ok(raw) => Some(raw.into_frame()),
            Err(e) => {
                warn!("dropping frame: {e}");
                None
            }
        })
        .collect()
}

/// A decoded message from the unit stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Full recorded session; duration in milliseconds
    Session { frames: Vec<Frame>, duration: f64 },
    /// Replaces the whole unit list
    Frame(Vec<TrackedEntity>),
    /// Upserts a single unit
    Movement(TrackedEntity),
}

impl StreamMessage {
    /// Decode one line of the stream. Bare records and bare arrays are accepted.
    pub fn parse(line: &mut [u8]) -> Result<Self, RecordError> {
        let value: Value =
            simd_json::serde::from_slice(line).map_err(|e| RecordError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        let mut obj = match value {
            Value::Array(items) => return Ok(Self::Frame(parse_records(items))),
            Value::Object(obj) => obj,
            other => return Err(RecordError::Malformed(format!("unexpected {other}"))),
        };

        let kind = obj.get("type").and_then(Value::as_str).map(str::to_owned);
        match kind.as_deref() {
            Some("session_data") => {
                let frames = take_array(&mut obj, "soldiers");
                let frames = parse_frames(frames);
                let duration = obj
                    .get("duration")
                    .and_then(Value::as_f64)
                    .unwrap_or_else(|| frames.iter().map(|f| f.timestamp).fold(0.0, f64::max));
                Ok(Self::Session { frames, duration })
            }
            Some("frame_data") => Ok(Self::Frame(parse_records(take_array(&mut obj, "soldiers")))),
            Some("soldier_movement") | None => {
                obj.remove("type");
                Ok(Self::Movement(TrackedEntity::from_value(Value::Object(obj))?))
            }
            Some(other) => Err(RecordError::Malformed(format!("unknown message type `{other}`"))),
        }
    }
}

fn take_array(obj: &mut Map<String, Value>, key: &str) -> Vec<Value> {
    match obj.remove(key) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gps_layout() {
        let e = TrackedEntity::from_value(json!({
            "soldier_id": "7",
            "gps": {"latitude": 28.5, "longitude": 77.1},
            "hit_status": true,
            "imu": {"yaw": 90.0},
            "team": "blue",
            "call_sign": "Viper",
            "ammo": 30
        }))
        .unwrap();
        assert_eq!(e.id, "7");
        assert_eq!(e.position, Some(LatLon::new(28.5, 77.1)));
        assert!(e.hit_status);
        assert_eq!(e.orientation_deg, 90.0);
        assert_eq!(e.team.as_deref(), Some("blue"));
        assert_eq!(e.label(), "Viper");
        assert_eq!(e.extra.get("ammo"), Some(&json!(30)));
    }

    #[test]
    fn test_alternate_layouts() {
        let short = TrackedEntity::from_value(json!({
            "soldier_id": 3, "position": {"lat": 1.5, "lng": 2.5}
        }))
        .unwrap();
        assert_eq!(short.id, "3");
        assert_eq!(short.position, Some(LatLon::new(1.5, 2.5)));

        let flat = TrackedEntity::from_value(json!({
            "soldier_id": "4", "latitude": -10.0, "longitude": 170.0
        }))
        .unwrap();
        assert_eq!(flat.position, Some(LatLon::new(-10.0, 170.0)));
        assert!(!flat.hit_status);
        assert_eq!(flat.orientation_deg, 0.0);
    }

    #[test]
    fn test_invalid_records() {
        assert!(matches!(
            TrackedEntity::from_value(json!({"gps": {"lat": 1.0, "lng": 1.0}})),
            Err(RecordError::MissingId)
        ));
        assert!(matches!(
            TrackedEntity::from_value(json!({"soldier_id": "1", "gps": {"lat": 91.0, "lng": 1.0}})),
            Err(RecordError::InvalidCoordinates { .. })
        ));
        assert!(matches!(
            TrackedEntity::from_value(json!({"soldier_id": "1", "gps": {"lat": "12", "lng": 1.0}})),
            Err(RecordError::InvalidCoordinates { .. })
        ));
        assert!(matches!(
            TrackedEntity::from_value(json!({"soldier_id": "1"})),
            Err(RecordError::InvalidCoordinates { lat: None, lon: None, .. })
        ));
    }

    #[test]
    fn test_parse_records_drops_bad_entries() {
        let list = parse_records(vec![
            json!({"soldier_id": "1", "latitude": 0.0, "longitude": 0.0}),
            json!({"soldier_id": "2"}),
            json!("junk"),
        ]);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "1");
    }

    #[test]
    fn test_stream_messages() {
        let mut line = br#"{"type":"soldier_movement","soldier_id":"9","lat":5,"gps":{"lat":5,"lng":6}}"#.to_vec();
        match StreamMessage::parse(&mut line).unwrap() {
            StreamMessage::Movement(e) => {
                assert_eq!(e.id, "9");
                assert!(!e.extra.contains_key("type"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut line = br#"{"type":"frame_data","soldiers":[{"soldier_id":"1","gps":{"lat":1,"lng":1}}]}"#.to_vec();
        assert!(matches!(StreamMessage::parse(&mut line).unwrap(), StreamMessage::Frame(v) if v.len() == 1));

        let mut line = br#"[{"soldier_id":"1","gps":{"lat":1,"lng":1}},{"soldier_id":"2","gps":{"lat":2,"lng":2}}]"#.to_vec();
        assert!(matches!(StreamMessage::parse(&mut line).unwrap(), StreamMessage::Frame(v) if v.len() == 2));

        let mut line = b"{not json".to_vec();
        assert!(matches!(StreamMessage::parse(&mut line), Err(RecordError::Malformed(_))));

        let mut line = br#"{"type":"kill_feed_history"}"#.to_vec();
        assert!(StreamMessage::parse(&mut line).is_err());
    }

    #[test]
    fn test_session_message() {
        let msg = StreamMessage::from_value(json!({
            "type": "session_data",
            "duration": 20000,
            "soldiers": [
                {"timestamp": 0, "soldiers": [{"soldier_id": "1", "gps": {"lat": 1, "lng": 1}}]},
                {"timestamp": 1000, "soldiers": [{"soldier_id": "1", "timestamp": 1200, "gps": {"lat": 2, "lng": 2}}]}
            ]
        }))
        .unwrap();
        let StreamMessage::Session { frames, duration } = msg else {
            panic!("expected session");
        };
        assert_eq!(duration, 20000.0);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].soldiers[0].timestamp, Some(0.0));
        assert_eq!(frames[1].soldiers[0].timestamp, Some(1200.0));
    }
}
