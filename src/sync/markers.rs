//! Marker bookkeeping: at most one marker per unit per category.

use std::collections::HashMap;

use crate::entity::TrackedEntity;
use crate::geo::LatLon;

use super::{Rgb, ALERT_COLOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    InBounds,
    /// Drawn at the view centre with a pulsing ring and an `OUT` tag
    OutOfBounds,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub id: String,
    pub kind: MarkerKind,
    /// Where the marker sits on the map. For out-of-bounds markers this is the
    /// view centre at placement time, never the unit's real position.
    pub anchor: LatLon,
    /// Real last-known position; only surfaced through [`Marker::popup`]
    pub true_position: LatLon,
    pub base_color: Rgb,
    pub heading_deg: f64,
    pub hit: bool,
    pub label: String,
}

impl Marker {
    pub fn in_bounds(entity: &TrackedEntity, position: LatLon, base_color: Rgb) -> Self {
        Self {
            id: entity.id.clone(),
            kind: MarkerKind::InBounds,
            anchor: position,
            true_position: position,
            base_color,
            heading_deg: entity.orientation_deg,
            hit: entity.hit_status,
            label: entity.label().to_owned(),
        }
    }

    pub fn out_of_bounds(entity: &TrackedEntity, original: LatLon, center: LatLon, base_color: Rgb) -> Self {
        Self {
            kind: MarkerKind::OutOfBounds,
            anchor: center,
            ..Self::in_bounds(entity, original, base_color)
        }
    }

    /// Fill colour: alert red overrides the unit's colour when hit
    pub fn color(&self) -> Rgb {
        if self.hit {
            ALERT_COLOR
        } else {
            self.base_color
        }
    }

    pub fn popup(&self) -> String {
        let pos = self.true_position;
        match self.kind {
            MarkerKind::InBounds => format!(
                "{}  Lat: {:.6}  Lng: {:.6}  Color: {}",
                self.id,
                pos.lat,
                pos.lon,
                self.base_color.hex()
            ),
            MarkerKind::OutOfBounds => format!(
                "{} - OUT OF BOUNDS  Original Lat: {:.6}  Original Lng: {:.6}  Color: {}  Location outside map area!",
                self.id,
                pos.lat,
                pos.lon,
                self.base_color.hex()
            ),
        }
    }
}

/// One mutation of the marker layers, in the order it was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerOp {
    Remove(String),
    RemoveOutOfBounds(String),
    PlaceOutOfBounds(String),
    Place(String),
    Update(String),
}

#[derive(Debug, Default)]
pub struct MarkerRegistry {
    in_bounds: HashMap<String, Marker>,
    out_of_bounds: HashMap<String, Marker>,
    ops: Vec<MarkerOp>,
}

impl MarkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Marker> {
        self.in_bounds.get(id).or_else(|| self.out_of_bounds.get(id))
    }

    pub fn in_bounds(&self) -> impl Iterator<Item = &Marker> {
        self.in_bounds.values()
    }

    pub fn out_of_bounds(&self) -> impl Iterator<Item = &Marker> {
        self.out_of_bounds.values()
    }

    pub fn has_out_of_bounds(&self, id: &str) -> bool {
        self.out_of_bounds.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.in_bounds.len() + self.out_of_bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&mut self, id: &str) {
        if self.in_bounds.remove(id).is_some() {
            self.ops.push(MarkerOp::Remove(id.to_owned()));
        }
    }

    pub fn remove_out_of_bounds(&mut self, id: &str) {
        if self.out_of_bounds.remove(id).is_some() {
            self.ops.push(MarkerOp::RemoveOutOfBounds(id.to_owned()));
        }
    }

    /// Place or move the in-bounds marker. Fails if an out-of-bounds marker
    /// still exists for the unit; that one has to go first.
    pub fn place(&mut self, marker: Marker) -> bool {
        if self.out_of_bounds.contains_key(&marker.id) {
            return false;
        }
        let op = if self.in_bounds.contains_key(&marker.id) {
            MarkerOp::Update(marker.id.clone())
        } else {
            MarkerOp::Place(marker.id.clone())
        };
        self.in_bounds.insert(marker.id.clone(), marker);
        self.ops.push(op);
        true
    }

    pub fn place_out_of_bounds(&mut self, marker: Marker) -> bool {
        if self.in_bounds.contains_key(&marker.id) || self.out_of_bounds.contains_key(&marker.id) {
            return false;
        }
        self.ops.push(MarkerOp::PlaceOutOfBounds(marker.id.clone()));
        self.out_of_bounds.insert(marker.id.clone(), marker);
        true
    }

    /// Ops recorded since the last call
    pub fn take_ops(&mut self) -> Vec<MarkerOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn clear(&mut self) {
        self.in_bounds.clear();
        self.out_of_bounds.clear();
        self.ops.clear();
    }
}
