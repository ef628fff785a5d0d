//! Derived unit state: colours, trails, bounds membership and markers.
//!
//! Everything here is recomputed from the latest unit list plus the snapshot
//! of the previous one. Units whose position, hit status and heading did not
//! change are left untouched.

pub mod markers;

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::debug;

use crate::entity::TrackedEntity;
use crate::geo::{in_bounds, LatLon, MapBounds};
use crate::hash::{fold_index, id_hash};

pub use markers::{Marker, MarkerKind, MarkerOp, MarkerRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.0, self.1, self.2)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

pub const PALETTE: [Rgb; 9] = [
    Rgb(0x00, 0xFF, 0x00),
    Rgb(0x00, 0x00, 0xFF),
    Rgb(0xFF, 0xFF, 0x00),
    Rgb(0xFF, 0x00, 0xFF),
    Rgb(0x00, 0xFF, 0xFF),
    Rgb(0xFF, 0xA5, 0x00),
    Rgb(0x80, 0x00, 0x80),
    Rgb(0xFF, 0xFF, 0xFF),
    Rgb(0x00, 0x00, 0x00),
];

/// Hit units are always drawn in this
pub const ALERT_COLOR: Rgb = Rgb(0xFF, 0x44, 0x44);

/// Opacity of unselected markers while a unit is selected
pub const DIMMED_OPACITY: f32 = 0.3;

/// Stable palette colour for an id
pub fn color_for_id(id: &str) -> Rgb {
    if id.is_empty() {
        return PALETTE[0];
    }
    PALETTE[fold_index(id_hash(id), PALETTE.len())]
}

/// The fields change detection looks at
#[derive(Debug, Clone, Copy, PartialEq)]
struct Snapshot {
    position: Option<LatLon>,
    hit: bool,
    orientation: f64,
}

impl From<&TrackedEntity> for Snapshot {
    fn from(e: &TrackedEntity) -> Self {
        Self {
            position: e.position,
            hit: e.hit_status,
            orientation: e.orientation_deg,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutOfBoundsRecord {
    pub original: LatLon,
    pub entity: TrackedEntity,
}

/// Ids touched by one [`SyncEngine::apply`] call
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncReport {
    pub changed: Vec<String>,
    pub removed: Vec<String>,
    pub ops: Vec<MarkerOp>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// A trail ready to be drawn
#[derive(Debug, Clone, PartialEq)]
pub struct TrailView<'a> {
    pub id: &'a str,
    pub points: &'a [LatLon],
    pub color: Rgb,
    /// Selected unit's trail gets the heavier stroke
    pub emphasized: bool,
}

#[derive(Debug)]
pub struct SyncEngine {
    units: Vec<TrackedEntity>,
    previous: HashMap<String, Snapshot>,
    colors: HashMap<String, Rgb>,
    trails: HashMap<String, Vec<LatLon>>,
    out_of_bounds: HashMap<String, OutOfBoundsRecord>,
    bounds: Option<MapBounds>,
    markers: MarkerRegistry,
    max_trail_points: usize,
    selected: Option<String>,
    path_tracking: bool,
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SyncEngine {
    /// `max_trail_points == 0` keeps every trail point for the whole session
    pub fn new(max_trail_points: usize) -> Self {
        Self {
            units: Vec::new(),
            previous: HashMap::new(),
            colors: HashMap::new(),
            trails: HashMap::new(),
            out_of_bounds: HashMap::new(),
            bounds: None,
            markers: MarkerRegistry::new(),
            max_trail_points,
            selected: None,
            path_tracking: true,
        }
    }

    /// Bring derived state in line with a full unit list.
    ///
    /// `view_center` is where new out-of-bounds markers are anchored.
    pub fn apply(&mut self, units: Vec<TrackedEntity>, view_center: LatLon) -> SyncReport {
        let mut seen = HashSet::with_capacity(units.len());
        let mut changed: Vec<usize> = Vec::new();
        for (i, unit) in units.iter().enumerate() {
            if unit.id.is_empty() || !seen.insert(unit.id.as_str()) {
                continue;
            }
            let now = Snapshot::from(unit);
            if self.previous.get(&unit.id) != Some(&now) {
                changed.push(i);
            }
        }
        let removed: Vec<String> = self
            .previous
            .keys()
            .filter(|id| !seen.contains(id.as_str()))
            .cloned()
            .collect();

        if changed.is_empty() && removed.is_empty() {
            self.units = units;
            return SyncReport::default();
        }

        for &i in &changed {
            let id = &units[i].id;
            if !self.colors.contains_key(id) {
                self.colors.insert(id.clone(), color_for_id(id));
            }
        }

        for &i in &changed {
            if let Some(pos) = units[i].position {
                self.push_trail_point(&units[i].id, pos);
            }
        }

        self.classify(&units, &changed, &removed);
        self.sync_markers(&units, &changed, &removed, view_center);

        self.previous = units
            .iter()
            .filter(|u| !u.id.is_empty())
            .map(|u| (u.id.clone(), Snapshot::from(u)))
            .collect();

        if let Some(sel) = &self.selected {
            if removed.contains(sel) {
                debug!(id = %sel, "selected unit removed");
                self.selected = None;
            }
        }

        let report = SyncReport {
            changed: changed.iter().map(|&i| units[i].id.clone()).collect(),
            removed,
            ops: self.markers.take_ops(),
        };
        debug!(changed = report.changed.len(), removed = report.removed.len(), "sync applied");
        self.units = units;
        report
    }

    fn push_trail_point(&mut self, id: &str, pos: LatLon) {
        let trail = self.trails.entry(id.to_owned()).or_default();
        if trail.last() == Some(&pos) {
            return;
        }
        trail.push(pos);
        if self.max_trail_points > 0 && trail.len() > self.max_trail_points {
            let excess = trail.len() - self.max_trail_points;
            trail.drain(..excess);
        }
    }

    fn classify(&mut self, units: &[TrackedEntity], changed: &[usize], removed: &[String]) {
        let Some(bounds) = self.bounds else {
            self.out_of_bounds.clear();
            return;
        };
        for id in removed {
            self.out_of_bounds.remove(id);
        }
        for &i in changed {
            let unit = &units[i];
            let Some(pos) = unit.position else { continue };
            if in_bounds(pos.lat, pos.lon, Some(&bounds)) {
                self.out_of_bounds.remove(&unit.id);
            } else {
                self.out_of_bounds.insert(
                    unit.id.clone(),
                    OutOfBoundsRecord {
                        original: pos,
                        entity: unit.clone(),
                    },
                );
            }
        }
    }

    fn sync_markers(&mut self, units: &[TrackedEntity], changed: &[usize], removed: &[String], center: LatLon) {
        for id in removed {
            self.markers.remove(id);
            self.markers.remove_out_of_bounds(id);
        }
        for &i in changed {
            self.markers.remove_out_of_bounds(&units[i].id);
        }

        let changed_ids: HashSet<&str> = changed.iter().map(|&i| units[i].id.as_str()).collect();
        let mut oob_ids: Vec<&String> = self.out_of_bounds.keys().collect();
        oob_ids.sort();
        for id in oob_ids {
            if !changed_ids.contains(id.as_str()) && self.markers.has_out_of_bounds(id) {
                continue;
            }
            let record = &self.out_of_bounds[id];
            // A unit that crossed out of bounds still has its old in-bounds marker
            self.markers.remove(id);
            let marker = Marker::out_of_bounds(&record.entity, record.original, center, self.color(id));
            self.markers.place_out_of_bounds(marker);
        }

        for &i in changed {
            let unit = &units[i];
            let Some(pos) = unit.position else { continue };
            if self.out_of_bounds.contains_key(&unit.id) {
                continue;
            }
            let marker = Marker::in_bounds(unit, pos, self.color(&unit.id));
            self.markers.place(marker);
        }
    }

    /// Install new archive bounds. Every unit is reclassified on the next update.
    pub fn set_bounds(&mut self, bounds: Option<MapBounds>) {
        if self.bounds == bounds {
            return;
        }
        self.bounds = bounds;
        self.previous.clear();
        self.markers.clear();
        self.out_of_bounds.clear();
    }

    /// Reapply the current unit list as if every unit were new
    pub fn refresh(&mut self, view_center: LatLon) -> SyncReport {
        self.previous.clear();
        let units = std::mem::take(&mut self.units);
        self.apply(units, view_center)
    }

    pub fn bounds(&self) -> Option<&MapBounds> {
        self.bounds.as_ref()
    }

    pub fn units(&self) -> &[TrackedEntity] {
        &self.units
    }

    pub fn unit(&self, id: &str) -> Option<&TrackedEntity> {
        self.units.iter().find(|u| u.id == id)
    }

    /// Units sorted by numeric id, as listed in the status panel
    pub fn sorted_units(&self) -> Vec<&TrackedEntity> {
        let mut list: Vec<&TrackedEntity> = self.units.iter().collect();
        list.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        list
    }

    pub fn color(&self, id: &str) -> Rgb {
        self.colors.get(id).copied().unwrap_or_else(|| color_for_id(id))
    }

    pub fn assigned_colors(&self) -> &HashMap<String, Rgb> {
        &self.colors
    }

    pub fn trail(&self, id: &str) -> Option<&[LatLon]> {
        self.trails.get(id).map(Vec::as_slice)
    }

    pub fn out_of_bounds(&self) -> &HashMap<String, OutOfBoundsRecord> {
        &self.out_of_bounds
    }

    pub fn is_out_of_bounds(&self, id: &str) -> bool {
        self.out_of_bounds.contains_key(id)
    }

    pub fn markers(&self) -> &MarkerRegistry {
        &self.markers
    }

    pub fn path_tracking(&self) -> bool {
        self.path_tracking
    }

    pub fn set_path_tracking(&mut self, on: bool) {
        self.path_tracking = on;
    }

    pub fn toggle_path_tracking(&mut self) -> bool {
        self.path_tracking = !self.path_tracking;
        self.path_tracking
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Selecting the already selected unit clears the selection
    pub fn select(&mut self, id: &str) {
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        } else if self.unit(id).is_some() {
            self.selected = Some(id.to_owned());
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Move the selection through the sorted unit list
    pub fn cycle_selection(&mut self, forward: bool) {
        let ids: Vec<String> = self.sorted_units().iter().map(|u| u.id.clone()).collect();
        if ids.is_empty() {
            self.selected = None;
            return;
        }
        let next = match self.selected.as_ref().and_then(|s| ids.iter().position(|id| id == s)) {
            Some(i) if forward => (i + 1) % ids.len(),
            Some(i) => (i + ids.len() - 1) % ids.len(),
            None if forward => 0,
            None => ids.len() - 1,
        };
        self.selected = Some(ids[next].clone());
    }

    /// Where the view should centre to follow the selection
    pub fn selection_focus(&self) -> Option<LatLon> {
        if !self.path_tracking {
            return None;
        }
        self.selected
            .as_deref()
            .and_then(|id| self.markers.get(id))
            .map(|m| m.anchor)
    }

    pub fn marker_opacity(&self, id: &str) -> f32 {
        match (&self.selected, self.path_tracking) {
            (Some(sel), true) if sel != id => DIMMED_OPACITY,
            _ => 1.0,
        }
    }

    /// Trails to draw this frame
    pub fn visible_trails(&self) -> Vec<TrailView<'_>> {
        if !self.path_tracking {
            return Vec::new();
        }
        let drawable = |id: &str| {
            self.markers.get(id).is_some() && !self.out_of_bounds.contains_key(id)
        };
        match self.selected.as_deref() {
            Some(sel) => self
                .trails
                .get_key_value(sel)
                .filter(|(id, pts)| pts.len() >= 2 && drawable(id))
                .map(|(id, pts)| {
                    vec![TrailView {
                        id: id.as_str(),
                        points: pts.as_slice(),
                        color: self.color(id),
                        emphasized: true,
                    }]
                })
                .unwrap_or_default(),
            None => {
                let mut out: Vec<TrailView<'_>> = self
                    .trails
                    .iter()
                    .filter(|(id, pts)| pts.len() >= 2 && drawable(id))
                    .map(|(id, pts)| TrailView {
                        id: id.as_str(),
                        points: pts.as_slice(),
                        color: self.color(id),
                        emphasized: false,
                    })
                    .collect();
                out.sort_by(|a, b| a.id.cmp(b.id));
                out
            }
        }
    }

    /// Drop everything, including assigned colours
    pub fn reset(&mut self) {
        *self = Self {
            path_tracking: self.path_tracking,
            bounds: self.bounds,
            ..Self::new(self.max_trail_points)
        };
    }
}
