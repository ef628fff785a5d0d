//! Distance lines from the reference unit to everyone else on the map.

use std::collections::BTreeMap;

use crate::geo::{format_distance, haversine_m, LatLon};
use crate::sync::{Rgb, SyncEngine};

/// Unit the command post distances are measured from
pub const DEFAULT_REFERENCE_ID: &str = "1";

#[derive(Debug, Clone, PartialEq)]
pub struct DistanceLine {
    pub id: String,
    pub from: LatLon,
    pub to: LatLon,
    pub color: Rgb,
    pub meters: f64,
    pub label: String,
    pub label_at: LatLon,
}

/// Current distance lines and their labels, one of each per unit
#[derive(Debug, Default)]
pub struct DistanceOverlay {
    reference_id: String,
    lines: BTreeMap<String, DistanceLine>,
}

impl DistanceOverlay {
    pub fn new(reference_id: impl Into<String>) -> Self {
        Self {
            reference_id: reference_id.into(),
            lines: BTreeMap::new(),
        }
    }

    pub fn reference_id(&self) -> &str {
        &self.reference_id
    }

    /// Tear down every line and rebuild from the engine's current units
    pub fn recompute(&mut self, engine: &SyncEngine) {
        self.lines.clear();
        if !engine.path_tracking() {
            return;
        }
        let Some(origin) = engine.unit(&self.reference_id).and_then(|u| u.position) else {
            return;
        };

        for unit in engine.units() {
            if unit.id == self.reference_id || engine.is_out_of_bounds(&unit.id) {
                continue;
            }
            let Some(to) = unit.position else { continue };
            let meters = haversine_m(origin, to);
            self.lines.insert(
                unit.id.clone(),
                DistanceLine {
                    id: unit.id.clone(),
                    from: origin,
                    to,
                    color: engine.color(&unit.id),
                    meters,
                    label: format_distance(meters),
                    label_at: origin.midpoint(&to),
                },
            );
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &DistanceLine> {
        self.lines.values()
    }

    pub fn get(&self, id: &str) -> Option<&DistanceLine> {
        self.lines.get(id)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
