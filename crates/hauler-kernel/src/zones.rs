//! Safety-zone registry and occupancy evaluation.
//!
//! Zones are kept in insertion order; ids are unique and re-adding an id
//! replaces the previous definition.

use hauler_types::{Point2, SafetyZone, ZoneKind};
use tracing::info;

/// Occupancy of one active zone for a given position (mm).
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneCheck {
    pub zone: SafetyZone,
    pub distance: f64,
    pub occupied: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ZoneRegistry {
    zones: Vec<SafetyZone>,
}

impl ZoneRegistry {
    pub fn new(zones: impl IntoIterator<Item = SafetyZone>) -> Self {
        let mut registry = Self::default();
        for zone in zones {
            registry.add(zone);
        }
        registry
    }

    /// Insert or replace. Returns the replaced zone, if any.
    pub fn add(&mut self, zone: SafetyZone) -> Option<SafetyZone> {
        info!(zone_id = %zone.id, kind = ?zone.kind, radius = zone.radius, "safety zone added");
        match self.zones.iter_mut().find(|z| z.id == zone.id) {
            Some(existing) => Some(std::mem::replace(existing, zone)),
            None => {
                self.zones.push(zone);
                None
            }
        }
    }

    pub fn remove(&mut self, zone_id: &str) -> Option<SafetyZone> {
        let idx = self.zones.iter().position(|z| z.id == zone_id)?;
        info!(zone_id, "safety zone removed");
        Some(self.zones.remove(idx))
    }

    pub fn get(&self, zone_id: &str) -> Option<&SafetyZone> {
        self.zones.iter().find(|z| z.id == zone_id)
    }

    pub fn zones(&self) -> &[SafetyZone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.zones.iter().filter(|z| z.active).count()
    }

    /// Distance and occupancy of every active zone relative to `position`.
    pub fn evaluate(&self, position: &Point2) -> Vec<ZoneCheck> {
        self.zones
            .iter()
            .filter(|z| z.active)
            .map(|zone| {
                let distance = zone.distance_from(position);
                ZoneCheck {
                    zone: zone.clone(),
                    distance,
                    occupied: distance <= zone.radius,
                }
            })
            .collect()
    }
}

/// Tightest speed cap among the occupied slow zones in `checks`.
pub fn speed_cap(checks: &[ZoneCheck]) -> Option<f64> {
    checks
        .iter()
        .filter(|c| c.occupied && c.zone.kind == ZoneKind::Slow)
        .filter_map(|c| c.zone.max_speed)
        .reduce(f64::min)
}

/// The zones a fresh installation starts with.
pub fn default_zones() -> Vec<SafetyZone> {
    vec![
        SafetyZone {
            name: "Restricted Area 1".to_string(),
            ..SafetyZone::new(
                "restricted_1",
                ZoneKind::Restricted,
                Point2::new(1000.0, 1000.0),
                200.0,
            )
        },
        SafetyZone {
            name: "Slow Zone 1".to_string(),
            ..SafetyZone::new("slow_1", ZoneKind::Slow, Point2::new(500.0, 500.0), 150.0)
                .with_max_speed(100.0)
        },
    ]
}
