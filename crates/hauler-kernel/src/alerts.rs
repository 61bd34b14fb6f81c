//! Active alert set with de-duplication and retention.
//!
//! An alert is identified by `(kind, source_key)`: raising the same pair
//! again refreshes the existing record (severity, message, geometry,
//! `updated_at`) instead of adding a second one. Resolved and expired alerts
//! move into a bounded ring of recent history.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use hauler_types::{AlertKind, RingBuffer, SafetyAlert, SafetyZone, Severity};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Raised {
    New(Uuid),
    Refreshed(Uuid),
}

impl Raised {
    pub fn id(&self) -> Uuid {
        match self {
            Raised::New(id) | Raised::Refreshed(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Raised::New(_))
    }
}

pub struct AlertBook {
    active: Vec<SafetyAlert>,
    closed: RingBuffer<SafetyAlert>,
}

impl AlertBook {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            active: Vec::new(),
            closed: RingBuffer::new(history_capacity),
        }
    }

    pub fn raise(&mut self, alert: SafetyAlert) -> Raised {
        if let Some(existing) = self
            .active
            .iter_mut()
            .find(|a| a.kind == alert.kind && a.source_key == alert.source_key)
        {
            existing.severity = alert.severity;
            existing.message = alert.message;
            existing.position = alert.position.or(existing.position);
            existing.distance = alert.distance.or(existing.distance);
            existing.confidence = alert.confidence;
            existing.updated_at = alert.updated_at;
            debug!(alert_id = %existing.id, source = %existing.source_key, "alert refreshed");
            return Raised::Refreshed(existing.id);
        }
        info!(
            alert_id = %alert.id,
            kind = ?alert.kind,
            severity = ?alert.severity,
            source = %alert.source_key,
            message = %alert.message,
            "alert raised"
        );
        let id = alert.id;
        self.active.push(alert);
        Raised::New(id)
    }

    /// Mark `id` resolved and move it to history.
    pub fn resolve(&mut self, id: Uuid) -> Option<SafetyAlert> {
        self.resolve_at(id, Utc::now())
    }

    pub fn resolve_at(&mut self, id: Uuid, now: DateTime<Utc>) -> Option<SafetyAlert> {
        let idx = self.active.iter().position(|a| a.id == id)?;
        let mut alert = self.active.remove(idx);
        alert.resolved = true;
        alert.resolved_at = Some(now);
        alert.updated_at = now;
        info!(alert_id = %id, source = %alert.source_key, "alert resolved");
        self.closed.push(alert.clone());
        Some(alert)
    }

    /// Drop alerts last raised before `now - retention`; returns them.
    pub fn purge_expired(&mut self, now: DateTime<Utc>, retention: Duration) -> Vec<SafetyAlert> {
        let cutoff = now - retention;
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|a| a.updated_at < cutoff);
        self.active = kept;
        for alert in &expired {
            debug!(alert_id = %alert.id, "alert expired");
            self.closed.push(alert.clone());
        }
        expired
    }

    pub fn get(&self, id: Uuid) -> Option<&SafetyAlert> {
        self.active.iter().find(|a| a.id == id)
    }

    pub fn find(&self, kind: AlertKind, source_key: &str) -> Option<&SafetyAlert> {
        self.active
            .iter()
            .find(|a| a.kind == kind && a.source_key == source_key)
    }

    pub fn active(&self) -> &[SafetyAlert] {
        &self.active
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn high_or_critical_count(&self) -> usize {
        self.active
            .iter()
            .filter(|a| a.severity.is_high_or_critical())
            .count()
    }

    /// Whether any active alert belongs to `zone`: raised by it, or located
    /// inside it.
    pub fn has_alert_in(&self, zone: &SafetyZone) -> bool {
        self.active.iter().any(|a| {
            a.source_key == zone.id || a.position.is_some_and(|p| zone.contains(&p))
        })
    }

    pub fn count_by_severity(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for alert in &self.active {
            *counts.entry(alert.severity).or_insert(0) += 1;
        }
        counts
    }

    /// Recently resolved or expired alerts, oldest first.
    pub fn history(&self) -> Vec<SafetyAlert> {
        self.closed.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(kind: AlertKind, severity: Severity, key: &str) -> SafetyAlert {
        SafetyAlert::new(kind, severity, key, format!("{key} alert"))
    }

    #[test]
    fn same_kind_and_source_refreshes() {
        let mut book = AlertBook::new(10);
        let first = book.raise(alert(AlertKind::ZoneViolation, Severity::Medium, "warn_1"));
        let second = book.raise(alert(AlertKind::ZoneViolation, Severity::High, "warn_1"));
        assert!(first.is_new());
        assert_eq!(second, Raised::Refreshed(first.id()));
        assert_eq!(book.len(), 1);
        assert_eq!(book.active()[0].severity, Severity::High);
    }

    #[test]
    fn different_kind_same_source_is_separate() {
        let mut book = AlertBook::new(10);
        book.raise(alert(AlertKind::ZoneViolation, Severity::Medium, "x"));
        book.raise(alert(AlertKind::SensorGap, Severity::Medium, "x"));
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn resolve_moves_to_history() {
        let mut book = AlertBook::new(10);
        let id = book.raise(alert(AlertKind::ObstacleDetected, Severity::High, "obs_1")).id();
        let resolved = book.resolve(id).unwrap();
        assert!(resolved.resolved);
        assert!(resolved.resolved_at.is_some());
        assert!(book.is_empty());
        assert_eq!(book.history().len(), 1);
        assert!(book.resolve(id).is_none());
    }

    #[test]
    fn purge_drops_only_expired() {
        let mut book = AlertBook::new(10);
        let mut old = alert(AlertKind::SensorGap, Severity::Low, "old");
        old.updated_at = Utc::now() - Duration::hours(25);
        book.raise(old);
        book.raise(alert(AlertKind::SensorGap, Severity::Low, "new"));

        let expired = book.purge_expired(Utc::now(), Duration::hours(24));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].source_key, "old");
        assert!(book.find(AlertKind::SensorGap, "new").is_some());
    }

    #[test]
    fn counts_high_and_critical() {
        let mut book = AlertBook::new(10);
        book.raise(alert(AlertKind::ObstacleDetected, Severity::High, "a"));
        book.raise(alert(AlertKind::ObstacleDetected, Severity::Critical, "b"));
        book.raise(alert(AlertKind::ObstacleDetected, Severity::Medium, "c"));
        assert_eq!(book.high_or_critical_count(), 2);
        let by_sev = book.count_by_severity();
        assert_eq!(by_sev.get(&Severity::Medium), Some(&1));
    }

    #[test]
    fn zone_membership_by_source_or_position() {
        use hauler_types::{Point2, ZoneKind};
        let zone = SafetyZone::new("dock", ZoneKind::Slow, Point2::new(0.0, 0.0), 100.0);
        let mut book = AlertBook::new(10);
        book.raise(alert(AlertKind::ObstacleDetected, Severity::Medium, "obs_1").at(Point2::new(500.0, 0.0)));
        assert!(!book.has_alert_in(&zone));

        book.raise(alert(AlertKind::ObstacleDetected, Severity::Medium, "obs_2").at(Point2::new(50.0, 0.0)));
        assert!(book.has_alert_in(&zone));

        let mut by_key = AlertBook::new(10);
        by_key.raise(alert(AlertKind::ZoneViolation, Severity::Medium, "dock"));
        assert!(by_key.has_alert_in(&zone));
    }
}
