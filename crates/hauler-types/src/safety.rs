use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::obstacle::Severity;
use crate::pose::Point2;

// ────────────────────────────────────────────────────────────────────────────
// Zones
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    /// Entering triggers an emergency stop.
    Restricted,
    /// Entering raises a medium alert.
    Warning,
    /// Entering caps the commanded speed.
    Slow,
}

/// A geofenced policy region. Centre and radius in millimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyZone {
    pub id: String,
    pub name: String,
    pub kind: ZoneKind,
    pub center: Point2,
    pub radius: f64,
    /// Speed cap in mm/s while inside (slow zones).
    #[serde(default)]
    pub max_speed: Option<f64>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl SafetyZone {
    pub fn new(id: impl Into<String>, kind: ZoneKind, center: Point2, radius: f64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            center,
            radius,
            max_speed: None,
            active: true,
        }
    }

    pub fn with_max_speed(mut self, max_speed: f64) -> Self {
        self.max_speed = Some(max_speed);
        self
    }

    pub fn distance_from(&self, point: &Point2) -> f64 {
        self.center.distance_to(point)
    }

    pub fn contains(&self, point: &Point2) -> bool {
        self.distance_from(point) <= self.radius
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneStatus {
    pub zone_id: String,
    pub kind: ZoneKind,
    pub active: bool,
    pub occupied: bool,
    /// Distance from the current pose to the zone centre, in mm.
    pub distance: f64,
    pub has_alert: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Alerts
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ZoneViolation,
    ObstacleDetected,
    /// Obstacle information is missing or stale.
    SensorGap,
    ActuationFault,
}

/// An active hazard or violation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAlert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub severity: Severity,
    /// Identifies the hazard source (zone id, obstacle id, feed name) so
    /// that re-raising refreshes instead of duplicating.
    pub source_key: String,
    pub message: String,
    pub position: Option<Point2>,
    /// Millimetres.
    pub distance: Option<f64>,
    pub confidence: f64,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SafetyAlert {
    pub fn new(
        kind: AlertKind,
        severity: Severity,
        source_key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            source_key: source_key.into(),
            message: message.into(),
            position: None,
            distance: None,
            confidence: 1.0,
            resolved: false,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    pub fn at(mut self, position: Point2) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_distance(mut self, distance: f64) -> Self {
        self.distance = Some(distance);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Emergency
// ────────────────────────────────────────────────────────────────────────────

/// System-wide emergency state; one per vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyStatus {
    pub active: bool,
    pub level: Severity,
    pub cause: Option<String>,
    pub actions_taken: Vec<String>,
    /// The matched procedure ran to completion.
    pub resolved: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub recovered_by: Option<String>,
    pub recovered_at: Option<DateTime<Utc>>,
}

impl EmergencyStatus {
    pub fn inactive() -> Self {
        Self {
            active: false,
            level: Severity::Low,
            cause: None,
            actions_taken: Vec::new(),
            resolved: false,
            activated_at: None,
            resolved_at: None,
            recovered_by: None,
            recovered_at: None,
        }
    }
}

impl Default for EmergencyStatus {
    fn default() -> Self {
        Self::inactive()
    }
}

/// Ordered recovery steps run when an emergency with a matching cause fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyProcedure {
    pub name: String,
    /// Cause this procedure answers; `"*"` matches any cause.
    pub trigger: String,
    pub level: Severity,
    pub steps: Vec<String>,
}

impl EmergencyProcedure {
    pub fn matches(&self, cause: &str) -> bool {
        self.trigger == "*" || self.trigger == cause
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyEventKind {
    EmergencyActivated,
    ProcedureStep,
    ProcedureCompleted,
    Recovered,
    AlertRaised,
    AlertResolved,
    ZoneAdded,
    ZoneRemoved,
    ConfigUpdated,
}

/// Audit record of something the safety monitor did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyEvent {
    pub id: Uuid,
    pub kind: SafetyEventKind,
    pub severity: Severity,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl SafetyEvent {
    pub fn new(kind: SafetyEventKind, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            description: description.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Aggregate snapshot for external consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyStatus {
    pub emergency: EmergencyStatus,
    pub estop_active: bool,
    pub zones: Vec<ZoneStatus>,
    pub active_alerts: usize,
    pub alerts_by_severity: BTreeMap<Severity, usize>,
    /// `(active_zones - zones_with_alerts) / total_zones`, or 1.0 with no zones.
    pub health: f64,
    pub timestamp: DateTime<Utc>,
}

/// Messages from the safety monitor to the motion controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SafetyDirective {
    EmergencyStop { cause: String },
    /// `None` lifts the cap.
    SpeedLimit(Option<f64>),
}
