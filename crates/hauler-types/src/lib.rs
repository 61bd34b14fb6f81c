//! `hauler-types` – shared vocabulary of the vehicle control core.
//!
//! Every other `hauler-*` crate speaks in terms of these types: sensor
//! readings, the fused [`Pose`], tracked [`Obstacle`]s, [`MotorCommand`]s and
//! [`Trajectory`] plans, safety zones/alerts, and the [`Event`] envelope that
//! is broadcast on the middleware bus.
//!
//! # Units
//!
//! | Quantity | Unit |
//! |---|---|
//! | pose, trajectories, zones, safety distances | millimetres |
//! | range-scan points and obstacles | metres |
//! | acceleration | m/s² |
//! | compass heading | degrees |
//! | pose heading (`theta`) | radians |

pub mod error;
pub mod motion;
pub mod obstacle;
pub mod pose;
pub mod ring;
pub mod safety;
pub mod sensor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use error::CoreError;
pub use motion::{
    CommandKind, DRIVE_ACTUATOR, MotionState, MotorCommand, PRIORITY_EMERGENCY, PRIORITY_NORMAL, PRIORITY_STOP,
    ProfileShape, SpeedProfile, Trajectory,
};
pub use obstacle::{Obstacle, ObstaclePoint, ObstacleType, Scan, Severity};
pub use pose::{MAX_POSE_CONFIDENCE, Point2, Pose};
pub use ring::RingBuffer;
pub use safety::{
    AlertKind, EmergencyProcedure, EmergencyStatus, SafetyAlert, SafetyDirective, SafetyEvent,
    SafetyEventKind, SafetyStatus, SafetyZone, ZoneKind, ZoneStatus,
};
pub use sensor::{
    AccelPayload, CompassPayload, DockingPayload, GRAVITY, QualityLevel, RfidPayload, ScanSummary,
    SensorKind, SensorPayload, SensorReading,
};

/// Envelope for everything published on the middleware event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "hauler-kernel::safety_monitor"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current UTC timestamp.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Read-only exports consumed by dashboards, operator displays and
/// notification fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    PoseUpdate(Pose),
    Obstacles(Vec<Obstacle>),
    CommandIssued(MotorCommand),
    MotionStateChanged { from: MotionState, to: MotionState },
    Alert(SafetyAlert),
    Emergency(EmergencyStatus),
    /// An actuation request could not be delivered to the firmware bridge.
    ActuationFault { actuator: String, details: String },
}
