use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sensor::SensorKind;

/// Upper bound on any fused pose confidence.
pub const MAX_POSE_CONFIDENCE: f64 = 0.95;

/// A planar point. Units depend on context (mm for pose/zones, m for scans).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point2) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn norm(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Best current estimate of the vehicle's position and heading.
///
/// Position and velocity are in millimetres (per second); `theta` is in
/// radians.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub vx: f64,
    pub vy: f64,
    /// `[0, MAX_POSE_CONFIDENCE]`.
    pub confidence: f64,
    /// Sensor whose candidate carried the highest individual confidence.
    pub provenance: Option<SensorKind>,
    /// Set when the firmware link was unreachable during fusion.
    pub degraded: bool,
    pub timestamp: DateTime<Utc>,
}

impl Pose {
    /// The boot-time pose: origin, zero confidence, no provenance.
    pub fn unknown() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            theta: 0.0,
            vx: 0.0,
            vy: 0.0,
            confidence: 0.0,
            provenance: None,
            degraded: false,
            timestamp: Utc::now(),
        }
    }

    /// A pose at `(x, y)` with heading `theta`, as used for goals and tests.
    pub fn at(x: f64, y: f64, theta: f64) -> Self {
        Self {
            x,
            y,
            theta,
            ..Self::unknown()
        }
    }

    pub fn position(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }

    pub fn distance_to(&self, other: &Pose) -> f64 {
        self.position().distance_to(&other.position())
    }

    pub fn speed(&self) -> f64 {
        self.vx.hypot(self.vy)
    }

    pub fn is_known(&self) -> bool {
        self.provenance.is_some()
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::unknown()
    }
}
