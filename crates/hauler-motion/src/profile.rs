//! Speed-profile planning.
//!
//! Given limits `V` (mm/s), `A` (mm/s²), `J` (mm/s³) and straight-line
//! distance `d` (mm), the acceleration distance is `V²/2A`:
//!
//! | Condition | Shape | Peak speed | Duration |
//! |---|---|---|---|
//! | `d = 0` | trivial | 0 | 0 |
//! | `2·V²/2A < d` | trapezoidal | `V` | `2V/A + (d − V²/A)/V` |
//! | otherwise | triangular | `√(d·A)` | `2·√(d/A)` |
//!
//! Execution then follows a three-phase profile over progress `p ∈ [0, 1]`:
//! linear ramp up for `p < 0.1`, cruise, linear ramp down for `p > 0.9`.

use chrono::Utc;
use hauler_types::{Pose, ProfileShape, SpeedProfile, Trajectory};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ramp-up ends and ramp-down begins at these progress fractions.
pub const RAMP_UP_END: f64 = 0.1;
pub const RAMP_DOWN_START: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionLimits {
    pub max_speed: f64,
    pub max_acceleration: f64,
    pub max_jerk: f64,
}

impl MotionLimits {
    pub fn errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (name, value) in [
            ("max_speed", self.max_speed),
            ("max_acceleration", self.max_acceleration),
            ("max_jerk", self.max_jerk),
        ] {
            if !(value.is_finite() && value > 0.0) {
                errors.push(format!("{name} must be positive (got {value})"));
            }
        }
        errors
    }
}

/// Plan a straight-line move from `start` to `goal`.
///
/// Always returns a trajectory; invalid inputs yield `is_valid == false`
/// with the reasons in `errors`.
pub fn plan(start: &Pose, goal: &Pose, limits: &MotionLimits) -> Trajectory {
    let mut errors = limits.errors();
    for (name, v) in [("start", start), ("goal", goal)] {
        if !(v.x.is_finite() && v.y.is_finite() && v.theta.is_finite()) {
            errors.push(format!("{name} pose is not finite"));
        }
    }

    let distance = start.distance_to(goal);
    let (profile, duration) = if !errors.is_empty() {
        (profile_of(limits, 0.0, 0.0, ProfileShape::Trivial), 0.0)
    } else {
        shape(distance, limits)
    };

    Trajectory {
        id: Uuid::new_v4(),
        start: start.clone(),
        goal: goal.clone(),
        profile,
        total_distance: if distance.is_finite() { distance } else { 0.0 },
        total_duration: duration,
        is_valid: errors.is_empty(),
        errors,
        created_at: Utc::now(),
    }
}

fn shape(d: f64, limits: &MotionLimits) -> (SpeedProfile, f64) {
    let v = limits.max_speed;
    let a = limits.max_acceleration;
    if d <= 0.0 {
        return (profile_of(limits, 0.0, 0.0, ProfileShape::Trivial), 0.0);
    }

    let accel_distance = v * v / (2.0 * a);
    if 2.0 * accel_distance < d {
        let duration = 2.0 * v / a + (d - v * v / a) / v;
        (
            profile_of(limits, v, accel_distance, ProfileShape::Trapezoidal),
            duration,
        )
    } else {
        let peak = (d * a).sqrt();
        let duration = 2.0 * (d / a).sqrt();
        (
            profile_of(limits, peak, d / 2.0, ProfileShape::Triangular),
            duration,
        )
    }
}

fn profile_of(limits: &MotionLimits, cruise: f64, accel_distance: f64, shape: ProfileShape) -> SpeedProfile {
    SpeedProfile {
        max_speed: limits.max_speed,
        max_acceleration: limits.max_acceleration,
        max_jerk: limits.max_jerk,
        cruise_speed: cruise,
        accel_distance,
        shape,
    }
}

/// Commanded `(speed, acceleration)` at progress `p`.
pub fn speed_at(profile: &SpeedProfile, p: f64) -> (f64, f64) {
    let p = p.clamp(0.0, 1.0);
    let cruise = profile.cruise_speed;
    if p < RAMP_UP_END {
        (cruise * (p / RAMP_UP_END), profile.max_acceleration)
    } else if p > RAMP_DOWN_START {
        (
            cruise * ((1.0 - p) / (1.0 - RAMP_DOWN_START)),
            -profile.max_acceleration,
        )
    } else {
        (cruise, 0.0)
    }
}
