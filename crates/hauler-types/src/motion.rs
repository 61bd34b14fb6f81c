use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pose::Pose;

/// Priority of ordinary motion commands.
pub const PRIORITY_NORMAL: u8 = 0;
/// Priority of a controlled stop.
pub const PRIORITY_STOP: u8 = 10;
/// Priority of an emergency stop; the maximum in the system.
pub const PRIORITY_EMERGENCY: u8 = 100;

/// Actuator id of the vehicle drive base.
pub const DRIVE_ACTUATOR: &str = "drive";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "params", rename_all = "snake_case")]
pub enum CommandKind {
    /// Commanded linear speed (mm/s) and acceleration (mm/s²).
    SetSpeed { speed: f64, acceleration: f64 },
    MoveTo { x: f64, y: f64, theta: f64 },
    Stop,
    EmergencyStop,
}

/// One actuation intent sent to the firmware bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorCommand {
    pub id: Uuid,
    pub actuator: String,
    pub kind: CommandKind,
    pub priority: u8,
    pub timestamp: DateTime<Utc>,
}

impl MotorCommand {
    pub fn new(actuator: impl Into<String>, kind: CommandKind, priority: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            actuator: actuator.into(),
            kind,
            priority,
            timestamp: Utc::now(),
        }
    }

    pub fn set_speed(speed: f64, acceleration: f64) -> Self {
        Self::new(
            DRIVE_ACTUATOR,
            CommandKind::SetSpeed {
                speed,
                acceleration,
            },
            PRIORITY_NORMAL,
        )
    }

    pub fn move_to(goal: &Pose) -> Self {
        Self::new(
            DRIVE_ACTUATOR,
            CommandKind::MoveTo {
                x: goal.x,
                y: goal.y,
                theta: goal.theta,
            },
            PRIORITY_NORMAL,
        )
    }

    pub fn stop() -> Self {
        Self::new(DRIVE_ACTUATOR, CommandKind::Stop, PRIORITY_STOP)
    }

    pub fn emergency_stop() -> Self {
        Self::new(DRIVE_ACTUATOR, CommandKind::EmergencyStop, PRIORITY_EMERGENCY)
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self.kind, CommandKind::EmergencyStop)
    }

    /// Commanded speed, if this is a speed command.
    pub fn speed(&self) -> Option<f64> {
        match self.kind {
            CommandKind::SetSpeed { speed, .. } => Some(speed),
            _ => None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Trajectories
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileShape {
    /// Accelerate, cruise, decelerate.
    Trapezoidal,
    /// Accelerate then decelerate; the cruise phase would be empty.
    Triangular,
    /// Zero-distance move.
    Trivial,
}

/// Limits and derived peak speed of one trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedProfile {
    pub max_speed: f64,
    pub max_acceleration: f64,
    pub max_jerk: f64,
    /// Peak speed actually reached; `max_speed` for trapezoidal profiles.
    pub cruise_speed: f64,
    /// Distance covered while accelerating to `cruise_speed`.
    pub accel_distance: f64,
    pub shape: ProfileShape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: Uuid,
    pub start: Pose,
    pub goal: Pose,
    pub profile: SpeedProfile,
    /// Millimetres.
    pub total_distance: f64,
    /// Seconds.
    pub total_duration: f64,
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of the motion controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    Idle,
    Planning,
    Executing,
    Paused,
    Completed,
    Failed,
    EmergencyStop,
}

impl MotionState {
    /// States from which a new trajectory may be accepted.
    pub fn accepts_trajectory(&self) -> bool {
        matches!(
            self,
            MotionState::Idle | MotionState::Completed | MotionState::Failed
        )
    }

    pub fn is_moving(&self) -> bool {
        matches!(self, MotionState::Executing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emergency_stop_has_maximum_priority() {
        let cmd = MotorCommand::emergency_stop();
        assert!(cmd.is_emergency());
        assert_eq!(cmd.priority, PRIORITY_EMERGENCY);
        assert!(MotorCommand::stop().priority < cmd.priority);
        assert!(MotorCommand::set_speed(100.0, 10.0).priority < cmd.priority);
    }

    #[test]
    fn speed_accessor_only_for_set_speed() {
        assert_eq!(MotorCommand::set_speed(250.0, 0.0).speed(), Some(250.0));
        assert_eq!(MotorCommand::stop().speed(), None);
    }

    #[test]
    fn command_kind_serializes_tagged() {
        let json = serde_json::to_value(&CommandKind::SetSpeed {
            speed: 1.0,
            acceleration: 2.0,
        })
        .unwrap();
        assert_eq!(json["command"], "set_speed");
        assert_eq!(json["params"]["speed"], 1.0);
    }

    #[test]
    fn busy_states_refuse_trajectories() {
        assert!(MotionState::Idle.accepts_trajectory());
        assert!(MotionState::Completed.accepts_trajectory());
        assert!(!MotionState::Executing.accepts_trajectory());
        assert!(!MotionState::Paused.accepts_trajectory());
        assert!(!MotionState::EmergencyStop.accepts_trajectory());
    }
}
