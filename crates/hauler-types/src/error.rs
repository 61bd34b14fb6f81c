use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::motion::MotionState;
use crate::sensor::SensorKind;

/// Error taxonomy shared by every component of the control core.
///
/// Perception components never surface these to their callers (they degrade
/// to a quality-0 result instead); motion and safety operations return them
/// so the caller can decide.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoreError {
    /// Malformed sensor payload or non-positive planning input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No fresh sensor data or no obstacle information.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// A trajectory was requested while another one owns the controller.
    #[error("Motion controller busy (state: {state:?})")]
    Busy { state: MotionState },

    #[error("Trajectory is not executable: {}", .0.join("; "))]
    InvalidTrajectory(Vec<String>),

    #[error("Calibration is not supported for {0} sensors")]
    UnsupportedCalibration(SensorKind),

    /// The emergency latch is held; only emergency-priority commands pass.
    #[error("Emergency latch is active; explicit recovery required")]
    EmergencyLatched,

    #[error("Command rejected by rule '{rule}': {details}")]
    CommandRejected { rule: String, details: String },

    #[error("Actuation failure on {actuator}: {details}")]
    Actuation { actuator: String, details: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_display_names_state() {
        let err = CoreError::Busy {
            state: MotionState::Executing,
        };
        assert!(err.to_string().contains("Executing"));
    }

    #[test]
    fn invalid_trajectory_joins_errors() {
        let err = CoreError::InvalidTrajectory(vec![
            "max_speed must be positive".to_string(),
            "max_acceleration must be positive".to_string(),
        ]);
        let text = err.to_string();
        assert!(text.contains("max_speed"));
        assert!(text.contains("; max_acceleration"));
    }

    #[test]
    fn unsupported_calibration_names_kind() {
        let err = CoreError::UnsupportedCalibration(SensorKind::Rfid);
        assert_eq!(err.to_string(), "Calibration is not supported for rfid sensors");
    }
}
