//! The `VehicleIo` trait – the single boundary between the control core and
//! the firmware/transport bridge.
//!
//! Everything the core reads from or writes to the physical vehicle goes
//! through this trait. Connection state, retries and reconnection are the
//! implementor's business; the core only ever asks [`VehicleIo::health`]
//! whether the link is currently reachable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hauler_types::{CoreError, MotorCommand, SensorKind};

/// One raw, not-yet-normalised sensor payload as delivered by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSensorFrame {
    pub kind: SensorKind,
    pub sensor_id: String,
    pub data: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl RawSensorFrame {
    pub fn new(kind: SensorKind, sensor_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind,
            sensor_id: sensor_id.into(),
            data,
            received_at: Utc::now(),
        }
    }
}

/// Positive acknowledgement of a delivered [`MotorCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub command_id: Uuid,
    pub priority: u8,
    pub accepted_at: DateTime<Utc>,
}

impl CommandAck {
    pub fn for_command(cmd: &MotorCommand) -> Self {
        Self {
            command_id: cmd.id,
            priority: cmd.priority,
            accepted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkHealth {
    pub reachable: bool,
}

/// Abstract sensor source and command sink.
///
/// Implementations must be cheap to call from a periodic tick: reads are
/// non-blocking best-effort fetches and "no data" is `None`, never an error.
pub trait VehicleIo: Send + Sync {
    /// Latest raw frame for `kind`, optionally restricted to one sensor id.
    fn read_sensor(&self, kind: SensorKind, sensor_id: Option<&str>) -> Option<RawSensorFrame>;

    /// Latest rotating range-scan payload.
    fn read_scan(&self) -> Option<serde_json::Value>;

    /// Deliver a command to the actuators.
    ///
    /// Implementations must preserve priority ordering: a priority-100
    /// command is delivered even when lower-priority commands are queued.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Actuation`] when the bridge rejects or cannot
    /// deliver the command.
    fn send_command(&self, cmd: MotorCommand) -> Result<CommandAck, CoreError>;

    fn health(&self) -> LinkHealth;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Minimal in-process bridge used only for tests.
    struct RecordingIo {
        sent: Mutex<Vec<MotorCommand>>,
    }

    impl VehicleIo for RecordingIo {
        fn read_sensor(&self, _: SensorKind, _: Option<&str>) -> Option<RawSensorFrame> {
            None
        }

        fn read_scan(&self) -> Option<serde_json::Value> {
            None
        }

        fn send_command(&self, cmd: MotorCommand) -> Result<CommandAck, CoreError> {
            let ack = CommandAck::for_command(&cmd);
            self.sent.lock().unwrap().push(cmd);
            Ok(ack)
        }

        fn health(&self) -> LinkHealth {
            LinkHealth { reachable: true }
        }
    }

    #[test]
    fn ack_echoes_command_identity() {
        let io = RecordingIo {
            sent: Mutex::new(Vec::new()),
        };
        let cmd = MotorCommand::stop();
        let id = cmd.id;
        let ack = io.send_command(cmd).unwrap();
        assert_eq!(ack.command_id, id);
        assert_eq!(ack.priority, hauler_types::PRIORITY_STOP);
        assert_eq!(io.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn trait_object_is_usable() {
        let io: Box<dyn VehicleIo> = Box::new(RecordingIo {
            sent: Mutex::new(Vec::new()),
        });
        assert!(io.read_sensor(SensorKind::Compass, None).is_none());
        assert!(io.health().reachable);
    }
}
