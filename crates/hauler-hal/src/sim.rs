//! In-process simulation of the firmware bridge for tests and CI.
//!
//! [`SimVehicleIo`] implements [`VehicleIo`] entirely in memory: sensor
//! frames and range scans are injected by the caller, and outbound commands
//! are queued in a [`CommandQueue`] and recorded on delivery. This lets the
//! full control core run headless, without a physical vehicle.
//!
//! # Example
//!
//! ```rust
//! use hauler_hal::sim::SimVehicleIo;
//! use hauler_hal::vehicle_io::VehicleIo;
//! use hauler_types::{MotorCommand, SensorKind};
//!
//! let io = SimVehicleIo::builder()
//!     .with_frame(SensorKind::Compass, "compass_0", serde_json::json!({
//!         "heading": 90.0, "accuracy": 0.9, "field_strength": 45.0
//!     }))
//!     .build();
//!
//! assert!(io.read_sensor(SensorKind::Compass, None).is_some());
//! io.send_command(MotorCommand::stop()).expect("sim accepts commands");
//! assert_eq!(io.delivered().len(), 1);
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use hauler_types::{CoreError, MotorCommand, PRIORITY_EMERGENCY, SensorKind};

use crate::command_queue::CommandQueue;
use crate::vehicle_io::{CommandAck, LinkHealth, RawSensorFrame, VehicleIo};

#[derive(Debug, Default)]
struct SimState {
    frames: HashMap<SensorKind, Vec<RawSensorFrame>>,
    scan: Option<serde_json::Value>,
    queue: CommandQueue,
    delivered: Vec<MotorCommand>,
    hold_delivery: bool,
    fail_commands: bool,
    reachable: bool,
}

/// Simulated firmware bridge. All methods take `&self`; state lives behind
/// one mutex so the simulator can be shared as `Arc<dyn VehicleIo>`.
#[derive(Debug)]
pub struct SimVehicleIo {
    state: Mutex<SimState>,
}

impl Default for SimVehicleIo {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SimVehicleIo {
    pub fn builder() -> SimVehicleIoBuilder {
        SimVehicleIoBuilder::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inject a raw frame. A newer frame from the same sensor id replaces the
    /// previous one.
    pub fn push_frame(&self, kind: SensorKind, sensor_id: &str, data: serde_json::Value) {
        let frame = RawSensorFrame::new(kind, sensor_id, data);
        let mut state = self.state();
        let slot = state.frames.entry(kind).or_default();
        slot.retain(|f| f.sensor_id != sensor_id);
        slot.push(frame);
    }

    pub fn clear_frames(&self, kind: SensorKind) {
        self.state().frames.remove(&kind);
    }

    pub fn set_scan(&self, scan: Option<serde_json::Value>) {
        self.state().scan = scan;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// When set, every command is refused with [`CoreError::Actuation`].
    pub fn set_fail_commands(&self, fail: bool) {
        self.state().fail_commands = fail;
    }

    /// When set, non-emergency commands stay queued until
    /// [`SimVehicleIo::flush`] is called.
    pub fn set_hold_delivery(&self, hold: bool) {
        self.state().hold_delivery = hold;
    }

    /// Deliver every queued command in priority order.
    pub fn flush(&self) -> usize {
        let mut state = self.state();
        let mut count = 0;
        while let Some(cmd) = state.queue.pop() {
            state.delivered.push(cmd);
            count += 1;
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.state().queue.len()
    }

    /// Commands delivered so far, in delivery order.
    pub fn delivered(&self) -> Vec<MotorCommand> {
        self.state().delivered.clone()
    }

    pub fn last_delivered(&self) -> Option<MotorCommand> {
        self.state().delivered.last().cloned()
    }
}

impl VehicleIo for SimVehicleIo {
    fn read_sensor(&self, kind: SensorKind, sensor_id: Option<&str>) -> Option<RawSensorFrame> {
        let state = self.state();
        let frames = state.frames.get(&kind)?;
        match sensor_id {
            Some(id) => frames.iter().find(|f| f.sensor_id == id).cloned(),
            None => frames.iter().max_by_key(|f| f.received_at).cloned(),
        }
    }

    fn read_scan(&self) -> Option<serde_json::Value> {
        self.state().scan.clone()
    }

    fn send_command(&self, cmd: MotorCommand) -> Result<CommandAck, CoreError> {
        let mut state = self.state();
        if state.fail_commands || !state.reachable {
            warn!(actuator = %cmd.actuator, priority = cmd.priority, "sim bridge refused command");
            return Err(CoreError::Actuation {
                actuator: cmd.actuator,
                details: "simulated bridge failure".to_string(),
            });
        }

        let ack = CommandAck::for_command(&cmd);
        let urgent = cmd.priority >= PRIORITY_EMERGENCY;
        state.queue.push(cmd);

        if urgent {
            // Deliver the emergency command now, ahead of anything held.
            if let Some(next) = state.queue.pop() {
                state.delivered.push(next);
            }
        } else if !state.hold_delivery {
            while let Some(next) = state.queue.pop() {
                state.delivered.push(next);
            }
        }
        debug!(pending = state.queue.len(), "sim bridge accepted command");
        Ok(ack)
    }

    fn health(&self) -> LinkHealth {
        LinkHealth {
            reachable: self.state().reachable,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder that pre-populates a [`SimVehicleIo`] with frames and flags.
#[derive(Default)]
pub struct SimVehicleIoBuilder {
    frames: Vec<(SensorKind, String, serde_json::Value)>,
    scan: Option<serde_json::Value>,
    hold_delivery: bool,
    fail_commands: bool,
    unreachable: bool,
}

impl SimVehicleIoBuilder {
    pub fn with_frame(
        mut self,
        kind: SensorKind,
        sensor_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        self.frames.push((kind, sensor_id.into(), data));
        self
    }

    pub fn with_scan(mut self, scan: serde_json::Value) -> Self {
        self.scan = Some(scan);
        self
    }

    pub fn holding_delivery(mut self) -> Self {
        self.hold_delivery = true;
        self
    }

    pub fn failing_commands(mut self) -> Self {
        self.fail_commands = true;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn build(self) -> SimVehicleIo {
        let io = SimVehicleIo {
            state: Mutex::new(SimState {
                scan: self.scan,
                hold_delivery: self.hold_delivery,
                fail_commands: self.fail_commands,
                reachable: !self.unreachable,
                ..SimState::default()
            }),
        };
        for (kind, id, data) in self.frames {
            io.push_frame(kind, &id, data);
        }
        io
    }
}
