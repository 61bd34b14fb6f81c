//! `hauler-hal` – the hardware boundary of the control core.
//!
//! # Modules
//!
//! - [`vehicle_io`] – the [`VehicleIo`] trait: sensor source, command sink
//!   and link health, implemented by the external firmware bridge.
//! - [`command_queue`] – priority-ordered outbound [`CommandQueue`] with an
//!   audit trail of delivered commands.
//! - [`sim`] – [`SimVehicleIo`], an in-memory bridge for tests and the
//!   simulation harness.

pub mod command_queue;
pub mod sim;
pub mod vehicle_io;

pub use command_queue::CommandQueue;
pub use sim::SimVehicleIo;
pub use vehicle_io::{CommandAck, LinkHealth, RawSensorFrame, VehicleIo};
