//! `hauler-motion` – Trajectory planning & execution
//!
//! # Modules
//!
//! - [`profile`] – straight-line trajectory planning with trapezoidal or
//!   triangular speed profiles, and the three-phase speed curve used during
//!   execution.
//! - [`controller`] – [`MotionController`][controller::MotionController]:
//!   the single-trajectory execution state machine. It owns the only path
//!   from motion intent to the firmware bridge and routes every command
//!   through the kernel's [`StateVerifier`][hauler_kernel::StateVerifier].

pub mod controller;
pub mod profile;

pub use controller::{MotionConfig, MotionController, MotionEvent, MotionEventKind, MotionStatus};
pub use profile::{MotionLimits, RAMP_DOWN_START, RAMP_UP_END, plan, speed_at};
