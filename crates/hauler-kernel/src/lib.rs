//! `hauler-kernel` – Safety & Interlocks
//!
//! The part of the control core that does not plan or estimate anything; it
//! enforces rules and can override motion at any instant.
//!
//! # Modules
//!
//! - [`state_verifier`] – [`StateVerifier`][state_verifier::StateVerifier]:
//!   a rule engine every outbound [`MotorCommand`][hauler_types::MotorCommand]
//!   passes before reaching the firmware bridge, plus the shared
//!   [`EmergencyLatch`][state_verifier::EmergencyLatch].
//! - [`watchdog`] – [`FeedWatchdog`][watchdog::FeedWatchdog]: detects
//!   upstream feeds that have gone silent.
//! - [`zones`] – safety-zone registry and occupancy checks.
//! - [`alerts`] – de-duplicated active alert set with retention.
//! - [`emergency`] – emergency state machine, procedures and event log.
//! - [`safety_monitor`] – [`SafetyMonitor`][safety_monitor::SafetyMonitor]:
//!   the periodic zone / collision / escalation pass that ties the above
//!   together.

pub mod alerts;
pub mod emergency;
pub mod safety_monitor;
pub mod state_verifier;
pub mod watchdog;
pub mod zones;

pub use alerts::{AlertBook, Raised};
pub use emergency::{
    CAUSE_ESTOP, CAUSE_MULTIPLE_CRITICAL, CAUSE_RESTRICTED_ZONE, EmergencyState, default_procedures,
};
pub use safety_monitor::{
    MonitorHandle, SafetyConfig, SafetyFeed, SafetyInputs, SafetyMonitor, TickReport,
};
pub use state_verifier::{EmergencyInterlock, EmergencyLatch, Rule, SpeedCapRule, StateVerifier};
pub use watchdog::{FeedHealth, FeedWatchdog};
pub use zones::{ZoneCheck, ZoneRegistry, default_zones, speed_cap};
