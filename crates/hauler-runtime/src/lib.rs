//! `hauler-runtime` – Vehicle control core assembly
//!
//! # Modules
//!
//! - [`core`] – [`VehicleControlCore`][core::VehicleControlCore]: one
//!   constructible context per vehicle that owns the sensor normalizer,
//!   obstacle tracker, pose estimator, motion controller and safety monitor,
//!   wires them to a [`VehicleIo`][hauler_hal::VehicleIo] bridge and the
//!   event bus, and optionally runs their periodic loops.
//! - [`config`] – [`CoreConfig`][config::CoreConfig]: TOML configuration
//!   with `HAULER_*` environment overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter. Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable trace export.

pub mod config;
pub mod core;
pub mod telemetry;

pub use config::{ConfigError, CoreConfig, StartPose, config_path};
pub use core::{CoreHandle, VehicleControlCore};
pub use telemetry::{LogFormat, TelemetrySettings, TracerProviderGuard, init_tracing};
