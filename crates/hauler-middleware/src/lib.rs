//! `hauler-middleware` – event fan-out for the control core.
//!
//! Carries the core's read-only exports (pose history, obstacle lists,
//! issued commands, alerts and emergency snapshots) to whoever is listening,
//! without the core depending on any consumer.
//!
//! # Modules
//!
//! - [`bus`] – topic-partitioned publish/subscribe event bus built on Tokio
//!   broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
