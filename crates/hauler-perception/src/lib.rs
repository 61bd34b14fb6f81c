//! `hauler-perception` – turning raw sensor payloads into a world model.
//!
//! # Modules
//!
//! - [`normalizer`] – [`SensorNormalizer`]: per-kind validation, quality
//!   scoring, calibration and bounded history of [`hauler_types::SensorReading`]s.
//! - [`scan`] – recognised raw range-scan shapes and the synthetic fallback.
//! - [`obstacle`] – [`ObstacleTracker`]: filtering, clustering,
//!   classification and id-stable tracking of obstacles from one scan.
//! - [`pose`] – [`PoseEstimator`]: weighted multi-sensor fusion into a
//!   single [`hauler_types::Pose`].
//!
//! Everything here is synchronous and owns its state; callers that share a
//! component across tasks wrap it in a `Mutex`.

pub mod normalizer;
pub mod obstacle;
pub mod pose;
pub mod scan;

pub use normalizer::{
    AccelCalibration, CompassCalibration, KindStats, NormalizerConfig, NormalizerStats,
    SensorNormalizer,
};
pub use obstacle::{ObstacleTracker, TrackerConfig, TrackerStats};
pub use pose::{
    Candidate, Estimate, EstimatorConfig, EstimatorStats, HoldPose, PoseCorrection,
    PoseEstimator, SourceWeights, TagPosition,
};
pub use scan::RawScan;
