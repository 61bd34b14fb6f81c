//! Sensor kinds, typed payloads and calibrated readings.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Standard gravity in m/s².
pub const GRAVITY: f64 = 9.81;

/// Closed set of sensors the core knows how to interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Floor-mounted RFID proximity tag reader.
    Rfid,
    Accelerometer,
    Compass,
    /// Four-channel docking proximity array.
    Docking,
    /// Rotating range scanner.
    Lidar,
}

impl SensorKind {
    pub const ALL: [SensorKind; 5] = [
        SensorKind::Rfid,
        SensorKind::Accelerometer,
        SensorKind::Compass,
        SensorKind::Docking,
        SensorKind::Lidar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Rfid => "rfid",
            SensorKind::Accelerometer => "accelerometer",
            SensorKind::Compass => "compass",
            SensorKind::Docking => "docking",
            SensorKind::Lidar => "lidar",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Payloads
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfidPayload {
    pub tag_id: String,
    /// Received signal strength in percent (0–100).
    pub signal_strength: f64,
    pub distance: f64,
    pub angle: f64,
}

impl RfidPayload {
    /// Signal strength mapped onto `[0, 1]`.
    pub fn normalized_signal(&self) -> f64 {
        (self.signal_strength / 100.0).clamp(0.0, 1.0)
    }
}

/// Calibrated linear acceleration (m/s²).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelPayload {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelPayload {
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Absolute deviation of the measured magnitude from [`GRAVITY`].
    pub fn gravity_deviation(&self) -> f64 {
        (self.magnitude() - GRAVITY).abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompassPayload {
    /// Calibrated heading in degrees, `[0, 360)`.
    pub heading_deg: f64,
    /// Self-reported accuracy, `[0, 1]`.
    pub accuracy: f64,
    /// Magnetic field strength in µT.
    pub field_strength_ut: f64,
}

/// Docking proximity array distances in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DockingPayload {
    pub front: f64,
    pub left: f64,
    pub right: f64,
    pub back: f64,
}

impl DockingPayload {
    pub fn channels(&self) -> [f64; 4] {
        [self.front, self.left, self.right, self.back]
    }

    /// Closest non-negative channel reading, in metres.
    pub fn nearest(&self) -> Option<f64> {
        self.channels()
            .into_iter()
            .filter(|d| d.is_finite() && *d >= 0.0)
            .min_by(f64::total_cmp)
    }
}

/// Condensed view of one range scan, so scans can flow through the same
/// reading pipeline as the other sensors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub point_count: usize,
    pub obstacle_count: usize,
    /// Fraction of range samples that fell inside the plausible range.
    pub valid_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SensorPayload {
    Rfid(RfidPayload),
    Accelerometer(AccelPayload),
    Compass(CompassPayload),
    Docking(DockingPayload),
    Lidar(ScanSummary),
}

impl SensorPayload {
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorPayload::Rfid(_) => SensorKind::Rfid,
            SensorPayload::Accelerometer(_) => SensorKind::Accelerometer,
            SensorPayload::Compass(_) => SensorKind::Compass,
            SensorPayload::Docking(_) => SensorKind::Docking,
            SensorPayload::Lidar(_) => SensorKind::Lidar,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Reading
// ────────────────────────────────────────────────────────────────────────────

/// One calibrated, quality-scored reading from one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading<T = SensorPayload> {
    pub kind: SensorKind,
    pub sensor_id: String,
    pub payload: T,
    /// `[0, 1]`; forced toward 0 when the raw payload was incomplete.
    pub quality: f64,
    /// `false` when any field of the raw payload had to be defaulted.
    pub valid: bool,
    pub timestamp: DateTime<Utc>,
}

impl<T> SensorReading<T> {
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }

    /// `true` when the reading is valid and no older than `window` at `now`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.valid && self.age_at(now) <= window
    }

    pub fn quality_level(&self) -> QualityLevel {
        QualityLevel::from_score(self.quality)
    }
}

/// Coarse bucketing of a quality score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Bad,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityLevel {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.9 => QualityLevel::Excellent,
            s if s >= 0.7 => QualityLevel::Good,
            s if s >= 0.5 => QualityLevel::Fair,
            s if s >= 0.3 => QualityLevel::Poor,
            _ => QualityLevel::Bad,
        }
    }
}
