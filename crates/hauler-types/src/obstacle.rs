use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pose::Point2;
use crate::sensor::{ScanSummary, SensorKind, SensorPayload, SensorReading};

/// One range-scan sample. Distance in metres, angle in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObstaclePoint {
    pub distance: f64,
    pub angle: f64,
    /// `[0, 1]`.
    pub intensity: f64,
}

impl ObstaclePoint {
    pub fn new(distance: f64, angle: f64, intensity: f64) -> Self {
        Self {
            distance,
            angle,
            intensity,
        }
    }

    /// Cartesian position relative to the scanner.
    pub fn to_cartesian(&self) -> Point2 {
        let rad = self.angle.to_radians();
        Point2::new(self.distance * rad.cos(), self.distance * rad.sin())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleType {
    Static,
    Dynamic,
    Person,
    Vehicle,
    Wall,
    Unknown,
}

/// Ordered so that `Critical` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn is_high_or_critical(&self) -> bool {
        *self >= Severity::High
    }
}

/// A tracked physical hazard. Geometry in metres, angle in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    /// Stable across scans while the track survives, e.g. `obs_7`.
    pub id: String,
    pub obstacle_type: ObstacleType,
    pub severity: Severity,
    pub center: Point2,
    pub distance: f64,
    pub angle: f64,
    pub width: f64,
    pub height: f64,
    /// `[0, 1]`.
    pub confidence: f64,
    pub points: Vec<ObstaclePoint>,
    /// Recent centroids of this track, oldest first (at most 10).
    pub history: Vec<Point2>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// The result of processing one rotating range scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub points: Vec<ObstaclePoint>,
    pub obstacles: Vec<Obstacle>,
    /// `[0, 1]`. `0.0` means "no obstacle information", never "no hazards".
    pub quality: f64,
    /// Number of samples before range/angle filtering.
    pub raw_point_count: usize,
    /// `true` when the input shape was unrecognised and a synthetic scan
    /// was substituted.
    pub synthetic: bool,
    pub processing_ms: f64,
    pub timestamp: DateTime<Utc>,
}

impl Scan {
    pub fn empty() -> Self {
        Self {
            points: Vec::new(),
            obstacles: Vec::new(),
            quality: 0.0,
            raw_point_count: 0,
            synthetic: false,
            processing_ms: 0.0,
            timestamp: Utc::now(),
        }
    }

    pub fn has_information(&self) -> bool {
        self.quality > 0.0
    }

    pub fn nearest(&self) -> Option<&Obstacle> {
        self.obstacles
            .iter()
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    /// Summarise this scan as a LiDAR [`SensorReading`] so it can flow through
    /// the same ingestion path as the other sensors.
    pub fn as_reading(&self, sensor_id: impl Into<String>) -> SensorReading {
        let valid_fraction = if self.raw_point_count == 0 {
            0.0
        } else {
            self.points.len() as f64 / self.raw_point_count as f64
        };
        SensorReading {
            kind: SensorKind::Lidar,
            sensor_id: sensor_id.into(),
            payload: SensorPayload::Lidar(ScanSummary {
                point_count: self.points.len(),
                obstacle_count: self.obstacles.len(),
                valid_fraction,
            }),
            quality: self.quality,
            valid: self.has_information() && !self.synthetic,
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obstacle(id: &str, distance: f64) -> Obstacle {
        let now = Utc::now();
        Obstacle {
            id: id.to_string(),
            obstacle_type: ObstacleType::Static,
            severity: Severity::Low,
            center: Point2::new(distance, 0.0),
            distance,
            angle: 0.0,
            width: 0.2,
            height: 0.2,
            confidence: 0.5,
            points: Vec::new(),
            history: Vec::new(),
            first_seen: now,
            last_seen: now,
        }
    }

    #[test]
    fn point_to_cartesian() {
        let p = ObstaclePoint::new(2.0, 90.0, 0.5).to_cartesian();
        assert!(p.x.abs() < 1e-9);
        assert!((p.y - 2.0).abs() < 1e-9);
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High.is_high_or_critical());
        assert!(!Severity::Medium.is_high_or_critical());
    }

    #[test]
    fn empty_scan_carries_no_information() {
        let scan = Scan::empty();
        assert!(!scan.has_information());
        assert!(scan.nearest().is_none());
        let reading = scan.as_reading("lidar_0");
        assert!(!reading.valid);
        assert_eq!(reading.quality, 0.0);
    }

    #[test]
    fn nearest_obstacle_is_closest() {
        let scan = Scan {
            obstacles: vec![obstacle("obs_1", 3.0), obstacle("obs_2", 1.2)],
            quality: 0.8,
            ..Scan::empty()
        };
        assert_eq!(scan.nearest().map(|o| o.id.as_str()), Some("obs_2"));
    }

    #[test]
    fn as_reading_reports_valid_fraction() {
        let scan = Scan {
            points: vec![ObstaclePoint::new(1.0, 0.0, 0.5); 3],
            raw_point_count: 4,
            quality: 0.6,
            ..Scan::empty()
        };
        let reading = scan.as_reading("lidar_0");
        assert!(reading.valid);
        match reading.payload {
            SensorPayload::Lidar(summary) => {
                assert_eq!(summary.point_count, 3);
                assert!((summary.valid_fraction - 0.75).abs() < 1e-9);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
