//! Raw range-scan parsing.
//!
//! Bridges deliver scans in one of three JSON shapes; [`RawScan::parse`]
//! recognises them explicitly and anything else is reported as unrecognised
//! so the tracker can take its synthetic-scan branch.
//!
//! | Shape | Example |
//! |---|---|
//! | point list | `{"points": [{"distance": 2.0, "angle": 45.0, "intensity": 0.8}, …]}` |
//! | parallel arrays | `{"distances": [...], "angles": [...], "intensities": [...]}` |
//! | range sweep | `{"ranges": [...], "angle_min": 0.0, "angle_increment": 1.0}` (`scan_data` is accepted for `ranges`) |
//!
//! Distances are metres, angles degrees.

use serde_json::Value;

use hauler_types::ObstaclePoint;

#[derive(Debug, Clone, PartialEq)]
pub enum RawScan {
    Points(Vec<ObstaclePoint>),
    Polar {
        distances: Vec<f64>,
        angles: Vec<f64>,
        intensities: Vec<f64>,
    },
    Sweep {
        ranges: Vec<f64>,
        angle_min: f64,
        angle_increment: f64,
        intensities: Vec<f64>,
    },
}

fn number_array(value: Option<&Value>) -> Option<Vec<f64>> {
    value?.as_array()?.iter().map(Value::as_f64).collect()
}

fn number_field(obj: &Value, name: &str) -> f64 {
    obj.get(name).and_then(Value::as_f64).unwrap_or(0.0)
}

impl RawScan {
    /// Recognise one of the supported shapes, or `None`.
    pub fn parse(raw: &Value) -> Option<Self> {
        if let Some(points) = raw.get("points").and_then(Value::as_array) {
            let parsed = points
                .iter()
                .map(|p| {
                    p.is_object().then(|| {
                        ObstaclePoint::new(
                            number_field(p, "distance"),
                            number_field(p, "angle"),
                            number_field(p, "intensity"),
                        )
                    })
                })
                .collect::<Option<Vec<_>>>()?;
            return Some(RawScan::Points(parsed));
        }

        if raw.get("distances").is_some() && raw.get("angles").is_some() {
            return Some(RawScan::Polar {
                distances: number_array(raw.get("distances"))?,
                angles: number_array(raw.get("angles"))?,
                intensities: number_array(raw.get("intensities")).unwrap_or_default(),
            });
        }

        let ranges = raw.get("ranges").or_else(|| raw.get("scan_data"));
        if ranges.is_some() {
            let ranges = number_array(ranges)?;
            if ranges.is_empty() {
                return None;
            }
            let default_increment = 360.0 / ranges.len() as f64;
            return Some(RawScan::Sweep {
                angle_min: raw.get("angle_min").and_then(Value::as_f64).unwrap_or(0.0),
                angle_increment: raw
                    .get("angle_increment")
                    .and_then(Value::as_f64)
                    .filter(|inc| *inc > 0.0)
                    .unwrap_or(default_increment),
                intensities: number_array(raw.get("intensities")).unwrap_or_default(),
                ranges,
            });
        }

        None
    }

    /// Number of samples carried, before any filtering.
    pub fn len(&self) -> usize {
        match self {
            RawScan::Points(p) => p.len(),
            RawScan::Polar {
                distances, angles, ..
            } => distances.len().min(angles.len()),
            RawScan::Sweep { ranges, .. } => ranges.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_points(self) -> Vec<ObstaclePoint> {
        match self {
            RawScan::Points(points) => points,
            RawScan::Polar {
                distances,
                angles,
                intensities,
            } => distances
                .into_iter()
                .zip(angles)
                .enumerate()
                .map(|(i, (d, a))| {
                    ObstaclePoint::new(d, a, intensities.get(i).copied().unwrap_or(0.0))
                })
                .collect(),
            RawScan::Sweep {
                ranges,
                angle_min,
                angle_increment,
                intensities,
            } => ranges
                .into_iter()
                .enumerate()
                .map(|(i, d)| {
                    let angle = angle_min + angle_increment * i as f64;
                    ObstaclePoint::new(d, angle, intensities.get(i).copied().unwrap_or(0.0))
                })
                .collect(),
        }
    }
}

/// Deterministic 360° scan used when the input shape is unrecognised.
///
/// One sample per `resolution_deg` at `background_m`, with three obstacles:
/// 45–55° at 2.0 m, 180–190° at 1.5 m and 270–280° at 3.0 m.
pub fn synthetic_scan(resolution_deg: f64, background_m: f64) -> Vec<ObstaclePoint> {
    let step = if resolution_deg > 0.0 { resolution_deg } else { 1.0 };
    let samples = (360.0 / step).floor() as usize;
    (0..samples)
        .map(|i| {
            let angle = i as f64 * step;
            let distance = match angle {
                a if (45.0..=55.0).contains(&a) => 2.0,
                a if (180.0..=190.0).contains(&a) => 1.5,
                a if (270.0..=280.0).contains(&a) => 3.0,
                _ => background_m,
            };
            let intensity = if distance < 5.0 { 0.8 } else { 0.3 };
            ObstaclePoint::new(distance, angle, intensity)
        })
        .collect()
}
