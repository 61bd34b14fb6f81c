//! Sensor normalisation: calibration and quality scoring of raw payloads.
//!
//! [`SensorNormalizer::normalize`] turns one raw JSON payload into a typed
//! [`SensorReading`]. It never fails: unparseable or missing fields default
//! to zero and the reading is marked invalid with its quality forced toward
//! zero, so a momentary sensor glitch degrades the estimate instead of
//! raising.
//!
//! # Quality scoring
//!
//! | Kind | Score |
//! |---|---|
//! | RFID | signal strength bands: ≥80 → 1.0, ≥60 → 0.8, ≥40 → 0.6, ≥20 → 0.4, else 0.2 |
//! | Accelerometer | deviation from 9.81 m/s²: ≤0.5 → 1.0, ≤1 → 0.8, ≤2 → 0.6, ≤5 → 0.4, else 0.2 |
//! | Compass | `0.5 · accuracy + 0.5 · field plausibility` (20–70 µT → 1.0) |
//! | Docking | fraction of the four channels inside `[0, 2]` m |
//! | LiDAR | fraction of range samples inside the plausible range |
//!
//! # Range rules
//!
//! A field outside its plausible range counts like a missing one: the
//! reading is marked invalid and its quality capped by the share of good
//! fields.
//!
//! | Kind | Rule |
//! |---|---|
//! | RFID | distance in `[0, 1000]` m, angle in `[-180, 180]`° |
//! | Accelerometer | each calibrated axis in `±20` m/s², magnitude ≤ 30 m/s² |
//! | Compass | field strength in `[0, 1000]` µT |
//!
//! Valid accelerometer samples are then smoothed with a moving average over
//! the last [`NormalizerConfig::smoothing_window`] raw samples.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use hauler_types::{
    AccelPayload, CompassPayload, CoreError, DockingPayload, RfidPayload, RingBuffer,
    ScanSummary, SensorKind, SensorPayload, SensorReading,
};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Accelerometer offset subtracted from every raw sample (m/s²).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccelCalibration {
    #[serde(alias = "x")]
    pub offset_x: f64,
    #[serde(alias = "y")]
    pub offset_y: f64,
    #[serde(alias = "z")]
    pub offset_z: f64,
}

/// `heading = (raw · scale + offset_deg) mod 360`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompassCalibration {
    #[serde(alias = "offset")]
    pub offset_deg: f64,
    pub scale: f64,
}

impl Default for CompassCalibration {
    fn default() -> Self {
        Self {
            offset_deg: 0.0,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Readings kept per sensor kind.
    pub history_capacity: usize,
    /// Accelerometer readings inspected by `detect_movement`.
    pub movement_window: usize,
    /// Gravity deviation (m/s²) above which the vehicle is considered moving.
    pub movement_threshold: f64,
    /// Front docking channel distance (m) at or below which we are docked.
    pub docked_distance_m: f64,
    /// Upper bound of a plausible docking channel reading (m).
    pub docking_max_range_m: f64,
    pub lidar_min_range_m: f64,
    pub lidar_max_range_m: f64,
    /// Range (m) below which a LiDAR return counts as a nearby obstacle in
    /// the reading summary.
    pub lidar_near_range_m: f64,
    /// Accelerometer samples averaged into each reading; 1 disables it.
    pub smoothing_window: usize,
    pub accelerometer: AccelCalibration,
    pub compass: CompassCalibration,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            movement_window: 5,
            movement_threshold: 0.5,
            docked_distance_m: 0.10,
            docking_max_range_m: 2.0,
            lidar_min_range_m: 0.1,
            lidar_max_range_m: 30.0,
            lidar_near_range_m: 2.0,
            smoothing_window: 5,
            accelerometer: AccelCalibration::default(),
            compass: CompassCalibration::default(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Field extraction
// ────────────────────────────────────────────────────────────────────────────

/// Pulls named fields out of a raw payload, counting the ones that had to
/// be defaulted.
struct Fields<'a> {
    raw: &'a Value,
    requested: usize,
    missing: usize,
    out_of_range: Vec<&'static str>,
}

impl<'a> Fields<'a> {
    fn new(raw: &'a Value) -> Self {
        Self {
            raw,
            requested: 0,
            missing: 0,
            out_of_range: Vec::new(),
        }
    }

    fn lookup(&self, names: &[&str]) -> Option<&'a Value> {
        let map = self.raw.as_object()?;
        names.iter().find_map(|n| map.get(*n)).filter(|v| !v.is_null())
    }

    fn number(&mut self, names: &[&str]) -> f64 {
        self.requested += 1;
        let parsed = self.lookup(names).and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        });
        match parsed {
            Some(n) if n.is_finite() => n,
            _ => {
                self.missing += 1;
                0.0
            }
        }
    }

    fn text(&mut self, names: &[&str]) -> String {
        self.requested += 1;
        match self.lookup(names) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                self.missing += 1;
                String::new()
            }
        }
    }

    fn numbers(&mut self, names: &[&str]) -> Vec<f64> {
        self.requested += 1;
        let values: Option<Vec<f64>> = self
            .lookup(names)
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_f64).collect());
        match values {
            Some(v) if !v.is_empty() => v,
            _ => {
                self.missing += 1;
                Vec::new()
            }
        }
    }

    /// Flag `value` when it falls outside `[lo, hi]`.
    fn bounded(&mut self, name: &'static str, value: f64, lo: f64, hi: f64) -> f64 {
        if !(lo..=hi).contains(&value) {
            self.out_of_range.push(name);
        }
        value
    }

    fn completeness(&self) -> f64 {
        if self.requested == 0 {
            return 0.0;
        }
        let bad = (self.missing + self.out_of_range.len()).min(self.requested);
        (self.requested - bad) as f64 / self.requested as f64
    }

    fn is_complete(&self) -> bool {
        self.missing == 0 && self.out_of_range.is_empty()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quality functions
// ────────────────────────────────────────────────────────────────────────────

/// `signal_strength` in percent (0–100).
pub fn rfid_quality(signal_strength: f64) -> f64 {
    match signal_strength {
        s if s >= 80.0 => 1.0,
        s if s >= 60.0 => 0.8,
        s if s >= 40.0 => 0.6,
        s if s >= 20.0 => 0.4,
        _ => 0.2,
    }
}

pub fn accelerometer_quality(gravity_deviation: f64) -> f64 {
    match gravity_deviation {
        d if d <= 0.5 => 1.0,
        d if d <= 1.0 => 0.8,
        d if d <= 2.0 => 0.6,
        d if d <= 5.0 => 0.4,
        _ => 0.2,
    }
}

pub fn compass_quality(accuracy: f64, field_strength_ut: f64) -> f64 {
    let field = if (20.0..=70.0).contains(&field_strength_ut) {
        1.0
    } else if (10.0..=100.0).contains(&field_strength_ut) {
        0.5
    } else {
        0.2
    };
    (0.5 * accuracy.clamp(0.0, 1.0) + 0.5 * field).clamp(0.0, 1.0)
}

fn fraction_within(values: &[f64], lo: f64, hi: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let inside = values.iter().filter(|v| (lo..=hi).contains(*v)).count();
    inside as f64 / values.len() as f64
}

// ────────────────────────────────────────────────────────────────────────────
// SensorNormalizer
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct KindStats {
    pub processed: u64,
    pub invalid: u64,
    pub average_quality: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizerStats {
    pub total_processed: u64,
    pub total_invalid: u64,
    pub per_kind: BTreeMap<SensorKind, KindStats>,
    pub history_capacity: usize,
}

pub struct SensorNormalizer {
    config: NormalizerConfig,
    history: HashMap<SensorKind, RingBuffer<SensorReading>>,
    /// Raw calibrated accelerometer samples feeding the moving average.
    accel_window: RingBuffer<AccelPayload>,
    stats: BTreeMap<SensorKind, KindStats>,
}

impl Default for SensorNormalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}

impl SensorNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self {
            accel_window: RingBuffer::new(config.smoothing_window),
            config,
            history: HashMap::new(),
            stats: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Normalise `raw` as a reading of `kind`, timestamped now.
    pub fn normalize(&mut self, kind: SensorKind, raw: &Value) -> SensorReading {
        self.normalize_at(kind, raw, Utc::now())
    }

    /// Normalise `raw` with an explicit acquisition timestamp.
    pub fn normalize_at(
        &mut self,
        kind: SensorKind,
        raw: &Value,
        timestamp: DateTime<Utc>,
    ) -> SensorReading {
        let mut fields = Fields::new(raw);
        let (payload, score) = match kind {
            SensorKind::Rfid => self.parse_rfid(&mut fields),
            SensorKind::Accelerometer => self.parse_accelerometer(&mut fields),
            SensorKind::Compass => self.parse_compass(&mut fields),
            SensorKind::Docking => self.parse_docking(&mut fields),
            SensorKind::Lidar => self.parse_lidar(&mut fields),
        };

        let valid = fields.is_complete();
        let quality = if valid {
            score
        } else {
            score.min(0.1 * fields.completeness())
        };
        let sensor_id = raw
            .get("sensor_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| kind.as_str().to_string());

        if !valid {
            warn!(
                %kind,
                sensor_id = %sensor_id,
                completeness = fields.completeness(),
                out_of_range = ?fields.out_of_range,
                "incomplete or implausible sensor payload; reading marked invalid"
            );
        }
        let payload = if valid { self.smooth(payload) } else { payload };

        let reading = SensorReading {
            kind,
            sensor_id,
            payload,
            quality: quality.clamp(0.0, 1.0),
            valid,
            timestamp,
        };
        self.record(&reading);
        reading
    }

    fn parse_rfid(&self, fields: &mut Fields<'_>) -> (SensorPayload, f64) {
        let tag_id = fields.text(&["tag_id", "rfid_id"]);
        let signal_strength = fields.number(&["signal_strength"]).clamp(0.0, 100.0);
        let distance = fields.number(&["distance"]);
        let angle = fields.number(&["angle"]);
        let payload = RfidPayload {
            tag_id,
            signal_strength,
            distance: fields.bounded("distance", distance, 0.0, 1000.0),
            angle: fields.bounded("angle", angle, -180.0, 180.0),
        };
        let score = rfid_quality(payload.signal_strength);
        (SensorPayload::Rfid(payload), score)
    }

    fn parse_accelerometer(&self, fields: &mut Fields<'_>) -> (SensorPayload, f64) {
        let cal = self.config.accelerometer;
        let payload = AccelPayload {
            x: fields.number(&["x", "ax"]) - cal.offset_x,
            y: fields.number(&["y", "ay"]) - cal.offset_y,
            z: fields.number(&["z", "az"]) - cal.offset_z,
        };
        fields.bounded("x", payload.x, -20.0, 20.0);
        fields.bounded("y", payload.y, -20.0, 20.0);
        fields.bounded("z", payload.z, -20.0, 20.0);
        fields.bounded("magnitude", payload.magnitude(), 0.0, 30.0);
        let score = accelerometer_quality(payload.gravity_deviation());
        (SensorPayload::Accelerometer(payload), score)
    }

    fn parse_compass(&self, fields: &mut Fields<'_>) -> (SensorPayload, f64) {
        let cal = self.config.compass;
        let raw_heading = fields.number(&["heading"]);
        let accuracy = fields.number(&["accuracy"]).clamp(0.0, 1.0);
        let field = fields.number(&["field_strength"]);
        let payload = CompassPayload {
            heading_deg: (raw_heading * cal.scale + cal.offset_deg).rem_euclid(360.0),
            accuracy,
            field_strength_ut: fields.bounded("field_strength", field, 0.0, 1000.0),
        };
        let score = compass_quality(payload.accuracy, payload.field_strength_ut);
        (SensorPayload::Compass(payload), score)
    }

    fn parse_docking(&self, fields: &mut Fields<'_>) -> (SensorPayload, f64) {
        let payload = DockingPayload {
            front: fields.number(&["front"]),
            left: fields.number(&["left"]),
            right: fields.number(&["right"]),
            back: fields.number(&["back"]),
        };
        let score = fraction_within(&payload.channels(), 0.0, self.config.docking_max_range_m);
        (SensorPayload::Docking(payload), score)
    }

    fn parse_lidar(&self, fields: &mut Fields<'_>) -> (SensorPayload, f64) {
        let ranges = fields.numbers(&["ranges", "scan_data"]);
        let (lo, hi) = (self.config.lidar_min_range_m, self.config.lidar_max_range_m);
        let in_range: Vec<f64> = ranges
            .iter()
            .copied()
            .filter(|r| (lo..=hi).contains(r))
            .collect();
        let valid_fraction = fraction_within(&ranges, lo, hi);
        let summary = ScanSummary {
            point_count: in_range.len(),
            obstacle_count: in_range
                .iter()
                .filter(|r| **r < self.config.lidar_near_range_m)
                .count(),
            valid_fraction,
        };
        (SensorPayload::Lidar(summary), valid_fraction)
    }

    /// Replace a valid accelerometer sample by the mean of the last
    /// `smoothing_window` raw samples. Other payloads pass through.
    fn smooth(&mut self, payload: SensorPayload) -> SensorPayload {
        let SensorPayload::Accelerometer(sample) = payload else {
            return payload;
        };
        self.accel_window.push(sample);
        let n = self.accel_window.len() as f64;
        let (x, y, z) = self
            .accel_window
            .iter()
            .fold((0.0, 0.0, 0.0), |(x, y, z), a| (x + a.x, y + a.y, z + a.z));
        SensorPayload::Accelerometer(AccelPayload {
            x: x / n,
            y: y / n,
            z: z / n,
        })
    }

    fn record(&mut self, reading: &SensorReading) {
        let capacity = self.config.history_capacity;
        self.history
            .entry(reading.kind)
            .or_insert_with(|| RingBuffer::new(capacity))
            .push(reading.clone());

        let stats = self.stats.entry(reading.kind).or_default();
        stats.processed += 1;
        if !reading.valid {
            stats.invalid += 1;
        }
        stats.average_quality +=
            (reading.quality - stats.average_quality) / stats.processed as f64;
        debug!(kind = %reading.kind, quality = reading.quality, "sensor reading normalised");
    }

    /// Replace the stored calibration constants for `kind`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::UnsupportedCalibration`] for kinds other than
    ///   accelerometer and compass.
    /// - [`CoreError::InvalidInput`] when `data` cannot be parsed or the
    ///   compass scale is zero/non-finite.
    pub fn calibrate(&mut self, kind: SensorKind, data: &Value) -> Result<(), CoreError> {
        match kind {
            SensorKind::Accelerometer => {
                let cal: AccelCalibration = serde_json::from_value(data.clone())
                    .map_err(|e| CoreError::InvalidInput(format!("accelerometer calibration: {e}")))?;
                if ![cal.offset_x, cal.offset_y, cal.offset_z]
                    .iter()
                    .all(|v| v.is_finite())
                {
                    return Err(CoreError::InvalidInput(
                        "accelerometer offsets must be finite".to_string(),
                    ));
                }
                self.config.accelerometer = cal;
            }
            SensorKind::Compass => {
                let cal: CompassCalibration = serde_json::from_value(data.clone())
                    .map_err(|e| CoreError::InvalidInput(format!("compass calibration: {e}")))?;
                if !cal.scale.is_finite() || cal.scale == 0.0 || !cal.offset_deg.is_finite() {
                    return Err(CoreError::InvalidInput(
                        "compass scale must be finite and non-zero".to_string(),
                    ));
                }
                self.config.compass = cal;
            }
            other => return Err(CoreError::UnsupportedCalibration(other)),
        }
        info!(%kind, "calibration updated");
        Ok(())
    }

    // ── queries ─────────────────────────────────────────────────────────────

    pub fn latest(&self, kind: SensorKind) -> Option<&SensorReading> {
        self.history.get(&kind).and_then(RingBuffer::latest)
    }

    pub fn latest_valid(&self, kind: SensorKind) -> Option<&SensorReading> {
        self.history
            .get(&kind)
            .and_then(|h| h.iter().rev().find(|r| r.valid))
    }

    /// All retained readings of `kind`, oldest first.
    pub fn history(&self, kind: SensorKind) -> Vec<SensorReading> {
        self.history
            .get(&kind)
            .map(RingBuffer::to_vec)
            .unwrap_or_default()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.accel_window.clear();
    }

    /// `true` when any of the last few valid accelerometer readings deviates
    /// from gravity by more than the movement threshold.
    pub fn detect_movement(&self) -> bool {
        let Some(history) = self.history.get(&SensorKind::Accelerometer) else {
            return false;
        };
        history
            .iter()
            .rev()
            .filter(|r| r.valid)
            .take(self.config.movement_window)
            .any(|r| match &r.payload {
                SensorPayload::Accelerometer(a) => {
                    a.gravity_deviation() > self.config.movement_threshold
                }
                _ => false,
            })
    }

    /// Latest valid compass heading in degrees.
    pub fn current_heading(&self) -> Option<f64> {
        match &self.latest_valid(SensorKind::Compass)?.payload {
            SensorPayload::Compass(c) => Some(c.heading_deg),
            _ => None,
        }
    }

    pub fn is_docked(&self) -> bool {
        match self.latest_valid(SensorKind::Docking).map(|r| &r.payload) {
            Some(SensorPayload::Docking(d)) => {
                d.front >= 0.0 && d.front <= self.config.docked_distance_m
            }
            _ => false,
        }
    }

    /// Closest docking channel of the latest valid docking reading, in mm.
    pub fn nearest_proximity_mm(&self) -> Option<f64> {
        match &self.latest_valid(SensorKind::Docking)?.payload {
            SensorPayload::Docking(d) => d.nearest().map(|m| m * 1000.0),
            _ => None,
        }
    }

    pub fn processing_stats(&self) -> NormalizerStats {
        NormalizerStats {
            total_processed: self.stats.values().map(|s| s.processed).sum(),
            total_invalid: self.stats.values().map(|s| s.invalid).sum(),
            per_kind: self.stats.clone(),
            history_capacity: self.config.history_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer() -> SensorNormalizer {
        SensorNormalizer::default()
    }

    #[test]
    fn rfid_bands() {
        let mut n = normalizer();
        for (strength, expected) in [(85.0, 1.0), (65.0, 0.8), (45.0, 0.6), (25.0, 0.4), (5.0, 0.2)] {
            let r = n.normalize(
                SensorKind::Rfid,
                &json!({"tag_id": "T1", "signal_strength": strength, "distance": 0.3, "angle": 0.0}),
            );
            assert!(r.valid);
            assert!((r.quality - expected).abs() < 1e-9, "strength {strength}");
        }
    }

    #[test]
    fn rfid_accepts_legacy_id_field() {
        let mut n = normalizer();
        let r = n.normalize(
            SensorKind::Rfid,
            &json!({"rfid_id": "T9", "signal_strength": 90, "distance": 0.1, "angle": 10}),
        );
        match r.payload {
            SensorPayload::Rfid(p) => assert_eq!(p.tag_id, "T9"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn accelerometer_quality_tracks_gravity_deviation() {
        let mut n = normalizer();
        let at_rest = n.normalize(SensorKind::Accelerometer, &json!({"x": 0.0, "y": 0.0, "z": 9.81}));
        assert_eq!(at_rest.quality, 1.0);
        let shaken = n.normalize(SensorKind::Accelerometer, &json!({"x": 12.0, "y": 0.0, "z": 9.81}));
        assert_eq!(shaken.quality, 0.2);
    }

    #[test]
    fn compass_combines_accuracy_and_field() {
        let mut n = normalizer();
        let good = n.normalize(
            SensorKind::Compass,
            &json!({"heading": 90.0, "accuracy": 1.0, "field_strength": 45.0}),
        );
        assert!((good.quality - 1.0).abs() < 1e-9);
        let weak_field = n.normalize(
            SensorKind::Compass,
            &json!({"heading": 90.0, "accuracy": 1.0, "field_strength": 5.0}),
        );
        assert!((weak_field.quality - 0.6).abs() < 1e-9);
    }

    #[test]
    fn docking_quality_is_plausible_fraction() {
        let mut n = normalizer();
        let r = n.normalize(
            SensorKind::Docking,
            &json!({"front": 0.5, "left": 1.0, "right": 3.0, "back": -1.0}),
        );
        assert!((r.quality - 0.5).abs() < 1e-9);
    }

    #[test]
    fn missing_fields_fail_soft() {
        let mut n = normalizer();
        let r = n.normalize(SensorKind::Accelerometer, &json!({"x": 0.0, "z": "garbage"}));
        assert!(!r.valid);
        // 1 of 3 fields present → quality capped at 0.1 · 1/3.
        assert!(r.quality <= 0.1 / 3.0 + 1e-9);
        match r.payload {
            SensorPayload::Accelerometer(a) => assert_eq!(a.y, 0.0),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn non_object_payload_has_zero_quality() {
        let mut n = normalizer();
        let r = n.normalize(SensorKind::Compass, &json!([1, 2, 3]));
        assert!(!r.valid);
        assert_eq!(r.quality, 0.0);
    }

    #[test]
    fn numeric_strings_are_parsed() {
        let mut n = normalizer();
        let r = n.normalize(
            SensorKind::Docking,
            &json!({"front": "0.05", "left": "1", "right": "1", "back": "1"}),
        );
        assert!(r.valid);
        assert!(n.is_docked());
    }

    #[test]
    fn accelerometer_calibration_subtracts_offset() {
        let mut n = normalizer();
        n.calibrate(SensorKind::Accelerometer, &json!({"offset_x": 0.5, "offset_y": 0.0, "offset_z": 0.2}))
            .unwrap();
        let r = n.normalize(SensorKind::Accelerometer, &json!({"x": 0.5, "y": 0.0, "z": 10.01}));
        match r.payload {
            SensorPayload::Accelerometer(a) => {
                assert!(a.x.abs() < 1e-9);
                assert!((a.z - 9.81).abs() < 1e-9);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn compass_calibration_wraps_heading() {
        let mut n = normalizer();
        n.calibrate(SensorKind::Compass, &json!({"offset": 20.0, "scale": 1.0})).unwrap();
        n.normalize(
            SensorKind::Compass,
            &json!({"heading": 350.0, "accuracy": 0.9, "field_strength": 50.0}),
        );
        let heading = n.current_heading().unwrap();
        assert!((heading - 10.0).abs() < 1e-9);
    }

    #[test]
    fn unsupported_calibration_is_rejected() {
        let mut n = normalizer();
        for kind in [SensorKind::Rfid, SensorKind::Docking, SensorKind::Lidar] {
            let err = n.calibrate(kind, &json!({})).unwrap_err();
            assert_eq!(err, CoreError::UnsupportedCalibration(kind));
        }
    }

    #[test]
    fn zero_compass_scale_is_invalid() {
        let mut n = normalizer();
        let err = n.calibrate(SensorKind::Compass, &json!({"scale": 0.0})).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn movement_detection_uses_recent_window() {
        let mut n = normalizer();
        n.normalize(SensorKind::Accelerometer, &json!({"x": 5.0, "y": 0.0, "z": 9.81}));
        assert!(n.detect_movement());
        for _ in 0..5 {
            n.normalize(SensorKind::Accelerometer, &json!({"x": 0.0, "y": 0.0, "z": 9.81}));
        }
        assert!(!n.detect_movement());
    }

    #[test]
    fn out_of_range_accelerometer_is_invalid() {
        let mut n = normalizer();
        let r = n.normalize(SensorKind::Accelerometer, &json!({"x": 500.0, "y": 0.0, "z": 9.81}));
        assert!(!r.valid);
        // Both the x axis and the magnitude rule trip.
        assert!(r.quality <= 0.05 + 1e-9);
        assert!(n.latest_valid(SensorKind::Accelerometer).is_none());
        assert!(!n.detect_movement());
        assert_eq!(n.processing_stats().total_invalid, 1);
    }

    #[test]
    fn out_of_range_rfid_geometry_is_invalid() {
        let mut n = normalizer();
        let far = n.normalize(
            SensorKind::Rfid,
            &json!({"tag_id": "T1", "signal_strength": 90, "distance": 1500.0, "angle": 0.0}),
        );
        assert!(!far.valid);
        let skewed = n.normalize(
            SensorKind::Rfid,
            &json!({"tag_id": "T1", "signal_strength": 90, "distance": 1.0, "angle": -190.0}),
        );
        assert!(!skewed.valid);
        assert!(skewed.quality < 0.1);
    }

    #[test]
    fn negative_compass_field_is_invalid() {
        let mut n = normalizer();
        let r = n.normalize(
            SensorKind::Compass,
            &json!({"heading": 90.0, "accuracy": 1.0, "field_strength": -3.0}),
        );
        assert!(!r.valid);
        assert!(n.current_heading().is_none());
    }

    #[test]
    fn accelerometer_is_smoothed_over_window() {
        let mut n = normalizer();
        for x in [1.0, 2.0, 3.0] {
            n.normalize(SensorKind::Accelerometer, &json!({"x": x, "y": 0.0, "z": 9.81}));
        }
        match &n.latest(SensorKind::Accelerometer).unwrap().payload {
            SensorPayload::Accelerometer(a) => {
                assert!((a.x - 2.0).abs() < 1e-9);
                assert!((a.z - 9.81).abs() < 1e-9);
            }
            other => panic!("unexpected payload {other:?}"),
        }

        // Only the last five raw samples count; invalid ones never enter.
        n.normalize(SensorKind::Accelerometer, &json!({"x": 500.0, "y": 0.0, "z": 9.81}));
        for x in [4.0, 5.0, 6.0] {
            n.normalize(SensorKind::Accelerometer, &json!({"x": x, "y": 0.0, "z": 9.81}));
        }
        match &n.latest(SensorKind::Accelerometer).unwrap().payload {
            SensorPayload::Accelerometer(a) => assert!((a.x - 4.0).abs() < 1e-9),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn smoothing_window_of_one_passes_samples_through() {
        let mut n = SensorNormalizer::new(NormalizerConfig {
            smoothing_window: 1,
            ..NormalizerConfig::default()
        });
        n.normalize(SensorKind::Accelerometer, &json!({"x": 8.0, "y": 0.0, "z": 9.81}));
        n.normalize(SensorKind::Accelerometer, &json!({"x": 2.0, "y": 0.0, "z": 9.81}));
        match &n.latest(SensorKind::Accelerometer).unwrap().payload {
            SensorPayload::Accelerometer(a) => assert_eq!(a.x, 2.0),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn history_is_bounded() {
        let mut n = SensorNormalizer::new(NormalizerConfig {
            history_capacity: 3,
            ..NormalizerConfig::default()
        });
        for i in 0..10 {
            n.normalize(
                SensorKind::Compass,
                &json!({"heading": i as f64, "accuracy": 1.0, "field_strength": 50.0}),
            );
        }
        let history = n.history(SensorKind::Compass);
        assert_eq!(history.len(), 3);
        assert_eq!(n.processing_stats().total_processed, 10);
    }

    #[test]
    fn lidar_summary_counts_valid_ranges() {
        let mut n = normalizer();
        let r = n.normalize(SensorKind::Lidar, &json!({"ranges": [0.05, 1.0, 5.0, 40.0]}));
        assert!((r.quality - 0.5).abs() < 1e-9);
        match r.payload {
            SensorPayload::Lidar(s) => {
                assert_eq!(s.point_count, 2);
                assert_eq!(s.obstacle_count, 1);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn nearest_proximity_converts_to_mm() {
        let mut n = normalizer();
        n.normalize(
            SensorKind::Docking,
            &json!({"front": 0.8, "left": 0.04, "right": 1.0, "back": 1.5}),
        );
        assert!((n.nearest_proximity_mm().unwrap() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn sensor_id_defaults_to_kind() {
        let mut n = normalizer();
        let r = n.normalize(SensorKind::Compass, &json!({"heading": 1, "accuracy": 1, "field_strength": 30}));
        assert_eq!(r.sensor_id, "compass");
        let r = n.normalize(
            SensorKind::Compass,
            &json!({"sensor_id": "mag_2", "heading": 1, "accuracy": 1, "field_strength": 30}),
        );
        assert_eq!(r.sensor_id, "mag_2");
    }
}
