//! Pose estimation: multi-sensor fusion into one [`Pose`].
//!
//! Each [`PoseEstimator::estimate`] cycle gathers the most recent valid
//! reading of every kind inside the freshness window and turns each into a
//! position candidate:
//!
//! | Source | Candidate | Confidence |
//! |---|---|---|
//! | RFID | registered tag position | `min(signal, 0.95)`; dropped below 0.5 or for unknown tags |
//! | Accelerometer | Euler dead reckoning from the prior pose | 0.6 |
//! | Docking | [`PoseCorrection`] of the prior pose | 0.7 |
//! | LiDAR | [`PoseCorrection`] of the prior pose | 0.5 |
//!
//! Candidates vote with `static_weight × confidence`. Position is the
//! weighted mean, heading the weighted circular mean, and overall confidence
//! `min(Σ votes, 0.95)`. A fresh compass reading is then blended into the
//! heading with a complementary filter weighted by compass quality.
//!
//! With no usable candidate the previous pose is kept untouched and the
//! estimator raises its low-confidence flag; `estimate` never fails.

use std::collections::{BTreeMap, HashMap};
use std::f64::consts::PI;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use hauler_types::{
    MAX_POSE_CONFIDENCE, Pose, RingBuffer, SensorKind, SensorPayload, SensorReading,
};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Static per-source voting weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceWeights {
    pub rfid: f64,
    pub accelerometer: f64,
    pub docking: f64,
    pub lidar: f64,
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            rfid: 0.4,
            accelerometer: 0.2,
            docking: 0.2,
            lidar: 0.2,
        }
    }
}

impl SourceWeights {
    pub fn for_kind(&self, kind: SensorKind) -> f64 {
        match kind {
            SensorKind::Rfid => self.rfid,
            SensorKind::Accelerometer => self.accelerometer,
            SensorKind::Docking => self.docking,
            SensorKind::Lidar => self.lidar,
            SensorKind::Compass => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Readings older than this are treated as absent.
    pub freshness_ms: u64,
    pub history_capacity: usize,
    /// Normalised RFID signal below which a tag sighting is ignored.
    pub rfid_min_signal: f64,
    pub weights: SourceWeights,
    pub accelerometer_confidence: f64,
    pub docking_confidence: f64,
    pub lidar_confidence: f64,
    /// Gain of the compass complementary filter at compass quality 1.0.
    pub compass_blend: f64,
    /// Upper bound on one dead-reckoning integration step.
    pub max_dead_reckoning_ms: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            freshness_ms: 5000,
            history_capacity: 100,
            rfid_min_signal: 0.5,
            weights: SourceWeights::default(),
            accelerometer_confidence: 0.6,
            docking_confidence: 0.7,
            lidar_confidence: 0.5,
            compass_blend: 0.5,
            max_dead_reckoning_ms: 5000,
        }
    }
}

/// Surveyed position of one floor RFID tag, in millimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagPosition {
    pub tag_id: String,
    pub x: f64,
    pub y: f64,
    /// Heading to adopt when the tag is read, if the tag encodes one.
    #[serde(default)]
    pub theta: Option<f64>,
}

// ────────────────────────────────────────────────────────────────────────────
// Correction extension point
// ────────────────────────────────────────────────────────────────────────────

/// Refines an existing pose from a relative sensor (docking array, range
/// scanner). Neither sensor yields an independent global position.
pub trait PoseCorrection: Send + Sync {
    fn correct(&self, prior: &Pose, reading: &SensorReading) -> Pose;
}

/// Returns the prior unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct HoldPose;

impl PoseCorrection for HoldPose {
    fn correct(&self, prior: &Pose, _reading: &SensorReading) -> Pose {
        prior.clone()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Results
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub kind: SensorKind,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub vx: Option<f64>,
    pub vy: Option<f64>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Estimate {
    /// A new pose was fused this cycle.
    Fused(Pose),
    /// Nothing usable was fresh; the previous pose is returned unchanged.
    Stale(Pose),
    /// Nothing usable was fresh and no fix has ever been made.
    NoData,
}

impl Estimate {
    pub fn pose(&self) -> Option<&Pose> {
        match self {
            Estimate::Fused(p) | Estimate::Stale(p) => Some(p),
            Estimate::NoData => None,
        }
    }

    pub fn is_fused(&self) -> bool {
        matches!(self, Estimate::Fused(_))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EstimatorStats {
    pub total_fixes: u64,
    pub stale_cycles: u64,
    pub average_confidence: f64,
    /// Number of fixes each source contributed a candidate to.
    pub source_usage: BTreeMap<SensorKind, u64>,
    pub low_confidence: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// PoseEstimator
// ────────────────────────────────────────────────────────────────────────────

pub struct PoseEstimator {
    config: EstimatorConfig,
    tags: HashMap<String, TagPosition>,
    latest: HashMap<SensorKind, SensorReading>,
    pose: Pose,
    has_fix: bool,
    low_confidence: bool,
    link_reachable: bool,
    history: RingBuffer<Pose>,
    docking_correction: Box<dyn PoseCorrection>,
    lidar_correction: Box<dyn PoseCorrection>,
    stats: EstimatorStats,
}

impl Default for PoseEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

impl PoseEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        let history = RingBuffer::new(config.history_capacity);
        Self {
            config,
            tags: HashMap::new(),
            latest: HashMap::new(),
            pose: Pose::unknown(),
            has_fix: false,
            low_confidence: true,
            link_reachable: true,
            history,
            docking_correction: Box::new(HoldPose),
            lidar_correction: Box::new(HoldPose),
            stats: EstimatorStats {
                low_confidence: true,
                ..EstimatorStats::default()
            },
        }
    }

    pub fn with_docking_correction(mut self, correction: Box<dyn PoseCorrection>) -> Self {
        self.docking_correction = correction;
        self
    }

    pub fn with_lidar_correction(mut self, correction: Box<dyn PoseCorrection>) -> Self {
        self.lidar_correction = correction;
        self
    }

    pub fn register_tag(&mut self, tag: TagPosition) {
        debug!(tag_id = %tag.tag_id, x = tag.x, y = tag.y, "registered RFID tag");
        self.tags.insert(tag.tag_id.clone(), tag);
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    /// Offer a reading to the next fusion cycle. Only the newest reading per
    /// kind is kept.
    pub fn ingest(&mut self, reading: SensorReading) {
        match self.latest.get(&reading.kind) {
            Some(existing) if existing.timestamp > reading.timestamp => {}
            _ => {
                self.latest.insert(reading.kind, reading);
            }
        }
    }

    /// Adopt `pose` as the current fix, e.g. a surveyed start position.
    pub fn seed(&mut self, pose: Pose) {
        info!(x = pose.x, y = pose.y, theta = pose.theta, "pose seeded");
        self.pose = pose.clone();
        self.has_fix = true;
        self.low_confidence = false;
        self.history.push(pose);
    }

    /// Carry the prior forward with externally tracked motion. Ignored before
    /// the first fix; neither history nor statistics change.
    pub fn apply_odometry(&mut self, tracked: &Pose) {
        if !self.has_fix || tracked.timestamp <= self.pose.timestamp {
            return;
        }
        self.pose.x = tracked.x;
        self.pose.y = tracked.y;
        self.pose.theta = tracked.theta;
        self.pose.vx = tracked.vx;
        self.pose.vy = tracked.vy;
        self.pose.timestamp = tracked.timestamp;
    }

    pub fn set_link_reachable(&mut self, reachable: bool) {
        if self.link_reachable != reachable {
            warn!(reachable, "firmware link reachability changed");
        }
        self.link_reachable = reachable;
    }

    pub fn estimate(&mut self) -> Estimate {
        self.estimate_at(Utc::now())
    }

    pub fn estimate_at(&mut self, now: DateTime<Utc>) -> Estimate {
        let window = Duration::milliseconds(self.config.freshness_ms as i64);
        let fresh: HashMap<SensorKind, &SensorReading> = self
            .latest
            .iter()
            .filter(|(_, r)| r.is_fresh_at(now, window))
            .map(|(k, r)| (*k, r))
            .collect();

        let mut candidates = Vec::new();
        for kind in SensorKind::ALL {
            let Some(reading) = fresh.get(&kind) else {
                continue;
            };
            let candidate = match kind {
                SensorKind::Rfid => self.rfid_candidate(reading),
                SensorKind::Accelerometer => self.dead_reckoning_candidate(reading),
                SensorKind::Docking => self.correction_candidate(
                    kind,
                    self.docking_correction.as_ref(),
                    self.config.docking_confidence,
                    reading,
                ),
                SensorKind::Lidar => self.correction_candidate(
                    kind,
                    self.lidar_correction.as_ref(),
                    self.config.lidar_confidence,
                    reading,
                ),
                SensorKind::Compass => None,
            };
            candidates.extend(candidate);
        }

        let compass = fresh.get(&SensorKind::Compass).and_then(|r| match &r.payload {
            SensorPayload::Compass(c) => Some((c.heading_deg.to_radians(), r.quality)),
            _ => None,
        });

        match self.fuse(&candidates, compass, now) {
            Some(pose) => {
                self.record_fix(&candidates, pose.clone());
                Estimate::Fused(pose)
            }
            None => {
                self.low_confidence = true;
                self.stats.stale_cycles += 1;
                self.stats.low_confidence = true;
                debug!("no usable pose candidates; holding previous pose");
                if self.has_fix {
                    Estimate::Stale(self.pose.clone())
                } else {
                    Estimate::NoData
                }
            }
        }
    }

    fn rfid_candidate(&self, reading: &SensorReading) -> Option<Candidate> {
        let SensorPayload::Rfid(rfid) = &reading.payload else {
            return None;
        };
        let signal = rfid.normalized_signal();
        if signal < self.config.rfid_min_signal {
            return None;
        }
        let Some(tag) = self.tags.get(&rfid.tag_id) else {
            debug!(tag_id = %rfid.tag_id, "unknown RFID tag ignored");
            return None;
        };
        Some(Candidate {
            kind: SensorKind::Rfid,
            x: tag.x,
            y: tag.y,
            theta: tag.theta.unwrap_or(self.pose.theta),
            vx: None,
            vy: None,
            confidence: signal.min(MAX_POSE_CONFIDENCE),
        })
    }

    fn dead_reckoning_candidate(&self, reading: &SensorReading) -> Option<Candidate> {
        if !self.has_fix {
            return None;
        }
        let SensorPayload::Accelerometer(accel) = &reading.payload else {
            return None;
        };
        let max_dt = self.config.max_dead_reckoning_ms as f64 / 1000.0;
        let dt = ((reading.timestamp - self.pose.timestamp).num_milliseconds() as f64 / 1000.0)
            .clamp(0.0, max_dt);

        let (sin, cos) = self.pose.theta.sin_cos();
        // Vehicle-frame m/s² to world-frame mm/s².
        let ax = (accel.x * cos - accel.y * sin) * 1000.0;
        let ay = (accel.x * sin + accel.y * cos) * 1000.0;
        let prior = &self.pose;

        Some(Candidate {
            kind: SensorKind::Accelerometer,
            x: prior.x + prior.vx * dt + 0.5 * ax * dt * dt,
            y: prior.y + prior.vy * dt + 0.5 * ay * dt * dt,
            theta: prior.theta,
            vx: Some(prior.vx + ax * dt),
            vy: Some(prior.vy + ay * dt),
            confidence: self.config.accelerometer_confidence,
        })
    }

    fn correction_candidate(
        &self,
        kind: SensorKind,
        correction: &dyn PoseCorrection,
        confidence: f64,
        reading: &SensorReading,
    ) -> Option<Candidate> {
        if !self.has_fix {
            return None;
        }
        let corrected = correction.correct(&self.pose, reading);
        Some(Candidate {
            kind,
            x: corrected.x,
            y: corrected.y,
            theta: corrected.theta,
            vx: None,
            vy: None,
            confidence,
        })
    }

    /// Weighted fusion of `candidates`; `None` when nothing carries weight.
    pub fn fuse(
        &self,
        candidates: &[Candidate],
        compass: Option<(f64, f64)>,
        now: DateTime<Utc>,
    ) -> Option<Pose> {
        let votes: Vec<(f64, &Candidate)> = candidates
            .iter()
            .map(|c| (self.config.weights.for_kind(c.kind) * c.confidence, c))
            .filter(|(w, _)| *w > 0.0 && w.is_finite())
            .collect();
        let total: f64 = votes.iter().map(|(w, _)| w).sum();
        if total <= 0.0 {
            return None;
        }

        let x = votes.iter().map(|(w, c)| w * c.x).sum::<f64>() / total;
        let y = votes.iter().map(|(w, c)| w * c.y).sum::<f64>() / total;
        let sin = votes.iter().map(|(w, c)| w * c.theta.sin()).sum::<f64>();
        let cos = votes.iter().map(|(w, c)| w * c.theta.cos()).sum::<f64>();
        let mut theta = sin.atan2(cos);

        if let Some((heading, quality)) = compass {
            let gain = (self.config.compass_blend * quality).clamp(0.0, 1.0);
            theta += gain * wrap_angle(heading - theta);
            theta = wrap_angle(theta);
        }

        let provenance = candidates
            .iter()
            .fold(None::<&Candidate>, |best, c| match best {
                Some(b) if b.confidence >= c.confidence => Some(b),
                _ => Some(c),
            })
            .map(|c| c.kind);

        let (vx, vy) = match candidates.iter().find(|c| c.vx.is_some()) {
            Some(c) => (c.vx.unwrap_or(0.0), c.vy.unwrap_or(0.0)),
            None => {
                let dt = (now - self.pose.timestamp).num_milliseconds() as f64 / 1000.0;
                if self.has_fix && dt > 0.0 {
                    ((x - self.pose.x) / dt, (y - self.pose.y) / dt)
                } else {
                    (0.0, 0.0)
                }
            }
        };

        Some(Pose {
            x,
            y,
            theta,
            vx,
            vy,
            confidence: total.min(MAX_POSE_CONFIDENCE),
            provenance,
            degraded: !self.link_reachable,
            timestamp: now,
        })
    }

    fn record_fix(&mut self, candidates: &[Candidate], pose: Pose) {
        self.stats.total_fixes += 1;
        self.stats.average_confidence += (pose.confidence - self.stats.average_confidence)
            / self.stats.total_fixes as f64;
        for c in candidates {
            *self.stats.source_usage.entry(c.kind).or_insert(0) += 1;
        }
        self.stats.low_confidence = false;
        debug!(
            x = pose.x,
            y = pose.y,
            theta = pose.theta,
            confidence = pose.confidence,
            provenance = ?pose.provenance,
            "pose fused"
        );
        self.pose = pose.clone();
        self.has_fix = true;
        self.low_confidence = false;
        self.history.push(pose);
    }

    // ── queries ─────────────────────────────────────────────────────────────

    pub fn pose(&self) -> Pose {
        self.pose.clone()
    }

    pub fn has_fix(&self) -> bool {
        self.has_fix
    }

    pub fn is_low_confidence(&self) -> bool {
        self.low_confidence
    }

    /// The newest `limit` poses, oldest first.
    pub fn history(&self, limit: usize) -> Vec<Pose> {
        self.history.last_n(limit).into_iter().cloned().collect()
    }

    pub fn stats(&self) -> EstimatorStats {
        self.stats.clone()
    }

    /// Forget every fix, reading and statistic; tags stay registered.
    pub fn reset(&mut self) {
        self.pose = Pose::unknown();
        self.has_fix = false;
        self.low_confidence = true;
        self.latest.clear();
        self.history.clear();
        self.stats = EstimatorStats {
            low_confidence: true,
            ..EstimatorStats::default()
        };
        info!("pose estimator reset");
    }
}

/// Wrap an angle into `(-π, π]`.
pub fn wrap_angle(a: f64) -> f64 {
    let wrapped = (a + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped == -PI { PI } else { wrapped }
}
