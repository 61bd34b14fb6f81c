//! Obstacle detection and tracking from one rotating range scan.
//!
//! [`ObstacleTracker::process_scan`] runs the whole pipeline synchronously:
//!
//! 1. parse the raw payload ([`RawScan`]), or substitute a deterministic
//!    synthetic scan when the shape is unrecognised;
//! 2. keep samples within `[min_range, max_range]` metres and `[0°, 360°)`,
//!    clamping intensity to `[0, 1]`;
//! 3. single-linkage clustering of samples closer than `cluster_distance_m`,
//!    dropping clusters smaller than `min_cluster_size`;
//! 4. geometry, classification and confidence per cluster;
//! 5. nearest-centroid association against live tracks, which keeps ids
//!    stable across scans and upgrades `Static → Dynamic` on movement.
//!
//! Internal failures never escape: they yield [`Scan::empty`] with quality 0,
//! which downstream consumers must read as "no obstacle information".

use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use hauler_types::{Obstacle, ObstaclePoint, ObstacleType, Point2, RingBuffer, Scan, Severity};

use crate::scan::{RawScan, synthetic_scan};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub min_range_m: f64,
    pub max_range_m: f64,
    pub angle_resolution_deg: f64,
    pub cluster_distance_m: f64,
    pub min_cluster_size: usize,
    /// Scans with more raw samples than this are rejected.
    pub max_points: usize,
    /// Tracks not re-observed for this long are evicted.
    pub track_ttl_ms: u64,
    /// Maximum centroid jump (m) for a cluster to keep a track's id.
    pub association_gate_m: f64,
    /// Centroids kept per track.
    pub history_len: usize,
    /// Movement (m) over the last three frames that marks a static
    /// obstacle as dynamic.
    pub dynamic_movement_m: f64,
    pub budget_ms: f64,
    /// Processing times kept for statistics.
    pub stats_window: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_range_m: 0.1,
            max_range_m: 30.0,
            angle_resolution_deg: 1.0,
            cluster_distance_m: 0.3,
            min_cluster_size: 3,
            max_points: 8192,
            track_ttl_ms: 2000,
            association_gate_m: 1.0,
            history_len: 10,
            dynamic_movement_m: 0.5,
            budget_ms: 20.0,
            stats_window: 100,
        }
    }
}

#[derive(Debug, Error)]
enum ScanFault {
    #[error("scan carries {0} samples, above the configured maximum")]
    TooManyPoints(usize),
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerStats {
    pub scan_count: u64,
    pub obstacle_count: u64,
    pub failed_scans: u64,
    pub avg_processing_ms: f64,
    pub min_processing_ms: f64,
    pub max_processing_ms: f64,
    pub avg_obstacles_per_scan: f64,
    pub tracked_obstacles: usize,
}

struct Track {
    id: String,
    history: RingBuffer<Point2>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// Cluster geometry before an id has been assigned.
struct Detection {
    center: Point2,
    distance: f64,
    angle: f64,
    width: f64,
    height: f64,
    obstacle_type: ObstacleType,
    severity: Severity,
    confidence: f64,
    points: Vec<ObstaclePoint>,
}

pub struct ObstacleTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
    scan_count: u64,
    obstacle_count: u64,
    failed_scans: u64,
    processing_ms: RingBuffer<f64>,
    last_scan: Option<Scan>,
}

impl Default for ObstacleTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl ObstacleTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let window = config.stats_window;
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
            scan_count: 0,
            obstacle_count: 0,
            failed_scans: 0,
            processing_ms: RingBuffer::new(window),
            last_scan: None,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Process one raw scan payload. Never fails.
    pub fn process_scan(&mut self, raw: &Value) -> Scan {
        self.process_scan_at(raw, Utc::now())
    }

    pub fn process_scan_at(&mut self, raw: &Value, now: DateTime<Utc>) -> Scan {
        let started = Instant::now();
        let mut scan = match self.run_pipeline(raw, now) {
            Ok(scan) => scan,
            Err(fault) => {
                warn!(error = %fault, "scan processing failed; returning empty scan");
                self.failed_scans += 1;
                Scan {
                    timestamp: now,
                    ..Scan::empty()
                }
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        scan.processing_ms = elapsed_ms;
        if elapsed_ms > self.config.budget_ms {
            warn!(
                elapsed_ms,
                budget_ms = self.config.budget_ms,
                points = scan.points.len(),
                "scan processing exceeded budget"
            );
        }

        if scan.has_information() {
            self.scan_count += 1;
            self.obstacle_count += scan.obstacles.len() as u64;
            self.processing_ms.push(elapsed_ms);
        }
        debug!(
            points = scan.points.len(),
            obstacles = scan.obstacles.len(),
            quality = scan.quality,
            elapsed_ms,
            "scan processed"
        );
        self.last_scan = Some(scan.clone());
        scan
    }

    fn run_pipeline(&mut self, raw: &Value, now: DateTime<Utc>) -> Result<Scan, ScanFault> {
        let (raw_points, synthetic) = match RawScan::parse(raw) {
            Some(parsed) => (parsed.into_points(), false),
            None => {
                warn!("unrecognised scan shape; substituting synthetic scan");
                (
                    synthetic_scan(self.config.angle_resolution_deg, self.config.max_range_m),
                    true,
                )
            }
        };
        if raw_points.len() > self.config.max_points {
            return Err(ScanFault::TooManyPoints(raw_points.len()));
        }

        let raw_point_count = raw_points.len();
        let points = self.filter_points(raw_points);
        let detections = cluster_points(
            &points,
            self.config.cluster_distance_m,
            self.config.min_cluster_size,
        )
        .into_iter()
        .map(detect)
        .collect::<Vec<_>>();

        if detections
            .iter()
            .any(|d| !d.center.x.is_finite() || !d.center.y.is_finite())
        {
            return Err(ScanFault::NonFinite("cluster centroid"));
        }

        self.evict_stale(now);
        let obstacles = self.associate(detections, now);

        let quality = scan_quality(&points, self.config.angle_resolution_deg);
        if !quality.is_finite() {
            return Err(ScanFault::NonFinite("scan quality"));
        }

        Ok(Scan {
            points,
            obstacles,
            quality,
            raw_point_count,
            synthetic,
            processing_ms: 0.0,
            timestamp: now,
        })
    }

    fn filter_points(&self, points: Vec<ObstaclePoint>) -> Vec<ObstaclePoint> {
        let (lo, hi) = (self.config.min_range_m, self.config.max_range_m);
        points
            .into_iter()
            .filter(|p| (lo..=hi).contains(&p.distance) && (0.0..360.0).contains(&p.angle))
            .map(|mut p| {
                p.intensity = if p.intensity.is_finite() {
                    p.intensity.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                p
            })
            .collect()
    }

    fn evict_stale(&mut self, now: DateTime<Utc>) {
        let ttl = Duration::milliseconds(self.config.track_ttl_ms as i64);
        let before = self.tracks.len();
        self.tracks.retain(|t| now - t.last_seen <= ttl);
        let evicted = before - self.tracks.len();
        if evicted > 0 {
            debug!(evicted, "evicted stale obstacle tracks");
        }
    }

    /// Greedy nearest-centroid matching of detections to live tracks.
    fn associate(&mut self, detections: Vec<Detection>, now: DateTime<Utc>) -> Vec<Obstacle> {
        let gate = self.config.association_gate_m;
        let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
        for (di, det) in detections.iter().enumerate() {
            for (ti, track) in self.tracks.iter().enumerate() {
                if let Some(last) = track.history.latest() {
                    let d = last.distance_to(&det.center);
                    if d <= gate {
                        pairs.push((d, di, ti));
                    }
                }
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut det_track: Vec<Option<usize>> = vec![None; detections.len()];
        let mut track_taken = vec![false; self.tracks.len()];
        for (_, di, ti) in pairs {
            if det_track[di].is_none() && !track_taken[ti] {
                det_track[di] = Some(ti);
                track_taken[ti] = true;
            }
        }

        let mut obstacles = Vec::with_capacity(detections.len());
        for (di, det) in detections.into_iter().enumerate() {
            let ti = match det_track[di] {
                Some(ti) => ti,
                None => {
                    let id = format!("obs_{}", self.next_id);
                    self.next_id += 1;
                    self.tracks.push(Track {
                        id,
                        history: RingBuffer::new(self.config.history_len),
                        first_seen: now,
                        last_seen: now,
                    });
                    self.tracks.len() - 1
                }
            };
            let track = &mut self.tracks[ti];
            track.history.push(det.center);
            track.last_seen = now;

            let mut obstacle_type = det.obstacle_type;
            let mut severity = det.severity;
            if obstacle_type == ObstacleType::Static
                && recent_movement(&track.history) > self.config.dynamic_movement_m
            {
                obstacle_type = ObstacleType::Dynamic;
                severity = Severity::High;
                info!(id = %track.id, "obstacle reclassified as dynamic");
            }

            obstacles.push(Obstacle {
                id: track.id.clone(),
                obstacle_type,
                severity,
                center: det.center,
                distance: det.distance,
                angle: det.angle,
                width: det.width,
                height: det.height,
                confidence: det.confidence,
                points: det.points,
                history: track.history.to_vec(),
                first_seen: track.first_seen,
                last_seen: now,
            });
        }
        obstacles
    }

    // ── queries ─────────────────────────────────────────────────────────────

    pub fn last_scan(&self) -> Option<&Scan> {
        self.last_scan.as_ref()
    }

    /// Obstacles of the most recent scan.
    pub fn obstacles(&self) -> Vec<Obstacle> {
        self.last_scan
            .as_ref()
            .map(|s| s.obstacles.clone())
            .unwrap_or_default()
    }

    /// Centroid history of a live track, oldest first.
    pub fn obstacle_history(&self, id: &str) -> Option<Vec<Point2>> {
        self.tracks
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.history.to_vec())
    }

    pub fn clear_history(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
        info!("cleared obstacle tracking history");
    }

    pub fn processing_stats(&self) -> TrackerStats {
        let times = self.processing_ms.to_vec();
        let (avg, min, max) = if times.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let sum: f64 = times.iter().sum();
            (
                sum / times.len() as f64,
                times.iter().copied().fold(f64::INFINITY, f64::min),
                times.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            )
        };
        TrackerStats {
            scan_count: self.scan_count,
            obstacle_count: self.obstacle_count,
            failed_scans: self.failed_scans,
            avg_processing_ms: avg,
            min_processing_ms: min,
            max_processing_ms: max,
            avg_obstacles_per_scan: self.obstacle_count as f64 / self.scan_count.max(1) as f64,
            tracked_obstacles: self.tracks.len(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pipeline stages
// ────────────────────────────────────────────────────────────────────────────

/// Single-linkage clustering; clusters keep input order.
fn cluster_points(
    points: &[ObstaclePoint],
    threshold: f64,
    min_size: usize,
) -> Vec<Vec<ObstaclePoint>> {
    let xy: Vec<Point2> = points.iter().map(ObstaclePoint::to_cartesian).collect();
    let mut assigned = vec![false; points.len()];
    let mut clusters = Vec::new();

    for seed in 0..points.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut members = vec![seed];
        let mut frontier = vec![seed];
        while let Some(i) = frontier.pop() {
            for j in 0..points.len() {
                if !assigned[j] && xy[i].distance_to(&xy[j]) <= threshold {
                    assigned[j] = true;
                    members.push(j);
                    frontier.push(j);
                }
            }
        }
        if members.len() >= min_size {
            members.sort_unstable();
            clusters.push(members.into_iter().map(|i| points[i]).collect());
        }
    }
    clusters
}

fn detect(cluster: Vec<ObstaclePoint>) -> Detection {
    let xy: Vec<Point2> = cluster.iter().map(ObstaclePoint::to_cartesian).collect();
    let n = xy.len() as f64;
    let center = Point2::new(
        xy.iter().map(|p| p.x).sum::<f64>() / n,
        xy.iter().map(|p| p.y).sum::<f64>() / n,
    );
    let (min_x, max_x) = bounds(xy.iter().map(|p| p.x));
    let (min_y, max_y) = bounds(xy.iter().map(|p| p.y));
    let width = max_x - min_x;
    let height = max_y - min_y;
    let distance = center.norm();
    let angle = center.y.atan2(center.x).to_degrees().rem_euclid(360.0);
    let (obstacle_type, severity) = classify(distance, width, height);

    Detection {
        center,
        distance,
        angle,
        width,
        height,
        obstacle_type,
        severity,
        confidence: cluster_confidence(cluster.len(), distance),
        points: cluster,
    }
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

/// Distance/size lookup table.
pub fn classify(distance: f64, width: f64, height: f64) -> (ObstacleType, Severity) {
    let fits = |limit: f64| width < limit && height < limit;
    if distance < 1.0 {
        if fits(0.5) {
            (ObstacleType::Person, Severity::Critical)
        } else if fits(2.0) {
            (ObstacleType::Vehicle, Severity::High)
        } else {
            (ObstacleType::Wall, Severity::High)
        }
    } else if distance < 3.0 {
        if fits(1.0) {
            (ObstacleType::Person, Severity::Medium)
        } else if fits(3.0) {
            (ObstacleType::Vehicle, Severity::Medium)
        } else {
            (ObstacleType::Static, Severity::Medium)
        }
    } else {
        (ObstacleType::Static, Severity::Low)
    }
}

/// More points and a closer cluster both raise confidence.
pub fn cluster_confidence(point_count: usize, distance: f64) -> f64 {
    let size = (point_count as f64 / 10.0).min(1.0);
    let proximity = (1.0 - distance / 10.0).max(0.0);
    ((size + proximity) / 2.0).clamp(0.0, 1.0)
}

/// Path length over the last three centroids.
fn recent_movement(history: &RingBuffer<Point2>) -> f64 {
    let recent = history.last_n(3);
    if recent.len() < 3 {
        return 0.0;
    }
    recent.windows(2).map(|w| w[0].distance_to(w[1])).sum()
}

/// Weighted density (40 %), angular coverage (30 %) and range consistency
/// (30 %).
pub fn scan_quality(points: &[ObstaclePoint], resolution_deg: f64) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let density = points.len() as f64 / 360.0;
    let quality = (density / 2.0).min(1.0) * 0.4
        + coverage(points, resolution_deg) * 0.3
        + consistency(points) * 0.3;
    quality.clamp(0.0, 1.0)
}

/// `1 - (sum of significant gaps) / 360`, including the wrap-around gap.
fn coverage(points: &[ObstaclePoint], resolution_deg: f64) -> f64 {
    let mut angles: Vec<f64> = points.iter().map(|p| p.angle).collect();
    angles.sort_by(f64::total_cmp);
    let significant = resolution_deg * 2.0;

    let mut gaps: f64 = angles
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|gap| *gap > significant)
        .sum();
    if let (Some(first), Some(last)) = (angles.first(), angles.last()) {
        let wrap = first + 360.0 - last;
        if wrap > significant {
            gaps += wrap;
        }
    }
    (1.0 - gaps / 360.0).max(0.0)
}

/// `1 - coefficient of variation` of ranges; 0.5 for sparse scans.
fn consistency(points: &[ObstaclePoint]) -> f64 {
    if points.len() < 10 {
        return 0.5;
    }
    let n = points.len() as f64;
    let mean = points.iter().map(|p| p.distance).sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = points
        .iter()
        .map(|p| (p.distance - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    (1.0 - variance.sqrt() / mean).max(0.0)
}
