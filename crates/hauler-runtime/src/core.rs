//! [`VehicleControlCore`] – one vehicle's perception-to-actuation stack.
//!
//! Owns the five components and the wiring between them:
//!
//! ```text
//!   VehicleIo ──read_sensor──▶ SensorNormalizer ──▶ PoseEstimator ──▶ MotionController ──send_command──▶ VehicleIo
//!   VehicleIo ──read_scan───▶ ObstacleTracker ──(LiDAR reading)──┘          ▲
//!                                  │                                        │ SafetyDirective (mpsc)
//!                                  └────────────▶ SafetyMonitor ────────────┘
//! ```
//!
//! Each component sits behind its own mutex and no method holds two of them
//! at once. The safety → motion path is a channel of [`SafetyDirective`]s plus
//! the shared [`EmergencyLatch`]; the monitor never touches motion state.
//!
//! Without [`VehicleControlCore::start`], the caller drives everything:
//! [`perception_cycle`](VehicleControlCore::perception_cycle) and
//! [`safety_tick`](VehicleControlCore::safety_tick) apply pending directives
//! synchronously, which keeps tests deterministic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hauler_hal::VehicleIo;
use hauler_kernel::{EmergencyLatch, MonitorHandle, SafetyFeed, SafetyInputs, SafetyMonitor, TickReport};
use hauler_middleware::{EventBus, Topic};
use hauler_motion::{MotionController, MotionStatus};
use hauler_perception::{
    Estimate, EstimatorStats, NormalizerStats, ObstacleTracker, PoseEstimator, SensorNormalizer,
    TagPosition, TrackerStats,
};
use hauler_types::{
    CoreError, EmergencyStatus, Event, EventPayload, MotorCommand, Obstacle, Pose, SafetyDirective,
    SafetyStatus, Scan, SensorKind, SensorReading, Trajectory,
};

use crate::config::CoreConfig;

const SOURCE: &str = "hauler-runtime::core";
const LIDAR_SENSOR_ID: &str = "lidar";

/// Sensors polled through `read_sensor`; LiDAR arrives via `read_scan`.
const POLLED_KINDS: [SensorKind; 4] = [
    SensorKind::Rfid,
    SensorKind::Accelerometer,
    SensorKind::Compass,
    SensorKind::Docking,
];

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct VehicleControlCore {
    config: CoreConfig,
    io: Arc<dyn VehicleIo>,
    bus: EventBus,
    latch: EmergencyLatch,
    normalizer: Mutex<SensorNormalizer>,
    tracker: Mutex<ObstacleTracker>,
    estimator: Mutex<PoseEstimator>,
    motion: MotionController,
    safety: Arc<SafetyMonitor>,
    /// Held until `start` hands it to the motion listener task.
    directives: Mutex<Option<UnboundedReceiver<SafetyDirective>>>,
    /// Last frame timestamp consumed per polled sensor.
    seen: Mutex<HashMap<SensorKind, DateTime<Utc>>>,
}

impl VehicleControlCore {
    pub fn new(config: CoreConfig, io: Arc<dyn VehicleIo>) -> Self {
        let bus = EventBus::default();
        let latch = EmergencyLatch::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let safety = Arc::new(SafetyMonitor::new(
            config.safety.clone(),
            config.zones.clone(),
            latch.clone(),
            tx,
            bus.clone(),
        ));
        let motion =
            MotionController::new(config.motion.clone(), Arc::clone(&io), latch.clone(), bus.clone());

        let mut estimator = PoseEstimator::new(config.estimator.clone());
        for tag in &config.tags {
            estimator.register_tag(tag.clone());
        }
        if let Some(start) = config.initial_pose {
            let pose = start.to_pose();
            estimator.seed(pose.clone());
            motion.update_position(pose);
        }

        info!(
            vehicle = %config.vehicle_id,
            zones = config.zones.len(),
            tags = config.tags.len(),
            "vehicle control core created"
        );

        Self {
            normalizer: Mutex::new(SensorNormalizer::new(config.normalizer.clone())),
            tracker: Mutex::new(ObstacleTracker::new(config.tracker.clone())),
            estimator: Mutex::new(estimator),
            directives: Mutex::new(Some(rx)),
            seen: Mutex::new(HashMap::new()),
            config,
            io,
            bus,
            latch,
            motion,
            safety,
        }
    }

    // ── perception ──────────────────────────────────────────────────────────

    /// Normalise one raw payload and offer it to the estimator.
    pub fn ingest_sensor(&self, kind: SensorKind, raw: &Value) -> SensorReading {
        let reading = lock(&self.normalizer).normalize(kind, raw);
        lock(&self.estimator).ingest(reading.clone());
        reading
    }

    /// Read every polled sensor from the bridge. Frames already consumed are
    /// skipped. Returns the number of new readings.
    pub fn poll_sensors(&self) -> usize {
        let mut fresh = 0;
        for kind in POLLED_KINDS {
            let Some(frame) = self.io.read_sensor(kind, None) else {
                continue;
            };
            {
                let mut seen = lock(&self.seen);
                if seen.get(&kind).is_some_and(|t| *t >= frame.received_at) {
                    continue;
                }
                seen.insert(kind, frame.received_at);
            }
            let reading = lock(&self.normalizer).normalize_at(kind, &frame.data, frame.received_at);
            if !reading.valid {
                debug!(%kind, sensor_id = %frame.sensor_id, "polled frame incomplete");
            }
            lock(&self.estimator).ingest(reading);
            fresh += 1;
        }
        fresh
    }

    /// Process the bridge's latest range scan, if any.
    pub fn poll_scan(&self) -> Option<Scan> {
        let raw = self.io.read_scan()?;
        Some(self.ingest_scan(&raw))
    }

    /// Process a raw range scan and feed its summary to the estimator.
    pub fn ingest_scan(&self, raw: &Value) -> Scan {
        let scan = lock(&self.tracker).process_scan(raw);
        lock(&self.estimator).ingest(scan.as_reading(LIDAR_SENSOR_ID));
        self.bus.publish_to(
            Topic::Perception,
            Event::new(SOURCE, EventPayload::Obstacles(scan.obstacles.clone())),
        );
        scan
    }

    /// Run one fusion cycle and forward a fused pose to motion.
    ///
    /// While a trajectory executes, the controller's tracked position is the
    /// prior that sensor candidates are fused against.
    pub fn refresh_pose(&self) -> Estimate {
        let reachable = self.io.health().reachable;
        let tracked = self
            .motion
            .state()
            .is_moving()
            .then(|| self.motion.position());
        let estimate = {
            let mut estimator = lock(&self.estimator);
            estimator.set_link_reachable(reachable);
            if let Some(tracked) = &tracked {
                estimator.apply_odometry(tracked);
            }
            estimator.estimate()
        };
        if let Estimate::Fused(pose) = &estimate {
            self.motion.update_position(pose.clone());
            self.bus.publish_to(
                Topic::Telemetry,
                Event::new(SOURCE, EventPayload::PoseUpdate(pose.clone())),
            );
        }
        estimate
    }

    /// Poll sensors and scan, then fuse.
    pub fn perception_cycle(&self) -> Estimate {
        self.poll_sensors();
        self.poll_scan();
        let estimate = self.refresh_pose();
        self.apply_pending_directives();
        estimate
    }

    /// Adopt a surveyed pose as the current fix.
    pub fn seed_pose(&self, pose: Pose) {
        lock(&self.estimator).seed(pose.clone());
        self.motion.update_position(pose);
    }

    pub fn register_tag(&self, tag: TagPosition) {
        lock(&self.estimator).register_tag(tag);
    }

    pub fn calibrate(&self, kind: SensorKind, data: &Value) -> Result<(), CoreError> {
        lock(&self.normalizer).calibrate(kind, data)
    }

    /// Best current pose, or `None` before the first fix.
    ///
    /// The newer of the fused estimate and the motion controller's tracked
    /// position; between sensor fixes the latter advances with execution.
    pub fn current_pose(&self) -> Option<Pose> {
        let estimated = {
            let estimator = lock(&self.estimator);
            if !estimator.has_fix() {
                return None;
            }
            estimator.pose()
        };
        let tracked = self.motion.position();
        Some(if tracked.timestamp > estimated.timestamp {
            tracked
        } else {
            estimated
        })
    }

    // ── motion ──────────────────────────────────────────────────────────────

    /// Plan from the current pose to `goal` and start executing.
    pub fn go_to(&self, goal: Pose) -> Result<Trajectory, CoreError> {
        let start = self
            .current_pose()
            .ok_or_else(|| CoreError::Unavailable("no pose fix to plan from".into()))?;
        let trajectory = self.motion.plan_from(&start, &goal);
        if !trajectory.is_valid {
            return Err(CoreError::InvalidTrajectory(trajectory.errors));
        }
        self.motion.execute(trajectory.clone())?;
        Ok(trajectory)
    }

    pub fn stop(&self) -> Result<(), CoreError> {
        self.motion.stop()
    }

    /// Operator emergency stop of motion. Never fails.
    pub fn emergency_stop(&self) -> MotorCommand {
        self.motion.emergency_stop()
    }

    /// Clear a motion emergency stop. Refused while the latch is held.
    pub fn reset_motion(&self) -> Result<(), CoreError> {
        self.motion.reset()
    }

    // ── safety ──────────────────────────────────────────────────────────────

    /// Hardware E-Stop input: engages the latch, stops motion and runs the
    /// E-Stop procedure.
    pub async fn handle_estop(&self) -> EmergencyStatus {
        let status = self.safety.handle_estop().await;
        self.apply_pending_directives();
        status
    }

    /// Logged operator recovery from a safety emergency. Motion stays in
    /// `EmergencyStop` until [`reset_motion`](Self::reset_motion).
    pub fn recover(&self, operator: &str) -> Result<EmergencyStatus, CoreError> {
        self.safety.recover(operator)
    }

    /// One safety pass over the current snapshot.
    pub fn safety_tick(&self) -> TickReport {
        let report = self.safety.tick(&self.snapshot());
        self.apply_pending_directives();
        report
    }

    /// Apply queued directives when no listener task owns the channel.
    fn apply_pending_directives(&self) {
        let mut slot = lock(&self.directives);
        let Some(rx) = slot.as_mut() else {
            return;
        };
        while let Ok(directive) = rx.try_recv() {
            match directive {
                SafetyDirective::EmergencyStop { cause } => {
                    self.motion.emergency_stop_with_cause(&cause);
                }
                SafetyDirective::SpeedLimit(limit) => self.motion.set_speed_limit(limit),
            }
        }
    }

    // ── background operation ────────────────────────────────────────────────

    /// Spawn the perception loop, the safety loop and the directive listener
    /// on the current tokio runtime. May be called once.
    pub fn start(self: &Arc<Self>) -> Result<CoreHandle, CoreError> {
        tokio::runtime::Handle::try_current()
            .map_err(|_| CoreError::Unavailable("no async runtime to start on".into()))?;
        let rx = lock(&self.directives)
            .take()
            .ok_or_else(|| CoreError::Unavailable("core already started".into()))?;

        let listener = self.motion.spawn_directive_listener(rx);
        let monitor = self
            .safety
            .start_monitoring(Arc::clone(self) as Arc<dyn SafetyFeed>);

        let stop = Arc::new(AtomicBool::new(false));
        let core = Arc::clone(self);
        let stop_flag = Arc::clone(&stop);
        let period = Duration::from_millis(self.config.perception_tick_ms.max(1));
        let perception = tokio::spawn(async move {
            while !stop_flag.load(Ordering::SeqCst) {
                core.perception_cycle();
                tokio::time::sleep(period).await;
            }
        });

        info!(vehicle = %self.config.vehicle_id, "vehicle control core started");
        Ok(CoreHandle {
            stop,
            perception,
            monitor,
            listener,
        })
    }

    // ── exports ─────────────────────────────────────────────────────────────

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn latch(&self) -> &EmergencyLatch {
        &self.latch
    }

    pub fn motion(&self) -> &MotionController {
        &self.motion
    }

    pub fn safety(&self) -> &Arc<SafetyMonitor> {
        &self.safety
    }

    pub fn motion_status(&self) -> MotionStatus {
        self.motion.status()
    }

    pub fn safety_status(&self) -> SafetyStatus {
        self.safety.get_safety_status()
    }

    /// Most recent fused poses, oldest first.
    pub fn pose_history(&self, limit: usize) -> Vec<Pose> {
        lock(&self.estimator).history(limit)
    }

    pub fn obstacles(&self) -> Vec<Obstacle> {
        lock(&self.tracker).obstacles()
    }

    pub fn obstacle_history(&self, id: &str) -> Option<Vec<hauler_types::Point2>> {
        lock(&self.tracker).obstacle_history(id)
    }

    pub fn is_moving(&self) -> bool {
        lock(&self.normalizer).detect_movement()
    }

    pub fn is_docked(&self) -> bool {
        lock(&self.normalizer).is_docked()
    }

    /// Compass heading in degrees.
    pub fn current_heading(&self) -> Option<f64> {
        lock(&self.normalizer).current_heading()
    }

    pub fn estimator_stats(&self) -> EstimatorStats {
        lock(&self.estimator).stats()
    }

    pub fn tracker_stats(&self) -> TrackerStats {
        lock(&self.tracker).processing_stats()
    }

    pub fn normalizer_stats(&self) -> NormalizerStats {
        lock(&self.normalizer).processing_stats()
    }

    /// Nearest fresh docking return in millimetres.
    fn fresh_proximity_mm(&self) -> Option<f64> {
        let window = chrono::Duration::milliseconds(self.config.estimator.freshness_ms as i64);
        let normalizer = lock(&self.normalizer);
        let fresh = normalizer
            .latest_valid(SensorKind::Docking)
            .is_some_and(|r| r.is_fresh_at(Utc::now(), window));
        if fresh {
            normalizer.nearest_proximity_mm()
        } else {
            None
        }
    }
}

impl SafetyFeed for VehicleControlCore {
    fn snapshot(&self) -> SafetyInputs {
        SafetyInputs {
            pose: self.current_pose(),
            scan: lock(&self.tracker).last_scan().cloned(),
            proximity_mm: self.fresh_proximity_mm(),
        }
    }
}

/// Handle to the tasks spawned by [`VehicleControlCore::start`].
pub struct CoreHandle {
    stop: Arc<AtomicBool>,
    perception: JoinHandle<()>,
    monitor: MonitorHandle,
    listener: JoinHandle<()>,
}

impl CoreHandle {
    pub fn is_running(&self) -> bool {
        !self.perception.is_finished() && self.monitor.is_running()
    }

    /// Stop every background task and wait for them to exit.
    pub async fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        self.perception.abort();
        let _ = self.perception.await;
        self.monitor.stop().await;
        self.listener.abort();
        if let Err(e) = self.listener.await
            && !e.is_cancelled()
        {
            warn!(error = %e, "directive listener ended abnormally");
        }
        info!("vehicle control core stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hauler_hal::SimVehicleIo;
    use hauler_types::MotionState;
    use serde_json::json;

    fn core_with(io: Arc<SimVehicleIo>) -> VehicleControlCore {
        let config = CoreConfig {
            zones: Vec::new(),
            ..CoreConfig::default()
        };
        VehicleControlCore::new(config, io)
    }

    #[test]
    fn poll_skips_already_consumed_frames() {
        let io = Arc::new(
            SimVehicleIo::builder()
                .with_frame(
                    SensorKind::Compass,
                    "compass_0",
                    json!({"heading": 90.0, "accuracy": 0.9, "field_strength": 45.0}),
                )
                .build(),
        );
        let core = core_with(io);
        assert_eq!(core.poll_sensors(), 1);
        assert_eq!(core.poll_sensors(), 0);
        assert_eq!(core.current_heading(), Some(90.0));
    }

    #[test]
    fn go_to_requires_a_fix() {
        let core = core_with(Arc::new(SimVehicleIo::default()));
        assert!(matches!(
            core.go_to(Pose::at(100.0, 0.0, 0.0)),
            Err(CoreError::Unavailable(_))
        ));
    }

    #[test]
    fn scan_ingestion_publishes_obstacles() {
        let core = core_with(Arc::new(SimVehicleIo::default()));
        let mut perception = core.bus().subscribe_to(Topic::Perception);
        let ranges: Vec<f64> = (0..360)
            .map(|deg| if (90..96).contains(&deg) { 1.0 } else { 10.0 })
            .collect();
        let scan = core.ingest_scan(&json!({ "ranges": ranges }));
        assert!(scan.has_information());
        assert!(!core.obstacles().is_empty());
        assert!(perception
            .drain()
            .iter()
            .any(|e| matches!(e.payload, EventPayload::Obstacles(_))));
    }

    #[test]
    fn stale_docking_reading_is_not_a_probe() {
        let io = Arc::new(SimVehicleIo::default());
        let core = core_with(io);
        let raw = json!({"front": 0.2, "left": 1.0, "right": 1.0, "back": 1.5});
        let old = Utc::now() - chrono::Duration::seconds(30);
        lock(&core.normalizer).normalize_at(SensorKind::Docking, &raw, old);
        assert!(core.snapshot().proximity_mm.is_none());

        core.ingest_sensor(SensorKind::Docking, &raw);
        let probe = core.snapshot().proximity_mm.unwrap();
        assert!((probe - 200.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn start_twice_is_refused() {
        let core = Arc::new(core_with(Arc::new(SimVehicleIo::default())));
        let handle = core.start().unwrap();
        assert!(handle.is_running());
        assert!(core.start().is_err());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn seeded_core_moves_and_tracks_position() {
        let io = Arc::new(SimVehicleIo::default());
        let mut config = CoreConfig {
            zones: Vec::new(),
            ..CoreConfig::default()
        };
        config.motion.tick_ms = 5;
        config.motion.max_acceleration = 100_000.0;
        let core = VehicleControlCore::new(config, io);
        core.seed_pose(Pose::at(0.0, 0.0, 0.0));

        core.go_to(Pose::at(100.0, 0.0, 0.0)).unwrap();
        for _ in 0..400 {
            if core.motion().state() == MotionState::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(core.motion().state(), MotionState::Completed);
        let pose = core.current_pose().unwrap();
        assert!((pose.x - 100.0).abs() < 1e-6);
    }
}
