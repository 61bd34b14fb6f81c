//! [`MotionController`] – trajectory execution state machine.
//!
//! ```text
//!            execute             p = 1
//!   Idle ───────────▶ Executing ───────▶ Completed
//!    ▲                 │  ▲   │
//!    │           pause │  │   │ loop error
//!    │                 ▼  │   ▼
//!    │             Paused─┘  Failed
//!    │      resume
//!    └──── stop / reset ◀──── any state ──emergency_stop──▶ EmergencyStop
//! ```
//!
//! At most one trajectory executes at a time: `execute` on a busy controller
//! returns [`CoreError::Busy`], never a queued retry. Every outbound
//! [`MotorCommand`] passes the [`StateVerifier`] before reaching the bridge,
//! so nothing below emergency priority leaves while the safety latch is held.
//!
//! Cancellation is generation-based: `stop` and `emergency_stop` bump the
//! generation and abort the run task under the same lock the task takes
//! before each step, so a cancelled loop can never mutate state again.

use std::f64::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hauler_hal::{CommandAck, VehicleIo};
use hauler_kernel::{EmergencyLatch, StateVerifier};
use hauler_middleware::{EventBus, Topic};
use hauler_types::{
    CoreError, Event, EventPayload, MotionState, MotorCommand, Point2, Pose, RingBuffer,
    SafetyDirective, Trajectory,
};

use crate::profile::{MotionLimits, plan, speed_at};

const SOURCE: &str = "hauler-motion::controller";

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// mm/s
    pub max_speed: f64,
    /// mm/s²
    pub max_acceleration: f64,
    /// mm/s³
    pub max_jerk: f64,
    pub tick_ms: u64,
    pub event_capacity: usize,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            max_speed: 1000.0,
            max_acceleration: 500.0,
            max_jerk: 1000.0,
            tick_ms: 100,
            event_capacity: 100,
        }
    }
}

impl MotionConfig {
    pub fn limits(&self) -> MotionLimits {
        MotionLimits {
            max_speed: self.max_speed,
            max_acceleration: self.max_acceleration,
            max_jerk: self.max_jerk,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Public snapshots
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionEventKind {
    Planned,
    Started,
    Paused,
    Resumed,
    Completed,
    Failed,
    Stopped,
    EmergencyStop,
    Reset,
    SpeedLimited,
    ConfigUpdated,
    CommandFault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionEvent {
    pub kind: MotionEventKind,
    pub description: String,
    pub position: Point2,
    pub speed: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionStatus {
    pub state: MotionState,
    pub position: Pose,
    pub speed: f64,
    pub acceleration: f64,
    pub speed_limit: Option<f64>,
    pub trajectory_id: Option<Uuid>,
    pub goal: Option<Pose>,
    pub progress: Option<f64>,
    pub remaining_distance: Option<f64>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

// ────────────────────────────────────────────────────────────────────────────
// MotionController
// ────────────────────────────────────────────────────────────────────────────

struct Inner {
    config: MotionConfig,
    verifier: StateVerifier,
    state: MotionState,
    position: Pose,
    speed: f64,
    acceleration: f64,
    trajectory: Option<Trajectory>,
    /// Distance covered along the active trajectory (mm).
    travelled_mm: f64,
    speed_limit: Option<f64>,
    generation: u64,
    run_task: Option<JoinHandle<()>>,
    events: RingBuffer<MotionEvent>,
}

impl Inner {
    fn progress(&self) -> Option<f64> {
        let traj = self.trajectory.as_ref()?;
        if traj.total_distance <= 0.0 {
            return Some(1.0);
        }
        let travelled = self.position.distance_to(&traj.start);
        Some((travelled / traj.total_distance).min(1.0))
    }

    fn remaining_distance(&self) -> Option<f64> {
        let traj = self.trajectory.as_ref()?;
        let travelled = self.position.distance_to(&traj.start);
        Some((traj.total_distance - travelled).max(0.0))
    }

    fn estimated_completion(&self) -> Option<DateTime<Utc>> {
        if self.speed <= 0.0 {
            return None;
        }
        let remaining_ms = self.remaining_distance()? / self.speed * 1000.0;
        if !remaining_ms.is_finite() || remaining_ms > i64::MAX as f64 {
            return None;
        }
        Utc::now().checked_add_signed(chrono::Duration::try_milliseconds(remaining_ms as i64)?)
    }

    fn halt(&mut self) {
        self.speed = 0.0;
        self.acceleration = 0.0;
        self.position.vx = 0.0;
        self.position.vy = 0.0;
    }

    fn cancel_run(&mut self) {
        self.generation += 1;
        if let Some(task) = self.run_task.take() {
            task.abort();
        }
    }
}

fn capped(speed: f64, limit: Option<f64>) -> f64 {
    limit.map_or(speed, |l| speed.min(l))
}

fn wrap_angle(a: f64) -> f64 {
    (a + PI).rem_euclid(2.0 * PI) - PI
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MotionController {
    inner: Arc<Mutex<Inner>>,
    io: Arc<dyn VehicleIo>,
    latch: EmergencyLatch,
    bus: EventBus,
}

impl MotionController {
    pub fn new(
        config: MotionConfig,
        io: Arc<dyn VehicleIo>,
        latch: EmergencyLatch,
        bus: EventBus,
    ) -> Self {
        let inner = Inner {
            verifier: StateVerifier::standard(latch.clone(), config.max_speed),
            events: RingBuffer::new(config.event_capacity),
            config,
            state: MotionState::Idle,
            position: Pose::unknown(),
            speed: 0.0,
            acceleration: 0.0,
            trajectory: None,
            travelled_mm: 0.0,
            speed_limit: None,
            generation: 0,
            run_task: None,
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            io,
            latch,
            bus,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut Inner, to: MotionState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        info!(?from, ?to, "motion state changed");
        self.bus.publish_to(
            Topic::Telemetry,
            Event::new(SOURCE, EventPayload::MotionStateChanged { from, to }),
        );
    }

    fn record(&self, inner: &mut Inner, kind: MotionEventKind, description: String) {
        let event = MotionEvent {
            kind,
            description,
            position: inner.position.position(),
            speed: inner.speed,
            timestamp: Utc::now(),
        };
        inner.events.push(event);
    }

    /// Verify, then hand `command` to the bridge.
    fn dispatch(&self, inner: &Inner, command: MotorCommand) -> Result<CommandAck, CoreError> {
        inner.verifier.verify(&command)?;
        let actuator = command.actuator.clone();
        match self.io.send_command(command.clone()) {
            Ok(ack) => {
                debug!(command_id = %command.id, priority = command.priority, "command delivered");
                self.bus.publish_to(
                    Topic::Commands,
                    Event::new(SOURCE, EventPayload::CommandIssued(command)),
                );
                Ok(ack)
            }
            Err(e) => {
                error!(command_id = %command.id, priority = command.priority, error = %e, "command delivery failed");
                self.bus.publish_to(
                    Topic::Commands,
                    Event::new(
                        SOURCE,
                        EventPayload::ActuationFault {
                            actuator,
                            details: e.to_string(),
                        },
                    ),
                );
                Err(e)
            }
        }
    }

    // ── planning and execution ──────────────────────────────────────────────

    /// Plan from the current position to `goal` with the configured limits.
    pub fn plan(&self, goal: &Pose) -> Trajectory {
        let start = self.lock().position.clone();
        self.plan_from(&start, goal)
    }

    pub fn plan_from(&self, start: &Pose, goal: &Pose) -> Trajectory {
        let mut inner = self.lock();
        let trajectory = plan(start, goal, &inner.config.limits());
        info!(
            trajectory_id = %trajectory.id,
            distance_mm = trajectory.total_distance,
            duration_s = trajectory.total_duration,
            shape = ?trajectory.profile.shape,
            valid = trajectory.is_valid,
            "trajectory planned"
        );
        let description = format!(
            "Planned {:.0} mm in {:.2} s ({:?})",
            trajectory.total_distance, trajectory.total_duration, trajectory.profile.shape
        );
        self.record(&mut inner, MotionEventKind::Planned, description);
        trajectory
    }

    /// Start executing `trajectory` on a background tick loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn execute(&self, trajectory: Trajectory) -> Result<(), CoreError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| CoreError::Unavailable("no async runtime to drive execution".into()))?;

        let mut inner = self.lock();
        // Completed and Failed are finished outcomes, not running work; a new
        // trajectory starts from them as from Idle.
        if !inner.state.accepts_trajectory() {
            warn!(state = ?inner.state, "execute refused: controller busy");
            return Err(CoreError::Busy { state: inner.state });
        }
        if self.latch.is_engaged() {
            return Err(CoreError::EmergencyLatched);
        }
        if !trajectory.is_valid {
            return Err(CoreError::InvalidTrajectory(trajectory.errors.clone()));
        }

        let cruise = capped(trajectory.profile.cruise_speed, inner.speed_limit);
        let commands = [
            MotorCommand::move_to(&trajectory.goal),
            MotorCommand::set_speed(cruise, trajectory.profile.max_acceleration),
        ];
        for command in commands {
            if let Err(e) = self.dispatch(&inner, command) {
                if matches!(e, CoreError::Actuation { .. }) {
                    self.transition(&mut inner, MotionState::Failed);
                    self.record(&mut inner, MotionEventKind::Failed, format!("Start failed: {e}"));
                }
                return Err(e);
            }
        }

        inner.position.x = trajectory.start.x;
        inner.position.y = trajectory.start.y;
        inner.position.theta = trajectory.start.theta;
        inner.halt();
        inner.travelled_mm = 0.0;
        let description = format!(
            "Executing {} towards ({:.0}, {:.0})",
            trajectory.id, trajectory.goal.x, trajectory.goal.y
        );
        inner.trajectory = Some(trajectory);
        inner.generation += 1;
        let generation = inner.generation;
        self.transition(&mut inner, MotionState::Executing);
        self.record(&mut inner, MotionEventKind::Started, description);

        let tick = Duration::from_millis(inner.config.tick_ms.max(1));
        let this = self.clone();
        inner.run_task = Some(runtime.spawn(async move { this.run(generation, tick).await }));
        Ok(())
    }

    async fn run(self, generation: u64, tick: Duration) {
        loop {
            tokio::time::sleep(tick).await;
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            match inner.state {
                MotionState::Executing => {}
                MotionState::Paused => continue,
                _ => return,
            }
            match Self::advance(&mut inner, tick.as_secs_f64()) {
                Ok(false) => {}
                Ok(true) => {
                    inner.halt();
                    let finished = inner.trajectory.take();
                    inner.run_task = None;
                    self.transition(&mut inner, MotionState::Completed);
                    let description = match finished {
                        Some(t) => format!("Trajectory {} completed", t.id),
                        None => "Trajectory completed".to_string(),
                    };
                    self.record(&mut inner, MotionEventKind::Completed, description);
                    return;
                }
                Err(reason) => {
                    error!(reason = %reason, "execution loop failed");
                    inner.halt();
                    inner.trajectory = None;
                    inner.run_task = None;
                    self.transition(&mut inner, MotionState::Failed);
                    self.record(&mut inner, MotionEventKind::Failed, reason);
                    return;
                }
            }
        }
    }

    /// One execution step of `dt` seconds. `Ok(true)` once `p` reaches 1.
    ///
    /// Each step covers the planned share of the distance, never more than
    /// the speed cap allows, so a capped vehicle takes longer to finish.
    fn advance(inner: &mut Inner, dt: f64) -> Result<bool, String> {
        let Some(traj) = inner.trajectory.as_ref() else {
            return Err("no active trajectory".to_string());
        };
        let planned = if traj.total_duration > 0.0 {
            traj.total_distance * dt / traj.total_duration
        } else {
            traj.total_distance
        };
        let step = inner.speed_limit.map_or(planned, |l| planned.min(l * dt));
        inner.travelled_mm = (inner.travelled_mm + step).min(traj.total_distance);
        let p = if traj.total_distance > 0.0 {
            inner.travelled_mm / traj.total_distance
        } else {
            1.0
        };

        let (sx, sy, st) = (traj.start.x, traj.start.y, traj.start.theta);
        let (gx, gy) = (traj.goal.x, traj.goal.y);
        let x = sx + (gx - sx) * p;
        let y = sy + (gy - sy) * p;
        let theta = st + wrap_angle(traj.goal.theta - st) * p;
        if !(x.is_finite() && y.is_finite() && theta.is_finite()) {
            return Err(format!("non-finite position at progress {p:.3}"));
        }

        let (speed, acceleration) = speed_at(&traj.profile, p);
        let speed = capped(speed, inner.speed_limit);
        let heading = (gy - sy).atan2(gx - sx);

        inner.position.x = x;
        inner.position.y = y;
        inner.position.theta = theta;
        inner.position.vx = speed * heading.cos();
        inner.position.vy = speed * heading.sin();
        inner.position.timestamp = Utc::now();
        inner.speed = speed;
        inner.acceleration = acceleration;
        debug!(progress = p, x, y, speed, "execution tick");
        Ok(p >= 1.0)
    }

    // ── stopping ────────────────────────────────────────────────────────────

    /// Controlled stop. No-op when idle or already emergency-stopped.
    ///
    /// The state reaches `Idle` before the stop command is sent; a delivery
    /// failure is returned but does not undo the transition.
    pub fn stop(&self) -> Result<(), CoreError> {
        let mut inner = self.lock();
        match inner.state {
            MotionState::Idle => return Ok(()),
            MotionState::EmergencyStop => {
                debug!("stop ignored: emergency stop in force");
                return Ok(());
            }
            _ => {}
        }
        inner.cancel_run();
        inner.halt();
        inner.trajectory = None;
        self.transition(&mut inner, MotionState::Idle);
        self.record(&mut inner, MotionEventKind::Stopped, "Movement stopped".to_string());
        self.dispatch(&inner, MotorCommand::stop()).map(|_| ())
    }

    /// Unconditional emergency stop. Never fails.
    pub fn emergency_stop(&self) -> MotorCommand {
        self.emergency_stop_with_cause("operator request")
    }

    /// Emergency stop attributed to `cause`; returns the command issued.
    ///
    /// An actuation failure is logged and published as an actuation fault;
    /// the state is `EmergencyStop` regardless.
    pub fn emergency_stop_with_cause(&self, cause: &str) -> MotorCommand {
        let mut inner = self.lock();
        inner.cancel_run();
        inner.halt();
        inner.trajectory = None;
        self.transition(&mut inner, MotionState::EmergencyStop);
        warn!(cause, "EMERGENCY STOP");
        self.record(
            &mut inner,
            MotionEventKind::EmergencyStop,
            format!("Emergency stop: {cause}"),
        );

        let command = MotorCommand::emergency_stop();
        if let Err(e) = self.dispatch(&inner, command.clone()) {
            self.record(
                &mut inner,
                MotionEventKind::CommandFault,
                format!("Emergency stop delivery failed: {e}"),
            );
        }
        command
    }

    /// `EmergencyStop | Completed | Failed → Idle`. Refused while the safety
    /// latch is held.
    pub fn reset(&self) -> Result<(), CoreError> {
        if self.latch.is_engaged() {
            return Err(CoreError::EmergencyLatched);
        }
        let mut inner = self.lock();
        match inner.state {
            MotionState::Idle => Ok(()),
            MotionState::EmergencyStop | MotionState::Completed | MotionState::Failed => {
                inner.trajectory = None;
                inner.halt();
                self.transition(&mut inner, MotionState::Idle);
                self.record(&mut inner, MotionEventKind::Reset, "Controller reset".to_string());
                Ok(())
            }
            state => Err(CoreError::Busy { state }),
        }
    }

    // ── pause / resume ──────────────────────────────────────────────────────

    pub fn pause(&self) -> Result<(), CoreError> {
        let mut inner = self.lock();
        if inner.state != MotionState::Executing {
            return Err(CoreError::InvalidInput(format!(
                "cannot pause while {:?}",
                inner.state
            )));
        }
        self.dispatch(&inner, MotorCommand::stop())?;
        inner.halt();
        self.transition(&mut inner, MotionState::Paused);
        self.record(&mut inner, MotionEventKind::Paused, "Movement paused".to_string());
        Ok(())
    }

    pub fn resume(&self) -> Result<(), CoreError> {
        let mut inner = self.lock();
        if inner.state != MotionState::Paused {
            return Err(CoreError::InvalidInput(format!(
                "cannot resume while {:?}",
                inner.state
            )));
        }
        let Some(traj) = inner.trajectory.as_ref() else {
            return Err(CoreError::Unavailable("no trajectory to resume".into()));
        };
        let command = MotorCommand::set_speed(
            capped(traj.profile.cruise_speed, inner.speed_limit),
            traj.profile.max_acceleration,
        );
        self.dispatch(&inner, command)?;
        self.transition(&mut inner, MotionState::Executing);
        self.record(&mut inner, MotionEventKind::Resumed, "Movement resumed".to_string());
        Ok(())
    }

    // ── external inputs ─────────────────────────────────────────────────────

    /// Adopt an externally estimated pose.
    pub fn update_position(&self, pose: Pose) {
        self.lock().position = pose;
    }

    /// Apply (or clear) a runtime speed cap in mm/s.
    pub fn set_speed_limit(&self, limit: Option<f64>) {
        let limit = limit.filter(|l| l.is_finite() && *l >= 0.0);
        let mut inner = self.lock();
        if inner.speed_limit == limit {
            return;
        }
        inner.speed_limit = limit;
        info!(speed_limit = ?limit, "speed limit applied");
        self.record(
            &mut inner,
            MotionEventKind::SpeedLimited,
            match limit {
                Some(l) => format!("Speed limited to {l:.0} mm/s"),
                None => "Speed limit cleared".to_string(),
            },
        );

        if inner.state == MotionState::Executing
            && let Some(traj) = inner.trajectory.as_ref()
        {
            let target = capped(traj.profile.cruise_speed, limit);
            let command = MotorCommand::set_speed(target, traj.profile.max_acceleration);
            inner.speed = inner.speed.min(target);
            if let Err(e) = self.dispatch(&inner, command) {
                warn!(error = %e, "speed limit command not delivered");
            }
        }
    }

    pub fn update_config(&self, config: MotionConfig) -> Result<(), CoreError> {
        let errors = config.limits().errors();
        if !errors.is_empty() {
            return Err(CoreError::InvalidInput(errors.join("; ")));
        }
        if config.tick_ms == 0 {
            return Err(CoreError::InvalidInput("tick_ms must be positive".into()));
        }
        let mut inner = self.lock();
        if matches!(inner.state, MotionState::Executing | MotionState::Paused) {
            return Err(CoreError::Busy { state: inner.state });
        }
        inner.verifier = StateVerifier::standard(self.latch.clone(), config.max_speed);
        info!(?config, "motion configuration updated");
        inner.config = config;
        self.record(
            &mut inner,
            MotionEventKind::ConfigUpdated,
            "Motion configuration updated".to_string(),
        );
        Ok(())
    }

    /// Listen for safety directives until the sender side closes.
    pub fn spawn_directive_listener(
        &self,
        mut directives: UnboundedReceiver<SafetyDirective>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(directive) = directives.recv().await {
                match directive {
                    SafetyDirective::EmergencyStop { cause } => {
                        this.emergency_stop_with_cause(&cause);
                    }
                    SafetyDirective::SpeedLimit(limit) => this.set_speed_limit(limit),
                }
            }
            debug!("directive channel closed");
        })
    }

    // ── queries ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> MotionState {
        self.lock().state
    }

    pub fn position(&self) -> Pose {
        self.lock().position.clone()
    }

    pub fn config(&self) -> MotionConfig {
        self.lock().config.clone()
    }

    pub fn speed_limit(&self) -> Option<f64> {
        self.lock().speed_limit
    }

    /// Fraction of the active trajectory covered, from the current position.
    pub fn progress(&self) -> Option<f64> {
        self.lock().progress()
    }

    pub fn remaining_distance(&self) -> Option<f64> {
        self.lock().remaining_distance()
    }

    /// `None` without an active trajectory or at zero speed.
    pub fn estimated_completion(&self) -> Option<DateTime<Utc>> {
        self.lock().estimated_completion()
    }

    pub fn status(&self) -> MotionStatus {
        let inner = self.lock();
        MotionStatus {
            state: inner.state,
            position: inner.position.clone(),
            speed: inner.speed,
            acceleration: inner.acceleration,
            speed_limit: inner.speed_limit,
            trajectory_id: inner.trajectory.as_ref().map(|t| t.id),
            goal: inner.trajectory.as_ref().map(|t| t.goal.clone()),
            progress: inner.progress(),
            remaining_distance: inner.remaining_distance(),
            estimated_completion: inner.estimated_completion(),
            timestamp: Utc::now(),
        }
    }

    /// The newest `limit` events, oldest first.
    pub fn events(&self, limit: usize) -> Vec<MotionEvent> {
        self.lock()
            .events
            .last_n(limit)
            .into_iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hauler_hal::SimVehicleIo;
    use hauler_types::{PRIORITY_EMERGENCY, PRIORITY_STOP};
    use tokio::sync::mpsc;

    fn controller_with(io: Arc<SimVehicleIo>, config: MotionConfig) -> (MotionController, EmergencyLatch) {
        let latch = EmergencyLatch::new();
        let ctl = MotionController::new(config, io, latch.clone(), EventBus::default());
        (ctl, latch)
    }

    fn fast_config() -> MotionConfig {
        MotionConfig {
            max_acceleration: 100_000.0,
            tick_ms: 5,
            ..MotionConfig::default()
        }
    }

    /// Ticks far apart so a trajectory stays put while a test inspects it.
    fn frozen_config() -> MotionConfig {
        MotionConfig {
            tick_ms: 60_000,
            ..MotionConfig::default()
        }
    }

    async fn wait_for(ctl: &MotionController, state: MotionState) {
        for _ in 0..400 {
            if ctl.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("controller never reached {state:?}, stuck in {:?}", ctl.state());
    }

    #[tokio::test]
    async fn short_trajectory_completes() {
        let io = Arc::new(SimVehicleIo::default());
        let (ctl, _) = controller_with(io.clone(), fast_config());
        let traj = ctl.plan_from(&Pose::at(0.0, 0.0, 0.0), &Pose::at(100.0, 0.0, 0.0));
        ctl.execute(traj).unwrap();
        wait_for(&ctl, MotionState::Completed).await;

        let pos = ctl.position();
        assert!((pos.x - 100.0).abs() < 1e-6);
        assert_eq!(ctl.status().speed, 0.0);
        assert!(ctl.progress().is_none(), "trajectory discarded on completion");
        assert_eq!(io.delivered().len(), 2, "move_to + set_speed");
        let kinds: Vec<_> = ctl.events(10).into_iter().map(|e| e.kind).collect();
        assert!(kinds.ends_with(&[MotionEventKind::Started, MotionEventKind::Completed]));
    }

    #[tokio::test]
    async fn completed_controller_accepts_next_trajectory() {
        let io = Arc::new(SimVehicleIo::default());
        let (ctl, _) = controller_with(io, fast_config());
        let traj = ctl.plan_from(&Pose::at(0.0, 0.0, 0.0), &Pose::at(50.0, 0.0, 0.0));
        ctl.execute(traj).unwrap();
        wait_for(&ctl, MotionState::Completed).await;

        let next = ctl.plan(&Pose::at(100.0, 0.0, 0.0));
        assert!((next.start.x - 50.0).abs() < 1e-6);
        ctl.execute(next).unwrap();
        assert_eq!(ctl.state(), MotionState::Executing);
    }

    #[tokio::test]
    async fn capped_execution_moves_at_capped_speed() {
        let io = Arc::new(SimVehicleIo::default());
        let (ctl, _) = controller_with(io, fast_config());
        ctl.set_speed_limit(Some(100.0));
        let traj = ctl.plan_from(&Pose::at(0.0, 0.0, 0.0), &Pose::at(3000.0, 0.0, 0.0));
        ctl.execute(traj).unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = ctl.status();
        assert_eq!(status.state, MotionState::Executing);
        assert!(status.position.x > 0.0);
        assert!(status.position.x < 75.0, "moved {} mm at 100 mm/s", status.position.x);
        assert!(status.speed <= 100.0);
        assert!(status.remaining_distance.unwrap() > 2900.0);
    }

    #[tokio::test]
    async fn estimated_completion_out_of_range_is_none() {
        let io = Arc::new(SimVehicleIo::default());
        let (ctl, _) = controller_with(io, frozen_config());
        let traj = ctl.plan_from(&Pose::at(0.0, 0.0, 0.0), &Pose::at(3000.0, 0.0, 0.0));
        ctl.execute(traj).unwrap();

        ctl.lock().speed = 1e-12;
        assert!(ctl.estimated_completion().is_none());
        ctl.lock().speed = 1000.0;
        let eta = ctl.estimated_completion().unwrap();
        assert!(eta > Utc::now() + chrono::Duration::seconds(2));
    }

    #[tokio::test]
    async fn second_execute_is_busy() {
        let io = Arc::new(SimVehicleIo::default());
        let (ctl, _) = controller_with(io, frozen_config());
        let traj = ctl.plan_from(&Pose::at(0.0, 0.0, 0.0), &Pose::at(3000.0, 0.0, 0.0));
        ctl.execute(traj.clone()).unwrap();
        assert!(matches!(
            ctl.execute(traj),
            Err(CoreError::Busy { state: MotionState::Executing })
        ));
    }

    #[tokio::test]
    async fn invalid_trajectory_rejected() {
        let io = Arc::new(SimVehicleIo::default());
        let (ctl, _) = controller_with(io, MotionConfig::default());
        let mut traj = ctl.plan_from(&Pose::at(0.0, 0.0, 0.0), &Pose::at(10.0, 0.0, 0.0));
        traj.is_valid = false;
        traj.errors = vec!["bad".to_string()];
        assert_eq!(ctl.execute(traj), Err(CoreError::InvalidTrajectory(vec!["bad".to_string()])));
        assert_eq!(ctl.state(), MotionState::Idle);
    }

    #[test]
    fn execute_outside_runtime_is_unavailable() {
        let io = Arc::new(SimVehicleIo::default());
        let (ctl, _) = controller_with(io, MotionConfig::default());
        let traj = ctl.plan_from(&Pose::at(0.0, 0.0, 0.0), &Pose::at(10.0, 0.0, 0.0));
        assert!(matches!(ctl.execute(traj), Err(CoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_cancels() {
        let io = Arc::new(SimVehicleIo::default());
        let (ctl, _) = controller_with(io.clone(), fast_config());
        assert!(ctl.stop().is_ok());
        assert!(io.delivered().is_empty(), "idle stop sends nothing");

        let traj = ctl.plan_from(&Pose::at(0.0, 0.0, 0.0), &Pose::at(50_000.0, 0.0, 0.0));
        ctl.execute(traj).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctl.stop().unwrap();
        assert_eq!(ctl.state(), MotionState::Idle);
        assert_eq!(io.last_delivered().map(|c| c.priority), Some(PRIORITY_STOP));

        let frozen = ctl.position();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ctl.position(), frozen, "cancelled loop must not move the pose");
        assert!(ctl.stop().is_ok());
    }

    #[tokio::test]
    async fn emergency_stop_preempts_pending_commands() {
        let io = Arc::new(SimVehicleIo::builder().holding_delivery().build());
        let (ctl, _) = controller_with(io.clone(), frozen_config());
        let traj = ctl.plan_from(&Pose::at(0.0, 0.0, 0.0), &Pose::at(3000.0, 0.0, 0.0));
        ctl.execute(traj).unwrap();
        assert_eq!(io.pending(), 2);

        let cmd = ctl.emergency_stop();
        assert_eq!(cmd.priority, PRIORITY_EMERGENCY);
        assert_eq!(ctl.state(), MotionState::EmergencyStop);
        assert_eq!(io.last_delivered().map(|c| c.priority), Some(PRIORITY_EMERGENCY));
        assert_eq!(ctl.status().speed, 0.0);
        assert!(ctl.status().trajectory_id.is_none());
    }

    #[tokio::test]
    async fn emergency_stop_survives_actuation_failure() {
        let io = Arc::new(SimVehicleIo::default());
        let latch = EmergencyLatch::new();
        let bus = EventBus::default();
        let mut faults = bus.subscribe_to(Topic::Commands);
        let ctl = MotionController::new(MotionConfig::default(), io.clone(), latch, bus);
        io.set_fail_commands(true);

        ctl.emergency_stop();
        assert_eq!(ctl.state(), MotionState::EmergencyStop);
        assert!(faults
            .drain()
            .iter()
            .any(|e| matches!(e.payload, EventPayload::ActuationFault { .. })));
        let kinds: Vec<_> = ctl.events(10).into_iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&MotionEventKind::CommandFault));
    }

    #[tokio::test]
    async fn emergency_state_blocks_execute_until_reset() {
        let io = Arc::new(SimVehicleIo::default());
        let (ctl, latch) = controller_with(io, frozen_config());
        ctl.emergency_stop();
        let traj = ctl.plan_from(&Pose::at(0.0, 0.0, 0.0), &Pose::at(10.0, 0.0, 0.0));
        assert!(matches!(ctl.execute(traj.clone()), Err(CoreError::Busy { .. })));

        latch.engage();
        assert_eq!(ctl.reset(), Err(CoreError::EmergencyLatched));
        latch.release();
        ctl.reset().unwrap();
        assert_eq!(ctl.state(), MotionState::Idle);
        assert!(ctl.execute(traj).is_ok());
    }

    #[tokio::test]
    async fn latched_controller_refuses_execute() {
        let io = Arc::new(SimVehicleIo::default());
        let (ctl, latch) = controller_with(io.clone(), frozen_config());
        latch.engage();
        let traj = ctl.plan_from(&Pose::at(0.0, 0.0, 0.0), &Pose::at(10.0, 0.0, 0.0));
        assert_eq!(ctl.execute(traj), Err(CoreError::EmergencyLatched));
        assert!(io.delivered().is_empty());
    }

    #[tokio::test]
    async fn progress_queries_follow_position() {
        let io = Arc::new(SimVehicleIo::default());
        let (ctl, _) = controller_with(io, frozen_config());
        assert!(ctl.progress().is_none());
        assert!(ctl.remaining_distance().is_none());

        let traj = ctl.plan_from(&Pose::at(0.0, 0.0, 0.0), &Pose::at(3000.0, 0.0, 0.0));
        ctl.execute(traj).unwrap();
        assert!(ctl.estimated_completion().is_none(), "zero speed at start");

        ctl.update_position(Pose::at(1500.0, 0.0, 0.0));
        assert!((ctl.progress().unwrap() - 0.5).abs() < 1e-9);
        assert!((ctl.remaining_distance().unwrap() - 1500.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn pause_and_resume() {
        let io = Arc::new(SimVehicleIo::default());
        let (ctl, _) = controller_with(io.clone(), frozen_config());
        assert!(ctl.pause().is_err());
        let traj = ctl.plan_from(&Pose::at(0.0, 0.0, 0.0), &Pose::at(3000.0, 0.0, 0.0));
        ctl.execute(traj).unwrap();

        ctl.pause().unwrap();
        assert_eq!(ctl.state(), MotionState::Paused);
        assert!(matches!(ctl.execute(ctl.plan(&Pose::at(1.0, 1.0, 0.0))), Err(CoreError::Busy { .. })));
        ctl.resume().unwrap();
        assert_eq!(ctl.state(), MotionState::Executing);
        assert_eq!(io.last_delivered().and_then(|c| c.speed()), Some(1000.0));
    }

    #[tokio::test]
    async fn speed_limit_caps_commanded_speed() {
        let io = Arc::new(SimVehicleIo::default());
        let (ctl, _) = controller_with(io.clone(), frozen_config());
        let traj = ctl.plan_from(&Pose::at(0.0, 0.0, 0.0), &Pose::at(3000.0, 0.0, 0.0));
        ctl.execute(traj).unwrap();

        ctl.set_speed_limit(Some(100.0));
        assert_eq!(io.last_delivered().and_then(|c| c.speed()), Some(100.0));
        assert_eq!(ctl.speed_limit(), Some(100.0));
        ctl.set_speed_limit(None);
        assert_eq!(io.last_delivered().and_then(|c| c.speed()), Some(1000.0));
    }

    #[tokio::test]
    async fn directive_listener_applies_emergency_stop() {
        let io = Arc::new(SimVehicleIo::default());
        let (ctl, _) = controller_with(io, frozen_config());
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = ctl.spawn_directive_listener(rx);

        tx.send(SafetyDirective::SpeedLimit(Some(250.0))).unwrap();
        tx.send(SafetyDirective::EmergencyStop {
            cause: "restricted_zone_violation".to_string(),
        })
        .unwrap();
        wait_for(&ctl, MotionState::EmergencyStop).await;
        assert_eq!(ctl.speed_limit(), Some(250.0));

        drop(tx);
        listener.await.unwrap();
    }

    #[tokio::test]
    async fn config_update_validates_and_refuses_while_moving() {
        let io = Arc::new(SimVehicleIo::default());
        let (ctl, _) = controller_with(io, frozen_config());
        assert!(matches!(
            ctl.update_config(MotionConfig {
                max_speed: -1.0,
                ..MotionConfig::default()
            }),
            Err(CoreError::InvalidInput(_))
        ));

        let traj = ctl.plan_from(&Pose::at(0.0, 0.0, 0.0), &Pose::at(3000.0, 0.0, 0.0));
        ctl.execute(traj).unwrap();
        assert!(matches!(ctl.update_config(MotionConfig::default()), Err(CoreError::Busy { .. })));
        ctl.stop().unwrap();
        ctl.update_config(MotionConfig {
            max_speed: 500.0,
            ..MotionConfig::default()
        })
        .unwrap();
        assert_eq!(ctl.config().max_speed, 500.0);
    }
}
