//! [`SafetyMonitor`] – independent hazard surveillance.
//!
//! One [`SafetyMonitor::tick`] runs, in order:
//!
//! 1. **intake** – actuation faults reported on the command bus become alerts;
//! 2. **zone check** – occupancy of every active [`SafetyZone`] by the current
//!    pose. Restricted → emergency stop, warning → medium alert, slow →
//!    [`SafetyDirective::SpeedLimit`];
//! 3. **collision check** – nearest hazard from the latest informative scan
//!    and the docking proximity probe, compared with `min_safe_distance_mm`.
//!    No obstacle information at all is a sensor-gap alert, never "clear";
//! 4. **emergency check** – `escalation_threshold` concurrent high/critical
//!    alerts force an emergency with cause `"multiple_critical_alerts"`;
//! 5. **cleanup** – alerts older than the retention window are purged.
//!
//! The monitor never touches motion state directly: it engages the shared
//! [`EmergencyLatch`] and sends [`SafetyDirective`]s down an unbounded channel
//! the motion controller listens on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hauler_middleware::{EventBus, Topic, TopicReceiver};
use hauler_types::{
    AlertKind, CoreError, EmergencyProcedure, EmergencyStatus, Event, EventPayload, Pose,
    SafetyAlert, SafetyDirective, SafetyEvent, SafetyEventKind, SafetyStatus, SafetyZone, Scan,
    Severity, ZoneKind, ZoneStatus,
};

use crate::alerts::{AlertBook, Raised};
use crate::emergency::{CAUSE_ESTOP, CAUSE_MULTIPLE_CRITICAL, CAUSE_RESTRICTED_ZONE, EmergencyState};
use crate::state_verifier::EmergencyLatch;
use crate::watchdog::{FeedHealth, FeedWatchdog};
use crate::zones::{ZoneRegistry, speed_cap};

const SOURCE: &str = "hauler-kernel::safety";
const SCAN_FEED: &str = "scan";

// ────────────────────────────────────────────────────────────────────────────
// Configuration and inputs
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub min_safe_distance_mm: f64,
    /// Hazards closer than this raise a high-severity alert.
    pub collision_critical_mm: f64,
    pub tick_ms: u64,
    pub alert_retention_hours: i64,
    pub escalation_threshold: usize,
    /// Pause between emergency procedure steps.
    pub procedure_step_ms: u64,
    /// A range-scan feed silent for longer than this is a sensor gap.
    pub scan_feed_timeout_ms: u64,
    pub event_capacity: usize,
    pub alert_history_capacity: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            min_safe_distance_mm: 300.0,
            collision_critical_mm: 50.0,
            tick_ms: 100,
            alert_retention_hours: 24,
            escalation_threshold: 3,
            procedure_step_ms: 100,
            scan_feed_timeout_ms: 1000,
            event_capacity: 1000,
            alert_history_capacity: 100,
        }
    }
}

/// What one tick looks at.
#[derive(Debug, Clone, Default)]
pub struct SafetyInputs {
    /// Current fused pose; `None` until the estimator has a fix.
    pub pose: Option<Pose>,
    pub scan: Option<Scan>,
    /// Nearest docking-array return, in millimetres.
    pub proximity_mm: Option<f64>,
}

/// Supplies [`SafetyInputs`] to the background monitoring loop.
pub trait SafetyFeed: Send + Sync {
    fn snapshot(&self) -> SafetyInputs;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub alerts_raised: usize,
    /// Cause of an emergency newly activated during this tick.
    pub emergency_triggered: Option<String>,
    pub expired_alerts: usize,
    pub elapsed: Duration,
}

// ────────────────────────────────────────────────────────────────────────────
// SafetyMonitor
// ────────────────────────────────────────────────────────────────────────────

struct MonitorState {
    config: SafetyConfig,
    zones: ZoneRegistry,
    alerts: AlertBook,
    emergency: EmergencyState,
    watchdog: FeedWatchdog,
    last_pose: Option<Pose>,
    last_scan_at: Option<chrono::DateTime<Utc>>,
    speed_limit: Option<f64>,
}

pub struct SafetyMonitor {
    state: Mutex<MonitorState>,
    latch: EmergencyLatch,
    directives: UnboundedSender<SafetyDirective>,
    bus: EventBus,
    command_feed: Mutex<TopicReceiver>,
}

impl SafetyMonitor {
    pub fn new(
        config: SafetyConfig,
        zones: Vec<SafetyZone>,
        latch: EmergencyLatch,
        directives: UnboundedSender<SafetyDirective>,
        bus: EventBus,
    ) -> Self {
        let state = MonitorState {
            alerts: AlertBook::new(config.alert_history_capacity),
            emergency: EmergencyState::new(config.event_capacity),
            zones: ZoneRegistry::new(zones),
            watchdog: FeedWatchdog::new(),
            last_pose: None,
            last_scan_at: None,
            speed_limit: None,
            config,
        };
        let command_feed = Mutex::new(bus.subscribe_to(Topic::Commands));
        Self {
            state: Mutex::new(state),
            latch,
            directives,
            bus,
            command_feed,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn latch(&self) -> EmergencyLatch {
        self.latch.clone()
    }

    // ── tick ────────────────────────────────────────────────────────────────

    pub fn tick(&self, inputs: &SafetyInputs) -> TickReport {
        let started = Instant::now();
        let faults = self
            .command_feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain();

        let mut report = TickReport::default();
        let mut st = self.lock_state();

        for event in faults {
            if let EventPayload::ActuationFault { actuator, details } = event.payload {
                let alert = SafetyAlert::new(
                    AlertKind::ActuationFault,
                    Severity::High,
                    actuator.clone(),
                    format!("Actuation fault on {actuator}: {details}"),
                );
                self.count(&mut report, self.raise(&mut st, alert));
            }
        }

        self.check_zones(&mut st, inputs, &mut report);
        self.check_collisions(&mut st, inputs, &mut report);

        if st.alerts.high_or_critical_count() >= st.config.escalation_threshold
            && !st.emergency.is_active()
            && self.trigger(&mut st, Severity::Critical, CAUSE_MULTIPLE_CRITICAL)
        {
            report.emergency_triggered = Some(CAUSE_MULTIPLE_CRITICAL.to_string());
        }

        let retention = chrono::Duration::hours(st.config.alert_retention_hours);
        report.expired_alerts = st.alerts.purge_expired(Utc::now(), retention).len();

        let budget = Duration::from_millis(st.config.tick_ms);
        drop(st);

        report.elapsed = started.elapsed();
        if report.elapsed > budget {
            warn!(
                elapsed_ms = report.elapsed.as_millis() as u64,
                budget_ms = budget.as_millis() as u64,
                "safety tick overran its budget"
            );
        } else {
            debug!(
                elapsed_us = report.elapsed.as_micros() as u64,
                alerts = report.alerts_raised,
                "safety tick"
            );
        }
        report
    }

    fn check_zones(&self, st: &mut MonitorState, inputs: &SafetyInputs, report: &mut TickReport) {
        let Some(pose) = &inputs.pose else {
            let gap = SafetyAlert::new(
                AlertKind::SensorGap,
                Severity::Medium,
                "pose",
                "No pose fix; zone occupancy unknown",
            );
            self.count(report, self.raise(st, gap));
            return;
        };
        st.last_pose = Some(pose.clone());

        let position = pose.position();
        let checks = st.zones.evaluate(&position);
        for check in checks.iter().filter(|c| c.occupied) {
            let zone = &check.zone;
            match zone.kind {
                ZoneKind::Restricted => {
                    let alert = SafetyAlert::new(
                        AlertKind::ZoneViolation,
                        Severity::High,
                        zone.id.clone(),
                        format!("Restricted zone {} entered", zone.name),
                    )
                    .at(position)
                    .with_distance(check.distance);
                    self.count(report, self.raise(st, alert));
                    if self.trigger(st, Severity::High, CAUSE_RESTRICTED_ZONE) {
                        report.emergency_triggered = Some(CAUSE_RESTRICTED_ZONE.to_string());
                    }
                }
                ZoneKind::Warning => {
                    let alert = SafetyAlert::new(
                        AlertKind::ZoneViolation,
                        Severity::Medium,
                        zone.id.clone(),
                        format!("Warning zone {} entered", zone.name),
                    )
                    .at(position)
                    .with_distance(check.distance);
                    self.count(report, self.raise(st, alert));
                }
                ZoneKind::Slow => {}
            }
        }

        let cap = speed_cap(&checks);
        if cap != st.speed_limit {
            info!(speed_limit = ?cap, "slow-zone speed limit changed");
            st.speed_limit = cap;
            self.send(SafetyDirective::SpeedLimit(cap));
        }
    }

    fn check_collisions(
        &self,
        st: &mut MonitorState,
        inputs: &SafetyInputs,
        report: &mut TickReport,
    ) {
        let informative = inputs
            .scan
            .as_ref()
            .filter(|scan| scan.has_information() && !scan.synthetic);

        if let Some(scan) = informative
            && st.last_scan_at != Some(scan.timestamp)
        {
            st.last_scan_at = Some(scan.timestamp);
            if !st.watchdog.is_registered(SCAN_FEED) {
                let timeout = Duration::from_millis(st.config.scan_feed_timeout_ms);
                st.watchdog.register(SCAN_FEED, timeout);
            }
            st.watchdog.heartbeat(SCAN_FEED);
        }

        if st.watchdog.is_registered(SCAN_FEED) && st.watchdog.health(SCAN_FEED) == FeedHealth::Stale {
            let gap = SafetyAlert::new(
                AlertKind::SensorGap,
                Severity::Medium,
                "scan_feed",
                "Range scan feed is stale",
            );
            self.count(report, self.raise(st, gap));
        }

        let mut hazards: Vec<(f64, String, f64)> = Vec::new();
        if let Some(scan) = informative
            && let Some(nearest) = scan.nearest()
        {
            hazards.push((nearest.distance * 1000.0, nearest.id.clone(), nearest.confidence));
        }
        if let Some(d) = inputs.proximity_mm {
            hazards.push((d, "proximity".to_string(), 1.0));
        }

        if informative.is_none() && inputs.proximity_mm.is_none() {
            let gap = SafetyAlert::new(
                AlertKind::SensorGap,
                Severity::Medium,
                "obstacle_feed",
                "No obstacle information available",
            );
            self.count(report, self.raise(st, gap));
            return;
        }

        let Some((distance, key, confidence)) = hazards
            .into_iter()
            .min_by(|a, b| a.0.total_cmp(&b.0))
        else {
            return;
        };
        if distance < st.config.min_safe_distance_mm {
            let severity = if distance < st.config.collision_critical_mm {
                Severity::High
            } else {
                Severity::Medium
            };
            let mut alert = SafetyAlert::new(
                AlertKind::ObstacleDetected,
                severity,
                key,
                format!("Obstacle at {distance:.0} mm inside safe distance"),
            )
            .with_distance(distance)
            .with_confidence(confidence);
            if let Some(pose) = &inputs.pose {
                alert = alert.at(pose.position());
            }
            self.count(report, self.raise(st, alert));
        }
    }

    fn count(&self, report: &mut TickReport, raised: Raised) {
        if raised.is_new() {
            report.alerts_raised += 1;
        }
    }

    fn raise(&self, st: &mut MonitorState, alert: SafetyAlert) -> Raised {
        let snapshot = alert.clone();
        let raised = st.alerts.raise(alert);
        if raised.is_new() {
            st.emergency.log(
                SafetyEventKind::AlertRaised,
                snapshot.severity,
                snapshot.message.clone(),
            );
            self.bus
                .publish_to(Topic::SafetyAlerts, Event::new(SOURCE, EventPayload::Alert(snapshot)));
        }
        raised
    }

    /// Activate the emergency, engage the latch and stop motion.
    ///
    /// Returns `true` when this call activated the emergency.
    fn trigger(&self, st: &mut MonitorState, level: Severity, cause: &str) -> bool {
        let newly = st.emergency.activate(level, cause);
        self.latch.engage();
        if newly {
            self.send(SafetyDirective::EmergencyStop {
                cause: cause.to_string(),
            });
            st.emergency
                .record_action("Emergency stop directive sent to motion");
            self.publish_status(st.emergency.status().clone());
        }
        newly
    }

    fn send(&self, directive: SafetyDirective) {
        if self.directives.send(directive).is_err() {
            warn!("motion directive channel closed; directive dropped");
        }
    }

    fn publish_status(&self, status: EmergencyStatus) {
        self.bus
            .publish_to(Topic::SafetyAlerts, Event::new(SOURCE, EventPayload::Emergency(status)));
    }

    // ── emergency handling ──────────────────────────────────────────────────

    /// Hardware or operator E-Stop input.
    ///
    /// Activates a critical emergency, stops motion, then runs the matched
    /// procedure step by step. The returned status is resolved but still
    /// active; only [`SafetyMonitor::recover`] clears it.
    pub async fn handle_estop(&self) -> EmergencyStatus {
        let (procedure, step_delay) = {
            let mut st = self.lock_state();
            if !self.trigger(&mut st, Severity::Critical, CAUSE_ESTOP) {
                // Already active: motion must still be stopped.
                self.send(SafetyDirective::EmergencyStop {
                    cause: CAUSE_ESTOP.to_string(),
                });
            }
            (
                st.emergency.procedure_for(CAUSE_ESTOP),
                Duration::from_millis(st.config.procedure_step_ms),
            )
        };

        if let Some(procedure) = procedure {
            for step in &procedure.steps {
                if !self.lock_state().emergency.record_step(&procedure.name, step) {
                    break;
                }
                tokio::time::sleep(step_delay).await;
            }
            self.lock_state().emergency.complete(&procedure.name);
        }

        let status = self.emergency_status();
        self.publish_status(status.clone());
        status
    }

    /// Explicit, logged recovery: clears the emergency and releases the latch.
    ///
    /// Motion stays in its emergency state until separately reset.
    pub fn recover(&self, operator: &str) -> Result<EmergencyStatus, CoreError> {
        let status = self.lock_state().emergency.recover(operator)?;
        self.latch.release();
        self.publish_status(status.clone());
        Ok(status)
    }

    pub fn emergency_status(&self) -> EmergencyStatus {
        self.lock_state().emergency.status().clone()
    }

    pub fn is_emergency_active(&self) -> bool {
        self.lock_state().emergency.is_active()
    }

    pub fn register_procedure(&self, procedure: EmergencyProcedure) {
        info!(name = %procedure.name, trigger = %procedure.trigger, "emergency procedure registered");
        self.lock_state().emergency.register_procedure(procedure);
    }

    pub fn safety_events(&self, hours: i64) -> Vec<SafetyEvent> {
        self.lock_state().emergency.events_since(hours, Utc::now())
    }

    // ── alerts ──────────────────────────────────────────────────────────────

    /// Raise an alert from outside the tick (external detectors, tests).
    pub fn raise_alert(&self, alert: SafetyAlert) -> Uuid {
        let mut st = self.lock_state();
        self.raise(&mut st, alert).id()
    }

    pub fn resolve_alert(&self, id: Uuid) -> Result<SafetyAlert, CoreError> {
        let mut st = self.lock_state();
        let alert = st
            .alerts
            .resolve(id)
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown alert {id}")))?;
        st.emergency.log(
            SafetyEventKind::AlertResolved,
            alert.severity,
            format!("Alert resolved: {}", alert.message),
        );
        Ok(alert)
    }

    pub fn active_alerts(&self) -> Vec<SafetyAlert> {
        self.lock_state().alerts.active().to_vec()
    }

    pub fn alert_history(&self) -> Vec<SafetyAlert> {
        self.lock_state().alerts.history()
    }

    // ── zones and config ────────────────────────────────────────────────────

    pub fn add_zone(&self, zone: SafetyZone) {
        let mut st = self.lock_state();
        let description = format!("Zone {} ({:?}) added", zone.id, zone.kind);
        st.zones.add(zone);
        st.emergency
            .log(SafetyEventKind::ZoneAdded, Severity::Low, description);
    }

    pub fn remove_zone(&self, zone_id: &str) -> Option<SafetyZone> {
        let mut st = self.lock_state();
        let removed = st.zones.remove(zone_id)?;
        st.emergency.log(
            SafetyEventKind::ZoneRemoved,
            Severity::Low,
            format!("Zone {zone_id} removed"),
        );
        Some(removed)
    }

    pub fn zones(&self) -> Vec<SafetyZone> {
        self.lock_state().zones.zones().to_vec()
    }

    pub fn config(&self) -> SafetyConfig {
        self.lock_state().config.clone()
    }

    pub fn update_config(&self, config: SafetyConfig) {
        let mut st = self.lock_state();
        st.watchdog
            .set_timeout(Duration::from_millis(config.scan_feed_timeout_ms));
        info!(?config, "safety configuration updated");
        st.config = config;
        st.emergency.log(
            SafetyEventKind::ConfigUpdated,
            Severity::Low,
            "Safety configuration updated".to_string(),
        );
    }

    // ── status export ───────────────────────────────────────────────────────

    /// Snapshot for external consumers.
    ///
    /// `health = (active_zones − zones_with_alerts) / total_zones`, or 1.0
    /// with no zones configured.
    pub fn get_safety_status(&self) -> SafetyStatus {
        let st = self.lock_state();
        let position = st.last_pose.as_ref().map(Pose::position);

        let zones: Vec<ZoneStatus> = st
            .zones
            .zones()
            .iter()
            .map(|zone| {
                let distance = position
                    .map(|p| zone.distance_from(&p))
                    .unwrap_or(f64::INFINITY);
                ZoneStatus {
                    zone_id: zone.id.clone(),
                    kind: zone.kind,
                    active: zone.active,
                    occupied: zone.active && distance <= zone.radius,
                    distance,
                    has_alert: st.alerts.has_alert_in(zone),
                }
            })
            .collect();

        let health = if zones.is_empty() {
            1.0
        } else {
            let active = zones.iter().filter(|z| z.active).count() as f64;
            let alerted = zones.iter().filter(|z| z.active && z.has_alert).count() as f64;
            ((active - alerted) / zones.len() as f64).max(0.0)
        };

        SafetyStatus {
            emergency: st.emergency.status().clone(),
            estop_active: self.latch.is_engaged(),
            zones,
            active_alerts: st.alerts.len(),
            alerts_by_severity: st.alerts.count_by_severity(),
            health,
            timestamp: Utc::now(),
        }
    }

    // ── background loop ─────────────────────────────────────────────────────

    /// Spawn the periodic monitoring loop on the current tokio runtime.
    pub fn start_monitoring(self: &Arc<Self>, feed: Arc<dyn SafetyFeed>) -> MonitorHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let monitor = Arc::clone(self);
        let stop_flag = Arc::clone(&stop);
        info!("safety monitoring started");
        let task = tokio::spawn(async move {
            while !stop_flag.load(Ordering::SeqCst) {
                let inputs = feed.snapshot();
                monitor.tick(&inputs);
                let period = Duration::from_millis(monitor.lock_state().config.tick_ms.max(1));
                tokio::time::sleep(period).await;
            }
        });
        MonitorHandle { stop, task }
    }
}

/// Handle to the background loop started by [`SafetyMonitor::start_monitoring`].
pub struct MonitorHandle {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        self.task.abort();
        let _ = self.task.await;
        info!("safety monitoring stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hauler_types::{Obstacle, ObstacleType, Point2};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use crate::zones::default_zones;

    fn monitor_with(
        config: SafetyConfig,
        zones: Vec<SafetyZone>,
    ) -> (SafetyMonitor, UnboundedReceiver<SafetyDirective>, EventBus) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = EventBus::default();
        let monitor = SafetyMonitor::new(config, zones, EmergencyLatch::new(), tx, bus.clone());
        (monitor, rx, bus)
    }

    fn clear_inputs(x: f64, y: f64) -> SafetyInputs {
        SafetyInputs {
            pose: Some(Pose::at(x, y, 0.0)),
            scan: None,
            proximity_mm: Some(5000.0),
        }
    }

    fn scan_with_obstacle_at(distance_m: f64) -> Scan {
        let now = Utc::now();
        let obstacle = Obstacle {
            id: "obs_1".to_string(),
            obstacle_type: ObstacleType::Static,
            severity: Severity::Medium,
            center: Point2::new(distance_m, 0.0),
            distance: distance_m,
            angle: 0.0,
            width: 0.2,
            height: 0.2,
            confidence: 0.9,
            points: vec![],
            history: vec![],
            first_seen: now,
            last_seen: now,
        };
        Scan {
            obstacles: vec![obstacle],
            quality: 0.8,
            ..Scan::empty()
        }
    }

    #[test]
    fn restricted_zone_triggers_emergency_within_one_tick() {
        let (monitor, mut rx, _bus) = monitor_with(SafetyConfig::default(), default_zones());
        let report = monitor.tick(&clear_inputs(1050.0, 1000.0));

        assert_eq!(report.emergency_triggered.as_deref(), Some(CAUSE_RESTRICTED_ZONE));
        assert!(monitor.latch().is_engaged());
        assert!(matches!(
            rx.try_recv(),
            Ok(SafetyDirective::EmergencyStop { ref cause }) if cause == CAUSE_RESTRICTED_ZONE
        ));
        // A second tick inside the zone does not re-send.
        monitor.tick(&clear_inputs(1050.0, 1000.0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn warning_zone_raises_medium_alert_without_stop() {
        let zone = SafetyZone::new("w1", ZoneKind::Warning, Point2::new(0.0, 0.0), 500.0);
        let (monitor, mut rx, _bus) = monitor_with(SafetyConfig::default(), vec![zone]);
        monitor.tick(&clear_inputs(100.0, 0.0));

        let alerts = monitor.active_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::ZoneViolation);
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert!(!monitor.is_emergency_active());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn close_obstacle_inside_zone_lowers_health() {
        let zone = SafetyZone::new("dock_slow", ZoneKind::Slow, Point2::new(500.0, 500.0), 150.0)
            .with_max_speed(100.0);
        let (monitor, _rx, _bus) = monitor_with(SafetyConfig::default(), vec![zone]);
        assert_eq!(monitor.get_safety_status().health, 1.0);

        let inputs = SafetyInputs {
            scan: Some(scan_with_obstacle_at(0.1)),
            ..clear_inputs(520.0, 500.0)
        };
        monitor.tick(&inputs);

        let alerts = monitor.active_alerts();
        let obstacle = alerts
            .iter()
            .find(|a| a.kind == AlertKind::ObstacleDetected)
            .expect("obstacle alert");
        assert_eq!(obstacle.position, Some(Point2::new(520.0, 500.0)));
        let status = monitor.get_safety_status();
        assert!(status.zones[0].has_alert);
        assert_eq!(status.health, 0.0);
    }

    #[test]
    fn obstacle_outside_zone_keeps_health() {
        let zone = SafetyZone::new("dock_slow", ZoneKind::Slow, Point2::new(500.0, 500.0), 150.0);
        let (monitor, _rx, _bus) = monitor_with(SafetyConfig::default(), vec![zone]);
        let inputs = SafetyInputs {
            scan: Some(scan_with_obstacle_at(0.1)),
            ..clear_inputs(3000.0, 3000.0)
        };
        monitor.tick(&inputs);
        assert_eq!(monitor.active_alerts().len(), 1);
        assert_eq!(monitor.get_safety_status().health, 1.0);
    }

    #[test]
    fn slow_zone_sends_speed_limit_on_entry_and_exit() {
        let (monitor, mut rx, _bus) = monitor_with(SafetyConfig::default(), default_zones());
        monitor.tick(&clear_inputs(500.0, 500.0));
        assert_eq!(rx.try_recv().ok(), Some(SafetyDirective::SpeedLimit(Some(100.0))));
        monitor.tick(&clear_inputs(510.0, 500.0));
        assert!(rx.try_recv().is_err());
        monitor.tick(&clear_inputs(0.0, 0.0));
        assert_eq!(rx.try_recv().ok(), Some(SafetyDirective::SpeedLimit(None)));
    }

    #[test]
    fn three_high_alerts_escalate() {
        let (monitor, mut rx, _bus) = monitor_with(SafetyConfig::default(), vec![]);
        for key in ["a", "b", "c"] {
            monitor.raise_alert(SafetyAlert::new(
                AlertKind::ObstacleDetected,
                Severity::High,
                key,
                "close call",
            ));
        }
        let report = monitor.tick(&clear_inputs(0.0, 0.0));

        assert_eq!(report.emergency_triggered.as_deref(), Some(CAUSE_MULTIPLE_CRITICAL));
        let status = monitor.emergency_status();
        assert!(status.active);
        assert_eq!(status.cause.as_deref(), Some(CAUSE_MULTIPLE_CRITICAL));
        assert!(matches!(rx.try_recv(), Ok(SafetyDirective::EmergencyStop { .. })));
    }

    #[test]
    fn two_high_alerts_do_not_escalate() {
        let (monitor, _rx, _bus) = monitor_with(SafetyConfig::default(), vec![]);
        for key in ["a", "b"] {
            monitor.raise_alert(SafetyAlert::new(AlertKind::ObstacleDetected, Severity::Critical, key, "x"));
        }
        monitor.tick(&clear_inputs(0.0, 0.0));
        assert!(!monitor.is_emergency_active());
    }

    #[test]
    fn collision_severity_depends_on_distance() {
        let (monitor, _rx, _bus) = monitor_with(SafetyConfig::default(), vec![]);
        let mut inputs = clear_inputs(0.0, 0.0);
        inputs.scan = Some(scan_with_obstacle_at(0.2));
        monitor.tick(&inputs);
        let alert = monitor.active_alerts().into_iter().next().unwrap();
        assert_eq!(alert.kind, AlertKind::ObstacleDetected);
        assert_eq!(alert.severity, Severity::Medium);
        assert!((alert.distance.unwrap() - 200.0).abs() < 1e-9);

        inputs.scan = Some(scan_with_obstacle_at(0.03));
        monitor.tick(&inputs);
        let alerts = monitor.active_alerts();
        assert_eq!(alerts.len(), 1, "same obstacle refreshes its alert");
        assert_eq!(alerts[0].severity, Severity::High);
    }

    #[test]
    fn proximity_probe_used_without_scan() {
        let (monitor, _rx, _bus) = monitor_with(SafetyConfig::default(), vec![]);
        let mut inputs = clear_inputs(0.0, 0.0);
        inputs.proximity_mm = Some(120.0);
        monitor.tick(&inputs);
        let alert = monitor.active_alerts().into_iter().next().unwrap();
        assert_eq!(alert.source_key, "proximity");
    }

    #[test]
    fn missing_obstacle_information_is_a_sensor_gap() {
        let (monitor, _rx, _bus) = monitor_with(SafetyConfig::default(), vec![]);
        let mut inputs = clear_inputs(0.0, 0.0);
        inputs.proximity_mm = None;
        inputs.scan = Some(Scan::empty());
        monitor.tick(&inputs);
        let alerts = monitor.active_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::SensorGap);
        assert_eq!(alerts[0].source_key, "obstacle_feed");
    }

    #[test]
    fn synthetic_scan_is_not_obstacle_information() {
        let (monitor, _rx, _bus) = monitor_with(SafetyConfig::default(), vec![]);
        let mut inputs = clear_inputs(0.0, 0.0);
        inputs.proximity_mm = None;
        let mut scan = scan_with_obstacle_at(5.0);
        scan.synthetic = true;
        inputs.scan = Some(scan);
        monitor.tick(&inputs);
        assert!(monitor
            .active_alerts()
            .iter()
            .any(|a| a.kind == AlertKind::SensorGap));
    }

    #[test]
    fn stale_scan_feed_raises_gap() {
        let config = SafetyConfig {
            scan_feed_timeout_ms: 10,
            ..SafetyConfig::default()
        };
        let (monitor, _rx, _bus) = monitor_with(config, vec![]);
        let mut inputs = clear_inputs(0.0, 0.0);
        inputs.scan = Some(scan_with_obstacle_at(5.0));
        monitor.tick(&inputs);
        assert!(monitor.active_alerts().is_empty());

        std::thread::sleep(Duration::from_millis(25));
        monitor.tick(&inputs);
        assert!(monitor
            .active_alerts()
            .iter()
            .any(|a| a.source_key == "scan_feed"));
    }

    #[test]
    fn actuation_fault_on_bus_becomes_alert() {
        let (monitor, _rx, bus) = monitor_with(SafetyConfig::default(), vec![]);
        bus.publish_to(
            Topic::Commands,
            Event::new(
                "test",
                EventPayload::ActuationFault {
                    actuator: "drive".to_string(),
                    details: "bridge timeout".to_string(),
                },
            ),
        );
        monitor.tick(&clear_inputs(0.0, 0.0));
        let alert = monitor.active_alerts().into_iter().next().unwrap();
        assert_eq!(alert.kind, AlertKind::ActuationFault);
        assert_eq!(alert.source_key, "drive");
    }

    #[test]
    fn resolve_alert_and_unknown_id() {
        let (monitor, _rx, _bus) = monitor_with(SafetyConfig::default(), vec![]);
        let id = monitor.raise_alert(SafetyAlert::new(AlertKind::SensorGap, Severity::Low, "x", "x"));
        assert!(monitor.resolve_alert(id).unwrap().resolved);
        assert!(monitor.active_alerts().is_empty());
        assert!(matches!(monitor.resolve_alert(id), Err(CoreError::InvalidInput(_))));
        assert_eq!(monitor.alert_history().len(), 1);
    }

    #[test]
    fn health_formula() {
        let (monitor, _rx, _bus) = monitor_with(SafetyConfig::default(), vec![]);
        assert_eq!(monitor.get_safety_status().health, 1.0);

        monitor.add_zone(SafetyZone::new("w1", ZoneKind::Warning, Point2::new(0.0, 0.0), 100.0));
        monitor.add_zone(SafetyZone::new("w2", ZoneKind::Warning, Point2::new(5000.0, 0.0), 100.0));
        monitor.tick(&clear_inputs(0.0, 0.0));

        let status = monitor.get_safety_status();
        assert!((status.health - 0.5).abs() < 1e-9);
        assert!(status.zones.iter().any(|z| z.zone_id == "w1" && z.occupied && z.has_alert));
        assert_eq!(status.active_alerts, 1);
        assert!(!status.estop_active);
    }

    #[test]
    fn zone_management_and_events() {
        let (monitor, _rx, _bus) = monitor_with(SafetyConfig::default(), default_zones());
        assert_eq!(monitor.zones().len(), 2);
        assert!(monitor.remove_zone("restricted_1").is_some());
        assert!(monitor.remove_zone("restricted_1").is_none());
        monitor.update_config(SafetyConfig {
            min_safe_distance_mm: 500.0,
            ..SafetyConfig::default()
        });
        assert_eq!(monitor.config().min_safe_distance_mm, 500.0);
        let kinds: Vec<_> = monitor.safety_events(1).into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![SafetyEventKind::ZoneRemoved, SafetyEventKind::ConfigUpdated]);
    }

    #[tokio::test]
    async fn estop_runs_procedure_and_stays_latched() {
        let config = SafetyConfig {
            procedure_step_ms: 1,
            ..SafetyConfig::default()
        };
        let (monitor, mut rx, _bus) = monitor_with(config, vec![]);
        let status = monitor.handle_estop().await;

        assert!(status.active);
        assert!(status.resolved);
        assert_eq!(status.level, Severity::Critical);
        for step in ["Stop all movement", "Disable motors", "Activate safety protocols"] {
            assert!(status.actions_taken.iter().any(|a| a == step), "missing {step}");
        }
        assert!(matches!(rx.try_recv(), Ok(SafetyDirective::EmergencyStop { .. })));
        assert!(monitor.latch().is_engaged());

        let recovered = monitor.recover("operator-7").unwrap();
        assert!(!recovered.active);
        assert!(!monitor.latch().is_engaged());
        assert!(monitor.recover("operator-7").is_err());
    }

    #[tokio::test]
    async fn monitoring_loop_ticks_until_stopped() {
        struct Inside;
        impl SafetyFeed for Inside {
            fn snapshot(&self) -> SafetyInputs {
                SafetyInputs {
                    pose: Some(Pose::at(1000.0, 1000.0, 0.0)),
                    scan: None,
                    proximity_mm: Some(5000.0),
                }
            }
        }

        let config = SafetyConfig {
            tick_ms: 10,
            ..SafetyConfig::default()
        };
        let (monitor, mut rx, _bus) = monitor_with(config, default_zones());
        let monitor = Arc::new(monitor);
        let handle = monitor.start_monitoring(Arc::new(Inside));

        let directive = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("directive within a second");
        assert!(matches!(directive, Some(SafetyDirective::EmergencyStop { .. })));
        assert!(handle.is_running());
        handle.stop().await;
    }
}
