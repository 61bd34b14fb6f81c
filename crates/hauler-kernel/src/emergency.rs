//! Emergency state machine, procedures and the safety event log.
//!
//! ```text
//!   inactive ──activate──▶ active ──complete──▶ active + resolved
//!       ▲                    │                        │
//!       └──────── recover(operator) ◀─────────────────┘
//! ```
//!
//! `complete` only records that the matched procedure has run; the status
//! stays active (and the emergency latch held) until an operator recovers.

use chrono::{DateTime, Duration, Utc};
use hauler_types::{
    CoreError, EmergencyProcedure, EmergencyStatus, RingBuffer, SafetyEvent, SafetyEventKind,
    Severity,
};
use tracing::{error, info, warn};

pub const CAUSE_ESTOP: &str = "estop";
pub const CAUSE_RESTRICTED_ZONE: &str = "restricted_zone_violation";
pub const CAUSE_MULTIPLE_CRITICAL: &str = "multiple_critical_alerts";

/// Procedures registered on a fresh monitor. Specific triggers are matched
/// before the wildcard.
pub fn default_procedures() -> Vec<EmergencyProcedure> {
    let steps = |s: &[&str]| s.iter().map(|x| x.to_string()).collect::<Vec<_>>();
    vec![
        EmergencyProcedure {
            name: "emergency_stop".to_string(),
            trigger: CAUSE_ESTOP.to_string(),
            level: Severity::Critical,
            steps: steps(&[
                "Stop all movement",
                "Disable motors",
                "Activate safety protocols",
            ]),
        },
        EmergencyProcedure {
            name: "restricted_zone".to_string(),
            trigger: CAUSE_RESTRICTED_ZONE.to_string(),
            level: Severity::High,
            steps: steps(&["Stop all movement", "Hold position", "Await operator clearance"]),
        },
        EmergencyProcedure {
            name: "alert_escalation".to_string(),
            trigger: CAUSE_MULTIPLE_CRITICAL.to_string(),
            level: Severity::Critical,
            steps: steps(&["Stop all movement", "Disable motors", "Review active alerts"]),
        },
        EmergencyProcedure {
            name: "generic".to_string(),
            trigger: "*".to_string(),
            level: Severity::High,
            steps: steps(&["Stop all movement", "Notify operator"]),
        },
    ]
}

pub struct EmergencyState {
    status: EmergencyStatus,
    procedures: Vec<EmergencyProcedure>,
    events: RingBuffer<SafetyEvent>,
}

impl EmergencyState {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            status: EmergencyStatus::inactive(),
            procedures: default_procedures(),
            events: RingBuffer::new(event_capacity),
        }
    }

    pub fn status(&self) -> &EmergencyStatus {
        &self.status
    }

    pub fn is_active(&self) -> bool {
        self.status.active
    }

    /// Enter (or escalate) the emergency state.
    ///
    /// Returns `true` only on the inactive → active transition. While
    /// already active, a higher `level` escalates and is noted in the action
    /// log; the original cause is kept.
    pub fn activate(&mut self, level: Severity, cause: &str) -> bool {
        let now = Utc::now();
        if self.status.active {
            if level > self.status.level {
                warn!(from = ?self.status.level, to = ?level, cause, "emergency escalated");
                self.status.level = level;
                self.status
                    .actions_taken
                    .push(format!("Escalated to {level:?} by {cause}"));
            }
            return false;
        }

        error!(?level, cause, "EMERGENCY activated");
        self.status = EmergencyStatus {
            active: true,
            level,
            cause: Some(cause.to_string()),
            actions_taken: vec![format!("Emergency activated: {cause}")],
            resolved: false,
            activated_at: Some(now),
            resolved_at: None,
            recovered_by: None,
            recovered_at: None,
        };
        self.log(
            SafetyEventKind::EmergencyActivated,
            level,
            format!("Emergency activated: {cause}"),
        );
        true
    }

    pub fn record_action(&mut self, action: impl Into<String>) {
        self.status.actions_taken.push(action.into());
    }

    /// Record one executed procedure step. Ignored once recovered.
    pub fn record_step(&mut self, procedure: &str, step: &str) -> bool {
        if !self.status.active {
            return false;
        }
        info!(procedure, step, "emergency procedure step");
        self.status.actions_taken.push(step.to_string());
        self.log(
            SafetyEventKind::ProcedureStep,
            self.status.level,
            format!("{procedure}: {step}"),
        );
        true
    }

    /// Mark the running procedure complete. The status stays active.
    pub fn complete(&mut self, procedure: &str) {
        if !self.status.active {
            return;
        }
        let now = Utc::now();
        self.status.resolved = true;
        self.status.resolved_at = Some(now);
        info!(procedure, "emergency procedure completed");
        self.log(
            SafetyEventKind::ProcedureCompleted,
            self.status.level,
            format!("Procedure {procedure} completed"),
        );
    }

    /// Explicit operator recovery. Fails when no emergency is active.
    pub fn recover(&mut self, operator: &str) -> Result<EmergencyStatus, CoreError> {
        if !self.status.active {
            return Err(CoreError::InvalidInput(
                "no active emergency to recover from".to_string(),
            ));
        }
        let now = Utc::now();
        self.status.active = false;
        self.status.recovered_by = Some(operator.to_string());
        self.status.recovered_at = Some(now);
        self.status
            .actions_taken
            .push(format!("Recovered by {operator}"));
        warn!(operator, cause = ?self.status.cause, "emergency recovered");
        self.log(
            SafetyEventKind::Recovered,
            Severity::Low,
            format!("Emergency recovered by {operator}"),
        );
        Ok(self.status.clone())
    }

    pub fn register_procedure(&mut self, procedure: EmergencyProcedure) {
        match self.procedures.iter_mut().find(|p| p.name == procedure.name) {
            Some(existing) => *existing = procedure,
            None => {
                // Wildcards stay last.
                let at = self
                    .procedures
                    .iter()
                    .position(|p| p.trigger == "*")
                    .filter(|_| procedure.trigger != "*")
                    .unwrap_or(self.procedures.len());
                self.procedures.insert(at, procedure);
            }
        }
    }

    pub fn procedures(&self) -> &[EmergencyProcedure] {
        &self.procedures
    }

    /// First procedure with an exact trigger match, else the first wildcard.
    pub fn procedure_for(&self, cause: &str) -> Option<EmergencyProcedure> {
        self.procedures
            .iter()
            .find(|p| p.trigger == cause)
            .or_else(|| self.procedures.iter().find(|p| p.matches(cause)))
            .cloned()
    }

    pub fn log(&mut self, kind: SafetyEventKind, severity: Severity, description: String) {
        self.events.push(SafetyEvent::new(kind, severity, description));
    }

    /// Events from the last `hours`, oldest first.
    pub fn events_since(&self, hours: i64, now: DateTime<Utc>) -> Vec<SafetyEvent> {
        let cutoff = now - Duration::hours(hours);
        self.events
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_is_edge_triggered() {
        let mut state = EmergencyState::new(100);
        assert!(state.activate(Severity::High, CAUSE_RESTRICTED_ZONE));
        assert!(!state.activate(Severity::Critical, CAUSE_ESTOP));
        let status = state.status();
        assert_eq!(status.level, Severity::Critical);
        assert_eq!(status.cause.as_deref(), Some(CAUSE_RESTRICTED_ZONE));
        assert!(status.actions_taken.iter().any(|a| a.contains("estop")));
    }

    #[test]
    fn complete_keeps_emergency_active() {
        let mut state = EmergencyState::new(100);
        state.activate(Severity::Critical, CAUSE_ESTOP);
        state.record_step("emergency_stop", "Stop all movement");
        state.complete("emergency_stop");
        assert!(state.status().active);
        assert!(state.status().resolved);
        assert!(state.status().resolved_at.is_some());
    }

    #[test]
    fn recover_requires_active_emergency() {
        let mut state = EmergencyState::new(100);
        assert!(state.recover("op").is_err());
        state.activate(Severity::Critical, CAUSE_ESTOP);
        let status = state.recover("alice").unwrap();
        assert!(!status.active);
        assert_eq!(status.recovered_by.as_deref(), Some("alice"));
        assert!(!state.is_active());
        assert!(!state.record_step("x", "late step"));
    }

    #[test]
    fn specific_procedure_beats_wildcard() {
        let state = EmergencyState::new(100);
        assert_eq!(state.procedure_for(CAUSE_ESTOP).unwrap().name, "emergency_stop");
        assert_eq!(
            state.procedure_for(CAUSE_ESTOP).unwrap().steps,
            vec!["Stop all movement", "Disable motors", "Activate safety protocols"]
        );
        assert_eq!(state.procedure_for("forklift_fire").unwrap().name, "generic");
    }

    #[test]
    fn registered_procedure_lands_before_wildcard() {
        let mut state = EmergencyState::new(100);
        state.register_procedure(EmergencyProcedure {
            name: "battery".to_string(),
            trigger: "battery_fault".to_string(),
            level: Severity::High,
            steps: vec!["Isolate pack".to_string()],
        });
        assert_eq!(state.procedure_for("battery_fault").unwrap().name, "battery");
        assert_eq!(state.procedures().last().unwrap().trigger, "*");
    }

    #[test]
    fn events_are_windowed_by_hours() {
        let mut state = EmergencyState::new(100);
        state.activate(Severity::Critical, CAUSE_ESTOP);
        let now = Utc::now();
        assert_eq!(state.events_since(1, now).len(), 1);
        assert!(state.events_since(1, now + Duration::hours(2)).is_empty());
    }
}
