//! [`StateVerifier`] – command interlock / rule engine.
//!
//! Before a [`MotorCommand`] is handed to the firmware bridge, pass it through
//! [`StateVerifier::verify`].  Every registered [`Rule`] is evaluated in
//! order; the first violation returns [`CoreError::CommandRejected`] and the
//! command is **not** sent.
//!
//! Two built-in rules are provided:
//! - [`EmergencyInterlock`] – while the shared [`EmergencyLatch`] is engaged,
//!   rejects every command below emergency priority.
//! - [`SpeedCapRule`] – rejects `SetSpeed` commands faster than the vehicle
//!   maximum.
//!
//! Emergency-stop commands pass every built-in rule.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hauler_types::{CoreError, MotorCommand, PRIORITY_EMERGENCY};
use tracing::warn;

// ────────────────────────────────────────────────────────────────────────────
// EmergencyLatch
// ────────────────────────────────────────────────────────────────────────────

/// Process-local "emergency in force" flag shared by the safety monitor, the
/// motion controller and the interlock rule.
///
/// Clones share the same flag.  Engaging is idempotent; only an explicit
/// recovery releases it.
#[derive(Debug, Clone, Default)]
pub struct EmergencyLatch {
    engaged: Arc<AtomicBool>,
}

impl EmergencyLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engage the latch. Returns `true` if it was previously released.
    pub fn engage(&self) -> bool {
        !self.engaged.swap(true, Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.engaged.store(false, Ordering::SeqCst);
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single invariant that an outbound command must satisfy.
///
/// Implement this trait to create custom rules and add them to a
/// [`StateVerifier`] via [`StateVerifier::add_rule`].
pub trait Rule: Send + Sync {
    /// Human-readable name used in rejection messages.
    fn name(&self) -> &str;

    /// Return `Ok(())` when the command satisfies the invariant, or
    /// [`CoreError::CommandRejected`] when it is violated.
    fn check(&self, command: &MotorCommand) -> Result<(), CoreError>;
}

// ────────────────────────────────────────────────────────────────────────────
// StateVerifier
// ────────────────────────────────────────────────────────────────────────────

/// Rule engine that validates a [`MotorCommand`] against all registered
/// [`Rule`]s before it is dispatched.
///
/// # Example
///
/// ```
/// use hauler_kernel::state_verifier::{EmergencyInterlock, EmergencyLatch, StateVerifier};
/// use hauler_types::MotorCommand;
///
/// let latch = EmergencyLatch::new();
/// let mut verifier = StateVerifier::new();
/// verifier.add_rule(Box::new(EmergencyInterlock::new(latch.clone())));
///
/// assert!(verifier.verify(&MotorCommand::stop()).is_ok());
///
/// latch.engage();
/// assert!(verifier.verify(&MotorCommand::stop()).is_err());
/// assert!(verifier.verify(&MotorCommand::emergency_stop()).is_ok());
/// ```
#[derive(Default)]
pub struct StateVerifier {
    rules: Vec<Box<dyn Rule>>,
}

impl StateVerifier {
    /// Create an empty verifier with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard rule set: emergency interlock first, then the speed cap.
    pub fn standard(latch: EmergencyLatch, max_speed: f64) -> Self {
        let mut verifier = Self::new();
        verifier.add_rule(Box::new(EmergencyInterlock::new(latch)));
        verifier.add_rule(Box::new(SpeedCapRule { max_speed }));
        verifier
    }

    /// Register a new [`Rule`].  Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Validate `command` against every registered rule.
    pub fn verify(&self, command: &MotorCommand) -> Result<(), CoreError> {
        for rule in &self.rules {
            if let Err(e) = rule.check(command) {
                warn!(
                    rule = rule.name(),
                    command_id = %command.id,
                    priority = command.priority,
                    error = %e,
                    "command rejected"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Rejects every command below [`PRIORITY_EMERGENCY`] while the latch is held.
pub struct EmergencyInterlock {
    latch: EmergencyLatch,
}

impl EmergencyInterlock {
    pub fn new(latch: EmergencyLatch) -> Self {
        Self { latch }
    }
}

impl Rule for EmergencyInterlock {
    fn name(&self) -> &str {
        "emergency_interlock"
    }

    fn check(&self, command: &MotorCommand) -> Result<(), CoreError> {
        if command.priority < PRIORITY_EMERGENCY && self.latch.is_engaged() {
            return Err(CoreError::CommandRejected {
                rule: self.name().to_string(),
                details: format!(
                    "priority {} command refused while emergency is latched",
                    command.priority
                ),
            });
        }
        Ok(())
    }
}

/// Rejects `SetSpeed` commands whose magnitude exceeds `max_speed` (mm/s).
pub struct SpeedCapRule {
    pub max_speed: f64,
}

impl Rule for SpeedCapRule {
    fn name(&self) -> &str {
        "speed_cap"
    }

    fn check(&self, command: &MotorCommand) -> Result<(), CoreError> {
        if let Some(speed) = command.speed()
            && (!speed.is_finite() || speed.abs() > self.max_speed)
        {
            return Err(CoreError::CommandRejected {
                rule: self.name().to_string(),
                details: format!("speed {speed} exceeds cap {}", self.max_speed),
            });
        }
        Ok(())
    }
}
