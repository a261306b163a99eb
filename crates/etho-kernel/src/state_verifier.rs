//! [`StateVerifier`] – physical safety interlock / rule engine.
//!
//! Before a [`MotorCommand`] is handed to a robot link, pass it through
//! [`StateVerifier::verify`].  Every registered [`Rule`] is applied in order
//! to the output of the previous one; a rule may bound the command or reject
//! it with [`EthoError::HardwareFault`], in which case nothing is sent.
//!
//! Built-in rules:
//! - [`FiniteCommandRule`] – rejects commands carrying NaN or infinite values.
//! - [`SpeedCapRule`] – clamps wheel and burst speeds to a cap.
//! - [`TurnAngleRule`] – clamps the turn angle of discrete bursts.

use etho_types::{EthoError, MotorCommand};

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single physical invariant applied to outbound commands.
pub trait Rule: Send + Sync {
    /// Human-readable name used in fault messages.
    fn name(&self) -> &str;

    /// Return the (possibly bounded) command, or
    /// [`EthoError::HardwareFault`] when it must not be sent at all.
    fn apply(&self, command: MotorCommand) -> Result<MotorCommand, EthoError>;
}

// ────────────────────────────────────────────────────────────────────────────
// StateVerifier
// ────────────────────────────────────────────────────────────────────────────

/// Rule engine that bounds a [`MotorCommand`] before it is dispatched.
///
/// # Example
///
/// ```
/// use etho_kernel::state_verifier::{SpeedCapRule, StateVerifier};
/// use etho_types::MotorCommand;
///
/// let mut verifier = StateVerifier::new();
/// verifier.add_rule(Box::new(SpeedCapRule { max_speed_cm_s: 10.0 }));
///
/// let bounded = verifier
///     .verify(MotorCommand::Speed { left_cm_s: 25.0, right_cm_s: -3.0 })
///     .unwrap();
/// assert_eq!(bounded, MotorCommand::Speed { left_cm_s: 10.0, right_cm_s: -3.0 });
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

    /// The standard rule set for a differential-drive robot.
    pub fn differential_drive(max_speed_cm_s: f64, max_turn_deg: f64) -> Self {
        let mut verifier = Self::new();
        verifier.add_rule(Box::new(FiniteCommandRule));
        verifier.add_rule(Box::new(SpeedCapRule { max_speed_cm_s }));
        verifier.add_rule(Box::new(TurnAngleRule { max_turn_deg }));
        verifier
    }

    /// Register a new [`Rule`].  Rules are applied in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Run `command` through every registered rule.
    pub fn verify(&self, command: MotorCommand) -> Result<MotorCommand, EthoError> {
        self.rules.iter().try_fold(command, |cmd, rule| rule.apply(cmd))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Rejects commands with non-finite fields.
pub struct FiniteCommandRule;

impl Rule for FiniteCommandRule {
    fn name(&self) -> &str {
        "finite_command"
    }

    fn apply(&self, command: MotorCommand) -> Result<MotorCommand, EthoError> {
        let finite = match command {
            MotorCommand::Speed { left_cm_s, right_cm_s } => left_cm_s.is_finite() && right_cm_s.is_finite(),
            MotorCommand::Discrete {
                angle_deg,
                distance_cm,
                speed_cm_s,
            } => angle_deg.is_finite() && distance_cm.is_finite() && speed_cm_s.is_finite(),
        };
        if finite {
            Ok(command)
        } else {
            Err(EthoError::hardware("motor", format!("non-finite command {command:?}")))
        }
    }
}

/// Clamps wheel speeds and burst speeds to `±max_speed_cm_s`.
pub struct SpeedCapRule {
    pub max_speed_cm_s: f64,
}

impl Rule for SpeedCapRule {
    fn name(&self) -> &str {
        "speed_cap"
    }

    fn apply(&self, command: MotorCommand) -> Result<MotorCommand, EthoError> {
        let cap = self.max_speed_cm_s.abs();
        Ok(match command {
            MotorCommand::Speed { left_cm_s, right_cm_s } => MotorCommand::Speed {
                left_cm_s: left_cm_s.clamp(-cap, cap),
                right_cm_s: right_cm_s.clamp(-cap, cap),
            },
            MotorCommand::Discrete {
                angle_deg,
                distance_cm,
                speed_cm_s,
            } => MotorCommand::Discrete {
                angle_deg,
                distance_cm,
                speed_cm_s: speed_cm_s.clamp(0.0, cap),
            },
        })
    }
}

/// Clamps the turn of a discrete burst to `±max_turn_deg`.
pub struct TurnAngleRule {
    pub max_turn_deg: f64,
}

impl Rule for TurnAngleRule {
    fn name(&self) -> &str {
        "turn_angle"
    }

    fn apply(&self, command: MotorCommand) -> Result<MotorCommand, EthoError> {
        let cap = self.max_turn_deg.abs();
        Ok(match command {
            MotorCommand::Discrete {
                angle_deg,
                distance_cm,
                speed_cm_s,
            } => MotorCommand::Discrete {
                angle_deg: angle_deg.clamp(-cap, cap),
                distance_cm,
                speed_cm_s,
            },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speed(left: f64, right: f64) -> MotorCommand {
        MotorCommand::Speed {
            left_cm_s: left,
            right_cm_s: right,
        }
    }

    #[test]
    fn speed_within_cap_is_unchanged() {
        let v = StateVerifier::differential_drive(10.0, 100.0);
        assert_eq!(v.verify(speed(5.0, -5.0)).unwrap(), speed(5.0, -5.0));
    }

    #[test]
    fn speed_over_cap_is_clamped_both_ways() {
        let v = StateVerifier::differential_drive(10.0, 100.0);
        assert_eq!(v.verify(speed(50.0, -50.0)).unwrap(), speed(10.0, -10.0));
    }

    #[test]
    fn discrete_turn_is_clamped() {
        let v = StateVerifier::differential_drive(10.0, 100.0);
        let out = v
            .verify(MotorCommand::Discrete {
                angle_deg: -170.0,
                distance_cm: 3.0,
                speed_cm_s: 25.0,
            })
            .unwrap();
        assert_eq!(
            out,
            MotorCommand::Discrete {
                angle_deg: -100.0,
                distance_cm: 3.0,
                speed_cm_s: 10.0,
            }
        );
    }

    #[test]
    fn non_finite_command_rejected() {
        let v = StateVerifier::differential_drive(10.0, 100.0);
        assert!(matches!(
            v.verify(speed(f64::NAN, 0.0)),
            Err(EthoError::HardwareFault { .. })
        ));
    }

    #[test]
    fn rejection_short_circuits_later_rules() {
        let mut v = StateVerifier::new();
        v.add_rule(Box::new(FiniteCommandRule));
        v.add_rule(Box::new(SpeedCapRule { max_speed_cm_s: 1.0 }));
        let err = v.verify(speed(f64::INFINITY, 0.0)).unwrap_err();
        assert!(err.to_string().contains("non-finite"));
    }

    #[test]
    fn empty_verifier_passes_everything() {
        let v = StateVerifier::new();
        assert_eq!(v.verify(speed(999.0, 999.0)).unwrap(), speed(999.0, 999.0));
        assert!(v.rule_names().is_empty());
    }

    #[test]
    fn stop_always_passes() {
        let v = StateVerifier::differential_drive(0.0, 0.0);
        assert!(v.verify(MotorCommand::stop()).unwrap().is_stop());
    }
}
