//! `etho-kernel` – safety interlocks
//!
//! It does not decide what robots do; it bounds what they are allowed to do
//! and stops them when the hardware reports trouble.
//!
//! # Modules
//!
//! - [`state_verifier`] – [`StateVerifier`][state_verifier::StateVerifier]:
//!   a rule engine every [`MotorCommand`][etho_types::MotorCommand] passes
//!   through before it reaches a robot link.  Rules either bound the command
//!   (speed caps, turn limits) or reject it outright (non-finite values).
//! - [`safety`] – [`SafetyMonitor`][safety::SafetyMonitor]: grace timers over
//!   the obstacle and power-down signals a robot reports, forcing the robot to
//!   idle when a condition persists.

pub mod safety;
pub mod state_verifier;

pub use safety::{ForceIdleReason, SafetyMonitor, SafetySettings, SafetyVerdict};
pub use state_verifier::{FiniteCommandRule, Rule, SpeedCapRule, StateVerifier, TurnAngleRule};
