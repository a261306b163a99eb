//! Heading PID controller for differential-drive robots.
//!
//! The caller supplies the heading error (already normalized to (−π, π]) and
//! the control period, and receives an angular velocity.  The integral term
//! sums only the most recent errors over a fixed window so that a long
//! detour never winds the controller up.
//!
//! # Example
//!
//! ```rust
//! use etho_hal::pid::PidController;
//!
//! let mut pid = PidController::new(1.0, 0.0, 0.0);
//! let omega = pid.update(0.5, 0.1); // 0.5 rad error, 100 ms period
//! assert!((omega - 0.5).abs() < 1e-9);
//!
//! let (left, right) = PidController::wheel_speeds(2.0, 0.0, 1.8);
//! assert_eq!(left, right);
//! ```

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Number of past errors summed by the integral term.
pub const DEFAULT_INTEGRAL_WINDOW: usize = 5;

/// Gains of the heading controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self { kp: 10.0, ki: 0.0, kd: 0.0 }
    }
}

/// A PID controller over a sliding error window.
#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    window: VecDeque<f64>,
    window_len: usize,
    last_error: Option<f64>,
    output_min: f64,
    output_max: f64,
}

impl PidController {
    /// Create a new controller with the given gains.
    ///
    /// Output is unclamped by default.
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self::with_gains(PidGains { kp, ki, kd })
    }

    pub fn with_gains(gains: PidGains) -> Self {
        Self {
            gains,
            window: VecDeque::with_capacity(DEFAULT_INTEGRAL_WINDOW),
            window_len: DEFAULT_INTEGRAL_WINDOW,
            last_error: None,
            output_min: f64::NEG_INFINITY,
            output_max: f64::INFINITY,
        }
    }

    pub fn set_gains(&mut self, kp: f64, ki: f64, kd: f64) {
        self.gains = PidGains { kp, ki, kd };
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    /// Change the integral window length (at least one sample).
    pub fn set_integral_window(&mut self, len: usize) {
        self.window_len = len.max(1);
        while self.window.len() > self.window_len {
            self.window.pop_front();
        }
    }

    /// Clamp the controller output to `[min, max]`.
    pub fn set_output_limits(&mut self, min: f64, max: f64) {
        self.output_min = min;
        self.output_max = max;
    }

    /// Compute the angular velocity for the given heading `error`.
    ///
    /// Returns `0.0` without touching the internal state when `dt` is not
    /// positive or the error is not finite.
    pub fn update(&mut self, error: f64, dt: f64) -> f64 {
        if dt <= 0.0 || !error.is_finite() {
            return 0.0;
        }

        let p = self.gains.kp * error;

        let d = match self.last_error {
            Some(prev) => self.gains.kd * (error - prev) / dt,
            None => 0.0,
        };
        self.last_error = Some(error);

        self.window.push_back(error);
        if self.window.len() > self.window_len {
            self.window.pop_front();
        }
        let i = self.gains.ki * self.window.iter().sum::<f64>();

        (p + i + d).clamp(self.output_min, self.output_max)
    }

    /// Forget the error history.
    pub fn reset(&mut self) {
        self.window.clear();
        self.last_error = None;
    }

    /// Differential-drive wheel speeds for linear speed `v` and angular
    /// velocity `omega` with wheels `inter_wheel` apart.  Positive `omega`
    /// turns counter-clockwise.
    pub fn wheel_speeds(v: f64, omega: f64, inter_wheel: f64) -> (f64, f64) {
        let half = omega * inter_wheel / 2.0;
        (v - half, v + half)
    }
}

impl Default for PidController {
    fn default() -> Self {
        Self::with_gains(PidGains::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proportional_only() {
        let mut pid = PidController::new(2.0, 0.0, 0.0);
        assert!((pid.update(0.25, 0.1) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn zero_error_gives_zero_output() {
        let mut pid = PidController::new(3.0, 1.0, 1.0);
        assert!(pid.update(0.0, 0.1).abs() < 1e-12);
    }

    #[test]
    fn integral_sums_only_the_window() {
        let mut pid = PidController::new(0.0, 1.0, 0.0);
        for _ in 0..20 {
            pid.update(1.0, 0.1);
        }
        // Only the last five errors count.
        assert!((pid.update(1.0, 0.1) - 5.0).abs() < 1e-9);

        pid.set_integral_window(2);
        assert!((pid.update(1.0, 0.1) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn derivative_uses_previous_error() {
        let mut pid = PidController::new(0.0, 0.0, 1.0);
        assert_eq!(pid.update(0.2, 0.1), 0.0);
        // (0.5 - 0.2) / 0.1 = 3
        assert!((pid.update(0.5, 0.1) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn output_clamped_to_limits() {
        let mut pid = PidController::new(100.0, 0.0, 0.0);
        pid.set_output_limits(-1.0, 1.0);
        assert_eq!(pid.update(1.0, 0.1), 1.0);
        assert_eq!(pid.update(-1.0, 0.1), -1.0);
    }

    #[test]
    fn reset_clears_state() {
        let mut pid = PidController::new(1.0, 1.0, 1.0);
        pid.update(0.3, 0.1);
        pid.reset();
        let mut fresh = PidController::new(1.0, 1.0, 1.0);
        assert!((pid.update(0.1, 0.1) - fresh.update(0.1, 0.1)).abs() < 1e-12);
    }

    #[test]
    fn non_positive_dt_returns_zero_without_side_effects() {
        let mut pid = PidController::new(1.0, 1.0, 1.0);
        assert_eq!(pid.update(0.5, 0.0), 0.0);
        assert_eq!(pid.update(0.5, -0.1), 0.0);
        assert_eq!(pid.update(f64::NAN, 0.1), 0.0);
        let mut fresh = PidController::new(1.0, 1.0, 1.0);
        assert!((pid.update(0.5, 0.1) - fresh.update(0.5, 0.1)).abs() < 1e-12);
    }

    #[test]
    fn wheel_speeds_turn_towards_positive_omega() {
        let (left, right) = PidController::wheel_speeds(2.0, 1.0, 2.0);
        assert!((left - 1.0).abs() < 1e-12);
        assert!((right - 3.0).abs() < 1e-12);
    }
}
