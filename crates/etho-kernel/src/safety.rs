//! [`SafetyMonitor`] – grace timers over robot safety signals.
//!
//! Robots report obstacles and imminent power-downs as bursts of repeated
//! messages.  The monitor turns those bursts into stable flags:
//!
//! * a flag is raised on the first report and stays raised as long as reports
//!   keep arriving within the *update timeout*;
//! * it is cleared only after a silence longer than the update timeout;
//! * a flag that stays raised longer than its *tolerated duration* forces the
//!   robot to idle.
//!
//! Call [`SafetyMonitor::update`] once per control tick with the signals
//! drained from the robot link.

use etho_types::Timer;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Timeouts of the safety monitor, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetySettings {
    pub obstacle_update_timeout_sec: f64,
    pub obstacle_tolerated_sec: f64,
    pub power_down_update_timeout_sec: f64,
    pub power_down_tolerated_sec: f64,
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self {
            obstacle_update_timeout_sec: 0.5,
            obstacle_tolerated_sec: 5.0,
            power_down_update_timeout_sec: 1.0,
            power_down_tolerated_sec: 3.0,
        }
    }
}

/// Why the monitor wants the robot stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceIdleReason {
    ObstaclePersisted,
    PowerDown,
}

impl std::fmt::Display for ForceIdleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ForceIdleReason::ObstaclePersisted => "obstacle persisted",
            ForceIdleReason::PowerDown => "robot is powering down",
        })
    }
}

/// Outcome of one [`SafetyMonitor::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SafetyVerdict {
    /// `Some(new_value)` when the obstacle flag changed on this tick.
    pub obstacle_changed: Option<bool>,
    pub force_idle: Option<ForceIdleReason>,
}

// ────────────────────────────────────────────────────────────────────────────
// Internal latch
// ────────────────────────────────────────────────────────────────────────────

/// One debounced flag with its start and last-update timers.
#[derive(Debug, Default)]
struct Latch {
    raised: bool,
    start: Timer,
    last_update: Timer,
}

impl Latch {
    /// Feed one tick; returns `Some(new_value)` on a flag change.
    fn feed(&mut self, reported: bool, update_timeout_sec: f64) -> Option<bool> {
        if reported {
            self.last_update.reset();
            if !self.raised {
                self.raised = true;
                self.start.reset();
                return Some(true);
            }
        } else if self.raised && self.last_update.is_timed_out_sec(update_timeout_sec) {
            self.raised = false;
            self.start.clear();
            self.last_update.clear();
            return Some(false);
        }
        None
    }

    fn persisted_beyond(&self, tolerated_sec: f64) -> bool {
        self.raised && self.start.is_set() && self.start.is_timed_out_sec(tolerated_sec)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SafetyMonitor
// ────────────────────────────────────────────────────────────────────────────

/// Debounces obstacle and power-down signals of one robot.
///
/// # Example
///
/// ```
/// use etho_kernel::safety::{SafetyMonitor, SafetySettings};
///
/// let mut monitor = SafetyMonitor::new(SafetySettings::default());
/// let verdict = monitor.update(true, false);
/// assert_eq!(verdict.obstacle_changed, Some(true));
/// assert!(monitor.obstacle_detected());
/// ```
#[derive(Debug, Default)]
pub struct SafetyMonitor {
    settings: SafetySettings,
    obstacle: Latch,
    power_down: Latch,
}

impl SafetyMonitor {
    pub fn new(settings: SafetySettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn obstacle_detected(&self) -> bool {
        self.obstacle.raised
    }

    pub fn power_down_pending(&self) -> bool {
        self.power_down.raised
    }

    /// Feed the signals received since the previous tick.
    pub fn update(&mut self, obstacle_reported: bool, power_down_reported: bool) -> SafetyVerdict {
        let s = &self.settings;
        let obstacle_changed = self.obstacle.feed(obstacle_reported, s.obstacle_update_timeout_sec);
        if let Some(value) = obstacle_changed {
            info!(obstacle_detected = value, "obstacle flag changed");
        }
        if let Some(value) = self.power_down.feed(power_down_reported, s.power_down_update_timeout_sec) {
            info!(power_down = value, "power-down flag changed");
        }

        let force_idle = if self.power_down.persisted_beyond(s.power_down_tolerated_sec) {
            Some(ForceIdleReason::PowerDown)
        } else if self.obstacle.persisted_beyond(s.obstacle_tolerated_sec) {
            Some(ForceIdleReason::ObstaclePersisted)
        } else {
            None
        };
        if let Some(reason) = force_idle {
            warn!(%reason, "forcing robot to idle");
        }

        SafetyVerdict {
            obstacle_changed,
            force_idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn fast_settings() -> SafetySettings {
        SafetySettings {
            obstacle_update_timeout_sec: 0.05,
            obstacle_tolerated_sec: 0.2,
            power_down_update_timeout_sec: 0.05,
            power_down_tolerated_sec: 0.1,
        }
    }

    #[test]
    fn obstacle_flag_set_immediately() {
        let mut monitor = SafetyMonitor::new(fast_settings());
        let verdict = monitor.update(true, false);
        assert_eq!(verdict.obstacle_changed, Some(true));
        assert!(verdict.force_idle.is_none());
        assert!(monitor.obstacle_detected());
    }

    #[test]
    fn obstacle_flag_held_while_reports_keep_arriving() {
        let mut monitor = SafetyMonitor::new(SafetySettings {
            obstacle_tolerated_sec: 60.0,
            ..fast_settings()
        });
        monitor.update(true, false);
        for _ in 0..5 {
            thread::sleep(Duration::from_millis(20));
            let verdict = monitor.update(true, false);
            assert_eq!(verdict.obstacle_changed, None);
            assert!(monitor.obstacle_detected());
        }
    }

    #[test]
    fn obstacle_flag_cleared_after_silence() {
        let mut monitor = SafetyMonitor::new(fast_settings());
        monitor.update(true, false);
        // Silence shorter than the update timeout keeps the flag.
        assert_eq!(monitor.update(false, false).obstacle_changed, None);
        thread::sleep(Duration::from_millis(70));
        assert_eq!(monitor.update(false, false).obstacle_changed, Some(false));
        assert!(!monitor.obstacle_detected());
    }

    #[test]
    fn persistent_obstacle_forces_idle() {
        let mut monitor = SafetyMonitor::new(fast_settings());
        monitor.update(true, false);
        for _ in 0..12 {
            thread::sleep(Duration::from_millis(25));
            monitor.update(true, false);
        }
        assert_eq!(monitor.update(true, false).force_idle, Some(ForceIdleReason::ObstaclePersisted));
    }

    #[test]
    fn power_down_forces_idle_after_tolerated_duration() {
        let mut monitor = SafetyMonitor::new(fast_settings());
        assert!(monitor.update(false, true).force_idle.is_none());
        for _ in 0..6 {
            thread::sleep(Duration::from_millis(25));
            monitor.update(false, true);
        }
        assert!(monitor.power_down_pending());
        assert_eq!(monitor.update(false, true).force_idle, Some(ForceIdleReason::PowerDown));
    }

    #[test]
    fn quiet_robot_never_forced() {
        let mut monitor = SafetyMonitor::new(fast_settings());
        for _ in 0..3 {
            assert_eq!(monitor.update(false, false), SafetyVerdict::default());
        }
    }
}
