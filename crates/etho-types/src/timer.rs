//! Monotonic stopwatch used for timeouts throughout the control stack.

use std::time::{Duration, Instant};

/// A stopwatch that is either unset or running since some instant.
///
/// An unset timer reports zero run time and counts as timed out, so
/// "has X seconds passed since the last event" checks succeed before the
/// first event.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timer {
    started: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A timer already running from now.
    pub fn started() -> Self {
        Self {
            started: Some(Instant::now()),
        }
    }

    /// Start the timer, or restart it when already running.
    pub fn reset(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Return to the unset state.
    pub fn clear(&mut self) {
        self.started = None;
    }

    pub fn is_set(&self) -> bool {
        self.started.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Seconds since the last reset; 0 when unset.
    pub fn run_time_sec(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// `true` when unset or when at least `timeout_sec` passed since the last
    /// reset.
    pub fn is_timed_out_sec(&self, timeout_sec: f64) -> bool {
        match self.started {
            None => true,
            Some(t) => t.elapsed().as_secs_f64() >= timeout_sec,
        }
    }
}
