//! Follow a fixed list of waypoints.

use etho_types::{ControlTarget, PositionMeters, Timer};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectorySettings {
    /// Waypoints as `[x, y]` pairs in metres.
    pub points: Vec<[f64; 2]>,
    /// Start over after the last waypoint instead of holding it.
    pub looping: bool,
    /// Move on after this many seconds even when the waypoint was not
    /// reached.
    pub waypoint_timeout_sec: Option<f64>,
}

impl Default for TrajectorySettings {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            looping: true,
            waypoint_timeout_sec: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Trajectory {
    waypoints: Vec<PositionMeters>,
    looping: bool,
    timeout_sec: Option<f64>,
    index: usize,
    timer: Timer,
    status: String,
}

impl Trajectory {
    pub fn new(settings: &TrajectorySettings) -> Self {
        Self {
            waypoints: settings.points.iter().map(|&[x, y]| PositionMeters::new(x, y)).collect(),
            looping: settings.looping,
            timeout_sec: settings.waypoint_timeout_sec.filter(|t| *t > 0.0),
            index: 0,
            timer: Timer::new(),
            status: String::new(),
        }
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn start(&mut self) {
        self.index = 0;
        self.timer.reset();
    }

    pub fn step(&mut self, ctx: &super::ControlContext<'_>) -> ControlTarget {
        let Some(current) = self.waypoints.get(self.index).copied() else {
            self.status = "trajectory undefined".into();
            return ControlTarget::stop();
        };

        let reached = ctx.robot.position.close_to(&current);
        let expired = self.timeout_sec.is_some_and(|t| self.timer.is_timed_out_sec(t));
        if reached || expired {
            self.advance();
        }

        self.status = format!("waypoint {}/{}", self.index + 1, self.waypoints.len());
        ControlTarget::Position(self.waypoints[self.index])
    }

    fn advance(&mut self) {
        let next = self.index + 1;
        if next < self.waypoints.len() {
            self.index = next;
        } else if self.looping {
            self.index = 0;
        }
        self.timer.reset();
        debug!(index = self.index, "trajectory waypoint advanced");
    }
}
