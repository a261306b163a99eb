//! Low-level behaviors a robot can run, one at a time.
//!
//! Every mode is a plain struct; [`ControlMode`] closes them into one enum so
//! the [`ControlModeStateMachine`] can dispatch `start / step / finish`
//! without trait objects.  Modes never hold a reference to the robot: each
//! call receives a [`ControlContext`] built by the robot's control stack for
//! the current tick.

pub mod basic;
pub mod follow_group;
pub mod model_based;
pub mod state_machine;
pub mod trajectory;

use etho_navigation::SpatialMap;
use etho_types::{AgentRecord, AgentState, ControlModeType, ControlTarget, ControlTargetKind};
use serde::{Deserialize, Serialize};

pub use basic::{GoStraight, GoToPosition, Manual, TARGET_REACHED_DISTANCE_M};
pub use follow_group::FollowGroup;
pub use model_based::{ModelBased, ModelParameters, ModelSettings};
pub use state_machine::ControlModeStateMachine;
pub use trajectory::{Trajectory, TrajectorySettings};

/// What a control mode may look at during one tick.
#[derive(Debug, Clone, Copy)]
pub struct ControlContext<'a> {
    pub robot: &'a AgentState,
    pub animals: &'a [AgentState],
    /// Records of the other robots.
    pub peers: &'a [AgentRecord],
    /// Setup map, when the arena is known.
    pub map: Option<&'a SpatialMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlModeSettings {
    /// Forward speed of manual driving at full stick, cm/s.
    pub manual_speed_cm_s: f64,
    pub go_straight_speed_cm_s: f64,
    pub trajectory: TrajectorySettings,
    pub model: ModelSettings,
}

impl Default for ControlModeSettings {
    fn default() -> Self {
        Self {
            manual_speed_cm_s: 4.0,
            go_straight_speed_cm_s: 2.0,
            trajectory: TrajectorySettings::default(),
            model: ModelSettings::default(),
        }
    }
}

const SPEED_ONLY: &[ControlTargetKind] = &[ControlTargetKind::Speed];
const SPEED_AND_POSITION: &[ControlTargetKind] = &[ControlTargetKind::Speed, ControlTargetKind::Position];

/// Closed set of control modes.
#[derive(Debug)]
pub enum ControlMode {
    Idle,
    Manual(Manual),
    GoStraight(GoStraight),
    GoToPosition(GoToPosition),
    FollowGroup(FollowGroup),
    Trajectory(Trajectory),
    /// The three model-based variants share one implementation.
    Model(ModelBased),
}

impl ControlMode {
    pub fn kind(&self) -> ControlModeType {
        match self {
            ControlMode::Idle => ControlModeType::Idle,
            ControlMode::Manual(_) => ControlModeType::Manual,
            ControlMode::GoStraight(_) => ControlModeType::GoStraight,
            ControlMode::GoToPosition(_) => ControlModeType::GoToPosition,
            ControlMode::FollowGroup(_) => ControlModeType::FollowGroup,
            ControlMode::Trajectory(_) => ControlModeType::Trajectory,
            ControlMode::Model(m) => m.kind(),
        }
    }

    /// Called when the mode becomes active.
    pub fn start(&mut self, ctx: &ControlContext<'_>) {
        match self {
            ControlMode::FollowGroup(m) => m.start(ctx),
            ControlMode::Trajectory(m) => m.start(),
            ControlMode::Model(m) => m.start(ctx),
            _ => {}
        }
    }

    /// Target for this tick.  A mode without a valid target stops the robot.
    pub fn step(&mut self, ctx: &ControlContext<'_>) -> ControlTarget {
        match self {
            ControlMode::Idle => ControlTarget::stop(),
            ControlMode::Manual(m) => m.step(),
            ControlMode::GoStraight(m) => m.step(),
            ControlMode::GoToPosition(m) => m.step(ctx),
            ControlMode::FollowGroup(m) => m.step(ctx),
            ControlMode::Trajectory(m) => m.step(ctx),
            ControlMode::Model(m) => m.step(ctx),
        }
    }

    /// Called when another mode takes over.
    pub fn finish(&mut self) {
        match self {
            ControlMode::Manual(m) => m.release(),
            ControlMode::GoToPosition(m) => m.clear_target(),
            _ => {}
        }
    }

    pub fn supported_targets(&self) -> &'static [ControlTargetKind] {
        match self {
            ControlMode::Idle | ControlMode::Manual(_) | ControlMode::GoStraight(_) => SPEED_ONLY,
            _ => SPEED_AND_POSITION,
        }
    }

    /// Human-readable progress of the mode, empty when there is nothing to
    /// report.
    pub fn status(&self) -> &str {
        match self {
            ControlMode::GoToPosition(m) => m.status(),
            ControlMode::FollowGroup(m) => m.status(),
            ControlMode::Trajectory(m) => m.status(),
            ControlMode::Model(m) => m.status(),
            _ => "",
        }
    }
}
