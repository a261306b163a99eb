//! Control vocabulary shared by the runtime, navigation and HAL layers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::geometry::PositionMeters;

// ────────────────────────────────────────────────────────────────────────────
// Control targets
// ────────────────────────────────────────────────────────────────────────────

/// The output of a control mode for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target", content = "value")]
pub enum ControlTarget {
    /// Wheel speeds in cm/s.
    Speed { left: f64, right: f64 },
    /// A position to reach.
    Position(PositionMeters),
}

impl ControlTarget {
    pub fn stop() -> Self {
        ControlTarget::Speed { left: 0.0, right: 0.0 }
    }

    pub fn kind(&self) -> ControlTargetKind {
        match self {
            ControlTarget::Speed { .. } => ControlTargetKind::Speed,
            ControlTarget::Position(_) => ControlTargetKind::Position,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlTargetKind {
    Speed,
    Position,
}

// ────────────────────────────────────────────────────────────────────────────
// Control modes
// ────────────────────────────────────────────────────────────────────────────

/// Low-level behaviors a robot can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlModeType {
    Idle,
    Manual,
    GoStraight,
    GoToPosition,
    FollowGroup,
    Trajectory,
    ModelBased,
    ZoneBasedModel,
    ModelWithWalls,
    Undefined,
}

impl ControlModeType {
    pub const ALL: [ControlModeType; 9] = [
        ControlModeType::Idle,
        ControlModeType::Manual,
        ControlModeType::GoStraight,
        ControlModeType::GoToPosition,
        ControlModeType::FollowGroup,
        ControlModeType::Trajectory,
        ControlModeType::ModelBased,
        ControlModeType::ZoneBasedModel,
        ControlModeType::ModelWithWalls,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ControlModeType::Idle => "idle",
            ControlModeType::Manual => "manual",
            ControlModeType::GoStraight => "go_straight",
            ControlModeType::GoToPosition => "go_to_position",
            ControlModeType::FollowGroup => "follow_group",
            ControlModeType::Trajectory => "trajectory",
            ControlModeType::ModelBased => "model_based",
            ControlModeType::ZoneBasedModel => "zone_based_model",
            ControlModeType::ModelWithWalls => "model_with_walls",
            ControlModeType::Undefined => "undefined",
        }
    }
}

impl fmt::Display for ControlModeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlModeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace(['-', ' '], "_");
        ControlModeType::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| format!("unknown control mode '{s}'"))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Motion patterns
// ────────────────────────────────────────────────────────────────────────────

/// Low-level actuation style used to reach a position target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MotionPatternType {
    /// Continuous PID heading control.
    Pid,
    /// Discretized fish-like bursts.
    FishMotion,
    #[default]
    Undefined,
}

impl MotionPatternType {
    /// Parse the names used in control-area and settings files
    /// (`"pidcontroller"`, `"fishmotion"`).
    pub fn from_settings_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "pidcontroller" | "pid" => MotionPatternType::Pid,
            "fishmotion" | "fish_motion" => MotionPatternType::FishMotion,
            _ => MotionPatternType::Undefined,
        }
    }
}

impl fmt::Display for MotionPatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MotionPatternType::Pid => "pid",
            MotionPatternType::FishMotion => "fish_motion",
            MotionPatternType::Undefined => "undefined",
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Experiment controllers
// ────────────────────────────────────────────────────────────────────────────

/// Higher-level behavioral scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentControllerType {
    #[default]
    None,
    ControlMap,
    CircularSetupFollower,
    CircularSetupLeader,
    DominatingSet,
    InitiationLeader,
    InitiationLure,
}

impl ExperimentControllerType {
    pub const ALL: [ExperimentControllerType; 7] = [
        ExperimentControllerType::None,
        ExperimentControllerType::ControlMap,
        ExperimentControllerType::CircularSetupFollower,
        ExperimentControllerType::CircularSetupLeader,
        ExperimentControllerType::DominatingSet,
        ExperimentControllerType::InitiationLeader,
        ExperimentControllerType::InitiationLure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExperimentControllerType::None => "none",
            ExperimentControllerType::ControlMap => "control_map",
            ExperimentControllerType::CircularSetupFollower => "circular_setup_follower",
            ExperimentControllerType::CircularSetupLeader => "circular_setup_leader",
            ExperimentControllerType::DominatingSet => "dominating_set",
            ExperimentControllerType::InitiationLeader => "initiation_leader",
            ExperimentControllerType::InitiationLure => "initiation_lure",
        }
    }
}

impl fmt::Display for ExperimentControllerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentControllerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace(['-', ' '], "_");
        ExperimentControllerType::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown experiment controller '{s}'"))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Outbound robot commands
// ────────────────────────────────────────────────────────────────────────────

/// A command delivered to one robot through its link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum MotorCommand {
    /// Continuous wheel speeds (cm/s).
    Speed { left_cm_s: f64, right_cm_s: f64 },
    /// One discretized burst: turn, then travel `distance_cm` at
    /// `speed_cm_s`.
    Discrete {
        angle_deg: f64,
        distance_cm: f64,
        speed_cm_s: f64,
    },
}

impl MotorCommand {
    pub fn stop() -> Self {
        MotorCommand::Speed { left_cm_s: 0.0, right_cm_s: 0.0 }
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, MotorCommand::Speed { left_cm_s, right_cm_s } if *left_cm_s == 0.0 && *right_cm_s == 0.0)
    }
}

/// Connection state of a robot link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_mode_parses_loose_spelling() {
        assert_eq!("Go-To-Position".parse::<ControlModeType>(), Ok(ControlModeType::GoToPosition));
        assert!("undefined".parse::<ControlModeType>().is_err());
    }

    #[test]
    fn controller_type_roundtrips_through_str() {
        for ty in ExperimentControllerType::ALL {
            assert_eq!(ty.as_str().parse::<ExperimentControllerType>(), Ok(ty));
        }
    }

    #[test]
    fn motion_pattern_settings_names() {
        assert_eq!(MotionPatternType::from_settings_name("PIDController"), MotionPatternType::Pid);
        assert_eq!(MotionPatternType::from_settings_name("fishMotion"), MotionPatternType::FishMotion);
        assert_eq!(MotionPatternType::from_settings_name("walk"), MotionPatternType::Undefined);
    }

    #[test]
    fn stop_target_and_command() {
        assert_eq!(ControlTarget::stop().kind(), ControlTargetKind::Speed);
        assert!(MotorCommand::stop().is_stop());
        assert!(!MotorCommand::Speed { left_cm_s: 1.0, right_cm_s: 0.0 }.is_stop());
    }
}
