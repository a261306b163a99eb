//! Status notifications emitted by the control stack.
//!
//! Components never hold references to an observer; they publish [`Event`]s
//! through the middleware bus and whoever is interested subscribes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::control::{ConnectionStatus, ControlModeType, ExperimentControllerType, MotionPatternType};
use crate::geometry::PositionMeters;

/// Unified event wrapper routed over the status bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Robot id, or a component name such as `"etho-runtime::control_loop"`.
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Per-run turning direction counters of the circular setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircularSetupStatistics {
    pub fish_clockwise_percent: f64,
    pub fish_counter_clockwise_percent: f64,
    pub fish_direction: String,
    pub robot_clockwise_percent: f64,
    pub robot_counter_clockwise_percent: f64,
    pub robot_direction: String,
}

/// Which of two sub-rooms dominated, as tallied by the dominating-set
/// controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomsStatistics {
    pub room_ids: [String; 2],
    /// Seconds during which each room held more animals.
    pub animal_majority_sec: [f64; 2],
    /// Seconds during which the robot was in each room.
    pub robot_presence_sec: [f64; 2],
}

/// Variants of data routed over the status bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    ControlModeChanged(ControlModeType),
    ControlModeStatus(String),
    ControllerChanged(ExperimentControllerType),
    ControllerStatus(String),
    MotionPatternChanged(MotionPatternType),
    MotionPatternFrequencyDividerChanged {
        pattern: MotionPatternType,
        divider: u32,
    },
    /// The robot entered manual mode; other robots must leave it.
    InManualMode,
    UsePathPlanningChanged(bool),
    UseObstacleAvoidanceChanged(bool),
    TargetPositionChanged(PositionMeters),
    TrajectoryChanged(Vec<PositionMeters>),
    ObstacleDetectedChanged(bool),
    ConnectionStatusChanged(ConnectionStatus),
    /// Animal count per control area id.
    FishNumberByAreas(BTreeMap<String, usize>),
    CircularSetupTurningDirections { fish: String, robot: String },
    CircularSetupStatistics(CircularSetupStatistics),
    RoomsStatistics(RoomsStatistics),
    SelectedRobotChanged(String),
    /// The safety monitor forced the robot to idle.
    SafetyStop { reason: String },
}
