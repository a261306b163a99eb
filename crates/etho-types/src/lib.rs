//! Shared vocabulary of the Etho control core.
//!
//! Every other crate in the workspace speaks in these types: validity-flagged
//! geometry, tracked agent records, control targets and motor commands, status
//! events, and the workspace-wide [`EthoError`].
//!
//! # Modules
//!
//! - [`geometry`] – positions, orientations and polygons with validity flags.
//! - [`agent`] – agent kinds, records and world snapshots.
//! - [`control`] – control targets, mode / pattern / controller enums and
//!   motor commands.
//! - [`timer`] – monotonic stopwatch used for timeouts.
//! - [`event`] – status notifications published on the bus.
//!
//! # Example
//!
//! ```rust
//! use etho_types::{AgentKind, AgentRecord, AgentState, OrientationRad, PositionMeters, WorldSnapshot};
//!
//! let robot = AgentRecord::new(
//!     "robot_1",
//!     AgentKind::Robot,
//!     AgentState::new(PositionMeters::new(0.2, 0.3), OrientationRad::new(0.0)),
//!     1_000,
//! );
//! let snapshot = WorldSnapshot::new(1_000, vec![robot]);
//! assert_eq!(snapshot.of_kind(AgentKind::Robot).count(), 1);
//! ```

pub mod agent;
pub mod control;
pub mod event;
pub mod geometry;
pub mod timer;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use agent::{AgentKind, AgentRecord, WorldSnapshot};
pub use control::{
    ConnectionStatus, ControlModeType, ControlTarget, ControlTargetKind, ExperimentControllerType,
    MotionPatternType, MotorCommand,
};
pub use event::{CircularSetupStatistics, Event, EventPayload, RoomsStatistics};
pub use geometry::{AgentState, Bounds, OrientationRad, PROXIMITY_THRESHOLD_M, PositionMeters, WorldPolygon, normalize_angle};
pub use timer::Timer;

/// Workspace-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EthoError {
    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Configuration mismatch in {component}: {details}")]
    ConfigMismatch { component: String, details: String },

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl EthoError {
    pub fn config(component: impl Into<String>, details: impl Into<String>) -> Self {
        EthoError::ConfigMismatch {
            component: component.into(),
            details: details.into(),
        }
    }

    pub fn hardware(component: impl Into<String>, details: impl Into<String>) -> Self {
        EthoError::HardwareFault {
            component: component.into(),
            details: details.into(),
        }
    }
}

/// Settings of one physical robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotSettings {
    pub id: String,
    #[serde(default)]
    pub color: String,
    /// Transport address of the robot, opaque to the control core.
    #[serde(default)]
    pub connection: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etho_error_display() {
        let err = EthoError::hardware("robot_1", "link closed");
        assert_eq!(err.to_string(), "Hardware Fault on robot_1: link closed");
        let err = EthoError::UnknownSource("cam_9".into());
        assert!(err.to_string().contains("cam_9"));
    }

    #[test]
    fn etho_error_roundtrip() {
        let err = EthoError::config("spatial_map", "empty arena polygon");
        let json = serde_json::to_string(&err).unwrap();
        let back: EthoError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn robot_settings_defaults() {
        let settings: RobotSettings = serde_json::from_str(r#"{"id":"robot_1"}"#).unwrap();
        assert_eq!(settings.id, "robot_1");
        assert!(settings.color.is_empty());
    }
}
