//! The `RobotLink` trait: the only path between the control core and a
//! physical (or simulated) robot.
//!
//! Links carry outbound [`MotorCommand`]s and expose the robot's inbound
//! safety signals.  The control stack owns exactly one link per robot and
//! never retries a failed send: the next tick issues a fresh command anyway.

use etho_types::{ConnectionStatus, EthoError, MotorCommand};
use serde::{Deserialize, Serialize};

/// On-board reactive avoidance the robot firmware can run on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LocalAvoidance {
    #[default]
    Disabled,
    Braitenberg,
}

/// Safety signals reported by the robot since the previous poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RobotSignals {
    /// The proximity sensors saw an obstacle.
    pub obstacle_detected: bool,
    /// The robot announced it is about to power down.
    pub power_down: bool,
}

/// A bidirectional connection to one robot.
pub trait RobotLink: Send {
    /// Stable identifier of the robot behind this link, e.g. `"robot_1"`.
    fn id(&self) -> &str;

    /// Deliver a motor command.
    ///
    /// # Errors
    ///
    /// Returns [`EthoError::HardwareFault`] when the command cannot be
    /// delivered.
    fn send(&mut self, command: MotorCommand) -> Result<(), EthoError>;

    /// Drain the safety signals received since the last call.
    fn poll_signals(&mut self) -> RobotSignals;

    fn connection_status(&self) -> ConnectionStatus;

    /// Switch the firmware's reactive obstacle avoidance.  Links without such
    /// a feature accept and ignore the request.
    fn set_local_avoidance(&mut self, _mode: LocalAvoidance) -> Result<(), EthoError> {
        Ok(())
    }
}
