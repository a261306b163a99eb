//! In-process simulated robot link for tests and headless runs.
//!
//! [`SimRobotLink`] records every command it receives into a shared
//! [`SimProbe`].  Tests keep a clone of the probe to assert on commands and to
//! inject safety signals or connection failures while the link itself is
//! owned by a control stack.
//!
//! # Example
//!
//! ```rust
//! use etho_hal::robot_link::RobotLink;
//! use etho_hal::sim::SimRobotLink;
//! use etho_types::MotorCommand;
//!
//! let (mut link, probe) = SimRobotLink::new("robot_1");
//! link.send(MotorCommand::stop()).unwrap();
//! assert_eq!(probe.last_command(), Some(MotorCommand::stop()));
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use etho_types::{ConnectionStatus, EthoError, MotorCommand};
use tracing::debug;

use crate::robot_link::{LocalAvoidance, RobotLink, RobotSignals};

#[derive(Debug, Default)]
struct SimState {
    commands: Vec<MotorCommand>,
    pending: RobotSignals,
    local_avoidance: LocalAvoidance,
    fail_sends: bool,
    disconnected: bool,
}

/// Shared view into a [`SimRobotLink`].
#[derive(Debug, Clone, Default)]
pub struct SimProbe {
    state: Arc<Mutex<SimState>>,
}

impl SimProbe {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn commands(&self) -> Vec<MotorCommand> {
        self.lock().commands.clone()
    }

    pub fn last_command(&self) -> Option<MotorCommand> {
        self.lock().commands.last().copied()
    }

    pub fn command_count(&self) -> usize {
        self.lock().commands.len()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    pub fn local_avoidance(&self) -> LocalAvoidance {
        self.lock().local_avoidance
    }

    /// Report an obstacle on the next poll.
    pub fn raise_obstacle(&self) {
        self.lock().pending.obstacle_detected = true;
    }

    /// Report a power-down notice on the next poll.
    pub fn raise_power_down(&self) {
        self.lock().pending.power_down = true;
    }

    /// Make subsequent sends fail with a hardware fault.
    pub fn set_fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    pub fn set_disconnected(&self, disconnected: bool) {
        self.lock().disconnected = disconnected;
    }
}

/// A robot link that never touches hardware.
pub struct SimRobotLink {
    id: String,
    probe: SimProbe,
}

impl SimRobotLink {
    /// Create a link and the probe observing it.
    pub fn new(id: impl Into<String>) -> (Self, SimProbe) {
        let probe = SimProbe::default();
        let link = Self {
            id: id.into(),
            probe: probe.clone(),
        };
        (link, probe)
    }

    /// Create a boxed link, ready to hand to a control stack.
    pub fn boxed(id: impl Into<String>) -> (Box<dyn RobotLink>, SimProbe) {
        let (link, probe) = Self::new(id);
        (Box::new(link), probe)
    }
}

impl RobotLink for SimRobotLink {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&mut self, command: MotorCommand) -> Result<(), EthoError> {
        let mut state = self.probe.lock();
        if state.fail_sends || state.disconnected {
            return Err(EthoError::hardware(&self.id, "simulated link refused the command"));
        }
        debug!(robot = %self.id, ?command, "sim link command");
        state.commands.push(command);
        Ok(())
    }

    fn poll_signals(&mut self) -> RobotSignals {
        std::mem::take(&mut self.probe.lock().pending)
    }

    fn connection_status(&self) -> ConnectionStatus {
        if self.probe.lock().disconnected {
            ConnectionStatus::Disconnected
        } else {
            ConnectionStatus::Connected
        }
    }

    fn set_local_avoidance(&mut self, mode: LocalAvoidance) -> Result<(), EthoError> {
        self.probe.lock().local_avoidance = mode;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_commands_in_order() {
        let (mut link, probe) = SimRobotLink::new("robot_1");
        link.send(MotorCommand::Speed { left_cm_s: 1.0, right_cm_s: 2.0 }).unwrap();
        link.send(MotorCommand::stop()).unwrap();
        assert_eq!(probe.command_count(), 2);
        assert_eq!(probe.last_command(), Some(MotorCommand::stop()));
    }

    #[test]
    fn signals_are_drained_by_poll() {
        let (mut link, probe) = SimRobotLink::new("robot_1");
        probe.raise_obstacle();
        let signals = link.poll_signals();
        assert!(signals.obstacle_detected);
        assert!(!signals.power_down);
        assert_eq!(link.poll_signals(), RobotSignals::default());
    }

    #[test]
    fn failing_link_reports_hardware_fault() {
        let (mut link, probe) = SimRobotLink::new("robot_1");
        probe.set_fail_sends(true);
        let err = link.send(MotorCommand::stop()).unwrap_err();
        assert!(matches!(err, EthoError::HardwareFault { .. }));
        assert_eq!(probe.command_count(), 0);
    }

    #[test]
    fn disconnect_is_visible() {
        let (link, probe) = SimRobotLink::boxed("robot_2");
        assert_eq!(link.connection_status(), ConnectionStatus::Connected);
        probe.set_disconnected(true);
        assert_eq!(link.connection_status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn local_avoidance_is_recorded() {
        let (mut link, probe) = SimRobotLink::new("robot_1");
        link.set_local_avoidance(LocalAvoidance::Braitenberg).unwrap();
        assert_eq!(probe.local_avoidance(), LocalAvoidance::Braitenberg);
    }
}
