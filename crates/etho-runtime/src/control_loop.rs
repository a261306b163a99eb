//! [`ControlLoop`] – the fixed-frequency driver of every robot stack.
//!
//! Each tick takes the latest fused snapshot (never waiting for one), applies
//! the operator commands queued since the previous tick and steps every
//! [`RobotControlStack`] once.  A robot in manual mode is exclusive: putting
//! one robot in manual sends any other manual robot back to idle.

use std::time::Duration;

use etho_middleware::Notifier;
use etho_perception::{FusedReceiver, FusedSnapshot};
use etho_types::{
    AgentKind, ControlModeType, EventPayload, ExperimentControllerType, MotionPatternType, PositionMeters,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::robot_stack::{RobotControlStack, RobotStatus};

/// Highest control frequency accepted.
pub const MAX_CONTROL_FREQUENCY_HZ: f64 = 30.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlLoopSettings {
    pub frequency_hz: f64,
}

impl Default for ControlLoopSettings {
    fn default() -> Self {
        Self { frequency_hz: 15.0 }
    }
}

impl ControlLoopSettings {
    /// Frequency clamped to `(0, 30]`; non-positive or NaN values fall back
    /// to the default.
    pub fn effective_frequency_hz(&self) -> f64 {
        if self.frequency_hz.is_finite() && self.frequency_hz > 0.0 {
            self.frequency_hz.min(MAX_CONTROL_FREQUENCY_HZ)
        } else {
            Self::default().frequency_hz
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.effective_frequency_hz())
    }
}

/// Operator command applied at the start of the next tick.
///
/// Commands naming no `robot` go to the selected robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum LoopCommand {
    SelectRobot {
        robot: String,
    },
    SetControlMode {
        #[serde(default)]
        robot: Option<String>,
        mode: ControlModeType,
    },
    /// Applied to every robot.
    SetController {
        controller: ExperimentControllerType,
    },
    /// Selected robot, or every robot when none is selected.
    GoToPosition {
        x: f64,
        y: f64,
    },
    SetMotionPattern {
        #[serde(default)]
        robot: Option<String>,
        pattern: MotionPatternType,
    },
    SetMotionPatternFrequencyDivider {
        #[serde(default)]
        robot: Option<String>,
        pattern: MotionPatternType,
        divider: u32,
    },
    SetUsePathPlanning {
        #[serde(default)]
        robot: Option<String>,
        enabled: bool,
    },
    SetUseObstacleAvoidance {
        #[serde(default)]
        robot: Option<String>,
        enabled: bool,
    },
    Joystick {
        x: f64,
        y: f64,
    },
    /// Applied to every robot.
    SetCircularSetupTurningDirection {
        direction: String,
    },
    /// Applied to every robot.
    SetPreferredArea {
        area: String,
    },
    StopAll,
    /// Log the status of every robot.
    ReportStatus,
}

pub struct ControlLoop {
    settings: ControlLoopSettings,
    stacks: Vec<RobotControlStack>,
    selected: Option<String>,
    notifier: Notifier,
    shut_down: bool,
}

impl ControlLoop {
    pub fn new(settings: ControlLoopSettings, stacks: Vec<RobotControlStack>) -> Self {
        if settings.effective_frequency_hz() != settings.frequency_hz {
            warn!(
                requested = settings.frequency_hz,
                used = settings.effective_frequency_hz(),
                "control frequency adjusted"
            );
        }
        info!(
            robots = stacks.len(),
            frequency_hz = settings.effective_frequency_hz(),
            "control loop ready"
        );
        Self {
            settings,
            stacks,
            selected: None,
            notifier: Notifier::detached("control_loop"),
            shut_down: false,
        }
    }

    /// Publish loop-level events (selected robot) through `notifier`.
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn settings(&self) -> &ControlLoopSettings {
        &self.settings
    }

    pub fn selected_robot(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn robot_ids(&self) -> impl Iterator<Item = &str> {
        self.stacks.iter().map(RobotControlStack::id)
    }

    pub fn stack(&self, robot: &str) -> Option<&RobotControlStack> {
        self.stacks.iter().find(|s| s.id() == robot)
    }

    fn stack_mut(&mut self, robot: Option<&str>) -> Option<&mut RobotControlStack> {
        let Some(id) = robot.or(self.selected.as_deref()) else {
            debug!("no robot named and none selected");
            return None;
        };
        let found = self.stacks.iter_mut().find(|s| s.id() == id);
        if found.is_none() {
            warn!(robot = id, "unknown robot");
        }
        found
    }

    // ── World input ─────────────────────────────────────────────────────────

    /// Every stack sees the same snapshot.
    pub fn on_snapshot(&mut self, fused: &FusedSnapshot) {
        let robots: Vec<_> = fused.snapshot.of_kind(AgentKind::Robot).cloned().collect();
        let animals: Vec<_> = fused.snapshot.of_kind(AgentKind::Animal).map(|r| r.state).collect();
        for stack in &mut self.stacks {
            stack.set_robots_data(&robots);
            stack.set_animal_states(animals.clone());
        }
    }

    pub fn step(&mut self) {
        for stack in &mut self.stacks {
            stack.step_control();
        }
    }

    // ── Commands ────────────────────────────────────────────────────────────

    pub fn select_robot(&mut self, robot: &str) -> bool {
        if !self.stacks.iter().any(|s| s.id() == robot) {
            warn!(robot, "cannot select unknown robot");
            return false;
        }
        if self.selected.as_deref() != Some(robot) {
            info!(robot, "robot selected");
            self.selected = Some(robot.to_string());
            self.notifier
                .notify(EventPayload::SelectedRobotChanged(robot.to_string()));
        }
        true
    }

    /// Only one robot may be in manual mode at a time.
    pub fn set_control_mode(&mut self, robot: Option<&str>, mode: ControlModeType) -> bool {
        let Some(stack) = self.stack_mut(robot) else {
            return false;
        };
        if !stack.set_control_mode(mode) {
            return false;
        }
        if mode == ControlModeType::Manual {
            let manual = stack.id().to_string();
            for other in self.stacks.iter_mut().filter(|s| s.id() != manual) {
                if other.current_mode() == ControlModeType::Manual {
                    info!(robot = other.id(), "leaving manual mode for {manual}");
                    other.set_control_mode(ControlModeType::Idle);
                }
            }
        }
        true
    }

    /// Retarget the selected robot, or every robot without a selection.
    /// Only robots in go-to-position take the target; returns how many did.
    pub fn go_to_position(&mut self, target: PositionMeters) -> usize {
        match self.selected.clone() {
            Some(id) => self
                .stack_mut(Some(&id))
                .is_some_and(|stack| stack.go_to_position(target))
                .into(),
            None => self
                .stacks
                .iter_mut()
                .map(|s| s.go_to_position(target))
                .filter(|accepted| *accepted)
                .count(),
        }
    }

    /// Number of robots that accepted the controller.
    pub fn set_controller(&mut self, controller: ExperimentControllerType) -> usize {
        self.stacks
            .iter_mut()
            .map(|s| s.set_controller(controller))
            .filter(|accepted| *accepted)
            .count()
    }

    pub fn set_circular_setup_turning_direction(&mut self, direction: &str) -> usize {
        self.stacks
            .iter_mut()
            .map(|s| s.set_circular_setup_turning_direction(direction))
            .filter(|accepted| *accepted)
            .count()
    }

    pub fn set_preferred_area(&mut self, area_id: &str) {
        for stack in &mut self.stacks {
            stack.set_preferred_area(area_id);
        }
    }

    /// Drop every controller, idle every robot and stop it.
    pub fn stop_all(&mut self) {
        info!("stopping all robots");
        for stack in &mut self.stacks {
            stack.set_controller(ExperimentControllerType::None);
            stack.set_control_mode(ControlModeType::Idle);
            stack.stop();
        }
    }

    pub fn statuses(&self) -> Vec<RobotStatus> {
        self.stacks.iter().map(RobotControlStack::status).collect()
    }

    pub fn apply(&mut self, command: LoopCommand) {
        debug!(?command, "loop command");
        match command {
            LoopCommand::SelectRobot { robot } => {
                self.select_robot(&robot);
            }
            LoopCommand::SetControlMode { robot, mode } => {
                self.set_control_mode(robot.as_deref(), mode);
            }
            LoopCommand::SetController { controller } => {
                let accepted = self.set_controller(controller);
                if accepted < self.stacks.len() {
                    warn!(%controller, accepted, robots = self.stacks.len(), "controller not available everywhere");
                }
            }
            LoopCommand::GoToPosition { x, y } => {
                self.go_to_position(PositionMeters::new(x, y));
            }
            LoopCommand::SetMotionPattern { robot, pattern } => {
                if let Some(s) = self.stack_mut(robot.as_deref()) {
                    s.set_motion_pattern(pattern);
                }
            }
            LoopCommand::SetMotionPatternFrequencyDivider { robot, pattern, divider } => {
                if let Some(s) = self.stack_mut(robot.as_deref()) {
                    s.set_motion_pattern_frequency_divider(pattern, divider);
                }
            }
            LoopCommand::SetUsePathPlanning { robot, enabled } => {
                if let Some(s) = self.stack_mut(robot.as_deref()) {
                    s.set_use_path_planning(enabled);
                }
            }
            LoopCommand::SetUseObstacleAvoidance { robot, enabled } => {
                if let Some(s) = self.stack_mut(robot.as_deref()) {
                    s.set_use_obstacle_avoidance(enabled);
                }
            }
            LoopCommand::Joystick { x, y } => {
                if let Some(s) = self.stack_mut(None) {
                    s.set_joystick(x, y);
                }
            }
            LoopCommand::SetCircularSetupTurningDirection { direction } => {
                self.set_circular_setup_turning_direction(&direction);
            }
            LoopCommand::SetPreferredArea { area } => self.set_preferred_area(&area),
            LoopCommand::StopAll => self.stop_all(),
            LoopCommand::ReportStatus => {
                for status in self.statuses() {
                    info!(
                        robot = %status.id,
                        mode = %status.control_mode,
                        mode_status = %status.control_mode_status,
                        controller = %status.controller,
                        controller_status = %status.controller_status,
                        x = status.state.position.x,
                        y = status.state.position.y,
                        obstacle = status.obstacle_detected,
                        connection = ?status.connection,
                        "robot status"
                    );
                }
            }
        }
    }

    /// Leave every robot idle and at rest.  Calling it again is a no-op.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        info!("control loop shutting down");
        for stack in &mut self.stacks {
            stack.set_controller(ExperimentControllerType::None);
            stack.set_control_mode(ControlModeType::Idle);
        }
        self.step();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Tick until `shutdown` turns `true` (or its sender is dropped), then
    /// call [`ControlLoop::shutdown`].
    ///
    /// A closed command channel only stops command intake.
    pub async fn run(
        &mut self,
        mut snapshots: FusedReceiver,
        mut commands: mpsc::Receiver<LoopCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.settings.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut commands_open = true;

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            if snapshots.has_changed().unwrap_or(false) {
                let latest = snapshots.borrow_and_update().clone();
                if let Some(fused) = latest {
                    self.on_snapshot(&fused);
                }
            }
            while commands_open {
                match commands.try_recv() {
                    Ok(command) => self.apply(command),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        debug!("command channel closed");
                        commands_open = false;
                    }
                }
            }
            self.step();
        }
        self.shutdown();
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
