//! [`RobotControlStack`] – everything that drives one robot.
//!
//! Each control tick runs, in order:
//!
//! 1. the [`SafetyMonitor`] on the signals drained from the robot link; a
//!    forced idle drops the experiment controller and stops the robot;
//! 2. the [`ExperimentManager`], when a controller is active, whose
//!    [`ControlData`] selects the control mode, the motion pattern and the
//!    mode's parameters;
//! 3. the [`ControlModeStateMachine`], producing a [`ControlTarget`](etho_types::ControlTarget);
//! 4. [`Navigation`], turning the target into motor commands on the link.

use std::sync::Arc;

use etho_hal::RobotLink;
use etho_kernel::{SafetyMonitor, SafetySettings};
use etho_middleware::{EventBus, Notifier};
use etho_navigation::{Navigation, NavigationContext, NavigationSettings, SpatialMap};
use etho_types::{
    AgentRecord, AgentState, ConnectionStatus, ControlModeType, EthoError, EventPayload,
    ExperimentControllerType, MotionPatternType, PositionMeters,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::control_modes::{ControlContext, ControlModeSettings, ControlModeStateMachine};
use crate::experiment::{ControlData, ControlPayload, ExperimentManager, ExperimentSettings};

/// Settings shared by every robot of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotControlSettings {
    pub navigation: NavigationSettings,
    pub control_modes: ControlModeSettings,
    pub experiment: ExperimentSettings,
    pub safety: SafetySettings,
}

/// Read-only view of one robot, for status surfaces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobotStatus {
    pub id: String,
    pub state: AgentState,
    pub control_mode: ControlModeType,
    pub control_mode_status: String,
    pub controller: ExperimentControllerType,
    pub controller_status: String,
    pub motion_pattern: MotionPatternType,
    pub target: PositionMeters,
    pub use_path_planning: bool,
    pub use_obstacle_avoidance: bool,
    pub obstacle_detected: bool,
    pub connection: ConnectionStatus,
}

pub struct RobotControlStack {
    id: String,
    link: Box<dyn RobotLink>,
    notifier: Notifier,
    state_machine: ControlModeStateMachine,
    manager: ExperimentManager,
    navigation: Navigation,
    safety: SafetyMonitor,
    state: AgentState,
    peers: Vec<AgentRecord>,
    animals: Vec<AgentState>,
    map: Option<Arc<SpatialMap>>,
    connection: ConnectionStatus,
}

impl RobotControlStack {
    /// Fails when the experiment configuration is inconsistent.
    pub fn new(
        link: Box<dyn RobotLink>,
        settings: &RobotControlSettings,
        map: Option<Arc<SpatialMap>>,
        bus: EventBus,
    ) -> Result<Self, EthoError> {
        let id = link.id().to_string();
        let notifier = Notifier::new(bus, id.clone());
        let state_machine = ControlModeStateMachine::new(&settings.control_modes, map.as_deref(), notifier.clone());
        let manager = ExperimentManager::new(&settings.experiment, notifier.clone())?;
        let navigation = Navigation::new(settings.navigation.clone(), map.clone(), notifier.clone());
        info!(robot = %id, with_map = map.is_some(), "robot control stack ready");
        Ok(Self {
            id,
            link,
            notifier,
            state_machine,
            manager,
            navigation,
            safety: SafetyMonitor::new(settings.safety.clone()),
            state: AgentState::default(),
            peers: Vec::new(),
            animals: Vec::new(),
            map,
            connection: ConnectionStatus::default(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn current_mode(&self) -> ControlModeType {
        self.state_machine.current_mode()
    }

    pub fn current_controller(&self) -> ExperimentControllerType {
        self.manager.current_controller()
    }

    // ── World input ─────────────────────────────────────────────────────────

    /// Own record by id, every other robot becomes a peer.  The own state
    /// is kept when the robot is missing from `records`.
    pub fn set_robots_data(&mut self, records: &[AgentRecord]) {
        self.peers.clear();
        for record in records {
            if record.id == self.id {
                self.state = record.state;
            } else {
                self.peers.push(record.clone());
            }
        }
    }

    /// Ignored when empty, so a frame without animals keeps the last ones.
    pub fn set_animal_states(&mut self, states: Vec<AgentState>) {
        if !states.is_empty() {
            self.animals = states;
        }
    }

    // ── Tick ────────────────────────────────────────────────────────────────

    pub fn step_control(&mut self) {
        let signals = self.link.poll_signals();
        let verdict = self.safety.update(signals.obstacle_detected, signals.power_down);
        if let Some(value) = verdict.obstacle_changed {
            self.notifier.notify(EventPayload::ObstacleDetectedChanged(value));
        }
        self.update_connection_status();
        if let Some(reason) = verdict.force_idle {
            self.force_idle(&reason.to_string());
            return;
        }

        let ctx = ControlContext {
            robot: &self.state,
            animals: &self.animals,
            peers: &self.peers,
            map: self.map.as_deref(),
        };
        if self.manager.is_active() {
            let data = self.manager.step(&ctx);
            apply_control_data(&mut self.state_machine, &mut self.navigation, self.link.as_mut(), data, &ctx);
        }
        let target = self.state_machine.step(&ctx);

        let peers: Vec<PositionMeters> = self.peers.iter().map(|p| p.state.position).collect();
        let nav_ctx = NavigationContext {
            robot: &self.state,
            peers: &peers,
        };
        self.navigation.step(&nav_ctx, &target, self.link.as_mut());
    }

    fn force_idle(&mut self, reason: &str) {
        let running = self.manager.is_active() || self.state_machine.current_mode() != ControlModeType::Idle;
        if running {
            warn!(robot = %self.id, reason, "safety stop");
            self.set_controller(ExperimentControllerType::None);
            self.set_control_mode(ControlModeType::Idle);
            self.notifier.notify(EventPayload::SafetyStop {
                reason: reason.to_string(),
            });
        }
        self.navigation.stop(self.link.as_mut());
    }

    fn update_connection_status(&mut self) {
        let status = self.link.connection_status();
        if status != self.connection {
            info!(robot = %self.id, ?status, "connection status changed");
            self.connection = status;
            self.notifier.notify(EventPayload::ConnectionStatusChanged(status));
            if status == ConnectionStatus::Connected {
                self.navigation.update_local_avoidance(self.link.as_mut());
            }
        }
    }

    // ── Commands ────────────────────────────────────────────────────────────

    pub fn set_control_mode(&mut self, mode: ControlModeType) -> bool {
        let ctx = ControlContext {
            robot: &self.state,
            animals: &self.animals,
            peers: &self.peers,
            map: self.map.as_deref(),
        };
        self.state_machine.set_control_mode(mode, &ctx)
    }

    /// Switching controllers lifts any model area limit left by the previous
    /// one.
    pub fn set_controller(&mut self, controller: ExperimentControllerType) -> bool {
        let previous = self.manager.current_controller();
        if !self.manager.set_controller(controller) {
            return false;
        }
        if previous != controller {
            self.state_machine.release_model_area();
        }
        true
    }

    /// Retarget a robot already in go-to-position; other modes ignore it.
    pub fn go_to_position(&mut self, target: PositionMeters) -> bool {
        if self.current_mode() != ControlModeType::GoToPosition {
            debug!(robot = self.id(), mode = %self.current_mode(), "target ignored outside go-to-position");
            return false;
        }
        self.state_machine.set_target_position(target);
        true
    }

    pub fn set_motion_pattern(&mut self, pattern: MotionPatternType) {
        self.navigation.set_motion_pattern(pattern, self.link.as_mut());
    }

    pub fn set_motion_pattern_frequency_divider(&mut self, pattern: MotionPatternType, divider: u32) {
        self.navigation.set_motion_pattern_frequency_divider(pattern, divider);
    }

    pub fn set_use_path_planning(&mut self, enabled: bool) {
        self.navigation.set_use_path_planning(enabled);
    }

    pub fn set_use_obstacle_avoidance(&mut self, enabled: bool) {
        self.navigation.set_use_obstacle_avoidance(enabled);
    }

    /// Stick input of the manual mode, both axes in `[-1, 1]`.
    pub fn set_joystick(&mut self, x: f64, y: f64) {
        self.state_machine.set_joystick(x, y);
    }

    pub fn set_circular_setup_turning_direction(&mut self, direction: &str) -> bool {
        self.manager.set_circular_setup_turning_direction(direction)
    }

    pub fn set_preferred_area(&mut self, area_id: &str) {
        self.manager.set_preferred_area(area_id);
    }

    /// Stop the robot right away, whatever the mode.
    pub fn stop(&mut self) {
        self.navigation.stop(self.link.as_mut());
    }

    pub fn status(&self) -> RobotStatus {
        RobotStatus {
            id: self.id.clone(),
            state: self.state,
            control_mode: self.state_machine.current_mode(),
            control_mode_status: self.state_machine.status().to_string(),
            controller: self.manager.current_controller(),
            controller_status: self.manager.status().to_string(),
            motion_pattern: self.navigation.motion_pattern(),
            target: self.navigation.current_target(),
            use_path_planning: self.navigation.use_path_planning(),
            use_obstacle_avoidance: self.navigation.use_obstacle_avoidance(),
            obstacle_detected: self.safety.obstacle_detected(),
            connection: self.connection,
        }
    }
}

/// Undefined fields of `data` leave the current setting alone.  The mode is
/// switched before its parameters are applied.
fn apply_control_data(
    machine: &mut ControlModeStateMachine,
    navigation: &mut Navigation,
    link: &mut dyn RobotLink,
    data: ControlData,
    ctx: &ControlContext<'_>,
) {
    if data.control_mode != ControlModeType::Undefined {
        machine.set_control_mode(data.control_mode, ctx);
    }
    if data.motion_pattern != MotionPatternType::Undefined && machine.supports_motion_patterns() {
        navigation.set_motion_pattern(data.motion_pattern, link);
    }
    match data.payload {
        ControlPayload::None => {}
        ControlPayload::Position(target) => machine.set_target_position(target),
        ControlPayload::AreaMask { mask_id, polygons } => {
            debug!(robot = link.id(), %mask_id, "limiting model area");
            machine.limit_model_area(&mask_id, &polygons);
        }
        ControlPayload::ModelParameters(parameters) => machine.set_model_parameters(parameters),
    }
}
