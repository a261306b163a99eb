//! Experiment controllers: higher-level scripts that decide, tick by tick,
//! which control mode and motion pattern a robot should run.
//!
//! A controller never touches the robot.  Its [`ControlData`] is applied by
//! the robot's control stack, so the same controller can be tested with
//! nothing but positions.

pub mod areas;
pub mod circular;
pub mod dominating_set;
pub mod initiation_leader;
pub mod initiation_lure;
pub mod manager;
pub mod map_controller;
pub mod settings;

use etho_types::{ControlModeType, ExperimentControllerType, MotionPatternType, PositionMeters, WorldPolygon};

use crate::control_modes::{ControlContext, ModelParameters};

pub use areas::{AreasOccupation, ControlArea, ControlAreaKind, ControlAreaSettings, ControlAreas};
pub use circular::{CircularRole, CircularSetup, CircularSetupSettings, TurningDirection};
pub use dominating_set::{DominatingSet, DominatingSetSettings};
pub use initiation_leader::{DepartureTrigger, InitiationLeader, InitiationLeaderSettings, InitiationLeaderState};
pub use initiation_lure::{InitiationLure, InitiationLureSettings, InitiationLureState};
pub use manager::ExperimentManager;
pub use map_controller::{ControlMapSettings, MapController};
pub use settings::ExperimentSettings;

/// Extra data attached to a controller decision.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ControlPayload {
    #[default]
    None,
    /// Target of the go-to-position mode.
    Position(PositionMeters),
    /// Restrict the model-based modes to these polygons.
    AreaMask { mask_id: String, polygons: Vec<WorldPolygon> },
    ModelParameters(ModelParameters),
}

/// A controller's decision for one tick.  `Undefined` fields leave the
/// robot's current setting alone.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlData {
    pub control_mode: ControlModeType,
    pub motion_pattern: MotionPatternType,
    pub payload: ControlPayload,
}

impl Default for ControlData {
    fn default() -> Self {
        Self {
            control_mode: ControlModeType::Undefined,
            motion_pattern: MotionPatternType::Undefined,
            payload: ControlPayload::None,
        }
    }
}

impl ControlData {
    pub fn new(control_mode: ControlModeType, motion_pattern: MotionPatternType) -> Self {
        Self {
            control_mode,
            motion_pattern,
            payload: ControlPayload::None,
        }
    }

    pub fn with_payload(mut self, payload: ControlPayload) -> Self {
        self.payload = payload;
        self
    }
}

/// Closed set of experiment controllers.
#[derive(Debug)]
pub enum ExperimentController {
    None,
    ControlMap(MapController),
    /// Follower and leader differ only by their [`CircularRole`].
    CircularSetup(CircularSetup),
    InitiationLeader(InitiationLeader),
    InitiationLure(InitiationLure),
    DominatingSet(DominatingSet),
}

impl ExperimentController {
    pub fn kind(&self) -> ExperimentControllerType {
        match self {
            ExperimentController::None => ExperimentControllerType::None,
            ExperimentController::ControlMap(_) => ExperimentControllerType::ControlMap,
            ExperimentController::CircularSetup(c) => c.kind(),
            ExperimentController::InitiationLeader(_) => ExperimentControllerType::InitiationLeader,
            ExperimentController::InitiationLure(_) => ExperimentControllerType::InitiationLure,
            ExperimentController::DominatingSet(_) => ExperimentControllerType::DominatingSet,
        }
    }

    pub fn start(&mut self) {
        match self {
            ExperimentController::None | ExperimentController::ControlMap(_) => {}
            ExperimentController::CircularSetup(c) => c.start(),
            ExperimentController::InitiationLeader(c) => c.start(),
            ExperimentController::InitiationLure(c) => c.start(),
            ExperimentController::DominatingSet(c) => c.start(),
        }
    }

    pub fn step(&mut self, ctx: &ControlContext<'_>) -> ControlData {
        match self {
            ExperimentController::None => ControlData::default(),
            ExperimentController::ControlMap(c) => c.step(ctx),
            ExperimentController::CircularSetup(c) => c.step(ctx),
            ExperimentController::InitiationLeader(c) => c.step(ctx),
            ExperimentController::InitiationLure(c) => c.step(ctx),
            ExperimentController::DominatingSet(c) => c.step(ctx),
        }
    }

    pub fn finish(&mut self) {
        match self {
            ExperimentController::CircularSetup(c) => c.finish(),
            ExperimentController::DominatingSet(c) => c.finish(),
            _ => {}
        }
    }

    pub fn status(&self) -> &str {
        match self {
            ExperimentController::None => "",
            ExperimentController::ControlMap(c) => c.status(),
            ExperimentController::CircularSetup(c) => c.status(),
            ExperimentController::InitiationLeader(c) => c.status(),
            ExperimentController::InitiationLure(c) => c.status(),
            ExperimentController::DominatingSet(c) => c.status(),
        }
    }

    pub fn control_areas(&self) -> &[ControlArea] {
        match self {
            ExperimentController::None => &[],
            ExperimentController::ControlMap(c) => c.areas().as_slice(),
            ExperimentController::CircularSetup(c) => c.areas().as_slice(),
            ExperimentController::InitiationLeader(c) => c.areas().as_slice(),
            ExperimentController::InitiationLure(c) => c.areas().as_slice(),
            ExperimentController::DominatingSet(c) => c.areas().as_slice(),
        }
    }
}
