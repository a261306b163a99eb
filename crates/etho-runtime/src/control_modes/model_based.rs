//! Model-based control modes.
//!
//! The robot follows the pose of its simulated twin in a [`BehaviorModel`].
//! Each model update period the tracked animals and the robot found inside
//! the mode's map are projected into model-local coordinates, the model is
//! stepped, and the simulated robot pose becomes the position target.
//!
//! The mode owns its copy of the [`SpatialMap`] so that experiment
//! controllers can restrict it to one area with an area mask without
//! affecting navigation.

use etho_navigation::SpatialMap;
use etho_types::{ControlModeType, ControlTarget, PositionMeters, Timer, WorldPolygon};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::ControlContext;
use crate::behavior_model::{BehaviorModel, ModelAgent, ModelArena, ZoneModel, ZoneModelSettings};

/// Switches that experiment controllers flip at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParameters {
    /// Do not feed the tracked animals to the model.
    pub ignore_fish: bool,
    /// Let the model run its own robot instead of the observed one.
    pub ignore_robot: bool,
}

/// Zone model tuning for each model-based variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub model_based: ZoneModelSettings,
    pub zone_based: ZoneModelSettings,
    pub with_walls: ZoneModelSettings,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_based: ZoneModelSettings::default(),
            zone_based: ZoneModelSettings {
                alignment_radius_m: 0.12,
                attraction_radius_m: 0.5,
                ..ZoneModelSettings::default()
            },
            with_walls: ZoneModelSettings {
                wall_aware: true,
                ..ZoneModelSettings::default()
            },
        }
    }
}

impl ModelSettings {
    /// Settings of the variant `kind`; `None` for non-model modes.
    pub fn for_mode(&self, kind: ControlModeType) -> Option<&ZoneModelSettings> {
        match kind {
            ControlModeType::ModelBased => Some(&self.model_based),
            ControlModeType::ZoneBasedModel => Some(&self.zone_based),
            ControlModeType::ModelWithWalls => Some(&self.with_walls),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ModelBased {
    kind: ControlModeType,
    map: SpatialMap,
    model: Box<dyn BehaviorModel>,
    parameters: ModelParameters,
    target: PositionMeters,
    update_timer: Timer,
    status: String,
}

impl ModelBased {
    pub fn new(kind: ControlModeType, map: SpatialMap, model: Box<dyn BehaviorModel>) -> Self {
        Self {
            kind,
            map,
            model,
            parameters: ModelParameters::default(),
            target: PositionMeters::invalid(),
            update_timer: Timer::new(),
            status: String::new(),
        }
    }

    /// The variant `kind` driven by the built-in [`ZoneModel`].  `None` for
    /// non-model modes.
    pub fn with_zone_model(kind: ControlModeType, map: SpatialMap, settings: &ModelSettings) -> Option<Self> {
        let zones = settings.for_mode(kind)?.clone();
        Some(Self::new(kind, map, Box::new(ZoneModel::new(zones))))
    }

    pub fn kind(&self) -> ControlModeType {
        self.kind
    }

    pub fn map(&self) -> &SpatialMap {
        &self.map
    }

    pub fn parameters(&self) -> ModelParameters {
        self.parameters
    }

    pub fn target(&self) -> PositionMeters {
        self.target
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn start(&mut self, ctx: &ControlContext<'_>) {
        // Every run begins by watching the animals.
        self.parameters.ignore_fish = false;
        self.target = self.compute_target(ctx);
        self.update_timer.reset();
    }

    pub fn step(&mut self, ctx: &ControlContext<'_>) -> ControlTarget {
        if self.update_timer.is_timed_out_sec(self.model.dt_sec()) {
            self.target = self.compute_target(ctx);
            self.update_timer.reset();
        }

        if !self.target.is_valid() {
            self.status = "no model target".into();
            return ControlTarget::stop();
        }
        let mut status = String::from(if self.parameters.ignore_fish {
            "ignore fish"
        } else {
            "follow fish"
        });
        if let Some(d) = ctx.robot.position.distance_2d_to(&self.target) {
            status.push_str(&format!(", dist. {d:.3} m"));
        }
        self.status = status;
        ControlTarget::Position(self.target)
    }

    /// Change the model switches; the model restarts when they differ.
    pub fn set_parameters(&mut self, parameters: ModelParameters) {
        if parameters != self.parameters {
            info!(
                mode = %self.kind,
                ignore_fish = parameters.ignore_fish,
                ignore_robot = parameters.ignore_robot,
                "model parameters updated"
            );
            self.parameters = parameters;
            self.model.reset();
        }
    }

    /// Confine the model to `polygons`.
    pub fn limit_model_area(&mut self, mask_id: &str, polygons: &[WorldPolygon]) {
        if self.map.current_mask_id() != Some(mask_id) {
            self.map.set_area_mask(mask_id, polygons);
            self.model.reset();
            info!(mode = %self.kind, mask_id, "model area limited");
        }
    }

    pub fn release_model_area(&mut self) {
        if self.map.current_mask_id().is_some() {
            self.map.clear_area_mask();
            self.model.reset();
            info!(mode = %self.kind, "model area released");
        }
    }

    fn compute_target(&mut self, ctx: &ControlContext<'_>) -> PositionMeters {
        let arena = ModelArena::new(&self.map);
        let to_agent = |position: &PositionMeters, heading: Option<f64>| {
            let (x, y) = arena.to_local(position);
            ModelAgent::new(x, y, heading.unwrap_or(0.0))
        };

        let animals: Vec<ModelAgent> = if self.parameters.ignore_fish {
            Vec::new()
        } else {
            ctx.animals
                .iter()
                .filter(|a| self.map.contains_point(&a.position))
                .map(|a| to_agent(&a.position, a.orientation.angle_rad()))
                .collect()
        };
        if animals.is_empty() && !self.parameters.ignore_fish {
            debug!(mode = %self.kind, "no animal inside the model area");
            return PositionMeters::invalid();
        }

        let robot = ctx.robot;
        let observed = (!self.parameters.ignore_robot && self.map.contains_point(&robot.position))
            .then(|| to_agent(&robot.position, robot.orientation.angle_rad()));

        match self.model.step(&animals, observed, &arena) {
            Some(pose) => arena.to_world(pose.x, pose.y),
            None => PositionMeters::invalid(),
        }
    }
}
