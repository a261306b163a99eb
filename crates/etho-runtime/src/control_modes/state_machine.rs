//! [`ControlModeStateMachine`] – which control mode drives the robot.

use std::collections::BTreeMap;

use etho_middleware::Notifier;
use etho_navigation::SpatialMap;
use etho_types::{ControlModeType, ControlTarget, ControlTargetKind, EventPayload, PositionMeters, WorldPolygon};
use tracing::{debug, info, warn};

use super::{
    ControlContext, ControlMode, ControlModeSettings, FollowGroup, GoStraight, GoToPosition, Manual, ModelBased,
    ModelParameters, Trajectory,
};

/// Owns one instance of every available control mode and the pointer to the
/// active one.
///
/// Starts in [`ControlModeType::Idle`].  The model-based modes are only
/// available when the arena map is known.
///
/// # Example
///
/// ```rust
/// use etho_middleware::Notifier;
/// use etho_runtime::control_modes::{ControlContext, ControlModeSettings, ControlModeStateMachine};
/// use etho_types::{AgentState, ControlModeType, ControlTarget};
///
/// let mut machine = ControlModeStateMachine::new(&ControlModeSettings::default(), None, Notifier::detached("robot_1"));
/// let robot = AgentState::default();
/// let ctx = ControlContext { robot: &robot, animals: &[], peers: &[], map: None };
///
/// assert!(machine.set_control_mode(ControlModeType::GoStraight, &ctx));
/// assert_eq!(machine.step(&ctx), ControlTarget::Speed { left: 2.0, right: 2.0 });
/// assert!(!machine.set_control_mode(ControlModeType::Undefined, &ctx));
/// assert_eq!(machine.current_mode(), ControlModeType::GoStraight);
/// ```
#[derive(Debug)]
pub struct ControlModeStateMachine {
    modes: BTreeMap<ControlModeType, ControlMode>,
    current: ControlModeType,
    notifier: Notifier,
    last_status: String,
}

impl ControlModeStateMachine {
    pub fn new(settings: &ControlModeSettings, map: Option<&SpatialMap>, notifier: Notifier) -> Self {
        let mut modes = BTreeMap::new();
        let mut insert = |mode: ControlMode| {
            modes.insert(mode.kind(), mode);
        };
        insert(ControlMode::Idle);
        insert(ControlMode::Manual(Manual::new(settings.manual_speed_cm_s)));
        insert(ControlMode::GoStraight(GoStraight::new(settings.go_straight_speed_cm_s)));
        insert(ControlMode::GoToPosition(GoToPosition::new()));
        insert(ControlMode::FollowGroup(FollowGroup::new()));
        insert(ControlMode::Trajectory(Trajectory::new(&settings.trajectory)));
        if let Some(map) = map {
            for kind in [
                ControlModeType::ModelBased,
                ControlModeType::ZoneBasedModel,
                ControlModeType::ModelWithWalls,
            ] {
                if let Some(mode) = ModelBased::with_zone_model(kind, map.clone(), &settings.model) {
                    insert(ControlMode::Model(mode));
                }
            }
        }

        Self {
            modes,
            current: ControlModeType::Idle,
            notifier,
            last_status: String::new(),
        }
    }

    pub fn current_mode(&self) -> ControlModeType {
        self.current
    }

    pub fn is_available(&self, mode: ControlModeType) -> bool {
        self.modes.contains_key(&mode)
    }

    /// Switch to `mode`.
    ///
    /// Returns `false` when the mode is undefined or not available; the
    /// current mode is then kept.  Re-selecting the current mode is accepted
    /// without restarting it.
    pub fn set_control_mode(&mut self, mode: ControlModeType, ctx: &ControlContext<'_>) -> bool {
        let robot = self.notifier.source();
        if mode == ControlModeType::Undefined || !self.modes.contains_key(&mode) {
            warn!(robot, requested = %mode, current = %self.current, "control mode not available");
            return false;
        }
        if mode == self.current {
            return true;
        }

        info!(robot, from = %self.current, to = %mode, "changing control mode");
        if let Some(old) = self.modes.get_mut(&self.current) {
            old.finish();
        }
        self.current = mode;
        if let Some(new) = self.modes.get_mut(&mode) {
            new.start(ctx);
        }
        self.last_status.clear();
        self.notifier.notify(EventPayload::ControlModeChanged(mode));
        if mode == ControlModeType::Manual {
            self.notifier.notify(EventPayload::InManualMode);
        }
        true
    }

    /// Run the active mode for one tick.
    pub fn step(&mut self, ctx: &ControlContext<'_>) -> ControlTarget {
        let Some(mode) = self.modes.get_mut(&self.current) else {
            return ControlTarget::stop();
        };
        let target = mode.step(ctx);
        if mode.status() != self.last_status {
            self.last_status = mode.status().to_string();
            debug!(robot = self.notifier.source(), status = %self.last_status, "control mode status");
            self.notifier.notify(EventPayload::ControlModeStatus(self.last_status.clone()));
        }
        target
    }

    pub fn status(&self) -> &str {
        &self.last_status
    }

    /// The active mode can produce position targets, so the motion pattern
    /// matters.
    pub fn supports_motion_patterns(&self) -> bool {
        self.modes
            .get(&self.current)
            .is_some_and(|m| m.supported_targets().contains(&ControlTargetKind::Position))
    }

    /// Target of the go-to-position mode, whether or not it is active.
    pub fn set_target_position(&mut self, target: PositionMeters) {
        if let Some(ControlMode::GoToPosition(mode)) = self.modes.get_mut(&ControlModeType::GoToPosition) {
            mode.set_target(target);
        }
    }

    pub fn set_joystick(&mut self, x: f64, y: f64) {
        if let Some(ControlMode::Manual(mode)) = self.modes.get_mut(&ControlModeType::Manual) {
            mode.set_joystick(x, y);
        }
    }

    /// Applies to the active mode when it is model-based.
    pub fn set_model_parameters(&mut self, parameters: ModelParameters) {
        match self.modes.get_mut(&self.current) {
            Some(ControlMode::Model(mode)) => mode.set_parameters(parameters),
            _ => debug!(robot = self.notifier.source(), "model parameters ignored, no model running"),
        }
    }

    /// Applies to the active mode when it is model-based.
    pub fn limit_model_area(&mut self, mask_id: &str, polygons: &[WorldPolygon]) {
        match self.modes.get_mut(&self.current) {
            Some(ControlMode::Model(mode)) => mode.limit_model_area(mask_id, polygons),
            _ => debug!(robot = self.notifier.source(), mask_id, "area limit ignored, no model running"),
        }
    }

    /// Lift the area limit of every model-based mode.
    pub fn release_model_area(&mut self) {
        for mode in self.modes.values_mut() {
            if let ControlMode::Model(model) = mode {
                model.release_model_area();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etho_middleware::{EventBus, Topic};
    use etho_types::{AgentState, OrientationRad};

    fn arena() -> SpatialMap {
        SpatialMap::new(
            WorldPolygon::from_points(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]),
            vec![],
            0.02,
        )
        .unwrap()
    }

    fn with_ctx<R>(f: impl FnOnce(&ControlContext<'_>) -> R) -> R {
        let robot = AgentState::new(PositionMeters::new(0.5, 0.5), OrientationRad::new(0.0));
        let animals = [AgentState::new(PositionMeters::new(0.6, 0.6), OrientationRad::new(1.0))];
        f(&ControlContext {
            robot: &robot,
            animals: &animals,
            peers: &[],
            map: None,
        })
    }

    #[test]
    fn starts_idle_and_stops() {
        let mut machine = ControlModeStateMachine::new(&ControlModeSettings::default(), None, Notifier::detached("r"));
        assert_eq!(machine.current_mode(), ControlModeType::Idle);
        with_ctx(|ctx| assert_eq!(machine.step(ctx), ControlTarget::stop()));
    }

    #[test]
    fn every_available_mode_steps() {
        let map = arena();
        let mut machine =
            ControlModeStateMachine::new(&ControlModeSettings::default(), Some(&map), Notifier::detached("r"));
        for mode in ControlModeType::ALL {
            with_ctx(|ctx| {
                assert!(machine.set_control_mode(mode, ctx), "{mode} refused");
                match machine.step(ctx) {
                    ControlTarget::Speed { left, right } => assert!(left.is_finite() && right.is_finite()),
                    ControlTarget::Position(p) => assert!(p.is_valid()),
                }
            });
        }
    }

    #[test]
    fn undefined_and_unavailable_modes_are_refused() {
        let mut machine = ControlModeStateMachine::new(&ControlModeSettings::default(), None, Notifier::detached("r"));
        with_ctx(|ctx| {
            assert!(machine.set_control_mode(ControlModeType::FollowGroup, ctx));
            assert!(!machine.set_control_mode(ControlModeType::Undefined, ctx));
            // No map, no model.
            assert!(!machine.is_available(ControlModeType::ModelBased));
            assert!(!machine.set_control_mode(ControlModeType::ModelBased, ctx));
        });
        assert_eq!(machine.current_mode(), ControlModeType::FollowGroup);
    }

    #[test]
    fn transitions_notify_once() {
        let bus = EventBus::default();
        let mut status = bus.subscribe_to(Topic::ControlStatus);
        let mut machine = ControlModeStateMachine::new(&ControlModeSettings::default(), None, Notifier::new(bus, "r"));
        with_ctx(|ctx| {
            machine.set_control_mode(ControlModeType::Manual, ctx);
            machine.set_control_mode(ControlModeType::Manual, ctx);
        });
        assert!(matches!(
            status.try_recv().unwrap().payload,
            EventPayload::ControlModeChanged(ControlModeType::Manual)
        ));
        assert!(matches!(status.try_recv().unwrap().payload, EventPayload::InManualMode));
        assert!(status.try_recv().is_err());
    }

    #[test]
    fn leaving_go_to_position_forgets_the_target() {
        let mut machine = ControlModeStateMachine::new(&ControlModeSettings::default(), None, Notifier::detached("r"));
        machine.set_target_position(PositionMeters::new(0.9, 0.9));
        with_ctx(|ctx| {
            machine.set_control_mode(ControlModeType::GoToPosition, ctx);
            assert_eq!(machine.step(ctx), ControlTarget::Position(PositionMeters::new(0.9, 0.9)));
            assert!(machine.supports_motion_patterns());
            machine.set_control_mode(ControlModeType::Idle, ctx);
            assert!(!machine.supports_motion_patterns());
            machine.set_control_mode(ControlModeType::GoToPosition, ctx);
            assert_eq!(machine.step(ctx), ControlTarget::stop());
        });
    }

    #[test]
    fn status_changes_are_published() {
        let bus = EventBus::default();
        let mut status = bus.subscribe_to(Topic::ControlStatus);
        let mut machine = ControlModeStateMachine::new(&ControlModeSettings::default(), None, Notifier::new(bus, "r"));
        with_ctx(|ctx| {
            machine.set_control_mode(ControlModeType::FollowGroup, ctx);
            machine.step(ctx);
            machine.step(ctx);
        });
        let _changed = status.try_recv().unwrap();
        match status.try_recv().unwrap().payload {
            EventPayload::ControlModeStatus(s) => assert!(s.starts_with("group distance")),
            other => panic!("unexpected {other:?}"),
        }
        // Same status on the second step, nothing new.
        assert!(status.try_recv().is_err());
        assert!(machine.status().starts_with("group distance"));
    }

    #[test]
    fn model_parameters_reach_the_running_model() {
        let map = arena();
        let mut machine =
            ControlModeStateMachine::new(&ControlModeSettings::default(), Some(&map), Notifier::detached("r"));
        with_ctx(|ctx| machine.set_control_mode(ControlModeType::ZoneBasedModel, ctx));
        machine.set_model_parameters(ModelParameters {
            ignore_fish: true,
            ignore_robot: false,
        });
        let half = WorldPolygon::from_points(&[(0.0, 0.0), (0.5, 0.0), (0.5, 1.0), (0.0, 1.0)]);
        machine.limit_model_area("left", &[half]);
        match machine.modes.get(&ControlModeType::ZoneBasedModel) {
            Some(ControlMode::Model(m)) => {
                assert!(m.parameters().ignore_fish);
                assert_eq!(m.map().current_mask_id(), Some("left"));
            }
            other => panic!("unexpected {other:?}"),
        }
        machine.release_model_area();
        match machine.modes.get(&ControlModeType::ZoneBasedModel) {
            Some(ControlMode::Model(m)) => assert!(m.map().current_mask_id().is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
