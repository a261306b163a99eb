//! [`ExperimentManager`] – the active experiment controller of one robot.

use std::collections::BTreeMap;

use etho_middleware::Notifier;
use etho_types::{EthoError, EventPayload, ExperimentControllerType};
use tracing::{debug, info, warn};

use super::areas::{ControlArea, ControlAreas};
use super::circular::{CircularRole, CircularSetup};
use super::dominating_set::DominatingSet;
use super::initiation_leader::InitiationLeader;
use super::initiation_lure::InitiationLure;
use super::map_controller::MapController;
use super::settings::ExperimentSettings;
use super::{ControlData, ExperimentController};
use crate::control_modes::ControlContext;

/// Builds the configured controllers and forwards ticks to the active one.
///
/// [`ExperimentControllerType::None`] is always available and active at
/// start-up.
///
/// # Example
///
/// ```rust
/// use etho_middleware::Notifier;
/// use etho_runtime::experiment::{ExperimentManager, ExperimentSettings};
/// use etho_types::ExperimentControllerType;
///
/// let mut manager = ExperimentManager::new(&ExperimentSettings::default(), Notifier::detached("robot_1")).unwrap();
/// assert!(!manager.is_active());
/// assert!(!manager.set_controller(ExperimentControllerType::ControlMap));
/// assert_eq!(manager.current_controller(), ExperimentControllerType::None);
/// ```
#[derive(Debug)]
pub struct ExperimentManager {
    controllers: BTreeMap<ExperimentControllerType, ExperimentController>,
    current: ExperimentControllerType,
    notifier: Notifier,
    last_status: String,
}

impl ExperimentManager {
    pub fn new(settings: &ExperimentSettings, notifier: Notifier) -> Result<Self, EthoError> {
        let mut controllers = BTreeMap::new();
        controllers.insert(ExperimentControllerType::None, ExperimentController::None);

        if let Some(s) = &settings.control_map {
            let c = MapController::from_settings(s)?;
            controllers.insert(ExperimentControllerType::ControlMap, ExperimentController::ControlMap(c));
        }
        if let Some(s) = &settings.circular_setup {
            let areas = ControlAreas::from_settings(&s.areas)?;
            for role in [CircularRole::Follower, CircularRole::Leader] {
                let c = CircularSetup::new(role, areas.clone(), s, notifier.clone())?;
                controllers.insert(c.kind(), ExperimentController::CircularSetup(c));
            }
        }
        if let Some(s) = &settings.initiation_leader {
            let c = InitiationLeader::new(ControlAreas::from_settings(&s.areas)?, s, notifier.clone())?;
            controllers.insert(
                ExperimentControllerType::InitiationLeader,
                ExperimentController::InitiationLeader(c),
            );
        }
        if let Some(s) = &settings.initiation_lure {
            let c = InitiationLure::new(ControlAreas::from_settings(&s.areas)?, s, notifier.clone())?;
            controllers.insert(ExperimentControllerType::InitiationLure, ExperimentController::InitiationLure(c));
        }
        if let Some(s) = &settings.dominating_set {
            let c = DominatingSet::new(ControlAreas::from_settings(&s.areas)?, s, notifier.clone())?;
            controllers.insert(ExperimentControllerType::DominatingSet, ExperimentController::DominatingSet(c));
        }

        debug!(
            robot = notifier.source(),
            controllers = ?controllers.keys().collect::<Vec<_>>(),
            "experiment controllers ready"
        );
        Ok(Self {
            controllers,
            current: ExperimentControllerType::None,
            notifier,
            last_status: String::new(),
        })
    }

    pub fn current_controller(&self) -> ExperimentControllerType {
        self.current
    }

    pub fn is_active(&self) -> bool {
        self.current != ExperimentControllerType::None
    }

    pub fn is_available(&self, controller: ExperimentControllerType) -> bool {
        self.controllers.contains_key(&controller)
    }

    pub fn available_controllers(&self) -> impl Iterator<Item = ExperimentControllerType> + '_ {
        self.controllers.keys().copied()
    }

    /// Returns `false` when `controller` is not configured for this robot.
    pub fn set_controller(&mut self, controller: ExperimentControllerType) -> bool {
        if !self.controllers.contains_key(&controller) {
            warn!(robot = self.notifier.source(), requested = %controller, "experiment controller not available");
            return false;
        }
        if controller == self.current {
            return true;
        }
        info!(robot = self.notifier.source(), from = %self.current, to = %controller, "changing experiment controller");
        if let Some(old) = self.controllers.get_mut(&self.current) {
            old.finish();
        }
        self.current = controller;
        if let Some(new) = self.controllers.get_mut(&controller) {
            new.start();
        }
        self.last_status.clear();
        self.notifier.notify(EventPayload::ControllerChanged(controller));
        true
    }

    pub fn step(&mut self, ctx: &ControlContext<'_>) -> ControlData {
        let Some(controller) = self.controllers.get_mut(&self.current) else {
            return ControlData::default();
        };
        let data = controller.step(ctx);
        if controller.status() != self.last_status {
            self.last_status = controller.status().to_string();
            self.notifier.notify(EventPayload::ControllerStatus(self.last_status.clone()));
        }
        data
    }

    pub fn status(&self) -> &str {
        &self.last_status
    }

    /// Direction for the circular setup leader, `"CW"` or `"CCW"`.
    pub fn set_circular_setup_turning_direction(&mut self, direction: &str) -> bool {
        match self.controllers.get_mut(&ExperimentControllerType::CircularSetupLeader) {
            Some(ExperimentController::CircularSetup(c)) => c.set_turning_direction(direction),
            _ => {
                debug!(robot = self.notifier.source(), "no circular setup leader configured");
                false
            }
        }
    }

    /// Preferred room of the initiation controllers.
    pub fn set_preferred_area(&mut self, area_id: &str) {
        for controller in self.controllers.values_mut() {
            match controller {
                ExperimentController::InitiationLeader(c) => c.set_preferred_area(area_id),
                ExperimentController::InitiationLure(c) => c.set_preferred_area(area_id),
                _ => {}
            }
        }
    }

    /// Areas of the active controller.
    pub fn control_areas(&self) -> &[ControlArea] {
        self.controllers
            .get(&self.current)
            .map(ExperimentController::control_areas)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::areas::ControlAreaSettings;
    use crate::experiment::circular::CircularSetupSettings;
    use crate::experiment::map_controller::ControlMapSettings;
    use etho_middleware::{EventBus, Topic};
    use etho_types::{AgentState, ControlModeType, MotionPatternType, OrientationRad, PositionMeters, WorldPolygon};

    fn area(id: &str, x0: f64) -> ControlAreaSettings {
        ControlAreaSettings {
            id: id.into(),
            kind: "room".into(),
            polygons: vec![WorldPolygon::from_points(&[
                (x0, 0.0),
                (x0 + 0.5, 0.0),
                (x0 + 0.5, 0.5),
                (x0, 0.5),
            ])],
            color: [0, 128, 255],
            control_mode: ControlModeType::GoStraight,
            motion_pattern: MotionPatternType::Undefined,
        }
    }

    fn settings() -> ExperimentSettings {
        ExperimentSettings {
            control_map: Some(ControlMapSettings {
                areas: vec![area("1", 0.0), area("2", 0.5)],
            }),
            circular_setup: Some(CircularSetupSettings {
                areas: vec![area("1", 0.0), area("2", 0.5)],
                ..CircularSetupSettings::default()
            }),
            ..ExperimentSettings::default()
        }
    }

    fn step(manager: &mut ExperimentManager) -> ControlData {
        let robot = AgentState::new(PositionMeters::new(0.25, 0.25), OrientationRad::new(0.0));
        manager.step(&ControlContext {
            robot: &robot,
            animals: &[],
            peers: &[],
            map: None,
        })
    }

    #[test]
    fn only_configured_controllers_are_available() {
        let manager = ExperimentManager::new(&settings(), Notifier::detached("r")).unwrap();
        let available: Vec<_> = manager.available_controllers().collect();
        assert_eq!(
            available,
            vec![
                ExperimentControllerType::None,
                ExperimentControllerType::ControlMap,
                ExperimentControllerType::CircularSetupFollower,
                ExperimentControllerType::CircularSetupLeader,
            ]
        );
        assert!(!manager.is_available(ExperimentControllerType::DominatingSet));
    }

    #[test]
    fn bad_areas_fail_construction() {
        let mut s = settings();
        if let Some(map) = s.control_map.as_mut() {
            map.areas[0].kind = "garden".into();
        }
        assert!(matches!(
            ExperimentManager::new(&s, Notifier::detached("r")),
            Err(EthoError::ConfigMismatch { .. })
        ));
    }

    #[test]
    fn switching_notifies_and_forwards_steps() {
        let bus = EventBus::default();
        let mut status = bus.subscribe_to(Topic::ControlStatus);
        let mut manager = ExperimentManager::new(&settings(), Notifier::new(bus, "r")).unwrap();

        assert_eq!(step(&mut manager), ControlData::default());
        assert!(!manager.set_controller(ExperimentControllerType::InitiationLure));
        assert!(manager.set_controller(ExperimentControllerType::ControlMap));
        assert!(manager.set_controller(ExperimentControllerType::ControlMap));
        assert!(manager.is_active());
        assert_eq!(manager.control_areas().len(), 2);

        let data = step(&mut manager);
        assert_eq!(data.control_mode, ControlModeType::GoStraight);
        assert_eq!(manager.status(), "area 1");

        assert!(matches!(
            status.try_recv().unwrap().payload,
            EventPayload::ControllerChanged(ExperimentControllerType::ControlMap)
        ));
        match status.try_recv().unwrap().payload {
            EventPayload::ControllerStatus(s) => assert_eq!(s, "area 1"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(status.try_recv().is_err());
    }

    #[test]
    fn turning_direction_goes_to_the_leader() {
        let mut manager = ExperimentManager::new(&settings(), Notifier::detached("r")).unwrap();
        assert!(manager.set_circular_setup_turning_direction("CW"));
        assert!(!manager.set_circular_setup_turning_direction("up"));

        let mut bare = ExperimentManager::new(&ExperimentSettings::default(), Notifier::detached("r")).unwrap();
        assert!(!bare.set_circular_setup_turning_direction("CW"));
    }
}
