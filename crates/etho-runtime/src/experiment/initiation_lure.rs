//! Initiation lure: stay in the preferred room, swimming like a fish that
//! ignores the others, and return there whenever the robot leaves it.

use std::fmt;

use etho_middleware::Notifier;
use etho_types::{ControlModeType, EthoError, EventPayload, MotionPatternType, PositionMeters};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::areas::{AreasOccupation, ControlAreaSettings, ControlAreas};
use super::{ControlData, ControlPayload};
use crate::control_modes::{ControlContext, ModelParameters};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitiationLureSettings {
    pub areas: Vec<ControlAreaSettings>,
    pub preferred_area: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiationLureState {
    SwimmingInRoom,
    ChangingRoom,
}

impl fmt::Display for InitiationLureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InitiationLureState::SwimmingInRoom => "swimming in room",
            InitiationLureState::ChangingRoom => "changing room",
        })
    }
}

#[derive(Debug)]
pub struct InitiationLure {
    areas: ControlAreas,
    occupation: AreasOccupation,
    preferred_area: Option<String>,
    state: InitiationLureState,
    target_area: Option<String>,
    /// Send the area mask on the next swimming tick.
    limit_model_area: bool,
    notifier: Notifier,
    status: String,
}

impl InitiationLure {
    pub fn new(areas: ControlAreas, settings: &InitiationLureSettings, notifier: Notifier) -> Result<Self, EthoError> {
        if let Some(id) = &settings.preferred_area
            && !areas.contains_id(id)
        {
            return Err(EthoError::config("initiation lure", format!("unknown preferred area '{id}'")));
        }
        Ok(Self {
            areas,
            occupation: AreasOccupation::default(),
            preferred_area: settings.preferred_area.clone(),
            state: InitiationLureState::SwimmingInRoom,
            target_area: None,
            limit_model_area: true,
            notifier,
            status: String::new(),
        })
    }

    pub fn areas(&self) -> &ControlAreas {
        &self.areas
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn state(&self) -> InitiationLureState {
        self.state
    }

    pub fn set_preferred_area(&mut self, area_id: &str) {
        if self.areas.contains_id(area_id) {
            info!(robot = self.notifier.source(), area = area_id, "preferred area set");
            self.preferred_area = Some(area_id.to_string());
        } else {
            warn!(robot = self.notifier.source(), area = area_id, "unknown preferred area");
        }
    }

    pub fn start(&mut self) {
        self.state = InitiationLureState::SwimmingInRoom;
        self.limit_model_area = true;
        self.target_area = None;
        self.status = self.state.to_string();
    }

    pub fn step(&mut self, ctx: &ControlContext<'_>) -> ControlData {
        if self.occupation.update(&self.areas, &ctx.robot.position, ctx.animals) {
            self.notifier
                .notify(EventPayload::FishNumberByAreas(self.occupation.fish_number_by_area().clone()));
        }

        match self.state {
            InitiationLureState::SwimmingInRoom => {
                if self.away_from_preferred_area() {
                    self.target_area = self.preferred_area.clone();
                    info!(
                        robot = self.notifier.source(),
                        from = ?self.occupation.robot_area(),
                        to = ?self.target_area,
                        "returning to the preferred room"
                    );
                    self.set_state(InitiationLureState::ChangingRoom);
                }
            }
            InitiationLureState::ChangingRoom => {
                if self.target_centroid().is_some_and(|c| ctx.robot.position.close_to(&c)) {
                    self.set_state(InitiationLureState::SwimmingInRoom);
                }
            }
        }
        self.state_control_data()
    }

    fn away_from_preferred_area(&self) -> bool {
        match (self.occupation.robot_area(), self.preferred_area.as_deref()) {
            (Some(robot), Some(preferred)) => robot != preferred,
            _ => false,
        }
    }

    fn target_centroid(&self) -> Option<PositionMeters> {
        self.target_area
            .as_deref()
            .and_then(|id| self.areas.get(id))
            .map(|a| a.centroid())
    }

    fn set_state(&mut self, state: InitiationLureState) {
        if state != self.state {
            info!(robot = self.notifier.source(), from = %self.state, to = %state, "initiation lure state");
            self.state = state;
            if state == InitiationLureState::SwimmingInRoom {
                self.limit_model_area = true;
            }
        }
        self.status = self.state.to_string();
    }

    fn state_control_data(&mut self) -> ControlData {
        match self.state {
            InitiationLureState::SwimmingInRoom => {
                let data = ControlData::new(ControlModeType::ModelBased, MotionPatternType::FishMotion);
                let room = self
                    .occupation
                    .robot_area()
                    .and_then(|id| self.areas.get(id))
                    .filter(|a| a.is_room());
                match room {
                    Some(room) if self.limit_model_area => {
                        self.limit_model_area = false;
                        data.with_payload(ControlPayload::AreaMask {
                            mask_id: room.id().to_string(),
                            polygons: room.polygons().to_vec(),
                        })
                    }
                    _ => data.with_payload(ControlPayload::ModelParameters(ModelParameters {
                        ignore_fish: true,
                        ignore_robot: false,
                    })),
                }
            }
            InitiationLureState::ChangingRoom => match self.target_centroid() {
                Some(target) => ControlData::new(ControlModeType::GoToPosition, MotionPatternType::Pid)
                    .with_payload(ControlPayload::Position(target)),
                None => ControlData::default(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::areas::tests::two_rooms;
    use etho_types::{AgentState, OrientationRad};

    fn lure(preferred: Option<&str>) -> InitiationLure {
        let settings = InitiationLureSettings {
            preferred_area: preferred.map(String::from),
            ..InitiationLureSettings::default()
        };
        let mut c = InitiationLure::new(two_rooms(), &settings, Notifier::detached("r")).unwrap();
        c.start();
        c
    }

    fn step(c: &mut InitiationLure, x: f64, y: f64) -> ControlData {
        let robot = AgentState::new(PositionMeters::new(x, y), OrientationRad::new(0.0));
        c.step(&ControlContext {
            robot: &robot,
            animals: &[],
            peers: &[],
            map: None,
        })
    }

    #[test]
    fn unknown_preferred_area_is_a_config_error() {
        let settings = InitiationLureSettings {
            preferred_area: Some("attic".into()),
            ..InitiationLureSettings::default()
        };
        assert!(InitiationLure::new(two_rooms(), &settings, Notifier::detached("r")).is_err());
    }

    #[test]
    fn mask_is_sent_once_then_fish_are_ignored() {
        let mut c = lure(Some("room_a"));
        let first = step(&mut c, 0.2, 0.2);
        assert_eq!(first.control_mode, ControlModeType::ModelBased);
        assert_eq!(first.motion_pattern, MotionPatternType::FishMotion);
        match first.payload {
            ControlPayload::AreaMask { mask_id, polygons } => {
                assert_eq!(mask_id, "room_a");
                assert_eq!(polygons.len(), 1);
            }
            other => panic!("unexpected payload {other:?}"),
        }
        let second = step(&mut c, 0.2, 0.2);
        assert_eq!(
            second.payload,
            ControlPayload::ModelParameters(ModelParameters {
                ignore_fish: true,
                ignore_robot: false
            })
        );
    }

    #[test]
    fn returns_to_the_preferred_room() {
        let mut c = lure(Some("room_a"));
        let data = step(&mut c, 0.8, 0.2);
        assert_eq!(c.state(), InitiationLureState::ChangingRoom);
        assert_eq!(data.control_mode, ControlModeType::GoToPosition);
        assert_eq!(data.motion_pattern, MotionPatternType::Pid);
        assert_eq!(data.payload, ControlPayload::Position(PositionMeters::new(0.2, 0.2)));

        let data = step(&mut c, 0.2, 0.2);
        assert_eq!(c.state(), InitiationLureState::SwimmingInRoom);
        assert!(matches!(data.payload, ControlPayload::AreaMask { .. }), "fresh mask after arrival");
    }

    #[test]
    fn preferred_area_can_change_at_runtime() {
        let mut c = lure(None);
        step(&mut c, 0.8, 0.2);
        assert_eq!(c.state(), InitiationLureState::SwimmingInRoom);
        c.set_preferred_area("nowhere");
        step(&mut c, 0.8, 0.2);
        assert_eq!(c.state(), InitiationLureState::SwimmingInRoom);
        c.set_preferred_area("room_a");
        step(&mut c, 0.8, 0.2);
        assert_eq!(c.state(), InitiationLureState::ChangingRoom);
    }

    #[test]
    fn corridor_gets_no_mask() {
        let mut c = lure(None);
        let data = step(&mut c, 0.5, 0.2);
        assert!(matches!(data.payload, ControlPayload::ModelParameters(_)));
    }
}
