//! Initiation leader: swim with the group, then try to lead it into the
//! other room.
//!
//! ```text
//!  SwimmingWithFish ──departure trigger──► ChangingRoom ──arrived + fish around──► SwimmingWithFish
//!        │                                      │
//!        └──fish are elsewhere──► GoingBack ◄───┘ fish stayed behind
//!                                    │
//!                                    └──arrived──► SwimmingWithFish
//! ```

use std::fmt;

use etho_middleware::Notifier;
use etho_types::{AgentState, ControlModeType, EthoError, EventPayload, MotionPatternType, PositionMeters, Timer};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::areas::{AreasOccupation, ControlAreaSettings, ControlAreas};
use super::{ControlData, ControlPayload};
use crate::control_modes::ControlContext;

/// When a robot swimming with the majority of the group leaves for the other
/// room.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DepartureTrigger {
    /// After swimming with the group for this long.
    Timeout { after_sec: f64 },
    /// As soon as enough animals are close to the robot.
    FishAround { min_count: usize, radius_m: f64 },
}

impl Default for DepartureTrigger {
    fn default() -> Self {
        DepartureTrigger::FishAround {
            min_count: 1,
            radius_m: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitiationLeaderSettings {
    pub areas: Vec<ControlAreaSettings>,
    pub preferred_area: Option<String>,
    pub departure: DepartureTrigger,
    /// Radius used to decide that animals are around the robot after it
    /// arrived.
    pub group_radius_m: f64,
    pub fish_follow_check_timeout_sec: f64,
    pub max_fish_allowed_to_stay: usize,
    /// Fish-like motion right after departure, PID afterwards.
    pub fish_motion_on_departure_sec: f64,
}

impl Default for InitiationLeaderSettings {
    fn default() -> Self {
        Self {
            areas: Vec::new(),
            preferred_area: None,
            departure: DepartureTrigger::default(),
            group_radius_m: 0.1,
            fish_follow_check_timeout_sec: 5.0,
            max_fish_allowed_to_stay: 0,
            fish_motion_on_departure_sec: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiationLeaderState {
    SwimmingWithFish,
    ChangingRoom,
    GoingBack,
}

impl fmt::Display for InitiationLeaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InitiationLeaderState::SwimmingWithFish => "swimming with fish",
            InitiationLeaderState::ChangingRoom => "changing room",
            InitiationLeaderState::GoingBack => "going back",
        })
    }
}

#[derive(Debug)]
pub struct InitiationLeader {
    settings: InitiationLeaderSettings,
    areas: ControlAreas,
    occupation: AreasOccupation,
    preferred_area: Option<String>,
    state: InitiationLeaderState,
    target_area: Option<String>,
    departure_area: Option<String>,
    in_target_room: bool,
    departure_timer: Timer,
    fish_follow_check_timer: Timer,
    fish_motion_timer: Timer,
    notifier: Notifier,
    status: String,
}

impl InitiationLeader {
    pub fn new(areas: ControlAreas, settings: &InitiationLeaderSettings, notifier: Notifier) -> Result<Self, EthoError> {
        if areas.iter().filter(|a| a.is_room()).count() < 2 {
            return Err(EthoError::config("initiation leader", "needs at least two rooms"));
        }
        Ok(Self {
            preferred_area: settings.preferred_area.clone(),
            settings: settings.clone(),
            areas,
            occupation: AreasOccupation::default(),
            state: InitiationLeaderState::SwimmingWithFish,
            target_area: None,
            departure_area: None,
            in_target_room: false,
            departure_timer: Timer::new(),
            fish_follow_check_timer: Timer::new(),
            fish_motion_timer: Timer::new(),
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

    pub fn state(&self) -> InitiationLeaderState {
        self.state
    }

    pub fn target_area(&self) -> Option<&str> {
        self.target_area.as_deref()
    }

    /// A robot in its preferred room never initiates a departure.
    pub fn set_preferred_area(&mut self, area_id: &str) {
        self.preferred_area = Some(area_id.to_string());
    }

    pub fn start(&mut self) {
        self.state = InitiationLeaderState::SwimmingWithFish;
        self.target_area = None;
        self.departure_area = None;
        self.in_target_room = false;
        self.departure_timer.reset();
        self.fish_follow_check_timer.clear();
        self.fish_motion_timer.clear();
        self.status = self.state.to_string();
    }

    pub fn step(&mut self, ctx: &ControlContext<'_>) -> ControlData {
        if self.occupation.update(&self.areas, &ctx.robot.position, ctx.animals) {
            self.notifier
                .notify(EventPayload::FishNumberByAreas(self.occupation.fish_number_by_area().clone()));
        }
        match self.state {
            InitiationLeaderState::SwimmingWithFish => self.step_swimming(ctx),
            InitiationLeaderState::ChangingRoom => self.step_changing_room(ctx),
            InitiationLeaderState::GoingBack => self.step_going_back(ctx),
        }
        self.state_control_data()
    }

    fn step_swimming(&mut self, ctx: &ControlContext<'_>) {
        let Some(robot_area) = self.occupation.robot_area().map(String::from) else {
            return;
        };
        if !self.areas.get(&robot_area).is_some_and(|a| a.is_room()) {
            return;
        }
        let here = self.occupation.fish_in(&robot_area);
        let elsewhere = self.occupation.fish_in_other_rooms(&self.areas, &robot_area);

        let next = if here >= elsewhere {
            if self.preferred_area.as_deref() == Some(robot_area.as_str()) || !self.time_to_depart(ctx) {
                return;
            }
            InitiationLeaderState::ChangingRoom
        } else {
            InitiationLeaderState::GoingBack
        };

        // Rooms other than the current one; the last listed wins.
        let Some(target) = self
            .areas
            .iter()
            .filter(|a| a.is_room() && a.id() != robot_area)
            .last()
            .map(|a| a.id().to_string())
        else {
            return;
        };
        info!(
            robot = self.notifier.source(),
            from = %robot_area,
            to = %target,
            fish_here = here,
            fish_elsewhere = elsewhere,
            state = %next,
            "leaving the room"
        );
        self.target_area = Some(target);
        self.departure_area = Some(robot_area);
        self.in_target_room = false;
        if next == InitiationLeaderState::ChangingRoom {
            self.fish_follow_check_timer.reset();
            self.fish_motion_timer.reset();
        } else {
            self.fish_follow_check_timer.clear();
        }
        self.set_state(next);
    }

    fn step_changing_room(&mut self, ctx: &ControlContext<'_>) {
        if self.fish_follow_check_timer.is_set()
            && self
                .fish_follow_check_timer
                .is_timed_out_sec(self.settings.fish_follow_check_timeout_sec)
        {
            self.fish_follow_check_timer.clear();
            if !self.fish_follow() {
                info!(
                    robot = self.notifier.source(),
                    departure = ?self.departure_area,
                    "fish did not follow, going back"
                );
                self.target_area = self.departure_area.clone();
                self.in_target_room = false;
                self.set_state(InitiationLeaderState::GoingBack);
                return;
            }
            debug!(robot = self.notifier.source(), "fish seem to follow");
        }

        if !self.in_target_room && self.target_centroid().is_some_and(|c| ctx.robot.position.close_to(&c)) {
            debug!(robot = self.notifier.source(), target = ?self.target_area, "arrived in the target room");
            self.in_target_room = true;
        }
        if self.in_target_room
            && !self.fish_follow_check_timer.is_set()
            && fish_around(&ctx.robot.position, ctx.animals, self.settings.group_radius_m) > 0
        {
            self.set_state(InitiationLeaderState::SwimmingWithFish);
            return;
        }

        self.status = if self.fish_follow_check_timer.is_set() {
            let left = self.settings.fish_follow_check_timeout_sec - self.fish_follow_check_timer.run_time_sec();
            format!("{} ({:.1}s)", self.state, left.max(0.0))
        } else {
            format!("{} (follow)", self.state)
        };
    }

    fn step_going_back(&mut self, ctx: &ControlContext<'_>) {
        if self.target_centroid().is_some_and(|c| ctx.robot.position.close_to(&c)) {
            debug!(robot = self.notifier.source(), target = ?self.target_area, "back with the fish");
            self.set_state(InitiationLeaderState::SwimmingWithFish);
        }
    }

    fn time_to_depart(&self, ctx: &ControlContext<'_>) -> bool {
        if !ctx.robot.position.is_valid() {
            return false;
        }
        match self.settings.departure {
            DepartureTrigger::Timeout { after_sec } => self.departure_timer.is_timed_out_sec(after_sec),
            DepartureTrigger::FishAround { min_count, radius_m } => {
                fish_around(&ctx.robot.position, ctx.animals, radius_m) >= min_count
            }
        }
    }

    fn fish_follow(&self) -> bool {
        self.departure_area
            .as_deref()
            .is_none_or(|id| self.occupation.fish_in(id) <= self.settings.max_fish_allowed_to_stay)
    }

    fn target_centroid(&self) -> Option<PositionMeters> {
        self.target_area
            .as_deref()
            .and_then(|id| self.areas.get(id))
            .map(|a| a.centroid())
    }

    fn set_state(&mut self, state: InitiationLeaderState) {
        if state != self.state {
            info!(robot = self.notifier.source(), from = %self.state, to = %state, "initiation leader state");
            self.state = state;
            if state == InitiationLeaderState::SwimmingWithFish {
                self.departure_timer.reset();
            }
        }
        self.status = self.state.to_string();
    }

    fn state_control_data(&mut self) -> ControlData {
        match self.state {
            InitiationLeaderState::SwimmingWithFish => {
                ControlData::new(ControlModeType::ModelBased, MotionPatternType::Pid)
            }
            InitiationLeaderState::ChangingRoom => {
                let Some(target) = self.target_centroid() else {
                    return ControlData::default();
                };
                let pattern = if self.in_target_room {
                    MotionPatternType::FishMotion
                } else if self.fish_motion_timer.is_set() {
                    if self
                        .fish_motion_timer
                        .is_timed_out_sec(self.settings.fish_motion_on_departure_sec)
                    {
                        self.fish_motion_timer.clear();
                        MotionPatternType::Pid
                    } else {
                        MotionPatternType::FishMotion
                    }
                } else {
                    MotionPatternType::Pid
                };
                ControlData::new(ControlModeType::GoToPosition, pattern).with_payload(ControlPayload::Position(target))
            }
            InitiationLeaderState::GoingBack => match self.target_centroid() {
                Some(target) => ControlData::new(ControlModeType::GoToPosition, MotionPatternType::Pid)
                    .with_payload(ControlPayload::Position(target)),
                None => ControlData::default(),
            },
        }
    }
}

fn fish_around(robot: &PositionMeters, animals: &[AgentState], radius_m: f64) -> usize {
    animals
        .iter()
        .filter(|a| a.position.distance_2d_to(robot).is_some_and(|d| d < radius_m))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::areas::tests::{fish, two_rooms};
    use etho_types::OrientationRad;

    fn leader(settings: InitiationLeaderSettings) -> InitiationLeader {
        let mut c = InitiationLeader::new(two_rooms(), &settings, Notifier::detached("r")).unwrap();
        c.start();
        c
    }

    fn step(c: &mut InitiationLeader, robot: (f64, f64), animals: &[AgentState]) -> ControlData {
        let robot = AgentState::new(PositionMeters::new(robot.0, robot.1), OrientationRad::new(0.0));
        c.step(&ControlContext {
            robot: &robot,
            animals,
            peers: &[],
            map: None,
        })
    }

    // room_a centroid (0.2, 0.2), room_b centroid (0.8, 0.2).

    #[test]
    fn trigger_parses_from_json() {
        let t: DepartureTrigger = serde_json::from_str(r#"{"kind": "timeout", "after_sec": 30.0}"#).unwrap();
        assert_eq!(t, DepartureTrigger::Timeout { after_sec: 30.0 });
        let t: DepartureTrigger =
            serde_json::from_str(r#"{"kind": "fish_around", "min_count": 2, "radius_m": 0.2}"#).unwrap();
        assert_eq!(t, DepartureTrigger::FishAround { min_count: 2, radius_m: 0.2 });
    }

    #[test]
    fn needs_two_rooms() {
        let areas = ControlAreas::default();
        assert!(InitiationLeader::new(areas, &InitiationLeaderSettings::default(), Notifier::detached("r")).is_err());
    }

    #[test]
    fn swims_with_the_group_until_fish_are_around() {
        let mut c = leader(InitiationLeaderSettings::default());
        let far = [fish(0.05, 0.35)];
        let data = step(&mut c, (0.2, 0.2), &far);
        assert_eq!(data.control_mode, ControlModeType::ModelBased);
        assert_eq!(data.motion_pattern, MotionPatternType::Pid);
        assert_eq!(c.state(), InitiationLeaderState::SwimmingWithFish);

        let near = [fish(0.22, 0.2)];
        let data = step(&mut c, (0.2, 0.2), &near);
        assert_eq!(c.state(), InitiationLeaderState::ChangingRoom);
        assert_eq!(c.target_area(), Some("room_b"));
        assert_eq!(data.control_mode, ControlModeType::GoToPosition);
        assert_eq!(data.motion_pattern, MotionPatternType::FishMotion, "fish-like start");
        match data.payload {
            ControlPayload::Position(p) => assert!((p.x - 0.8).abs() < 1e-9 && (p.y - 0.2).abs() < 1e-9),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn preferred_room_keeps_the_robot() {
        let mut c = leader(InitiationLeaderSettings::default());
        c.set_preferred_area("room_a");
        step(&mut c, (0.2, 0.2), &[fish(0.22, 0.2)]);
        assert_eq!(c.state(), InitiationLeaderState::SwimmingWithFish);
    }

    #[test]
    fn goes_to_the_fish_when_they_are_elsewhere() {
        let mut c = leader(InitiationLeaderSettings::default());
        let data = step(&mut c, (0.2, 0.2), &[fish(0.8, 0.2), fish(0.9, 0.3)]);
        assert_eq!(c.state(), InitiationLeaderState::GoingBack);
        assert_eq!(data.motion_pattern, MotionPatternType::Pid);
        step(&mut c, (0.8, 0.2), &[fish(0.8, 0.2)]);
        assert_eq!(c.state(), InitiationLeaderState::SwimmingWithFish);
    }

    #[test]
    fn returns_when_fish_stay_behind() {
        let settings = InitiationLeaderSettings {
            fish_follow_check_timeout_sec: 0.02,
            fish_motion_on_departure_sec: 0.0,
            ..InitiationLeaderSettings::default()
        };
        let mut c = leader(settings);
        let behind = [fish(0.22, 0.2)];
        step(&mut c, (0.2, 0.2), &behind);
        assert_eq!(c.state(), InitiationLeaderState::ChangingRoom);
        std::thread::sleep(std::time::Duration::from_millis(30));
        let data = step(&mut c, (0.5, 0.2), &behind);
        assert_eq!(c.state(), InitiationLeaderState::GoingBack);
        assert_eq!(c.target_area(), Some("room_a"));
        match data.payload {
            ControlPayload::Position(p) => assert!((p.x - 0.2).abs() < 1e-9),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn arrival_after_successful_check_resumes_swimming() {
        let settings = InitiationLeaderSettings {
            fish_follow_check_timeout_sec: 0.0,
            ..InitiationLeaderSettings::default()
        };
        let mut c = leader(settings);
        step(&mut c, (0.2, 0.2), &[fish(0.22, 0.2)]);
        // Check passes at once: the animal came along.
        step(&mut c, (0.5, 0.2), &[fish(0.5, 0.2)]);
        assert_eq!(c.state(), InitiationLeaderState::ChangingRoom);
        assert_eq!(c.status(), "changing room (follow)");
        step(&mut c, (0.8, 0.2), &[fish(0.8, 0.2)]);
        assert_eq!(c.state(), InitiationLeaderState::SwimmingWithFish);
    }

    #[test]
    fn arrival_in_an_empty_room_waits_for_the_group() {
        let settings = InitiationLeaderSettings {
            fish_follow_check_timeout_sec: 0.0,
            ..InitiationLeaderSettings::default()
        };
        let mut c = leader(settings);
        step(&mut c, (0.2, 0.2), &[fish(0.22, 0.2)]);
        step(&mut c, (0.5, 0.2), &[fish(0.5, 0.2)]);

        // Arrived, but the only animal is further than the group radius.
        let data = step(&mut c, (0.8, 0.2), &[fish(0.65, 0.2)]);
        assert_eq!(c.state(), InitiationLeaderState::ChangingRoom);
        assert_eq!(data.motion_pattern, MotionPatternType::FishMotion);

        step(&mut c, (0.8, 0.2), &[fish(0.75, 0.2)]);
        assert_eq!(c.state(), InitiationLeaderState::SwimmingWithFish);
    }

    #[test]
    fn timeout_trigger_departs_after_the_delay() {
        let settings = InitiationLeaderSettings {
            departure: DepartureTrigger::Timeout { after_sec: 0.02 },
            ..InitiationLeaderSettings::default()
        };
        let mut c = leader(settings);
        step(&mut c, (0.2, 0.2), &[fish(0.1, 0.1)]);
        assert_eq!(c.state(), InitiationLeaderState::SwimmingWithFish);
        std::thread::sleep(std::time::Duration::from_millis(30));
        step(&mut c, (0.2, 0.2), &[fish(0.1, 0.1)]);
        assert_eq!(c.state(), InitiationLeaderState::ChangingRoom);
    }
}
