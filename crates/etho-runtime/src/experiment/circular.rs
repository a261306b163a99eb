//! Circular setup: a ring of areas the animals swim around.
//!
//! Area ids are expected in clockwise order.  The animal turning direction
//! is read from the sequence of majority areas; the robot is driven around
//! the ring by targeting its own position rotated about the setup centre.
//! The follower copies the animals' direction, the leader keeps one set from
//! outside.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use etho_middleware::Notifier;
use etho_types::{
    CircularSetupStatistics, ControlModeType, EthoError, EventPayload, ExperimentControllerType, MotionPatternType,
    PositionMeters, Timer,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::areas::{AreasOccupation, ControlAreaSettings, ControlAreas};
use super::{ControlData, ControlPayload};
use crate::control_modes::ControlContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurningDirection {
    Clockwise,
    CounterClockwise,
    #[default]
    Undefined,
}

impl FromStr for TurningDirection {
    type Err = String;

    /// Accepts `"CW"` and `"CCW"` in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CW" => Ok(TurningDirection::Clockwise),
            "CCW" => Ok(TurningDirection::CounterClockwise),
            _ => Err(format!("invalid turning direction '{s}'")),
        }
    }
}

impl fmt::Display for TurningDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TurningDirection::Clockwise => " CW",
            TurningDirection::CounterClockwise => "CCW",
            TurningDirection::Undefined => "Undef",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircularRole {
    Follower,
    Leader,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircularSetupSettings {
    pub areas: Vec<ControlAreaSettings>,
    /// How far ahead along the ring the robot aims.
    pub target_delta_angle_deg: f64,
    /// Defaults to the mean of the area centroids.
    pub setup_center: Option<[f64; 2]>,
    pub statistics_period_sec: f64,
    pub statistics_log_period_sec: f64,
}

impl Default for CircularSetupSettings {
    fn default() -> Self {
        Self {
            areas: Vec::new(),
            target_delta_angle_deg: 15.0,
            setup_center: None,
            statistics_period_sec: 1.0,
            statistics_log_period_sec: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DirectionCounters {
    all: u64,
    fish_cw: u64,
    fish_undef: u64,
    robot_cw: u64,
    robot_undef: u64,
}

impl DirectionCounters {
    fn record(&mut self, fish: TurningDirection, robot: TurningDirection) {
        self.all += 1;
        match fish {
            TurningDirection::Clockwise => self.fish_cw += 1,
            TurningDirection::Undefined => self.fish_undef += 1,
            TurningDirection::CounterClockwise => {}
        }
        match robot {
            TurningDirection::Clockwise => self.robot_cw += 1,
            TurningDirection::Undefined => self.robot_undef += 1,
            TurningDirection::CounterClockwise => {}
        }
    }

    fn percentages(&self, cw: u64, undef: u64) -> (f64, f64) {
        if self.all == 0 {
            return (0.0, 0.0);
        }
        let all = self.all as f64;
        let ccw = self.all.saturating_sub(cw + undef);
        (cw as f64 * 100.0 / all, ccw as f64 * 100.0 / all)
    }
}

#[derive(Debug)]
pub struct CircularSetup {
    role: CircularRole,
    areas: ControlAreas,
    occupation: AreasOccupation,
    center: PositionMeters,
    delta_angle_rad: f64,
    statistics_period_sec: f64,
    statistics_log_period_sec: f64,
    min_area_id: Option<String>,
    max_area_id: Option<String>,
    previous_fish_area: Option<String>,
    fish_direction: TurningDirection,
    target_direction: TurningDirection,
    notified_directions: Option<(TurningDirection, TurningDirection)>,
    counters: DirectionCounters,
    statistics_timer: Timer,
    log_timer: Timer,
    notifier: Notifier,
    status: String,
}

impl CircularSetup {
    pub fn new(
        role: CircularRole,
        areas: ControlAreas,
        settings: &CircularSetupSettings,
        notifier: Notifier,
    ) -> Result<Self, EthoError> {
        if areas.is_empty() {
            return Err(EthoError::config("circular setup", "no control areas"));
        }
        let center = match settings.setup_center {
            Some([x, y]) => PositionMeters::new(x, y),
            None => {
                let centroids: Vec<PositionMeters> = areas.iter().map(|a| a.centroid()).collect();
                PositionMeters::centroid(&centroids)
            }
        };
        let min_area_id = areas.iter().map(|a| a.id()).min_by(|a, b| compare_area_ids(a, b)).map(String::from);
        let max_area_id = areas.iter().map(|a| a.id()).max_by(|a, b| compare_area_ids(a, b)).map(String::from);

        Ok(Self {
            role,
            areas,
            occupation: AreasOccupation::default(),
            center,
            delta_angle_rad: settings.target_delta_angle_deg.to_radians(),
            statistics_period_sec: settings.statistics_period_sec,
            statistics_log_period_sec: settings.statistics_log_period_sec,
            min_area_id,
            max_area_id,
            previous_fish_area: None,
            fish_direction: TurningDirection::Undefined,
            target_direction: TurningDirection::Undefined,
            notified_directions: None,
            counters: DirectionCounters::default(),
            statistics_timer: Timer::new(),
            log_timer: Timer::new(),
            notifier,
            status: String::new(),
        })
    }

    pub fn kind(&self) -> ExperimentControllerType {
        match self.role {
            CircularRole::Follower => ExperimentControllerType::CircularSetupFollower,
            CircularRole::Leader => ExperimentControllerType::CircularSetupLeader,
        }
    }

    pub fn role(&self) -> CircularRole {
        self.role
    }

    pub fn areas(&self) -> &ControlAreas {
        &self.areas
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn center(&self) -> PositionMeters {
        self.center
    }

    pub fn fish_direction(&self) -> TurningDirection {
        self.fish_direction
    }

    pub fn target_direction(&self) -> TurningDirection {
        self.target_direction
    }

    pub fn start(&mut self) {
        self.previous_fish_area = None;
        self.fish_direction = TurningDirection::Undefined;
        if self.role == CircularRole::Follower {
            self.target_direction = TurningDirection::Undefined;
        }
        self.notified_directions = None;
        self.counters = DirectionCounters::default();
        self.statistics_timer.reset();
        self.log_timer.reset();
    }

    pub fn finish(&mut self) {
        self.log_statistics(true);
    }

    /// Direction the leader drives in.  Only `"CW"` and `"CCW"` are
    /// accepted.
    pub fn set_turning_direction(&mut self, direction: &str) -> bool {
        match direction.parse::<TurningDirection>() {
            Ok(d) => {
                if d != self.target_direction {
                    info!(robot = self.notifier.source(), direction = %d, "circular setup direction set");
                }
                self.target_direction = d;
                true
            }
            Err(e) => {
                warn!(robot = self.notifier.source(), error = %e, "turning direction refused");
                false
            }
        }
    }

    pub fn step(&mut self, ctx: &ControlContext<'_>) -> ControlData {
        if self.occupation.update(&self.areas, &ctx.robot.position, ctx.animals) {
            self.notifier
                .notify(EventPayload::FishNumberByAreas(self.occupation.fish_number_by_area().clone()));
        }
        self.update_fish_direction();
        if self.role == CircularRole::Follower {
            self.target_direction = self.fish_direction;
        }
        self.notify_directions();
        self.update_statistics();

        self.status = match self.role {
            CircularRole::Follower => format!("fish: {}; robot follows", self.fish_direction),
            CircularRole::Leader => format!("fish: {}; robot: {}", self.fish_direction, self.target_direction),
        };

        let angle = match self.target_direction {
            TurningDirection::Clockwise => -self.delta_angle_rad,
            TurningDirection::CounterClockwise => self.delta_angle_rad,
            TurningDirection::Undefined => 0.0,
        };
        let target = ctx.robot.position.rotated_about(&self.center, angle);
        ControlData::new(ControlModeType::GoToPosition, MotionPatternType::Pid)
            .with_payload(ControlPayload::Position(target))
    }

    fn update_fish_direction(&mut self) {
        let Some(current) = self.occupation.animal_area() else {
            return;
        };
        if let Some(previous) = self.previous_fish_area.as_deref()
            && previous != current
        {
            self.fish_direction = self.direction_between(previous, current);
            debug!(from = previous, to = current, direction = %self.fish_direction, "fish changed area");
        }
        self.previous_fish_area = Some(current.to_string());
    }

    fn direction_between(&self, previous: &str, current: &str) -> TurningDirection {
        let (min, max) = (self.min_area_id.as_deref(), self.max_area_id.as_deref());
        if Some(previous) == max && Some(current) == min {
            return TurningDirection::Clockwise;
        }
        if Some(previous) == min && Some(current) == max {
            return TurningDirection::CounterClockwise;
        }
        match compare_area_ids(current, previous) {
            Ordering::Greater => TurningDirection::Clockwise,
            Ordering::Less => TurningDirection::CounterClockwise,
            Ordering::Equal => TurningDirection::Undefined,
        }
    }

    fn notify_directions(&mut self) {
        let now = (self.fish_direction, self.target_direction);
        if self.notified_directions != Some(now) {
            self.notified_directions = Some(now);
            self.notifier.notify(EventPayload::CircularSetupTurningDirections {
                fish: self.fish_direction.to_string(),
                robot: self.target_direction.to_string(),
            });
        }
    }

    fn update_statistics(&mut self) {
        self.counters.record(self.fish_direction, self.target_direction);
        if self.statistics_timer.is_timed_out_sec(self.statistics_period_sec) {
            self.statistics_timer.reset();
            self.notifier
                .notify(EventPayload::CircularSetupStatistics(self.statistics()));
        }
        if self.log_timer.is_timed_out_sec(self.statistics_log_period_sec) {
            self.log_timer.reset();
            self.log_statistics(false);
        }
    }

    pub fn statistics(&self) -> CircularSetupStatistics {
        let c = &self.counters;
        let (fish_cw, fish_ccw) = c.percentages(c.fish_cw, c.fish_undef);
        let (robot_cw, robot_ccw) = c.percentages(c.robot_cw, c.robot_undef);
        CircularSetupStatistics {
            fish_clockwise_percent: fish_cw,
            fish_counter_clockwise_percent: fish_ccw,
            fish_direction: self.fish_direction.to_string(),
            robot_clockwise_percent: robot_cw,
            robot_counter_clockwise_percent: robot_ccw,
            robot_direction: self.target_direction.to_string(),
        }
    }

    fn log_statistics(&self, last: bool) {
        let s = self.statistics();
        info!(
            robot = self.notifier.source(),
            last,
            measurements = self.counters.all,
            fish_cw = s.fish_clockwise_percent,
            fish_ccw = s.fish_counter_clockwise_percent,
            robot_cw = s.robot_clockwise_percent,
            robot_ccw = s.robot_counter_clockwise_percent,
            "circular setup statistics"
        );
    }
}

/// Numeric ids compare as numbers, anything else lexicographically.
fn compare_area_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::areas::{ControlArea, ControlAreaKind};
    use etho_middleware::{EventBus, Topic};
    use etho_types::{AgentState, OrientationRad, WorldPolygon};

    /// Four quadrants around the origin, numbered clockwise from the
    /// top-right one.
    fn quadrants() -> ControlAreas {
        let q = |id: &str, sx: f64, sy: f64| {
            ControlArea::new(
                id,
                ControlAreaKind::Corridor,
                vec![WorldPolygon::from_points(&[
                    (0.0, 0.0),
                    (sx, 0.0),
                    (sx, sy),
                    (0.0, sy),
                ])],
            )
        };
        ControlAreas::new(vec![
            q("1", 1.0, 1.0),
            q("2", 1.0, -1.0),
            q("3", -1.0, -1.0),
            q("4", -1.0, 1.0),
        ])
        .unwrap()
    }

    fn settings() -> CircularSetupSettings {
        CircularSetupSettings {
            target_delta_angle_deg: 90.0,
            setup_center: Some([0.0, 0.0]),
            ..CircularSetupSettings::default()
        }
    }

    fn setup(role: CircularRole, notifier: Notifier) -> CircularSetup {
        let mut c = CircularSetup::new(role, quadrants(), &settings(), notifier).unwrap();
        c.start();
        c
    }

    fn step_with_fish(c: &mut CircularSetup, fish: (f64, f64)) -> ControlData {
        let robot = AgentState::new(PositionMeters::new(0.5, 0.5), OrientationRad::new(0.0));
        let animals = [AgentState::new(PositionMeters::new(fish.0, fish.1), OrientationRad::new(0.0))];
        c.step(&ControlContext {
            robot: &robot,
            animals: &animals,
            peers: &[],
            map: None,
        })
    }

    fn target_of(data: &ControlData) -> PositionMeters {
        match data.payload {
            ControlPayload::Position(p) => p,
            ref other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn direction_strings() {
        assert_eq!("cw".parse(), Ok(TurningDirection::Clockwise));
        assert_eq!("CCW".parse(), Ok(TurningDirection::CounterClockwise));
        assert!("left".parse::<TurningDirection>().is_err());
        assert_eq!(TurningDirection::Clockwise.to_string(), " CW");
        assert_eq!(TurningDirection::CounterClockwise.to_string(), "CCW");
        assert_eq!(TurningDirection::Undefined.to_string(), "Undef");
    }

    #[test]
    fn numeric_ids_compare_as_numbers() {
        assert_eq!(compare_area_ids("2", "10"), Ordering::Less);
        assert_eq!(compare_area_ids("b", "a"), Ordering::Greater);
    }

    #[test]
    fn fish_direction_wraps_at_the_ends() {
        let mut c = setup(CircularRole::Follower, Notifier::detached("r"));
        step_with_fish(&mut c, (0.5, 0.5));
        assert_eq!(c.fish_direction(), TurningDirection::Undefined);
        step_with_fish(&mut c, (0.5, -0.5));
        assert_eq!(c.fish_direction(), TurningDirection::Clockwise);

        let mut c = setup(CircularRole::Follower, Notifier::detached("r"));
        step_with_fish(&mut c, (-0.5, 0.5));
        step_with_fish(&mut c, (0.5, 0.5));
        assert_eq!(c.fish_direction(), TurningDirection::Clockwise, "4 -> 1 wraps clockwise");
        step_with_fish(&mut c, (-0.5, 0.5));
        assert_eq!(c.fish_direction(), TurningDirection::CounterClockwise, "1 -> 4 wraps back");
    }

    #[test]
    fn follower_rotates_its_target_with_the_fish() {
        let mut c = setup(CircularRole::Follower, Notifier::detached("r"));
        let data = step_with_fish(&mut c, (0.5, 0.5));
        assert_eq!(data.control_mode, ControlModeType::GoToPosition);
        assert_eq!(data.motion_pattern, MotionPatternType::Pid);
        // Undefined direction: hold position.
        let t = target_of(&data);
        assert!((t.x - 0.5).abs() < 1e-9 && (t.y - 0.5).abs() < 1e-9);

        let t = target_of(&step_with_fish(&mut c, (0.5, -0.5)));
        assert!((t.x - 0.5).abs() < 1e-9 && (t.y + 0.5).abs() < 1e-9, "clockwise is negative: {t}");
        assert_eq!(c.status(), "fish:  CW; robot follows");
    }

    #[test]
    fn leader_keeps_its_own_direction() {
        let mut c = setup(CircularRole::Leader, Notifier::detached("r"));
        assert!(c.set_turning_direction("ccw"));
        assert!(!c.set_turning_direction("sideways"));
        step_with_fish(&mut c, (0.5, 0.5));
        let t = target_of(&step_with_fish(&mut c, (0.5, -0.5)));
        assert_eq!(c.fish_direction(), TurningDirection::Clockwise);
        assert_eq!(c.target_direction(), TurningDirection::CounterClockwise);
        assert!((t.x + 0.5).abs() < 1e-9 && (t.y - 0.5).abs() < 1e-9);
        assert_eq!(c.kind(), ExperimentControllerType::CircularSetupLeader);
    }

    #[test]
    fn publishes_directions_on_change_and_statistics() {
        let bus = EventBus::default();
        let mut stats = bus.subscribe_to(Topic::Statistics);
        let s = CircularSetupSettings {
            statistics_period_sec: 0.0,
            ..settings()
        };
        let mut c = CircularSetup::new(CircularRole::Follower, quadrants(), &s, Notifier::new(bus, "r")).unwrap();
        c.start();
        step_with_fish(&mut c, (0.5, 0.5));
        step_with_fish(&mut c, (0.5, -0.5));

        let mut directions = Vec::new();
        let mut last_stats = None;
        while let Ok(event) = stats.try_recv() {
            match event.payload {
                EventPayload::CircularSetupTurningDirections { fish, robot } => directions.push((fish, robot)),
                EventPayload::CircularSetupStatistics(s) => last_stats = Some(s),
                _ => {}
            }
        }
        assert_eq!(
            directions,
            vec![
                ("Undef".to_string(), "Undef".to_string()),
                (" CW".to_string(), " CW".to_string())
            ]
        );
        let s = last_stats.unwrap();
        assert!((s.fish_clockwise_percent - 50.0).abs() < 1e-9);
        assert!(s.fish_counter_clockwise_percent.abs() < 1e-9);
    }

    #[test]
    fn needs_areas() {
        let err = CircularSetup::new(
            CircularRole::Follower,
            ControlAreas::default(),
            &settings(),
            Notifier::detached("r"),
        );
        assert!(err.is_err());
    }
}
