//! [`Navigation`] – turns control targets into motor commands.
//!
//! A speed target is forwarded as is.  A position target is reached with the
//! active motion pattern:
//!
//! - **PID**: continuous wheel speeds from a heading PID controller,
//!   `left = v − ω·L/2`, `right = v + ω·L/2`;
//! - **FishMotion**: every `frequency_divider`-th step, a discrete
//!   turn-and-burst command imitating fish kinematics.
//!
//! Optionally the waypoint comes from the [`PathPlanner`] instead of the raw
//! target, and the heading from the potential field instead of the straight
//! bearing.  Every command passes the [`StateVerifier`] before it reaches the
//! robot link; delivery failures are logged and never retried.

use std::sync::Arc;

use etho_hal::{LocalAvoidance, PidController, PidGains, RobotLink};
use etho_kernel::StateVerifier;
use etho_middleware::Notifier;
use etho_types::{AgentState, ControlTarget, EventPayload, MotionPatternType, MotorCommand, PositionMeters, normalize_angle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::path_planner::{DijkstraPlanner, PathPlanner};
use crate::potential_field::{ObstacleAvoidance, PotentialFieldParams};
use crate::spatial_map::SpatialMap;

/// Largest turn a fish-motion burst may request.
pub const MAX_FISH_TURN_DEG: f64 = 100.0;

/// Burst parameters of the fish motion pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FishMotionSettings {
    pub distance_cm: f64,
    pub speed_cm_s: f64,
}

impl Default for FishMotionSettings {
    fn default() -> Self {
        Self {
            distance_cm: 5.0,
            speed_cm_s: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationSettings {
    pub control_frequency_hz: f64,
    pub default_linear_speed_cm_s: f64,
    pub inter_wheel_distance_cm: f64,
    pub max_speed_cm_s: f64,
    pub need_orientation_to_navigate: bool,
    pub stop_once_on_target: bool,
    pub motion_pattern: MotionPatternType,
    pub pid: PidGains,
    pub fish_motion: FishMotionSettings,
    pub fish_motion_frequency_divider: u32,
    pub potential_field: PotentialFieldParams,
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            control_frequency_hz: 15.0,
            default_linear_speed_cm_s: 4.0,
            inter_wheel_distance_cm: 1.8,
            max_speed_cm_s: 30.0,
            need_orientation_to_navigate: true,
            stop_once_on_target: true,
            motion_pattern: MotionPatternType::Pid,
            pid: PidGains::default(),
            fish_motion: FishMotionSettings::default(),
            fish_motion_frequency_divider: 3,
            potential_field: PotentialFieldParams::default(),
        }
    }
}

/// What navigation needs to know about the world for one step.
#[derive(Debug, Clone, Copy)]
pub struct NavigationContext<'a> {
    pub robot: &'a AgentState,
    /// Positions of the other robots.
    pub peers: &'a [PositionMeters],
}

// ────────────────────────────────────────────────────────────────────────────
// Navigation
// ────────────────────────────────────────────────────────────────────────────

pub struct Navigation {
    settings: NavigationSettings,
    dt: f64,
    motion_pattern: MotionPatternType,
    frequency_divider: u32,
    step_counter: u32,
    pid: PidController,
    verifier: StateVerifier,
    path_planner: Option<PathPlanner>,
    use_path_planning: bool,
    obstacle_avoidance: Option<ObstacleAvoidance>,
    use_obstacle_avoidance: bool,
    current_waypoint: PositionMeters,
    notifier: Notifier,
}

impl Navigation {
    /// Path planning and obstacle avoidance are only available with a map.
    pub fn new(settings: NavigationSettings, map: Option<Arc<SpatialMap>>, notifier: Notifier) -> Self {
        let path_planner = map
            .clone()
            .map(|m| PathPlanner::new(DijkstraPlanner::new(m), notifier.clone()));
        let obstacle_avoidance = map.map(|m| ObstacleAvoidance::new(m, settings.potential_field.clone()));
        let hz = if settings.control_frequency_hz > 0.0 {
            settings.control_frequency_hz
        } else {
            NavigationSettings::default().control_frequency_hz
        };
        Self {
            dt: 1.0 / hz,
            motion_pattern: settings.motion_pattern,
            frequency_divider: settings.fish_motion_frequency_divider.max(1),
            step_counter: 0,
            pid: PidController::with_gains(settings.pid),
            verifier: StateVerifier::differential_drive(settings.max_speed_cm_s, MAX_FISH_TURN_DEG),
            path_planner,
            use_path_planning: false,
            obstacle_avoidance,
            use_obstacle_avoidance: false,
            current_waypoint: PositionMeters::invalid(),
            notifier,
            settings,
        }
    }

    pub fn settings(&self) -> &NavigationSettings {
        &self.settings
    }

    pub fn motion_pattern(&self) -> MotionPatternType {
        self.motion_pattern
    }

    pub fn use_path_planning(&self) -> bool {
        self.use_path_planning
    }

    pub fn use_obstacle_avoidance(&self) -> bool {
        self.use_obstacle_avoidance
    }

    /// The waypoint the robot is heading to; invalid when stopped.
    pub fn current_target(&self) -> PositionMeters {
        self.current_waypoint
    }

    /// Remaining planned waypoints.
    pub fn trajectory(&self) -> Vec<PositionMeters> {
        self.path_planner
            .as_ref()
            .map(|p| p.trajectory().iter().copied().collect())
            .unwrap_or_default()
    }

    // ── Step ────────────────────────────────────────────────────────────────

    /// Execute one control step towards `target`.
    pub fn step(&mut self, ctx: &NavigationContext<'_>, target: &ControlTarget, link: &mut dyn RobotLink) {
        match *target {
            ControlTarget::Speed { left, right } => self.send(
                MotorCommand::Speed {
                    left_cm_s: left,
                    right_cm_s: right,
                },
                link,
            ),
            ControlTarget::Position(goal) => self.go_to_position(ctx, &goal, link),
        }
    }

    fn go_to_position(&mut self, ctx: &NavigationContext<'_>, goal: &PositionMeters, link: &mut dyn RobotLink) {
        let position = ctx.robot.position;
        if !position.is_valid() || !goal.is_valid() {
            debug!(robot = link.id(), "invalid robot or target position");
            self.stop(link);
            return;
        }

        if self.settings.stop_once_on_target && position.close_to(goal) {
            self.stop(link);
            if self.use_path_planning
                && let Some(planner) = self.path_planner.as_mut()
            {
                planner.clear_trajectory();
            }
            return;
        }

        let waypoint = match self.path_planner.as_mut() {
            Some(planner) if self.use_path_planning => planner.current_waypoint(&position, goal),
            _ => *goal,
        };
        if !waypoint.is_valid() {
            self.stop(link);
            return;
        }
        self.update_current_waypoint(waypoint);

        let oriented = ctx.robot.orientation.is_valid();
        if !oriented && self.settings.need_orientation_to_navigate {
            debug!(robot = link.id(), "no valid orientation, skipping step");
            return;
        }

        match self.motion_pattern {
            MotionPatternType::Pid => self.pid_to(ctx, &waypoint, link),
            MotionPatternType::FishMotion => self.fish_motion_to(ctx, &waypoint, link),
            MotionPatternType::Undefined => self.stop(link),
        }
    }

    /// Heading error towards `waypoint`, normalized to (−π, π].
    fn heading_error(&self, ctx: &NavigationContext<'_>, waypoint: &PositionMeters) -> f64 {
        let straight = ctx.robot.position.bearing_to(waypoint);
        let desired = match &self.obstacle_avoidance {
            Some(avoidance) if self.use_obstacle_avoidance => {
                let heading = avoidance.target_orientation(ctx.robot, ctx.peers, waypoint);
                if heading.is_valid() { heading } else { straight }
            }
            _ => straight,
        };
        let bearing = desired.angle_rad().unwrap_or(0.0);
        let heading = ctx.robot.orientation.angle_rad().unwrap_or(0.0);
        normalize_angle(bearing - heading)
    }

    fn pid_to(&mut self, ctx: &NavigationContext<'_>, waypoint: &PositionMeters, link: &mut dyn RobotLink) {
        let error = self.heading_error(ctx, waypoint);
        let omega = self.pid.update(error, self.dt);
        let (left, right) = PidController::wheel_speeds(
            self.settings.default_linear_speed_cm_s,
            omega,
            self.settings.inter_wheel_distance_cm,
        );
        self.send(
            MotorCommand::Speed {
                left_cm_s: left,
                right_cm_s: right,
            },
            link,
        );
    }

    fn fish_motion_to(&mut self, ctx: &NavigationContext<'_>, waypoint: &PositionMeters, link: &mut dyn RobotLink) {
        self.step_counter += 1;
        if self.step_counter < self.frequency_divider {
            return;
        }
        self.step_counter = 0;
        // Positive angles turn counter-clockwise.
        let angle_deg = self.heading_error(ctx, waypoint).to_degrees();
        self.send(
            MotorCommand::Discrete {
                angle_deg: angle_deg.clamp(-MAX_FISH_TURN_DEG, MAX_FISH_TURN_DEG),
                distance_cm: self.settings.fish_motion.distance_cm,
                speed_cm_s: self.settings.fish_motion.speed_cm_s,
            },
            link,
        );
    }

    fn send(&self, command: MotorCommand, link: &mut dyn RobotLink) {
        match self.verifier.verify(command) {
            Ok(bounded) => {
                if let Err(e) = link.send(bounded) {
                    warn!(robot = link.id(), error = %e, "motor command not delivered");
                }
            }
            Err(e) => warn!(robot = link.id(), error = %e, ?command, "motor command rejected"),
        }
    }

    /// Stop the robot and forget the current waypoint.
    pub fn stop(&mut self, link: &mut dyn RobotLink) {
        self.send(MotorCommand::stop(), link);
        self.update_current_waypoint(PositionMeters::invalid());
    }

    fn update_current_waypoint(&mut self, waypoint: PositionMeters) {
        if self.current_waypoint != waypoint {
            self.current_waypoint = waypoint;
            self.notifier.notify(EventPayload::TargetPositionChanged(waypoint));
        }
    }

    // ── Settings ────────────────────────────────────────────────────────────

    pub fn set_motion_pattern(&mut self, pattern: MotionPatternType, link: &mut dyn RobotLink) {
        if pattern == self.motion_pattern {
            return;
        }
        info!(robot = link.id(), from = %self.motion_pattern, to = %pattern, "changing motion pattern");
        self.motion_pattern = pattern;
        self.step_counter = 0;
        self.pid.reset();
        self.update_local_avoidance(link);
        self.notifier.notify(EventPayload::MotionPatternChanged(pattern));
    }

    /// Re-send the on-board avoidance mode matching the motion pattern.
    pub fn update_local_avoidance(&self, link: &mut dyn RobotLink) {
        let mode = match self.motion_pattern {
            MotionPatternType::FishMotion => LocalAvoidance::Disabled,
            _ => LocalAvoidance::Braitenberg,
        };
        if let Err(e) = link.set_local_avoidance(mode) {
            warn!(robot = link.id(), error = %e, "local avoidance not delivered");
        }
    }

    /// Only the fish motion pattern is frequency-divided.
    pub fn set_motion_pattern_frequency_divider(&mut self, pattern: MotionPatternType, divider: u32) {
        if pattern != MotionPatternType::FishMotion {
            debug!(%pattern, "frequency divider not supported");
            return;
        }
        let divider = divider.max(1);
        if divider != self.frequency_divider {
            self.frequency_divider = divider;
            self.step_counter = 0;
            self.notifier
                .notify(EventPayload::MotionPatternFrequencyDividerChanged { pattern, divider });
        }
    }

    pub fn motion_pattern_frequency_divider(&self, pattern: MotionPatternType) -> u32 {
        if pattern == MotionPatternType::FishMotion {
            self.frequency_divider
        } else {
            1
        }
    }

    pub fn set_use_path_planning(&mut self, enabled: bool) {
        if enabled == self.use_path_planning {
            return;
        }
        if enabled && self.path_planner.is_none() {
            warn!("path planning requested without a spatial map");
            return;
        }
        self.use_path_planning = enabled;
        if !enabled && let Some(planner) = self.path_planner.as_mut() {
            planner.clear_trajectory();
        }
        self.notifier.notify(EventPayload::UsePathPlanningChanged(enabled));
    }

    pub fn set_use_obstacle_avoidance(&mut self, enabled: bool) {
        if enabled == self.use_obstacle_avoidance {
            return;
        }
        if enabled && self.obstacle_avoidance.is_none() {
            warn!("obstacle avoidance requested without a spatial map");
            return;
        }
        self.use_obstacle_avoidance = enabled;
        self.notifier.notify(EventPayload::UseObstacleAvoidanceChanged(enabled));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etho_hal::{SimProbe, SimRobotLink};
    use etho_middleware::{EventBus, Topic};
    use etho_types::{OrientationRad, WorldPolygon};
    use std::f64::consts::FRAC_PI_2;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> WorldPolygon {
        WorldPolygon::from_points(&[(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
    }

    fn setup() -> (Navigation, SimRobotLink, SimProbe) {
        let (link, probe) = SimRobotLink::new("robot_1");
        let nav = Navigation::new(NavigationSettings::default(), None, Notifier::detached("robot_1"));
        (nav, link, probe)
    }

    fn robot(x: f64, y: f64, heading: f64) -> AgentState {
        AgentState::new(PositionMeters::new(x, y), OrientationRad::new(heading))
    }

    fn wheels(probe: &SimProbe) -> (f64, f64) {
        match probe.last_command() {
            Some(MotorCommand::Speed { left_cm_s, right_cm_s }) => (left_cm_s, right_cm_s),
            other => panic!("expected a speed command, got {other:?}"),
        }
    }

    #[test]
    fn speed_target_is_capped() {
        let (mut nav, mut link, probe) = setup();
        let state = robot(0.5, 0.5, 0.0);
        let ctx = NavigationContext { robot: &state, peers: &[] };
        nav.step(&ctx, &ControlTarget::Speed { left: 100.0, right: 3.0 }, &mut link);
        assert_eq!(wheels(&probe), (30.0, 3.0));
    }

    #[test]
    fn aligned_pid_commands_equal_speeds() {
        let (mut nav, mut link, probe) = setup();
        let state = robot(0.5, 0.5, 0.0);
        let ctx = NavigationContext { robot: &state, peers: &[] };
        nav.step(&ctx, &ControlTarget::Position(PositionMeters::new(0.8, 0.5)), &mut link);
        let (left, right) = wheels(&probe);
        assert!((left - right).abs() < 1e-9);
        assert!((left - 4.0).abs() < 1e-9);
        assert!((nav.current_target().x - 0.8).abs() < 1e-9);
    }

    #[test]
    fn target_on_the_left_turns_counter_clockwise() {
        let (mut nav, mut link, probe) = setup();
        let state = robot(0.5, 0.5, 0.0);
        let ctx = NavigationContext { robot: &state, peers: &[] };
        nav.step(&ctx, &ControlTarget::Position(PositionMeters::new(0.5, 0.8)), &mut link);
        let (left, right) = wheels(&probe);
        // ω = kp · π/2 with kp = 10
        let expected = 10.0 * FRAC_PI_2 * 1.8 / 2.0;
        assert!((right - left - 2.0 * expected).abs() < 1e-9);
    }

    #[test]
    fn target_at_own_position_stops_immediately() {
        let (mut nav, mut link, probe) = setup();
        let state = robot(0.5, 0.5, 1.0);
        let ctx = NavigationContext { robot: &state, peers: &[] };
        nav.step(&ctx, &ControlTarget::Position(PositionMeters::new(0.505, 0.5)), &mut link);
        assert_eq!(probe.last_command(), Some(MotorCommand::stop()));
        assert!(!nav.current_target().is_valid());
    }

    #[test]
    fn invalid_positions_stop_the_robot() {
        let (mut nav, mut link, probe) = setup();
        let state = AgentState::new(PositionMeters::invalid(), OrientationRad::new(0.0));
        let ctx = NavigationContext { robot: &state, peers: &[] };
        nav.step(&ctx, &ControlTarget::Position(PositionMeters::new(0.5, 0.5)), &mut link);
        assert_eq!(probe.last_command(), Some(MotorCommand::stop()));
    }

    #[test]
    fn missing_orientation_skips_the_step() {
        let (mut nav, mut link, probe) = setup();
        let state = AgentState::new(PositionMeters::new(0.5, 0.5), OrientationRad::invalid());
        let ctx = NavigationContext { robot: &state, peers: &[] };
        nav.step(&ctx, &ControlTarget::Position(PositionMeters::new(0.8, 0.5)), &mut link);
        assert_eq!(probe.command_count(), 0);
    }

    #[test]
    fn fish_motion_fires_every_divider_steps() {
        let (mut nav, mut link, probe) = setup();
        nav.set_motion_pattern(MotionPatternType::FishMotion, &mut link);
        assert_eq!(probe.local_avoidance(), LocalAvoidance::Disabled);
        nav.set_motion_pattern_frequency_divider(MotionPatternType::FishMotion, 2);

        let state = robot(0.5, 0.5, 0.0);
        let ctx = NavigationContext { robot: &state, peers: &[] };
        let target = ControlTarget::Position(PositionMeters::new(0.5, 0.9));
        for _ in 0..4 {
            nav.step(&ctx, &target, &mut link);
        }
        assert_eq!(probe.command_count(), 2);
        match probe.last_command() {
            Some(MotorCommand::Discrete { angle_deg, distance_cm, speed_cm_s }) => {
                assert!((angle_deg - 90.0).abs() < 1e-9);
                assert_eq!((distance_cm, speed_cm_s), (5.0, 10.0));
            }
            other => panic!("expected a discrete command, got {other:?}"),
        }
    }

    #[test]
    fn fish_motion_turn_is_bounded() {
        let (mut nav, mut link, probe) = setup();
        nav.set_motion_pattern(MotionPatternType::FishMotion, &mut link);
        nav.set_motion_pattern_frequency_divider(MotionPatternType::FishMotion, 1);
        let state = robot(0.5, 0.5, 0.0);
        let ctx = NavigationContext { robot: &state, peers: &[] };
        nav.step(&ctx, &ControlTarget::Position(PositionMeters::new(0.2, 0.49)), &mut link);
        assert!(matches!(
            probe.last_command(),
            Some(MotorCommand::Discrete { angle_deg, .. }) if (angle_deg.abs() - 100.0).abs() < 1e-9
        ));
    }

    #[test]
    fn pattern_change_notifies_and_resets_avoidance() {
        let bus = EventBus::default();
        let mut status = bus.subscribe_to(Topic::Navigation);
        let (mut link, probe) = SimRobotLink::new("robot_1");
        let mut nav = Navigation::new(NavigationSettings::default(), None, Notifier::new(bus, "robot_1"));

        nav.set_motion_pattern(MotionPatternType::FishMotion, &mut link);
        nav.set_motion_pattern(MotionPatternType::Pid, &mut link);
        assert_eq!(probe.local_avoidance(), LocalAvoidance::Braitenberg);
        assert!(matches!(
            status.try_recv().unwrap().payload,
            EventPayload::MotionPatternChanged(MotionPatternType::FishMotion)
        ));
        // Divider is only meaningful for fish motion.
        assert_eq!(nav.motion_pattern_frequency_divider(MotionPatternType::Pid), 1);
    }

    #[test]
    fn undefined_pattern_stops() {
        let (mut nav, mut link, probe) = setup();
        nav.set_motion_pattern(MotionPatternType::Undefined, &mut link);
        let state = robot(0.5, 0.5, 0.0);
        let ctx = NavigationContext { robot: &state, peers: &[] };
        nav.step(&ctx, &ControlTarget::Position(PositionMeters::new(0.8, 0.5)), &mut link);
        assert_eq!(probe.last_command(), Some(MotorCommand::stop()));
    }

    #[test]
    fn planning_and_avoidance_need_a_map() {
        let (mut nav, _link, _probe) = setup();
        nav.set_use_path_planning(true);
        nav.set_use_obstacle_avoidance(true);
        assert!(!nav.use_path_planning());
        assert!(!nav.use_obstacle_avoidance());
    }

    #[test]
    fn path_planning_routes_around_walls() {
        let wall = square(0.45, -0.1, 0.55, 0.75);
        let map = Arc::new(SpatialMap::new(square(0.0, 0.0, 1.0, 1.0), vec![wall], 0.05).unwrap());
        let (mut link, _probe) = SimRobotLink::new("robot_1");
        let mut nav = Navigation::new(NavigationSettings::default(), Some(map), Notifier::detached("robot_1"));
        nav.set_use_path_planning(true);

        let state = robot(0.2, 0.2, 0.0);
        let ctx = NavigationContext { robot: &state, peers: &[] };
        nav.step(&ctx, &ControlTarget::Position(PositionMeters::new(0.8, 0.2)), &mut link);
        assert!(!nav.trajectory().is_empty());
        // First waypoint is a neighbouring cell, not the goal behind the wall.
        let waypoint = nav.current_target();
        assert!(waypoint.distance_2d_to(&state.position).unwrap() < 0.1);

        nav.set_use_path_planning(false);
        assert!(nav.trajectory().is_empty());
    }

    #[test]
    fn link_failures_do_not_panic() {
        let (mut nav, mut link, probe) = setup();
        probe.set_fail_sends(true);
        let state = robot(0.5, 0.5, 0.0);
        let ctx = NavigationContext { robot: &state, peers: &[] };
        nav.step(&ctx, &ControlTarget::Position(PositionMeters::new(0.8, 0.5)), &mut link);
        assert_eq!(probe.command_count(), 0);
    }
}
