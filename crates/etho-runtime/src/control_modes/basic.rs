//! Manual driving, constant speed and go-to-position.

use std::f64::consts::{FRAC_PI_2, SQRT_2};

use etho_types::{ControlTarget, PositionMeters};
use tracing::debug;

use super::ControlContext;

/// Distance under which [`GoToPosition`] considers the target reached.
pub const TARGET_REACHED_DISTANCE_M: f64 = 0.05;

// ────────────────────────────────────────────────────────────────────────────
// Manual
// ────────────────────────────────────────────────────────────────────────────

/// Joystick driving.
///
/// The stick deflection `(x, y)` in `[-1, 1]²` is set from outside; pushing
/// forward (`y > 0`) drives straight, sideways turns on the spot.
///
/// ```rust
/// use etho_runtime::control_modes::Manual;
/// use etho_types::ControlTarget;
///
/// let mut manual = Manual::new(4.0);
/// manual.set_joystick(0.0, 1.0);
/// let ControlTarget::Speed { left, right } = manual.step() else { unreachable!() };
/// assert!((left - right).abs() < 1e-9 && left > 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct Manual {
    speed_cm_s: f64,
    stick: Option<(f64, f64)>,
}

impl Manual {
    pub fn new(speed_cm_s: f64) -> Self {
        Self { speed_cm_s, stick: None }
    }

    pub fn set_joystick(&mut self, x: f64, y: f64) {
        if x.is_finite() && y.is_finite() {
            self.stick = Some((x.clamp(-1.0, 1.0), y.clamp(-1.0, 1.0)));
        }
    }

    /// Drop the last stick input.
    pub fn release(&mut self) {
        self.stick = None;
    }

    pub fn step(&self) -> ControlTarget {
        let Some((x, y)) = self.stick else {
            return ControlTarget::stop();
        };
        let r = x.hypot(y) / SQRT_2 * self.speed_cm_s;
        let theta = y.atan2(x) - FRAC_PI_2;
        ControlTarget::Speed {
            left: r * (theta.cos() - 0.5 * theta.sin()),
            right: r * (theta.cos() + 0.5 * theta.sin()),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// GoStraight
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GoStraight {
    speed_cm_s: f64,
}

impl GoStraight {
    pub fn new(speed_cm_s: f64) -> Self {
        Self { speed_cm_s }
    }

    pub fn step(&self) -> ControlTarget {
        ControlTarget::Speed {
            left: self.speed_cm_s,
            right: self.speed_cm_s,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// GoToPosition
// ────────────────────────────────────────────────────────────────────────────

/// Drive to a target set from outside.
#[derive(Debug, Clone, Default)]
pub struct GoToPosition {
    target: PositionMeters,
    status: String,
}

impl GoToPosition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self) -> PositionMeters {
        self.target
    }

    pub fn set_target(&mut self, target: PositionMeters) {
        if target != self.target {
            debug!(%target, "new go-to-position target");
        }
        self.target = target;
    }

    /// Invalidate the target so that re-entering the mode does not reuse it.
    pub fn clear_target(&mut self) {
        self.target = PositionMeters::invalid();
        self.status.clear();
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn step(&mut self, ctx: &ControlContext<'_>) -> ControlTarget {
        let position = ctx.robot.position;
        let Some(distance) = position.distance_2d_to(&self.target) else {
            self.status = "target undefined".into();
            return ControlTarget::stop();
        };
        if distance < TARGET_REACHED_DISTANCE_M {
            self.status = "arrived".into();
            ControlTarget::stop()
        } else {
            self.status = format!("distance {distance:.3} m");
            ControlTarget::Position(self.target)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etho_types::{AgentState, OrientationRad};

    fn ctx_at(robot: &AgentState) -> ControlContext<'_> {
        ControlContext {
            robot,
            animals: &[],
            peers: &[],
            map: None,
        }
    }

    fn speeds(target: ControlTarget) -> (f64, f64) {
        match target {
            ControlTarget::Speed { left, right } => (left, right),
            other => panic!("expected a speed target, got {other:?}"),
        }
    }

    #[test]
    fn manual_without_input_stops() {
        assert_eq!(Manual::new(4.0).step(), ControlTarget::stop());
    }

    #[test]
    fn manual_stick_right_turns_clockwise() {
        let mut manual = Manual::new(4.0);
        manual.set_joystick(1.0, 0.0);
        let (left, right) = speeds(manual.step());
        assert!(left > 0.0 && right < 0.0);
        assert!((left + right).abs() < 1e-9);
    }

    #[test]
    fn manual_full_diagonal_reaches_full_radius() {
        let mut manual = Manual::new(4.0);
        manual.set_joystick(1.0, 1.0);
        let (left, right) = speeds(manual.step());
        // r = speed, θ = −π/4.
        let theta = -std::f64::consts::FRAC_PI_4;
        assert!((left - 4.0 * (theta.cos() - 0.5 * theta.sin())).abs() < 1e-9);
        assert!((right - 4.0 * (theta.cos() + 0.5 * theta.sin())).abs() < 1e-9);
        manual.release();
        assert_eq!(manual.step(), ControlTarget::stop());
    }

    #[test]
    fn manual_ignores_non_finite_input() {
        let mut manual = Manual::new(4.0);
        manual.set_joystick(f64::NAN, 0.5);
        assert_eq!(manual.step(), ControlTarget::stop());
    }

    #[test]
    fn go_straight_constant_speed() {
        assert_eq!(GoStraight::new(2.0).step(), ControlTarget::Speed { left: 2.0, right: 2.0 });
    }

    #[test]
    fn go_to_position_targets_and_arrives() {
        let mut mode = GoToPosition::new();
        let robot = AgentState::new(PositionMeters::new(0.0, 0.0), OrientationRad::new(0.0));

        assert_eq!(mode.step(&ctx_at(&robot)), ControlTarget::stop());
        assert_eq!(mode.status(), "target undefined");

        let target = PositionMeters::new(0.5, 0.0);
        mode.set_target(target);
        assert_eq!(mode.step(&ctx_at(&robot)), ControlTarget::Position(target));

        let near = AgentState::new(PositionMeters::new(0.47, 0.0), OrientationRad::new(0.0));
        assert_eq!(mode.step(&ctx_at(&near)), ControlTarget::stop());
    }

    #[test]
    fn go_to_position_stops_on_invalid_robot() {
        let mut mode = GoToPosition::new();
        mode.set_target(PositionMeters::new(0.5, 0.0));
        let lost = AgentState::default();
        assert_eq!(mode.step(&ctx_at(&lost)), ControlTarget::stop());
    }

    #[test]
    fn clear_target_forgets_the_goal() {
        let mut mode = GoToPosition::new();
        mode.set_target(PositionMeters::new(0.5, 0.0));
        mode.clear_target();
        assert!(!mode.target().is_valid());
    }
}
