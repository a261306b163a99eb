//! Behavioral models behind the model-based control modes.
//!
//! A model lives in its own local frame: the origin is the minimum corner of
//! the spatial map, so model coordinates are `(x − min_x, y − min_y)`.  The
//! control mode projects tracked animals and the robot into that frame, steps
//! the model and projects the simulated robot pose back as a position target.
//!
//! [`ZoneModel`] is the built-in model: a zone-based collective motion rule
//! (repulsion, then alignment and attraction) with optional wall following.

use std::f64::consts::{FRAC_PI_8, PI};
use std::fmt;

use etho_navigation::SpatialMap;
use etho_types::{PositionMeters, normalize_angle};
use serde::{Deserialize, Serialize};

/// One agent in model-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelAgent {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl ModelAgent {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self { x, y, heading }
    }

    fn distance_to(&self, other: &ModelAgent) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// Free space of a [`SpatialMap`] seen from the model-local frame.
#[derive(Debug, Clone, Copy)]
pub struct ModelArena<'a> {
    map: &'a SpatialMap,
}

impl<'a> ModelArena<'a> {
    pub fn new(map: &'a SpatialMap) -> Self {
        Self { map }
    }

    pub fn origin(&self) -> (f64, f64) {
        let b = self.map.bounds();
        (b.min_x, b.min_y)
    }

    pub fn to_local(&self, position: &PositionMeters) -> (f64, f64) {
        let (ox, oy) = self.origin();
        (position.x - ox, position.y - oy)
    }

    pub fn to_world(&self, x: f64, y: f64) -> PositionMeters {
        let (ox, oy) = self.origin();
        PositionMeters::new(x + ox, y + oy)
    }

    /// Free under the map's current grid, masks included.
    pub fn is_free(&self, x: f64, y: f64) -> bool {
        self.map.contains_point(&self.to_world(x, y))
    }

    /// A free point, preferring the middle of the map.
    fn any_free_point(&self) -> Option<(f64, f64)> {
        let b = self.map.bounds();
        let middle = ((b.max_x - b.min_x) / 2.0, (b.max_y - b.min_y) / 2.0);
        if self.is_free(middle.0, middle.1) {
            return Some(middle);
        }
        (0..self.map.rows())
            .flat_map(|row| (0..self.map.cols()).map(move |col| (col, row)))
            .map(|(col, row)| self.map.node_to_position(etho_navigation::GridNode::new(col, row)))
            .find(|p| self.map.contains_point(p))
            .map(|p| self.to_local(&p))
    }
}

/// A simulation that proposes where the robot should be next.
pub trait BehaviorModel: Send + fmt::Debug {
    /// Forget the simulated state.
    fn reset(&mut self);

    /// Simulation period in seconds.
    fn dt_sec(&self) -> f64;

    /// Advance one period.
    ///
    /// `robot` is the observed robot pose, `None` when it is unknown or
    /// deliberately hidden from the model; the model then continues from its
    /// own simulated pose.  Returns the new simulated robot pose, or `None`
    /// when the robot cannot be placed in the arena.
    fn step(&mut self, animals: &[ModelAgent], robot: Option<ModelAgent>, arena: &ModelArena<'_>) -> Option<ModelAgent>;
}

// ────────────────────────────────────────────────────────────────────────────
// ZoneModel
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneModelSettings {
    pub dt_sec: f64,
    pub repulsion_radius_m: f64,
    pub alignment_radius_m: f64,
    pub attraction_radius_m: f64,
    pub speed_m_s: f64,
    pub max_turn_rate_rad_s: f64,
    /// Steer away from occupied cells ahead instead of stopping at them.
    pub wall_aware: bool,
    pub wall_lookahead_m: f64,
}

impl Default for ZoneModelSettings {
    fn default() -> Self {
        Self {
            dt_sec: 0.1,
            repulsion_radius_m: 0.03,
            alignment_radius_m: 0.08,
            attraction_radius_m: 0.3,
            speed_m_s: 0.05,
            max_turn_rate_rad_s: PI,
            wall_aware: false,
            wall_lookahead_m: 0.04,
        }
    }
}

/// Zone-based collective motion for a single simulated robot.
///
/// # Example
///
/// ```rust
/// use etho_navigation::SpatialMap;
/// use etho_runtime::behavior_model::{BehaviorModel, ModelAgent, ModelArena, ZoneModel, ZoneModelSettings};
/// use etho_types::WorldPolygon;
///
/// let map = SpatialMap::new(
///     WorldPolygon::from_points(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]),
///     vec![],
///     0.02,
/// ).unwrap();
/// let mut model = ZoneModel::new(ZoneModelSettings::default());
/// let robot = ModelAgent::new(0.2, 0.5, 0.0);
/// let pose = model.step(&[], Some(robot), &ModelArena::new(&map)).unwrap();
/// assert!(pose.x > robot.x);
/// ```
#[derive(Debug, Clone)]
pub struct ZoneModel {
    settings: ZoneModelSettings,
    robot: Option<ModelAgent>,
}

impl ZoneModel {
    pub fn new(settings: ZoneModelSettings) -> Self {
        Self { settings, robot: None }
    }

    pub fn settings(&self) -> &ZoneModelSettings {
        &self.settings
    }

    /// Heading the zones ask for, `None` when no neighbour matters.
    fn desired_heading(&self, robot: &ModelAgent, animals: &[ModelAgent]) -> Option<f64> {
        let s = &self.settings;
        let (mut rx, mut ry) = (0.0, 0.0);
        let (mut ax, mut ay) = (0.0, 0.0);
        let (mut cx, mut cy) = (0.0, 0.0);
        let mut repelled = false;

        for animal in animals {
            let d = robot.distance_to(animal);
            if d < 1e-9 {
                continue;
            }
            let (ux, uy) = ((animal.x - robot.x) / d, (animal.y - robot.y) / d);
            if d < s.repulsion_radius_m {
                rx -= ux;
                ry -= uy;
                repelled = true;
            } else if d < s.alignment_radius_m {
                ax += animal.heading.cos();
                ay += animal.heading.sin();
            } else if d < s.attraction_radius_m {
                cx += ux;
                cy += uy;
            }
        }

        let (x, y) = if repelled {
            (rx, ry)
        } else {
            let align = unit(ax, ay);
            let attract = unit(cx, cy);
            (align.0 + attract.0, align.1 + attract.1)
        };
        (x.hypot(y) > 1e-9).then(|| y.atan2(x))
    }

    /// First heading around `heading` whose look-ahead point is free.
    fn steer_clear_of_walls(&self, robot: &ModelAgent, heading: f64, arena: &ModelArena<'_>) -> f64 {
        let reach = self.settings.wall_lookahead_m;
        for k in 0..=8 {
            for sign in [1.0, -1.0] {
                let candidate = heading + sign * k as f64 * FRAC_PI_8;
                if arena.is_free(robot.x + reach * candidate.cos(), robot.y + reach * candidate.sin()) {
                    return normalize_angle(candidate);
                }
            }
        }
        normalize_angle(heading + PI)
    }

    fn initial_pose(&self, animals: &[ModelAgent], arena: &ModelArena<'_>) -> Option<ModelAgent> {
        if !animals.is_empty() {
            let n = animals.len() as f64;
            let x = animals.iter().map(|a| a.x).sum::<f64>() / n;
            let y = animals.iter().map(|a| a.y).sum::<f64>() / n;
            if arena.is_free(x, y) {
                return Some(ModelAgent::new(x, y, 0.0));
            }
        }
        arena.any_free_point().map(|(x, y)| ModelAgent::new(x, y, 0.0))
    }
}

fn unit(x: f64, y: f64) -> (f64, f64) {
    let n = x.hypot(y);
    if n > 1e-9 { (x / n, y / n) } else { (0.0, 0.0) }
}

impl BehaviorModel for ZoneModel {
    fn reset(&mut self) {
        self.robot = None;
    }

    fn dt_sec(&self) -> f64 {
        self.settings.dt_sec
    }

    fn step(&mut self, animals: &[ModelAgent], robot: Option<ModelAgent>, arena: &ModelArena<'_>) -> Option<ModelAgent> {
        let current = match robot.or(self.robot) {
            Some(r) => r,
            None => self.initial_pose(animals, arena)?,
        };
        let s = &self.settings;
        let max_turn = s.max_turn_rate_rad_s * s.dt_sec;

        let desired = self.desired_heading(&current, animals).unwrap_or(current.heading);
        let turn = normalize_angle(desired - current.heading).clamp(-max_turn, max_turn);
        let mut heading = normalize_angle(current.heading + turn);
        if s.wall_aware {
            heading = self.steer_clear_of_walls(&current, heading, arena);
        }

        let travel = s.speed_m_s * s.dt_sec;
        let (nx, ny) = (current.x + travel * heading.cos(), current.y + travel * heading.sin());
        let next = if arena.is_free(nx, ny) {
            ModelAgent::new(nx, ny, heading)
        } else {
            // Blocked: turn in place and try again next period.
            ModelAgent::new(current.x, current.y, normalize_angle(heading + max_turn))
        };
        self.robot = Some(next);
        Some(next)
    }
}
