//! Potential-field obstacle avoidance.
//!
//! The robot is pushed away from occupied arena cells and from peer robots
//! ahead of it, and pulled towards its waypoint.  The heading of the summed
//! force replaces the straight bearing to the waypoint when obstacle
//! avoidance is enabled.
//!
//! Repulsion from an obstacle at offset `Δ = robot − obstacle`, `d = |Δ|`:
//!
//! ```text
//! F_rep = ν · (1/d − 1/ρ₀) · Δ / d³     for d < ρ₀, else 0
//! ```
//!
//! Attraction towards a target at offset `Δ = target − robot`:
//!
//! ```text
//! F_att = ζ · Δ                      for d ≤ d*
//!       = d* · ζ · Δ / d             beyond
//! ```

use std::ops::{Add, AddAssign, Mul};
use std::sync::Arc;

use etho_types::{AgentState, OrientationRad, PositionMeters, normalize_angle};
use serde::{Deserialize, Serialize};

use crate::spatial_map::{CellStatus, GridNode, SpatialMap};

/// Tuning of the potential field, in metres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PotentialFieldParams {
    pub nu_arena: f64,
    pub rho0_arena: f64,
    pub nu_peer: f64,
    pub rho0_peer: f64,
    pub zeta: f64,
    pub d_goal_star: f64,
    pub max_force: f64,
    /// Half-angle of the cone in front of the robot where peers repel.
    pub max_angle_deg: f64,
    /// Side of the square cell neighbourhood scanned for arena obstacles.
    pub influence_cells: usize,
}

impl Default for PotentialFieldParams {
    fn default() -> Self {
        Self {
            nu_arena: 1e-4,
            rho0_arena: 0.1,
            nu_peer: 1e-3,
            rho0_peer: 0.3,
            zeta: 2.0,
            d_goal_star: 0.5,
            max_force: 1000.0,
            max_angle_deg: 60.0,
            influence_cells: 20,
        }
    }
}

/// A planar force.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Force2 {
    pub x: f64,
    pub y: f64,
}

impl Force2 {
    pub const ZERO: Force2 = Force2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn norm(&self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

impl Add for Force2 {
    type Output = Force2;

    fn add(self, rhs: Force2) -> Force2 {
        Force2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Force2 {
    fn add_assign(&mut self, rhs: Force2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Mul<f64> for Force2 {
    type Output = Force2;

    fn mul(self, k: f64) -> Force2 {
        Force2::new(self.x * k, self.y * k)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PotentialField
// ────────────────────────────────────────────────────────────────────────────

/// Force model over the unmasked arena grid.
#[derive(Debug, Clone)]
pub struct PotentialField {
    params: PotentialFieldParams,
    map: Arc<SpatialMap>,
}

impl PotentialField {
    pub fn new(map: Arc<SpatialMap>, params: PotentialFieldParams) -> Self {
        Self { params, map }
    }

    pub fn params(&self) -> &PotentialFieldParams {
        &self.params
    }

    pub fn set_params(&mut self, params: PotentialFieldParams) {
        self.params = params;
    }

    fn repulsion(robot: &PositionMeters, obstacle: &PositionMeters, nu: f64, rho0: f64) -> Force2 {
        let Some(d) = robot.distance_2d_to(obstacle) else {
            return Force2::ZERO;
        };
        if d >= rho0 || d <= f64::EPSILON {
            return Force2::ZERO;
        }
        let k = nu * (1.0 / d - 1.0 / rho0) / d.powi(3);
        Force2::new(k * (robot.x - obstacle.x), k * (robot.y - obstacle.y))
    }

    /// Repulsion from occupied cells around `robot`.
    pub fn arena_repulsion(&self, robot: &PositionMeters) -> Force2 {
        if !robot.is_valid() {
            return Force2::ZERO;
        }
        let centre = self.map.position_to_node(robot);
        let half = self.params.influence_cells / 2;
        let mut force = Force2::ZERO;
        for col in centre.col.saturating_sub(half)..=centre.col + half {
            for row in centre.row.saturating_sub(half)..=centre.row + half {
                if col >= self.map.cols() || row >= self.map.rows() {
                    continue;
                }
                let node = GridNode::new(col, row);
                if self.map.setup_cell_status(node) == CellStatus::Occupied {
                    let obstacle = self.map.node_to_position(node);
                    force += Self::repulsion(robot, &obstacle, self.params.nu_arena, self.params.rho0_arena);
                }
            }
        }
        force
    }

    /// Repulsion from peers inside the heading cone.  Without a valid
    /// heading every peer counts.
    pub fn peer_repulsion(&self, robot: &AgentState, peers: &[PositionMeters]) -> Force2 {
        let here = &robot.position;
        let heading = robot.orientation.angle_rad();
        let max_angle = self.params.max_angle_deg.to_radians();
        peers
            .iter()
            .filter(|peer| peer.is_valid())
            .filter(|peer| match heading {
                Some(h) => {
                    let bearing = (peer.y - here.y).atan2(peer.x - here.x);
                    normalize_angle(bearing - h).abs() < max_angle
                }
                None => true,
            })
            .fold(Force2::ZERO, |acc, peer| {
                acc + Self::repulsion(here, peer, self.params.nu_peer, self.params.rho0_peer)
            })
    }

    pub fn attraction(&self, robot: &PositionMeters, target: &PositionMeters) -> Force2 {
        let Some(d) = robot.distance_2d_to(target) else {
            return Force2::ZERO;
        };
        let delta = Force2::new(target.x - robot.x, target.y - robot.y);
        let p = &self.params;
        if d <= p.d_goal_star {
            delta * p.zeta
        } else {
            delta * (p.d_goal_star * p.zeta / d)
        }
    }

    /// Sum of all forces, rescaled to `max_force`.  Zero when the robot or
    /// the target position is invalid.
    pub fn total_force(&self, robot: &AgentState, peers: &[PositionMeters], target: &PositionMeters) -> Force2 {
        let here = robot.position;
        if !here.is_valid() || !target.is_valid() {
            return Force2::ZERO;
        }
        let total = self.peer_repulsion(robot, peers) + self.arena_repulsion(&here) + self.attraction(&here, target);
        let norm = total.norm();
        if norm > self.params.max_force {
            total * (self.params.max_force / norm)
        } else {
            total
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ObstacleAvoidance
// ────────────────────────────────────────────────────────────────────────────

/// Heading source for navigation with obstacle avoidance.
#[derive(Debug, Clone)]
pub struct ObstacleAvoidance {
    field: PotentialField,
}

impl ObstacleAvoidance {
    pub fn new(map: Arc<SpatialMap>, params: PotentialFieldParams) -> Self {
        Self {
            field: PotentialField::new(map, params),
        }
    }

    pub fn field(&self) -> &PotentialField {
        &self.field
    }

    /// Direction of the total force; invalid when the force vanishes.
    pub fn target_orientation(
        &self,
        robot: &AgentState,
        peers: &[PositionMeters],
        target: &PositionMeters,
    ) -> OrientationRad {
        let force = self.field.total_force(robot, peers, target);
        if force.is_zero() || !force.norm().is_finite() {
            OrientationRad::invalid()
        } else {
            OrientationRad::new(force.y.atan2(force.x))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etho_types::WorldPolygon;
    use std::f64::consts::FRAC_PI_2;

    fn open_map() -> Arc<SpatialMap> {
        let arena = WorldPolygon::from_points(&[(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0)]);
        Arc::new(SpatialMap::new(arena, vec![], 0.02).unwrap())
    }

    fn at(x: f64, y: f64, heading: f64) -> AgentState {
        AgentState::new(PositionMeters::new(x, y), OrientationRad::new(heading))
    }

    #[test]
    fn attraction_is_linear_then_saturates() {
        let field = PotentialField::new(open_map(), PotentialFieldParams::default());
        let robot = PositionMeters::new(1.0, 1.0);
        let near = field.attraction(&robot, &PositionMeters::new(1.2, 1.0));
        assert!((near.x - 0.4).abs() < 1e-9);
        let far = field.attraction(&robot, &PositionMeters::new(1.0, 1.9));
        // d* · ζ = 1.0 regardless of distance.
        assert!((far.norm() - 1.0).abs() < 1e-9);
        assert!(far.x.abs() < 1e-12);
    }

    #[test]
    fn centre_of_open_arena_feels_no_walls() {
        let field = PotentialField::new(open_map(), PotentialFieldParams::default());
        assert_eq!(field.arena_repulsion(&PositionMeters::new(1.0, 1.0)), Force2::ZERO);
    }

    #[test]
    fn wall_pushes_robot_inwards() {
        let open = PotentialField::new(open_map(), PotentialFieldParams::default());
        let map = SpatialMap::new(
            WorldPolygon::from_points(&[(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0)]),
            vec![WorldPolygon::from_points(&[(0.0, 0.0), (0.1, 0.0), (0.1, 2.0), (0.0, 2.0)])],
            0.02,
        )
        .unwrap();
        let walled = PotentialField::new(Arc::new(map), PotentialFieldParams::default());
        let force = walled.arena_repulsion(&PositionMeters::new(0.14, 1.0));
        assert!(force.x > 0.0);
        assert!(force.y.abs() < 1e-9);
        assert_eq!(open.arena_repulsion(&PositionMeters::new(0.14, 1.0)), Force2::ZERO);
    }

    #[test]
    fn only_peers_ahead_repel() {
        let field = PotentialField::new(open_map(), PotentialFieldParams::default());
        let robot = at(1.0, 1.0, 0.0);
        let ahead = field.peer_repulsion(&robot, &[PositionMeters::new(1.1, 1.0)]);
        assert!(ahead.x < 0.0);
        let behind = field.peer_repulsion(&robot, &[PositionMeters::new(0.9, 1.0)]);
        assert_eq!(behind, Force2::ZERO);
        let far = field.peer_repulsion(&robot, &[PositionMeters::new(1.5, 1.0)]);
        assert_eq!(far, Force2::ZERO);
    }

    #[test]
    fn total_force_is_clamped() {
        let params = PotentialFieldParams {
            max_force: 0.5,
            ..Default::default()
        };
        let field = PotentialField::new(open_map(), params);
        let force = field.total_force(&at(1.0, 1.0, 0.0), &[], &PositionMeters::new(1.0, 1.9));
        assert!((force.norm() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn free_path_heads_straight_to_target() {
        let avoidance = ObstacleAvoidance::new(open_map(), PotentialFieldParams::default());
        let heading = avoidance.target_orientation(&at(1.0, 1.0, 0.0), &[], &PositionMeters::new(1.0, 1.5));
        assert!((heading.angle_rad().unwrap() - FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn invalid_inputs_give_invalid_heading() {
        let avoidance = ObstacleAvoidance::new(open_map(), PotentialFieldParams::default());
        let robot = AgentState::new(PositionMeters::invalid(), OrientationRad::new(0.0));
        assert!(
            !avoidance
                .target_orientation(&robot, &[], &PositionMeters::new(1.0, 1.0))
                .is_valid()
        );
        assert!(
            !avoidance
                .target_orientation(&at(1.0, 1.0, 0.0), &[], &PositionMeters::invalid())
                .is_valid()
        );
    }
}
