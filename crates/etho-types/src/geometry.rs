//! Geometric primitives with explicit validity flags.
//!
//! Every position and orientation carries a `valid` bit instead of relying on
//! sentinel values.  Any computation that involves an invalid operand yields
//! an invalid result (or `None` for scalar results such as distances), so a
//! lost track never turns into a NaN or a bogus motor command further down
//! the pipeline.
//!
//! # Example
//!
//! ```rust
//! use etho_types::geometry::{PositionMeters, WorldPolygon};
//!
//! let square = WorldPolygon::from_points(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
//! assert!(square.contains_point(&PositionMeters::new(0.5, 0.5)));
//! assert!(!square.contains_point(&PositionMeters::invalid()));
//!
//! let a = PositionMeters::new(0.0, 0.0);
//! let b = PositionMeters::new(3.0, 4.0);
//! assert_eq!(a.distance_2d_to(&b), Some(5.0));
//! assert_eq!(a.distance_2d_to(&PositionMeters::invalid()), None);
//! ```

use std::f64::consts::PI;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// Two positions closer than this are considered the same place (metres).
pub const PROXIMITY_THRESHOLD_M: f64 = 0.02;

/// Normalize `angle` into the half-open interval (−π, π].
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI { wrapped + 2.0 * PI } else { wrapped }
}

// ────────────────────────────────────────────────────────────────────────────
// PositionMeters
// ────────────────────────────────────────────────────────────────────────────

/// A position in the world frame, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionMeters {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default = "valid_by_default")]
    pub valid: bool,
}

fn valid_by_default() -> bool {
    true
}

impl PositionMeters {
    /// A valid planar position.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0, valid: true }
    }

    /// A valid position with an explicit height.
    pub fn new_3d(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z, valid: true }
    }

    /// The invalid position.
    pub fn invalid() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, valid: false }
    }

    pub fn is_valid(&self) -> bool {
        self.valid && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Planar distance, `None` when either position is invalid.
    pub fn distance_2d_to(&self, other: &PositionMeters) -> Option<f64> {
        if self.is_valid() && other.is_valid() {
            Some((self.x - other.x).hypot(self.y - other.y))
        } else {
            None
        }
    }

    /// `true` when both positions are valid and within
    /// [`PROXIMITY_THRESHOLD_M`] of each other.
    pub fn close_to(&self, other: &PositionMeters) -> bool {
        self.close_to_within(other, PROXIMITY_THRESHOLD_M)
    }

    /// `true` when both positions are valid and strictly closer than
    /// `threshold_m`.
    pub fn close_to_within(&self, other: &PositionMeters, threshold_m: f64) -> bool {
        self.distance_2d_to(other).is_some_and(|d| d < threshold_m)
    }

    /// Direction from `self` towards `other`.
    pub fn bearing_to(&self, other: &PositionMeters) -> OrientationRad {
        if self.is_valid() && other.is_valid() {
            OrientationRad::new((other.y - self.y).atan2(other.x - self.x))
        } else {
            OrientationRad::invalid()
        }
    }

    /// Rotate this position about `center` by `angle_rad` (counter-clockwise
    /// positive).
    pub fn rotated_about(&self, center: &PositionMeters, angle_rad: f64) -> PositionMeters {
        if !self.is_valid() || !center.is_valid() {
            return PositionMeters::invalid();
        }
        let (sin, cos) = angle_rad.sin_cos();
        let dx = self.x - center.x;
        let dy = self.y - center.y;
        PositionMeters::new_3d(
            center.x + dx * cos - dy * sin,
            center.y + dx * sin + dy * cos,
            self.z,
        )
    }

    /// Mean of all valid positions; invalid when none is valid.
    pub fn centroid<'a>(positions: impl IntoIterator<Item = &'a PositionMeters>) -> PositionMeters {
        let (mut sx, mut sy, mut n) = (0.0, 0.0, 0usize);
        for p in positions.into_iter().filter(|p| p.is_valid()) {
            sx += p.x;
            sy += p.y;
            n += 1;
        }
        if n == 0 {
            PositionMeters::invalid()
        } else {
            PositionMeters::new(sx / n as f64, sy / n as f64)
        }
    }
}

impl Default for PositionMeters {
    fn default() -> Self {
        Self::invalid()
    }
}

impl Add for PositionMeters {
    type Output = PositionMeters;

    fn add(self, rhs: PositionMeters) -> PositionMeters {
        PositionMeters {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
            valid: self.is_valid() && rhs.is_valid(),
        }
    }
}

impl Sub for PositionMeters {
    type Output = PositionMeters;

    fn sub(self, rhs: PositionMeters) -> PositionMeters {
        PositionMeters {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
            valid: self.is_valid() && rhs.is_valid(),
        }
    }
}

impl std::fmt::Display for PositionMeters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "({:.3}, {:.3})", self.x, self.y)
        } else {
            write!(f, "(invalid)")
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OrientationRad
// ────────────────────────────────────────────────────────────────────────────

/// A heading in the world frame, counter-clockwise from +X, in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrientationRad {
    pub angle: f64,
    #[serde(default = "valid_by_default")]
    pub valid: bool,
}

impl OrientationRad {
    /// A valid orientation; the angle is normalized to (−π, π].
    pub fn new(angle: f64) -> Self {
        Self {
            angle: normalize_angle(angle),
            valid: angle.is_finite(),
        }
    }

    pub fn invalid() -> Self {
        Self { angle: 0.0, valid: false }
    }

    pub fn is_valid(&self) -> bool {
        self.valid && self.angle.is_finite()
    }

    /// The angle, `None` when invalid.
    pub fn angle_rad(&self) -> Option<f64> {
        self.is_valid().then_some(self.angle)
    }

    /// Absolute angular difference in [0, π], `None` when either side is
    /// invalid.
    pub fn difference_to(&self, other: &OrientationRad) -> Option<f64> {
        match (self.angle_rad(), other.angle_rad()) {
            (Some(a), Some(b)) => Some(normalize_angle(a - b).abs()),
            _ => None,
        }
    }
}

impl Default for OrientationRad {
    fn default() -> Self {
        Self::invalid()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// AgentState
// ────────────────────────────────────────────────────────────────────────────

/// Position and orientation of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentState {
    pub position: PositionMeters,
    #[serde(default)]
    pub orientation: OrientationRad,
}

impl AgentState {
    pub fn new(position: PositionMeters, orientation: OrientationRad) -> Self {
        Self { position, orientation }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// WorldPolygon
// ────────────────────────────────────────────────────────────────────────────

/// Axis-aligned bounding box of a polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

/// A closed polygon in world coordinates.
///
/// Deserializes from a list of `[x, y]` pairs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<[f64; 2]>", into = "Vec<[f64; 2]>")]
pub struct WorldPolygon {
    vertices: Vec<PositionMeters>,
}

impl WorldPolygon {
    pub fn new(vertices: Vec<PositionMeters>) -> Self {
        Self { vertices }
    }

    pub fn from_points(points: &[(f64, f64)]) -> Self {
        Self::new(points.iter().map(|&(x, y)| PositionMeters::new(x, y)).collect())
    }

    pub fn vertices(&self) -> &[PositionMeters] {
        &self.vertices
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.len() < 3
    }

    /// Even-odd containment test.  Invalid points are never contained.
    pub fn contains_point(&self, point: &PositionMeters) -> bool {
        if self.is_empty() || !point.is_valid() {
            return false;
        }
        let v = &self.vertices;
        let mut inside = false;
        let mut j = v.len() - 1;
        for i in 0..v.len() {
            let (xi, yi) = (v[i].x, v[i].y);
            let (xj, yj) = (v[j].x, v[j].y);
            if (yi > point.y) != (yj > point.y)
                && point.x < (xj - xi) * (point.y - yi) / (yj - yi) + xi
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Mean of the vertices; invalid for an empty polygon.
    pub fn centroid(&self) -> PositionMeters {
        PositionMeters::centroid(&self.vertices)
    }

    pub fn bounds(&self) -> Option<Bounds> {
        let first = self.vertices.first()?;
        let init = Bounds {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        Some(self.vertices.iter().fold(init, |b, p| Bounds {
            min_x: b.min_x.min(p.x),
            min_y: b.min_y.min(p.y),
            max_x: b.max_x.max(p.x),
            max_y: b.max_y.max(p.y),
        }))
    }
}

impl From<Vec<[f64; 2]>> for WorldPolygon {
    fn from(points: Vec<[f64; 2]>) -> Self {
        Self::new(points.into_iter().map(|[x, y]| PositionMeters::new(x, y)).collect())
    }
}

impl From<WorldPolygon> for Vec<[f64; 2]> {
    fn from(polygon: WorldPolygon) -> Self {
        polygon.vertices.into_iter().map(|p| [p.x, p.y]).collect()
    }
}
