//! `etho-navigation` – getting a robot from where it is to where it should be.
//!
//! # Modules
//!
//! - [`spatial_map`] – [`SpatialMap`][spatial_map::SpatialMap]: occupancy
//!   grid of the arena with cached area masks.
//! - [`potential_field`] – attractive/repulsive force model and
//!   [`ObstacleAvoidance`][potential_field::ObstacleAvoidance].
//! - [`path_planner`] – Dijkstra over the 8-connected free grid and the
//!   waypoint queue used while driving.
//! - [`navigation`] – [`Navigation`][navigation::Navigation]: PID and fish
//!   motion patterns, bounded by the kernel's state verifier.

pub mod navigation;
pub mod path_planner;
pub mod potential_field;
pub mod spatial_map;

pub use navigation::{FishMotionSettings, Navigation, NavigationContext, NavigationSettings};
pub use path_planner::{DijkstraPlanner, PathPlanner};
pub use potential_field::{Force2, ObstacleAvoidance, PotentialField, PotentialFieldParams};
pub use spatial_map::{CellStatus, GridNode, SpatialMap, SpatialMapSettings};
