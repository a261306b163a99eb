//! Grid path planning.
//!
//! [`DijkstraPlanner`] turns the free cells of a [`SpatialMap`] into an
//! undirected 8-connected graph (edge weight = Euclidean distance between
//! cell centres) and answers shortest-path queries.  [`PathPlanner`] wraps it
//! with the waypoint bookkeeping used by navigation: it replans only when the
//! goal moves and hands out the next waypoint each time the robot reaches the
//! current one.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use etho_middleware::Notifier;
use etho_types::{EventPayload, PositionMeters};
use tracing::debug;

use crate::spatial_map::{GridNode, SpatialMap};

// ────────────────────────────────────────────────────────────────────────────
// DijkstraPlanner
// ────────────────────────────────────────────────────────────────────────────

/// Shortest paths over the free cells of the setup grid.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use etho_navigation::path_planner::DijkstraPlanner;
/// use etho_navigation::spatial_map::SpatialMap;
/// use etho_types::{PositionMeters, WorldPolygon};
///
/// let arena = WorldPolygon::from_points(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
/// let planner = DijkstraPlanner::new(Arc::new(SpatialMap::new(arena, vec![], 0.1).unwrap()));
///
/// let path = planner.plan(&PositionMeters::new(0.1, 0.1), &PositionMeters::new(0.5, 0.5));
/// assert_eq!(path.len(), 5); // four diagonal steps
/// ```
#[derive(Debug, Clone)]
pub struct DijkstraPlanner {
    map: Arc<SpatialMap>,
    /// `edges[i]` = neighbours of node `i` (row-major) with their distances.
    edges: Vec<Vec<(usize, f64)>>,
}

#[derive(Debug, PartialEq)]
struct QueueEntry {
    cost: f64,
    node: usize,
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    // Reversed so that `BinaryHeap` pops the cheapest entry first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.cost.total_cmp(&self.cost).then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl DijkstraPlanner {
    pub fn new(map: Arc<SpatialMap>) -> Self {
        let (cols, rows) = (map.cols(), map.rows());
        let mut edges = vec![Vec::new(); cols * rows];
        let free = |col: usize, row: usize| map.setup_cell_status(GridNode::new(col, row)).is_free();

        let mut edge_count = 0usize;
        for row in 0..rows {
            for col in 0..cols {
                if !free(col, row) {
                    continue;
                }
                // Right, up, up-right and down-right cover every pair once.
                let mut neighbours = vec![(col + 1, row), (col, row + 1), (col + 1, row + 1)];
                if row > 0 {
                    neighbours.push((col + 1, row - 1));
                }
                for (c, r) in neighbours {
                    if c >= cols || r >= rows || !free(c, r) {
                        continue;
                    }
                    let a = row * cols + col;
                    let b = r * cols + c;
                    let w = map.cell_size() * ((c as f64 - col as f64).hypot(r as f64 - row as f64));
                    edges[a].push((b, w));
                    edges[b].push((a, w));
                    edge_count += 1;
                }
            }
        }
        debug!(nodes = cols * rows, edges = edge_count, "path planning graph built");
        Self { map, edges }
    }

    pub fn map(&self) -> &SpatialMap {
        &self.map
    }

    /// Cell centres from the cell of `start` to the cell of `goal`, both
    /// included.  Empty when either lies outside the free space or the goal
    /// cannot be reached.
    pub fn plan(&self, start: &PositionMeters, goal: &PositionMeters) -> VecDeque<PositionMeters> {
        if !self.map.setup_contains_point(start) || !self.map.setup_contains_point(goal) {
            debug!("start or goal outside of the free space, no path");
            return VecDeque::new();
        }
        let cols = self.map.cols();
        let node_index = |p: &PositionMeters| {
            let n = self.map.position_to_node(p);
            n.row * cols + n.col
        };
        let (source, target) = (node_index(start), node_index(goal));

        let mut distance = vec![f64::INFINITY; self.edges.len()];
        let mut previous: Vec<Option<usize>> = vec![None; self.edges.len()];
        let mut heap = BinaryHeap::new();
        distance[source] = 0.0;
        heap.push(QueueEntry { cost: 0.0, node: source });

        while let Some(QueueEntry { cost, node }) = heap.pop() {
            if node == target {
                break;
            }
            if cost > distance[node] {
                continue;
            }
            for &(next, w) in &self.edges[node] {
                let candidate = cost + w;
                if candidate < distance[next] {
                    distance[next] = candidate;
                    previous[next] = Some(node);
                    heap.push(QueueEntry {
                        cost: candidate,
                        node: next,
                    });
                }
            }
        }

        if !distance[target].is_finite() {
            debug!("goal unreachable");
            return VecDeque::new();
        }

        let mut path = VecDeque::new();
        let mut current = Some(target);
        while let Some(node) = current {
            path.push_front(self.map.node_to_position(GridNode::new(node % cols, node / cols)));
            current = previous[node];
        }
        debug!(waypoints = path.len(), length_m = distance[target], "path planned");
        path
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PathPlanner
// ────────────────────────────────────────────────────────────────────────────

/// Waypoint queue in front of a [`DijkstraPlanner`].
#[derive(Debug, Clone)]
pub struct PathPlanner {
    planner: DijkstraPlanner,
    notifier: Notifier,
    last_goal: PositionMeters,
    waypoints: VecDeque<PositionMeters>,
    current: PositionMeters,
}

impl PathPlanner {
    pub fn new(planner: DijkstraPlanner, notifier: Notifier) -> Self {
        Self {
            planner,
            notifier,
            last_goal: PositionMeters::invalid(),
            waypoints: VecDeque::new(),
            current: PositionMeters::invalid(),
        }
    }

    /// Remaining waypoints after the current one.
    pub fn trajectory(&self) -> &VecDeque<PositionMeters> {
        &self.waypoints
    }

    /// Where to head next on the way from `position` to `goal`.
    ///
    /// Replans when `goal` differs from the previous call.  Returns an
    /// invalid position when no path exists.
    pub fn current_waypoint(&mut self, position: &PositionMeters, goal: &PositionMeters) -> PositionMeters {
        if *goal != self.last_goal {
            self.last_goal = *goal;
            self.waypoints = self.planner.plan(position, goal);
            match self.waypoints.pop_front() {
                Some(first) => {
                    self.notify_trajectory(Some(first));
                    self.current = first;
                }
                None => {
                    self.clear_trajectory();
                    return PositionMeters::invalid();
                }
            }
        }

        if position.close_to(&self.current) {
            match self.waypoints.pop_front() {
                Some(next) => self.current = next,
                None => {
                    debug!("reached the end of the planned path");
                    self.clear_trajectory();
                }
            }
        }
        self.current
    }

    /// Forget the path; the next call replans even for the same goal.
    pub fn clear_trajectory(&mut self) {
        self.last_goal = PositionMeters::invalid();
        self.waypoints.clear();
        self.notify_trajectory(None);
    }

    fn notify_trajectory(&self, head: Option<PositionMeters>) {
        let points = head.into_iter().chain(self.waypoints.iter().copied()).collect();
        self.notifier.notify(EventPayload::TrajectoryChanged(points));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etho_middleware::{EventBus, Topic};
    use etho_types::WorldPolygon;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> WorldPolygon {
        WorldPolygon::from_points(&[(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
    }

    /// 1 m arena with a wall across the middle leaving a gap at the top.
    fn walled_planner() -> DijkstraPlanner {
        let wall = square(0.45, -0.1, 0.55, 0.75);
        DijkstraPlanner::new(Arc::new(SpatialMap::new(square(0.0, 0.0, 1.0, 1.0), vec![wall], 0.05).unwrap()))
    }

    #[test]
    fn straight_line_in_open_arena() {
        let planner = DijkstraPlanner::new(Arc::new(SpatialMap::new(square(0.0, 0.0, 1.0, 1.0), vec![], 0.1).unwrap()));
        let path = planner.plan(&PositionMeters::new(0.1, 0.5), &PositionMeters::new(0.6, 0.5));
        assert_eq!(path.len(), 6);
        assert!(path.iter().all(|p| (p.y - 0.5).abs() < 1e-9));
        assert!((path.back().unwrap().x - 0.6).abs() < 1e-9);
    }

    #[test]
    fn path_goes_around_wall() {
        let planner = walled_planner();
        let path = planner.plan(&PositionMeters::new(0.2, 0.2), &PositionMeters::new(0.8, 0.2));
        assert!(!path.is_empty());
        assert!(path.iter().all(|p| planner.map().setup_contains_point(p)));
        assert!(path.iter().any(|p| p.y > 0.7));
    }

    #[test]
    fn outside_points_give_empty_path() {
        let planner = walled_planner();
        assert!(planner.plan(&PositionMeters::new(-1.0, 0.2), &PositionMeters::new(0.8, 0.2)).is_empty());
        assert!(planner.plan(&PositionMeters::new(0.2, 0.2), &PositionMeters::new(0.5, 0.3)).is_empty());
        assert!(planner.plan(&PositionMeters::invalid(), &PositionMeters::new(0.8, 0.2)).is_empty());
    }

    #[test]
    fn unreachable_goal_gives_empty_path() {
        let wall = square(0.45, -0.1, 0.55, 1.1);
        let planner = DijkstraPlanner::new(Arc::new(
            SpatialMap::new(square(0.0, 0.0, 1.0, 1.0), vec![wall], 0.05).unwrap(),
        ));
        assert!(planner.plan(&PositionMeters::new(0.2, 0.2), &PositionMeters::new(0.8, 0.2)).is_empty());
    }

    #[test]
    fn waypoints_advance_and_replan_only_on_new_goal() {
        let bus = EventBus::default();
        let mut trajectories = bus.subscribe_to(Topic::Navigation);
        let mut planner = PathPlanner::new(walled_planner(), Notifier::new(bus, "robot_1"));
        let start = PositionMeters::new(0.2, 0.2);
        let goal = PositionMeters::new(0.8, 0.2);

        // The robot already stands on the first cell, so the second one is
        // handed out straight away.
        let first = planner.current_waypoint(&start, &goal);
        assert!(first.is_valid());
        assert!(!first.close_to(&start));
        let remaining = planner.trajectory().len();
        assert!(trajectories.try_recv().is_ok());

        // Standing on the first waypoint moves on to the second.
        let second = planner.current_waypoint(&first, &goal);
        assert_ne!(second, first);
        assert_eq!(planner.trajectory().len(), remaining - 1);
        // Same goal, no replanning.
        assert!(trajectories.try_recv().is_err());
    }

    #[test]
    fn failed_planning_returns_invalid_and_clears() {
        let mut planner = PathPlanner::new(walled_planner(), Notifier::detached("robot_1"));
        let waypoint = planner.current_waypoint(&PositionMeters::new(0.2, 0.2), &PositionMeters::new(5.0, 5.0));
        assert!(!waypoint.is_valid());
        assert!(planner.trajectory().is_empty());
    }
}
