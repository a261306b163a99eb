//! Identity matching between two agent lists.
//!
//! Two trackers may report the same physical agent.  Records are paired by a
//! weighted cost
//!
//! ```text
//! cost = distance_m + ORIENTATION_WEIGHT × |Δangle_rad|
//! ```
//!
//! where an invalid orientation on either side counts as
//! [`INVALID_ORIENTATION_PENALTY_RAD`].  A pair merges only when its cost is
//! strictly below [`WEIGHTED_THRESHOLD`].
//!
//! The assignment is exhaustive: every injective mapping from the shorter
//! list into the longer one is explored by backtracking, restricted to pairs
//! already under the threshold and pruned against the best total found so
//! far.  The worst case is O(n!/(n−k)!) for lists of n and k records, which
//! stays small for the group sizes tracked in an arena.
//!
//! # Example
//!
//! ```rust
//! use etho_perception::matching::merge_records;
//! use etho_types::{AgentKind, AgentRecord, AgentState, OrientationRad, PositionMeters};
//!
//! let at = |x: f64| AgentState::new(PositionMeters::new(x, 0.0), OrientationRad::new(0.0));
//! let primary = vec![AgentRecord::new("g1", AgentKind::Generic, at(0.10), 0)];
//! let other = vec![
//!     AgentRecord::new("r1", AgentKind::Robot, at(0.11), 0),
//!     AgentRecord::new("r2", AgentKind::Robot, at(0.50), 0),
//! ];
//! let merged = merge_records(&primary, &other);
//! assert_eq!(merged.len(), 2);
//! assert_eq!(merged[0].id, "r1");
//! ```

use std::f64::consts::PI;

use etho_types::AgentRecord;

/// Metres of cost per radian of heading difference (1 mm per degree).
pub const ORIENTATION_WEIGHT: f64 = 0.001 * 180.0 / PI;

/// Pairs with a cost at or above this value are distinct agents.
pub const WEIGHTED_THRESHOLD: f64 = 0.05;

/// Angular difference assumed when either orientation is unknown.
pub const INVALID_ORIENTATION_PENALTY_RAD: f64 = PI / 16.0;

/// Matching cost of two records, `None` when either position is invalid.
pub fn pair_cost(a: &AgentRecord, b: &AgentRecord) -> Option<f64> {
    let distance = a.state.position.distance_2d_to(&b.state.position)?;
    let dtheta = a
        .state
        .orientation
        .difference_to(&b.state.orientation)
        .unwrap_or(INVALID_ORIENTATION_PENALTY_RAD);
    Some(distance + ORIENTATION_WEIGHT * dtheta)
}

/// Optimal pairing of `short` into `long` (`short.len() <= long.len()`).
///
/// Returns, for every element of `short`, the index in `long` it merges with.
fn assign(short: &[AgentRecord], long: &[AgentRecord]) -> Vec<Option<usize>> {
    // Candidate partners per short record, cheapest first.
    let candidates: Vec<Vec<(usize, f64)>> = short
        .iter()
        .map(|s| {
            let mut c: Vec<(usize, f64)> = long
                .iter()
                .enumerate()
                .filter_map(|(j, l)| pair_cost(s, l).map(|cost| (j, cost)))
                .filter(|&(_, cost)| cost < WEIGHTED_THRESHOLD)
                .collect();
            c.sort_by(|a, b| a.1.total_cmp(&b.1));
            c
        })
        .collect();

    let mut search = Search {
        candidates: &candidates,
        used: vec![false; long.len()],
        current: vec![None; short.len()],
        best: vec![None; short.len()],
        best_cost: f64::INFINITY,
    };
    search.run(0, 0.0);
    search.best
}

/// Backtracking state.  An unmatched short record costs the threshold, so
/// the search prefers pairing whenever a pair is cheaper than leaving both
/// records apart.
struct Search<'a> {
    candidates: &'a [Vec<(usize, f64)>],
    used: Vec<bool>,
    current: Vec<Option<usize>>,
    best: Vec<Option<usize>>,
    best_cost: f64,
}

impl Search<'_> {
    fn run(&mut self, i: usize, cost: f64) {
        if cost >= self.best_cost {
            return;
        }
        if i == self.candidates.len() {
            self.best_cost = cost;
            self.best.clone_from(&self.current);
            return;
        }
        for &(j, pair) in &self.candidates[i] {
            if self.used[j] {
                continue;
            }
            self.used[j] = true;
            self.current[i] = Some(j);
            self.run(i + 1, cost + pair);
            self.used[j] = false;
            self.current[i] = None;
        }
        self.run(i + 1, cost + WEIGHTED_THRESHOLD);
    }
}

/// Merge `incoming` into `current`.
///
/// Matched pairs keep the record with the more specific kind at the
/// `current` position.  On equal kinds the `current` record survives, so
/// callers pass the primary source's list as `current` and the primary's
/// identity wins.  Swapping the arguments yields the same number of records
/// with the same kinds; only the ids of equal-kind duplicates follow the
/// first argument.  Unmatched records of both lists are kept unchanged,
/// `current` first.
pub fn merge_records(current: &[AgentRecord], incoming: &[AgentRecord]) -> Vec<AgentRecord> {
    // pairs[i] = index in `incoming` matched with current[i]
    let mut pairs = vec![None; current.len()];
    if current.len() <= incoming.len() {
        for (i, j) in assign(current, incoming).into_iter().enumerate() {
            pairs[i] = j;
        }
    } else {
        for (j, i) in assign(incoming, current).into_iter().enumerate() {
            if let Some(i) = i {
                pairs[i] = Some(j);
            }
        }
    }

    let mut taken = vec![false; incoming.len()];
    let mut merged: Vec<AgentRecord> = current
        .iter()
        .zip(&pairs)
        .map(|(c, pair)| match pair {
            Some(j) => {
                taken[*j] = true;
                let other = &incoming[*j];
                if other.kind.is_more_specific_than(c.kind) {
                    other.clone()
                } else {
                    c.clone()
                }
            }
            None => c.clone(),
        })
        .collect();
    merged.extend(
        incoming
            .iter()
            .zip(&taken)
            .filter(|(_, taken)| !**taken)
            .map(|(r, _)| r.clone()),
    );
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use etho_types::{AgentKind, AgentState, OrientationRad, PositionMeters};

    fn rec(id: &str, kind: AgentKind, x: f64, y: f64, angle: Option<f64>) -> AgentRecord {
        let orientation = angle.map(OrientationRad::new).unwrap_or_else(OrientationRad::invalid);
        AgentRecord::new(id, kind, AgentState::new(PositionMeters::new(x, y), orientation), 0)
    }

    fn ids(records: &[AgentRecord]) -> Vec<String> {
        let mut ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn cost_combines_distance_and_heading() {
        let a = rec("a", AgentKind::Robot, 0.0, 0.0, Some(0.0));
        let b = rec("b", AgentKind::Robot, 0.01, 0.0, Some(10f64.to_radians()));
        // 1 cm + 10 degrees at 1 mm per degree.
        assert!((pair_cost(&a, &b).unwrap() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn invalid_orientation_uses_penalty() {
        let a = rec("a", AgentKind::Robot, 0.0, 0.0, None);
        let b = rec("b", AgentKind::Robot, 0.0, 0.0, Some(1.0));
        let expected = ORIENTATION_WEIGHT * INVALID_ORIENTATION_PENALTY_RAD;
        assert!((pair_cost(&a, &b).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn invalid_position_is_unmatchable() {
        let mut a = rec("a", AgentKind::Robot, 0.0, 0.0, Some(0.0));
        a.state.position = PositionMeters::invalid();
        let b = rec("b", AgentKind::Animal, 0.0, 0.0, Some(0.0));
        assert!(pair_cost(&a, &b).is_none());
        assert_eq!(merge_records(&[a], &[b]).len(), 2);
    }

    #[test]
    fn exactly_at_threshold_is_not_merged() {
        let a = rec("a", AgentKind::Generic, 0.0, 0.0, Some(0.0));
        let at = rec("b", AgentKind::Robot, WEIGHTED_THRESHOLD, 0.0, Some(0.0));
        assert_eq!(merge_records(&[a.clone()], &[at]).len(), 2);

        let closer = rec("b", AgentKind::Robot, WEIGHTED_THRESHOLD - 0.001, 0.0, Some(0.0));
        let merged = merge_records(&[a], &[closer]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].kind, AgentKind::Robot);
    }

    #[test]
    fn tie_keeps_current_record() {
        let a = rec("primary", AgentKind::Robot, 0.0, 0.0, Some(0.0));
        let b = rec("secondary", AgentKind::Robot, 0.001, 0.0, Some(0.0));
        let merged = merge_records(&[a], &[b]);
        assert_eq!(ids(&merged), vec!["primary"]);
    }

    #[test]
    fn equal_kind_duplicates_merge_the_same_either_way() {
        let primary = vec![
            rec("robot_1", AgentKind::Robot, 0.2, 0.3, Some(0.0)),
            rec("fish_1", AgentKind::Animal, 0.6, 0.6, None),
        ];
        let secondary = vec![rec("ir_robot", AgentKind::Robot, 0.205, 0.3, Some(0.0))];

        let forward = merge_records(&primary, &secondary);
        let backward = merge_records(&secondary, &primary);
        let kinds = |records: &[AgentRecord]| {
            let mut kinds: Vec<AgentKind> = records.iter().map(|r| r.kind).collect();
            kinds.sort();
            kinds
        };
        assert_eq!(forward.len(), 2);
        assert_eq!(backward.len(), 2);
        assert_eq!(kinds(&forward), kinds(&backward));

        // The first argument keeps its identity.
        assert_eq!(ids(&forward), vec!["fish_1", "robot_1"]);
        assert_eq!(ids(&backward), vec!["fish_1", "ir_robot"]);
    }

    #[test]
    fn merging_with_itself_is_identity() {
        let list = vec![
            rec("r1", AgentKind::Robot, 0.1, 0.1, Some(0.3)),
            rec("a1", AgentKind::Animal, 0.4, 0.2, None),
            rec("a2", AgentKind::Animal, 0.6, 0.7, Some(-2.0)),
        ];
        assert_eq!(merge_records(&list, &list), list);
    }

    #[test]
    fn global_assignment_beats_greedy() {
        // Greedy would pair c0 with i0 (cost 0.01) and leave c1 unmatched,
        // while pairing c0-i1 and c1-i0 merges both.
        let current = vec![
            rec("c0", AgentKind::Generic, 0.0, 0.0, Some(0.0)),
            rec("c1", AgentKind::Generic, -0.04, 0.0, Some(0.0)),
        ];
        let incoming = vec![
            rec("i0", AgentKind::Robot, -0.01, 0.0, Some(0.0)),
            rec("i1", AgentKind::Robot, 0.02, 0.0, Some(0.0)),
        ];
        let merged = merge_records(&current, &incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(ids(&merged), vec!["i0", "i1"]);
    }

    #[test]
    fn matching_is_symmetric_in_argument_order() {
        let a = vec![
            rec("r1", AgentKind::Robot, 0.0, 0.0, Some(0.0)),
            rec("r2", AgentKind::Robot, 1.0, 1.0, Some(0.0)),
        ];
        let b = vec![
            rec("g1", AgentKind::Generic, 0.005, 0.0, Some(0.0)),
            rec("g2", AgentKind::Generic, 0.5, 0.5, Some(0.0)),
            rec("g3", AgentKind::Generic, 1.0, 1.01, Some(0.0)),
        ];
        assert_eq!(ids(&merge_records(&a, &b)), ids(&merge_records(&b, &a)));
        assert_eq!(ids(&merge_records(&a, &b)), vec!["g2", "r1", "r2"]);
    }

    #[test]
    fn unmatched_records_are_appended_in_order() {
        let current = vec![rec("c", AgentKind::Animal, 0.0, 0.0, None)];
        let incoming = vec![
            rec("x", AgentKind::Robot, 1.0, 0.0, None),
            rec("y", AgentKind::Robot, 2.0, 0.0, None),
        ];
        let merged = merge_records(&current, &incoming);
        let order: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec!["c", "x", "y"]);
    }
}
