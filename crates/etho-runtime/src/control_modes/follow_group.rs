//! Follow the centroid of the animal group.

use etho_types::{ControlTarget, PositionMeters};

use super::ControlContext;

#[derive(Debug, Clone, Default)]
pub struct FollowGroup {
    target: PositionMeters,
    status: String,
}

impl FollowGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self) -> PositionMeters {
        self.target
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn start(&mut self, ctx: &ControlContext<'_>) {
        self.target = group_centroid(ctx);
    }

    pub fn step(&mut self, ctx: &ControlContext<'_>) -> ControlTarget {
        let centroid = group_centroid(ctx);
        // A centroid outside the arena is tracking noise: keep the last one.
        let inside = match ctx.map {
            Some(map) => map.contains_point(&centroid),
            None => centroid.is_valid(),
        };
        if inside {
            self.target = centroid;
        }

        if !self.target.is_valid() {
            self.status = "target undefined".into();
            return ControlTarget::stop();
        }
        self.status = match ctx.robot.position.distance_2d_to(&self.target) {
            Some(d) => format!("group distance {d:.3} m"),
            None => "group distance unknown".into(),
        };
        ControlTarget::Position(self.target)
    }
}

fn group_centroid(ctx: &ControlContext<'_>) -> PositionMeters {
    PositionMeters::centroid(ctx.animals.iter().map(|a| &a.position))
}
