//! Dominating set: the robot runs the model inside the first area it is seen
//! in and keeps tallying how the animals split between two rooms.

use etho_middleware::Notifier;
use etho_types::{ControlModeType, EthoError, EventPayload, MotionPatternType, RoomsStatistics, Timer};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::areas::{AreasOccupation, ControlAreaSettings, ControlAreas};
use super::{ControlData, ControlPayload};
use crate::control_modes::ControlContext;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DominatingSetSettings {
    pub areas: Vec<ControlAreaSettings>,
    /// The two rooms compared by the statistics.
    pub rooms: [String; 2],
    pub update_period_sec: f64,
}

impl Default for DominatingSetSettings {
    fn default() -> Self {
        Self {
            areas: Vec::new(),
            rooms: ["room_a".into(), "room_b".into()],
            update_period_sec: 1.0,
        }
    }
}

#[derive(Debug)]
pub struct DominatingSet {
    areas: ControlAreas,
    occupation: AreasOccupation,
    rooms: [String; 2],
    update_period_sec: f64,
    model_area: Option<String>,
    mask_pending: bool,
    animal_majority_sec: [f64; 2],
    robot_presence_sec: [f64; 2],
    tally_timer: Timer,
    notifier: Notifier,
    status: String,
}

impl DominatingSet {
    pub fn new(areas: ControlAreas, settings: &DominatingSetSettings, notifier: Notifier) -> Result<Self, EthoError> {
        if let Some(missing) = settings.rooms.iter().find(|id| !areas.contains_id(id)) {
            return Err(EthoError::config("dominating set", format!("unknown room '{missing}'")));
        }
        Ok(Self {
            areas,
            occupation: AreasOccupation::default(),
            rooms: settings.rooms.clone(),
            update_period_sec: settings.update_period_sec,
            model_area: None,
            mask_pending: false,
            animal_majority_sec: [0.0; 2],
            robot_presence_sec: [0.0; 2],
            tally_timer: Timer::new(),
            notifier,
            status: String::new(),
        })
    }

    pub fn areas(&self) -> &ControlAreas {
        &self.areas
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Area the model is limited to, once known.
    pub fn model_area(&self) -> Option<&str> {
        self.model_area.as_deref()
    }

    pub fn start(&mut self) {
        self.model_area = None;
        self.mask_pending = false;
        self.animal_majority_sec = [0.0; 2];
        self.robot_presence_sec = [0.0; 2];
        self.tally_timer.reset();
        self.status = "waiting for robot area".into();
    }

    pub fn finish(&mut self) {
        let s = self.statistics();
        info!(
            robot = self.notifier.source(),
            rooms = ?s.room_ids,
            animal_majority_sec = ?s.animal_majority_sec,
            robot_presence_sec = ?s.robot_presence_sec,
            "dominating set final statistics"
        );
    }

    pub fn step(&mut self, ctx: &ControlContext<'_>) -> ControlData {
        if self.occupation.update(&self.areas, &ctx.robot.position, ctx.animals) {
            self.notifier
                .notify(EventPayload::FishNumberByAreas(self.occupation.fish_number_by_area().clone()));
        }

        if self.model_area.is_none()
            && let Some(area) = self.occupation.robot_area()
        {
            info!(robot = self.notifier.source(), area, "model limited to the robot area");
            self.status = format!("model limited to {area}");
            self.model_area = Some(area.to_string());
            self.mask_pending = true;
        }

        if self.tally_timer.is_timed_out_sec(self.update_period_sec) {
            self.tally();
        }

        let Some(area) = self.model_area.as_deref().and_then(|id| self.areas.get(id)) else {
            return ControlData::default();
        };
        let data = ControlData::new(ControlModeType::ModelBased, MotionPatternType::Pid);
        if self.mask_pending {
            self.mask_pending = false;
            return data.with_payload(ControlPayload::AreaMask {
                mask_id: area.id().to_string(),
                polygons: area.polygons().to_vec(),
            });
        }
        data
    }

    fn tally(&mut self) {
        let elapsed = self.tally_timer.run_time_sec();
        self.tally_timer.reset();

        let [a, b] = [self.occupation.fish_in(&self.rooms[0]), self.occupation.fish_in(&self.rooms[1])];
        if a > b {
            self.animal_majority_sec[0] += elapsed;
        } else if b > a {
            self.animal_majority_sec[1] += elapsed;
        }
        for (i, room) in self.rooms.iter().enumerate() {
            if self.occupation.robot_area() == Some(room.as_str()) {
                self.robot_presence_sec[i] += elapsed;
            }
        }

        let statistics = self.statistics();
        debug!(robot = self.notifier.source(), ?statistics, "rooms tally");
        self.notifier.notify(EventPayload::RoomsStatistics(statistics));
    }

    pub fn statistics(&self) -> RoomsStatistics {
        RoomsStatistics {
            room_ids: self.rooms.clone(),
            animal_majority_sec: self.animal_majority_sec,
            robot_presence_sec: self.robot_presence_sec,
        }
    }
}
