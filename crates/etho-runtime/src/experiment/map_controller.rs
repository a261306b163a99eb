//! Control map: the area the robot stands in picks its behavior.

use etho_types::EthoError;
use serde::{Deserialize, Serialize};

use super::areas::{ControlAreaSettings, ControlAreas};
use super::ControlData;
use crate::control_modes::ControlContext;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlMapSettings {
    pub areas: Vec<ControlAreaSettings>,
}

#[derive(Debug, Clone)]
pub struct MapController {
    areas: ControlAreas,
    status: String,
}

impl MapController {
    pub fn new(areas: ControlAreas) -> Self {
        Self {
            areas,
            status: String::new(),
        }
    }

    pub fn from_settings(settings: &ControlMapSettings) -> Result<Self, EthoError> {
        Ok(Self::new(ControlAreas::from_settings(&settings.areas)?))
    }

    pub fn areas(&self) -> &ControlAreas {
        &self.areas
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Mode and pattern of the first area holding the robot; undefined
    /// outside every area.
    pub fn step(&mut self, ctx: &ControlContext<'_>) -> ControlData {
        match self.areas.area_at(&ctx.robot.position) {
            Some(area) => {
                self.status = format!("area {}", area.id());
                ControlData::new(area.control_mode(), area.motion_pattern())
            }
            None => {
                self.status = "outside control areas".into();
                ControlData::default()
            }
        }
    }
}
