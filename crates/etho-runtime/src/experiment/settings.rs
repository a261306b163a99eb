//! Per-robot experiment configuration.  A controller is available only when
//! its section is present.

use serde::{Deserialize, Serialize};

use super::circular::CircularSetupSettings;
use super::dominating_set::DominatingSetSettings;
use super::initiation_leader::InitiationLeaderSettings;
use super::initiation_lure::InitiationLureSettings;
use super::map_controller::ControlMapSettings;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentSettings {
    pub control_map: Option<ControlMapSettings>,
    /// Shared by the circular setup follower and leader.
    pub circular_setup: Option<CircularSetupSettings>,
    pub initiation_leader: Option<InitiationLeaderSettings>,
    pub initiation_lure: Option<InitiationLureSettings>,
    pub dominating_set: Option<DominatingSetSettings>,
}
