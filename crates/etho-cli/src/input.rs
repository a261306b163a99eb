//! JSON-lines operator input.
//!
//! Each stdin line is either a tracker frame
//!
//! ```json
//! {"source": "camera", "timestamp_ms": 1000, "agents": [ ... ]}
//! ```
//!
//! or a control-loop command such as `{"command": "select_robot", "robot": "robot_1"}`.
//! Blank lines and lines starting with `#` are skipped.

use etho_runtime::LoopCommand;
use etho_types::WorldSnapshot;
use serde::Deserialize;

/// One frame of a tracking source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Detection {
    pub source: String,
    #[serde(flatten)]
    pub snapshot: WorldSnapshot,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InputLine {
    Command(LoopCommand),
    Detection(Detection),
}

pub fn parse_line(line: &str) -> Result<Option<InputLine>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}
