//! Run configuration – read from a TOML file, then `ETHO_*` overrides.
//!
//! The file is the first command-line argument, or `~/.etho/config.toml`.
//! Every section is optional.
//!
//! ```toml
//! track_db = "tracks.sqlite"
//!
//! [[robots]]
//! id = "robot_1"
//! color = "#ff8800"
//!
//! [control]
//! frequency_hz = 15.0
//!
//! [[sources]]
//! id = "overhead"
//! kinds = ["robot", "animal"]
//! required = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use etho_navigation::SpatialMapSettings;
use etho_perception::{FusionSettings, HubSettings};
use etho_runtime::{ControlLoopSettings, RobotControlSettings};
use etho_types::{AgentKind, RobotSettings};
use serde::{Deserialize, Serialize};

/// A tracker feeding the fusion hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub kinds: Vec<AgentKind>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Robots driven through simulated links.
    pub robots: Vec<RobotSettings>,
    pub sources: Vec<SourceConfig>,
    /// SQLite file receiving every complete fused frame.
    pub track_db: Option<PathBuf>,
    pub control: ControlLoopSettings,
    pub fusion: FusionSettings,
    pub hub: HubSettings,
    /// Arena occupancy grid; model-based modes and path planning need it.
    pub map: Option<SpatialMapSettings>,
    pub robot: RobotControlSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            robots: vec![RobotSettings {
                id: "robot_1".into(),
                color: String::new(),
                connection: String::new(),
            }],
            sources: vec![SourceConfig {
                id: "camera".into(),
                kinds: vec![AgentKind::Robot, AgentKind::Animal],
                required: true,
            }],
            track_db: None,
            control: ControlLoopSettings::default(),
            fusion: FusionSettings::default(),
            hub: HubSettings::default(),
            map: None,
            robot: RobotControlSettings::default(),
        }
    }
}

impl Config {
    /// Robot settings with the navigation frequency following the loop's.
    pub fn robot_settings(&self) -> RobotControlSettings {
        let mut settings = self.robot.clone();
        settings.navigation.control_frequency_hz = self.control.effective_frequency_hz();
        settings
    }
}

/// `~/.etho/config.toml`, falling back to the working directory without a
/// home directory.
pub fn default_config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".etho").join("config.toml")
}

/// `Ok(None)` when the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ETHO_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ETHO_CONTROL_FREQUENCY_HZ` | `control.frequency_hz` |
/// | `ETHO_TRACK_DB` | `track_db` |
/// | `ETHO_DEFAULT_KIND` | `fusion.default_kind` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("ETHO_CONTROL_FREQUENCY_HZ")
        && let Ok(hz) = v.trim().parse::<f64>()
    {
        cfg.control.frequency_hz = hz;
    }
    if let Some(v) = lookup("ETHO_TRACK_DB") {
        cfg.track_db = (!v.trim().is_empty()).then(|| PathBuf::from(v));
    }
    if let Some(v) = lookup("ETHO_DEFAULT_KIND")
        && let Ok(kind) = v.parse::<AgentKind>()
    {
        cfg.fusion.default_kind = kind;
    }
}
