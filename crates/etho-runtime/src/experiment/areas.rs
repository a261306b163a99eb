//! Named regions of the setup and who occupies them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use etho_types::{AgentState, ControlModeType, EthoError, MotionPatternType, PositionMeters, WorldPolygon};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ControlAreaKind {
    Corridor,
    Room,
    #[default]
    Undefined,
}

impl FromStr for ControlAreaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "corridor" => Ok(ControlAreaKind::Corridor),
            "room" => Ok(ControlAreaKind::Room),
            "undefined" | "" => Ok(ControlAreaKind::Undefined),
            other => Err(format!("unknown control area kind '{other}'")),
        }
    }
}

impl fmt::Display for ControlAreaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControlAreaKind::Corridor => "corridor",
            ControlAreaKind::Room => "room",
            ControlAreaKind::Undefined => "undefined",
        })
    }
}

fn undefined_mode() -> ControlModeType {
    ControlModeType::Undefined
}

/// One entry of a control map as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlAreaSettings {
    pub id: String,
    #[serde(default)]
    pub kind: String,
    pub polygons: Vec<WorldPolygon>,
    #[serde(default)]
    pub color: [u8; 3],
    #[serde(default = "undefined_mode")]
    pub control_mode: ControlModeType,
    #[serde(default)]
    pub motion_pattern: MotionPatternType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlArea {
    id: String,
    kind: ControlAreaKind,
    polygons: Vec<WorldPolygon>,
    color: [u8; 3],
    control_mode: ControlModeType,
    motion_pattern: MotionPatternType,
    centroid: PositionMeters,
}

impl ControlArea {
    pub fn new(id: impl Into<String>, kind: ControlAreaKind, polygons: Vec<WorldPolygon>) -> Self {
        let centroid = polygons.first().map(WorldPolygon::centroid).unwrap_or_default();
        Self {
            id: id.into(),
            kind,
            polygons,
            color: [0, 0, 0],
            control_mode: ControlModeType::Undefined,
            motion_pattern: MotionPatternType::Undefined,
            centroid,
        }
    }

    pub fn from_settings(settings: &ControlAreaSettings) -> Result<Self, EthoError> {
        let kind = settings
            .kind
            .parse()
            .map_err(|e: String| EthoError::config(format!("control area '{}'", settings.id), e))?;
        if settings.polygons.iter().all(WorldPolygon::is_empty) {
            return Err(EthoError::config(
                format!("control area '{}'", settings.id),
                "needs at least one polygon with three vertices",
            ));
        }
        Ok(Self {
            color: settings.color,
            control_mode: settings.control_mode,
            motion_pattern: settings.motion_pattern,
            ..Self::new(settings.id.clone(), kind, settings.polygons.clone())
        })
    }

    pub fn with_control(mut self, mode: ControlModeType, pattern: MotionPatternType) -> Self {
        self.control_mode = mode;
        self.motion_pattern = pattern;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ControlAreaKind {
        self.kind
    }

    pub fn is_room(&self) -> bool {
        self.kind == ControlAreaKind::Room
    }

    pub fn polygons(&self) -> &[WorldPolygon] {
        &self.polygons
    }

    pub fn color(&self) -> [u8; 3] {
        self.color
    }

    pub fn control_mode(&self) -> ControlModeType {
        self.control_mode
    }

    pub fn motion_pattern(&self) -> MotionPatternType {
        self.motion_pattern
    }

    /// Centroid of the first polygon.
    pub fn centroid(&self) -> PositionMeters {
        self.centroid
    }

    pub fn contains(&self, point: &PositionMeters) -> bool {
        self.polygons.iter().any(|p| p.contains_point(point))
    }
}

/// Ordered set of areas with unique ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlAreas {
    areas: Vec<ControlArea>,
}

impl ControlAreas {
    pub fn new(areas: Vec<ControlArea>) -> Result<Self, EthoError> {
        for (i, area) in areas.iter().enumerate() {
            if areas[..i].iter().any(|a| a.id == area.id) {
                return Err(EthoError::config("control areas", format!("duplicate area id '{}'", area.id)));
            }
        }
        Ok(Self { areas })
    }

    pub fn from_settings(settings: &[ControlAreaSettings]) -> Result<Self, EthoError> {
        let areas = settings.iter().map(ControlArea::from_settings).collect::<Result<Vec<_>, _>>()?;
        Self::new(areas)
    }

    pub fn get(&self, id: &str) -> Option<&ControlArea> {
        self.areas.iter().find(|a| a.id == id)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// First area holding `point`.
    pub fn area_at(&self, point: &PositionMeters) -> Option<&ControlArea> {
        self.areas.iter().find(|a| a.contains(point))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ControlArea> {
        self.areas.iter()
    }

    pub fn as_slice(&self) -> &[ControlArea] {
        &self.areas
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }
}

/// Which area the robot is in, and how the animals are spread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AreasOccupation {
    robot_area: Option<String>,
    animal_area: Option<String>,
    fish_number_by_area: BTreeMap<String, usize>,
}

impl AreasOccupation {
    /// Recompute the occupation.  Returns `true` when the per-area animal
    /// counts changed.
    pub fn update(&mut self, areas: &ControlAreas, robot: &PositionMeters, animals: &[AgentState]) -> bool {
        self.robot_area = areas.area_at(robot).map(|a| a.id.clone());

        let mut counts: BTreeMap<String, usize> = areas.iter().map(|a| (a.id.clone(), 0)).collect();
        for animal in animals {
            if let Some(area) = areas.area_at(&animal.position)
                && let Some(n) = counts.get_mut(&area.id)
            {
                *n += 1;
            }
        }

        // Plurality; ties go to the area listed first.
        let mut best: Option<(&str, usize)> = None;
        for area in areas.iter() {
            let n = counts.get(&area.id).copied().unwrap_or(0);
            if n > 0 && best.is_none_or(|(_, b)| n > b) {
                best = Some((&area.id, n));
            }
        }
        self.animal_area = best.map(|(id, _)| id.to_string());

        let changed = counts != self.fish_number_by_area;
        self.fish_number_by_area = counts;
        changed
    }

    pub fn robot_area(&self) -> Option<&str> {
        self.robot_area.as_deref()
    }

    /// Area holding most animals.
    pub fn animal_area(&self) -> Option<&str> {
        self.animal_area.as_deref()
    }

    pub fn fish_number_by_area(&self) -> &BTreeMap<String, usize> {
        &self.fish_number_by_area
    }

    pub fn fish_in(&self, area_id: &str) -> usize {
        self.fish_number_by_area.get(area_id).copied().unwrap_or(0)
    }

    /// Animals in rooms other than `area_id`.
    pub fn fish_in_other_rooms(&self, areas: &ControlAreas, area_id: &str) -> usize {
        areas
            .iter()
            .filter(|a| a.is_room() && a.id != area_id)
            .map(|a| self.fish_in(&a.id))
            .sum()
    }
}
