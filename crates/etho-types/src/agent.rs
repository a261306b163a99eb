//! Tracked agents and per-tick world snapshots.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::geometry::AgentState;

/// What a tracked entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// A robot driven by this control core.
    Robot,
    /// A tracked animal.
    Animal,
    /// Detected by a tracker that cannot tell robots from animals.
    Generic,
    #[default]
    Undefined,
}

impl AgentKind {
    /// Lower rank means a more specific kind.
    pub fn specificity_rank(self) -> u8 {
        match self {
            AgentKind::Robot | AgentKind::Animal => 0,
            AgentKind::Generic => 1,
            AgentKind::Undefined => 2,
        }
    }

    pub fn is_more_specific_than(self, other: AgentKind) -> bool {
        self.specificity_rank() < other.specificity_rank()
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "robot" | "casu" => Ok(AgentKind::Robot),
            "animal" | "fish" => Ok(AgentKind::Animal),
            "generic" => Ok(AgentKind::Generic),
            "undefined" => Ok(AgentKind::Undefined),
            other => Err(format!("unknown agent kind '{other}'")),
        }
    }
}

/// One detection of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub kind: AgentKind,
    pub state: AgentState,
    /// Milliseconds since the tracker's epoch.
    #[serde(default)]
    pub timestamp_ms: u64,
}

impl AgentRecord {
    pub fn new(id: impl Into<String>, kind: AgentKind, state: AgentState, timestamp_ms: u64) -> Self {
        Self {
            id: id.into(),
            kind,
            state,
            timestamp_ms,
        }
    }
}

/// Ordered agent records sharing one logical timestamp.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub timestamp_ms: u64,
    pub agents: Vec<AgentRecord>,
}

impl WorldSnapshot {
    pub fn new(timestamp_ms: u64, agents: Vec<AgentRecord>) -> Self {
        Self { timestamp_ms, agents }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Records of the given kind, in snapshot order.
    pub fn of_kind(&self, kind: AgentKind) -> impl Iterator<Item = &AgentRecord> {
        self.agents.iter().filter(move |a| a.kind == kind)
    }
}
