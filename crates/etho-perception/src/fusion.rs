//! Sensor Fusion Engine.
//!
//! Merges the agent lists reported by several trackers into one
//! [`WorldSnapshot`] per primary frame.
//!
//! Each source declares which [`AgentKind`]s it can tell apart.  The source
//! with the richest capability set is the *primary*: its submissions drive
//! fusion, while every other source is buffered in a bounded FIFO.  When a
//! primary snapshot at time `T` arrives, the engine takes from every other
//! source the buffered snapshot closest to `T` within the tolerance and merges
//! it in through [`matching::merge_records`](crate::matching::merge_records).
//! A source without a match is skipped; the result is then *partial* when that
//! source was marked required.
//!
//! # Example
//!
//! ```rust
//! use etho_perception::fusion::{FusionSettings, SensorFusionEngine};
//! use etho_types::{AgentKind, AgentRecord, AgentState, OrientationRad, PositionMeters, WorldSnapshot};
//!
//! let mut engine = SensorFusionEngine::new(FusionSettings::default());
//! engine.add_source("overhead", [AgentKind::Robot, AgentKind::Animal]);
//! engine.add_source("robots_only", [AgentKind::Robot]);
//!
//! let state = AgentState::new(PositionMeters::new(0.3, 0.3), OrientationRad::new(0.0));
//! let robots = WorldSnapshot::new(995, vec![AgentRecord::new("r1", AgentKind::Robot, state, 995)]);
//! assert!(engine.submit("robots_only", robots).unwrap().is_none());
//!
//! let fused = engine.submit("overhead", WorldSnapshot::new(1_000, vec![])).unwrap().unwrap();
//! assert_eq!(fused.snapshot.len(), 1);
//! assert_eq!(fused.matched_sources, vec!["robots_only".to_string()]);
//! ```

use std::collections::BTreeSet;

use etho_types::{AgentKind, EthoError, WorldSnapshot};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::matching::merge_records;
use crate::queue::{DEFAULT_CAPACITY, SnapshotQueue};

// ────────────────────────────────────────────────────────────────────────────
// Settings and output
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    /// Maximum timestamp difference for two snapshots to be fused.
    pub tolerance_ms: u64,
    /// Snapshots buffered per non-primary source.
    pub buffer_capacity: usize,
    /// Kind given to agents no source could classify.
    pub default_kind: AgentKind,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            tolerance_ms: 100,
            buffer_capacity: DEFAULT_CAPACITY,
            default_kind: AgentKind::Animal,
        }
    }
}

/// One fused frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedSnapshot {
    pub snapshot: WorldSnapshot,
    /// Every required source contributed.
    pub complete: bool,
    /// Non-primary sources that contributed, in registration order.
    pub matched_sources: Vec<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// SensorFusionEngine
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Source {
    id: String,
    capabilities: BTreeSet<AgentKind>,
    required: bool,
    queue: SnapshotQueue,
}

impl Source {
    /// Ordering key of capability richness: specific kinds first, then
    /// generic ones.
    fn richness(&self) -> (usize, usize) {
        let specific = self
            .capabilities
            .iter()
            .filter(|k| k.specificity_rank() == 0)
            .count();
        let generic = self.capabilities.len() - specific;
        (specific, generic)
    }
}

/// Single-threaded fusion core.  Wrap it in a
/// [`FusionHub`](crate::hub::FusionHub) to feed it from concurrent sources.
#[derive(Debug, Default)]
pub struct SensorFusionEngine {
    settings: FusionSettings,
    sources: Vec<Source>,
    primary: Option<usize>,
}

impl SensorFusionEngine {
    pub fn new(settings: FusionSettings) -> Self {
        Self {
            settings,
            sources: Vec::new(),
            primary: None,
        }
    }

    pub fn settings(&self) -> &FusionSettings {
        &self.settings
    }

    /// Register a source, or update the capabilities of a known one.
    ///
    /// New sources are required by default.
    pub fn add_source(&mut self, source_id: impl Into<String>, capabilities: impl IntoIterator<Item = AgentKind>) {
        let source_id = source_id.into();
        let capabilities: BTreeSet<AgentKind> = capabilities.into_iter().collect();
        match self.sources.iter_mut().find(|s| s.id == source_id) {
            Some(existing) => existing.capabilities = capabilities,
            None => self.sources.push(Source {
                id: source_id.clone(),
                capabilities,
                required: true,
                queue: SnapshotQueue::new(self.settings.buffer_capacity),
            }),
        }
        info!(source = %source_id, "tracking source registered");
        let previous = self.primary().map(str::to_owned);
        self.elect_primary(previous);
    }

    /// Mark whether fusion is complete only when `source_id` contributed.
    pub fn set_required(&mut self, source_id: &str, required: bool) -> Result<(), EthoError> {
        let source = self
            .sources
            .iter_mut()
            .find(|s| s.id == source_id)
            .ok_or_else(|| EthoError::UnknownSource(source_id.to_string()))?;
        source.required = required;
        Ok(())
    }

    /// Detach a source; its buffered snapshots are dropped.
    pub fn remove_source(&mut self, source_id: &str) -> Result<(), EthoError> {
        let index = self
            .sources
            .iter()
            .position(|s| s.id == source_id)
            .ok_or_else(|| EthoError::UnknownSource(source_id.to_string()))?;
        let previous = self.primary().map(str::to_owned);
        self.primary = None;
        self.sources.remove(index);
        info!(source = %source_id, "tracking source detached");
        self.elect_primary(previous);
        Ok(())
    }

    pub fn primary(&self) -> Option<&str> {
        self.primary.map(|i| self.sources[i].id.as_str())
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.id.as_str())
    }

    /// Number of snapshots buffered for `source_id`.
    pub fn buffered(&self, source_id: &str) -> Option<usize> {
        self.sources.iter().find(|s| s.id == source_id).map(|s| s.queue.len())
    }

    fn elect_primary(&mut self, previous: Option<String>) {
        let mut best: Option<usize> = None;
        for (i, source) in self.sources.iter().enumerate() {
            // Strictly greater keeps the first registered on ties.
            if best.is_none_or(|b| source.richness() > self.sources[b].richness()) {
                best = Some(i);
            }
        }
        let changed = previous.as_deref() != best.map(|i| self.sources[i].id.as_str());
        self.primary = best;
        if changed {
            info!(primary = ?self.primary(), "primary tracking source elected");
        }
    }

    /// Feed one snapshot from `source_id`.
    ///
    /// Non-primary snapshots are buffered and yield `Ok(None)`; a primary
    /// snapshot yields the fused frame.
    pub fn submit(&mut self, source_id: &str, snapshot: WorldSnapshot) -> Result<Option<FusedSnapshot>, EthoError> {
        let index = self
            .sources
            .iter()
            .position(|s| s.id == source_id)
            .ok_or_else(|| EthoError::UnknownSource(source_id.to_string()))?;

        if Some(index) != self.primary {
            if self.sources[index].queue.push(snapshot) {
                debug!(source = %source_id, "source buffer full, oldest snapshot dropped");
            }
            return Ok(None);
        }

        Ok(Some(self.fuse(index, snapshot)))
    }

    fn fuse(&mut self, primary: usize, snapshot: WorldSnapshot) -> FusedSnapshot {
        let timestamp_ms = snapshot.timestamp_ms;
        let tolerance_ms = self.settings.tolerance_ms;
        let mut agents = snapshot.agents;
        let mut matched_sources = Vec::new();
        let mut complete = true;

        for (i, source) in self.sources.iter_mut().enumerate() {
            if i == primary {
                continue;
            }
            match source.queue.take_closest(timestamp_ms, tolerance_ms) {
                Some(other) => {
                    agents = merge_records(&agents, &other.agents);
                    matched_sources.push(source.id.clone());
                }
                None => {
                    if source.required {
                        complete = false;
                        warn!(source = %source.id, timestamp_ms, "no matching snapshot, fusing partially");
                    } else {
                        debug!(source = %source.id, timestamp_ms, "optional source skipped");
                    }
                }
            }
        }

        let default_kind = self.settings.default_kind;
        for agent in agents.iter_mut().filter(|a| a.kind == AgentKind::Generic) {
            agent.kind = default_kind;
        }

        FusedSnapshot {
            snapshot: WorldSnapshot::new(timestamp_ms, agents),
            complete,
            matched_sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etho_types::{AgentRecord, AgentState, OrientationRad, PositionMeters};

    fn rec(id: &str, kind: AgentKind, x: f64, y: f64) -> AgentRecord {
        AgentRecord::new(
            id,
            kind,
            AgentState::new(PositionMeters::new(x, y), OrientationRad::new(0.0)),
            0,
        )
    }

    fn snap(t: u64, agents: Vec<AgentRecord>) -> WorldSnapshot {
        WorldSnapshot::new(t, agents)
    }

    #[test]
    fn richest_source_becomes_primary() {
        let mut engine = SensorFusionEngine::new(FusionSettings::default());
        engine.add_source("generic_cam", [AgentKind::Generic]);
        assert_eq!(engine.primary(), Some("generic_cam"));
        engine.add_source("robots", [AgentKind::Robot]);
        assert_eq!(engine.primary(), Some("robots"));
        engine.add_source("fish", [AgentKind::Animal]);
        // Tie with "robots": first registered wins.
        assert_eq!(engine.primary(), Some("robots"));
        engine.add_source("both", [AgentKind::Robot, AgentKind::Animal]);
        assert_eq!(engine.primary(), Some("both"));
        engine.remove_source("both").unwrap();
        assert_eq!(engine.primary(), Some("robots"));
    }

    #[test]
    fn unknown_source_is_rejected() {
        let mut engine = SensorFusionEngine::new(FusionSettings::default());
        assert!(matches!(
            engine.submit("ghost", snap(0, vec![])),
            Err(EthoError::UnknownSource(_))
        ));
        assert!(engine.set_required("ghost", false).is_err());
        assert!(engine.remove_source("ghost").is_err());
    }

    #[test]
    fn primary_without_matches_is_returned_unchanged_and_partial() {
        let mut engine = SensorFusionEngine::new(FusionSettings::default());
        engine.add_source("main", [AgentKind::Robot, AgentKind::Animal]);
        engine.add_source("aux", [AgentKind::Robot]);
        let agents = vec![rec("a1", AgentKind::Animal, 0.1, 0.1), rec("r1", AgentKind::Robot, 0.5, 0.5)];
        let fused = engine.submit("main", snap(1000, agents.clone())).unwrap().unwrap();
        assert_eq!(fused.snapshot.agents, agents);
        assert!(!fused.complete);
        assert!(fused.matched_sources.is_empty());
    }

    #[test]
    fn optional_source_does_not_make_result_partial() {
        let mut engine = SensorFusionEngine::new(FusionSettings::default());
        engine.add_source("main", [AgentKind::Robot, AgentKind::Animal]);
        engine.add_source("aux", [AgentKind::Robot]);
        engine.set_required("aux", false).unwrap();
        let fused = engine.submit("main", snap(1000, vec![])).unwrap().unwrap();
        assert!(fused.complete);
    }

    #[test]
    fn fusing_identical_snapshots_is_idempotent() {
        let mut engine = SensorFusionEngine::new(FusionSettings::default());
        engine.add_source("main", [AgentKind::Robot, AgentKind::Animal]);
        engine.add_source("copy", [AgentKind::Robot]);
        let agents = vec![rec("r1", AgentKind::Robot, 0.2, 0.2), rec("a1", AgentKind::Animal, 0.6, 0.4)];
        engine.submit("copy", snap(1000, agents.clone())).unwrap();
        let fused = engine.submit("main", snap(1000, agents.clone())).unwrap().unwrap();
        assert_eq!(fused.snapshot.agents, agents);
        assert!(fused.complete);
    }

    #[test]
    fn generic_agents_get_default_kind() {
        let mut engine = SensorFusionEngine::new(FusionSettings::default());
        engine.add_source("blobs", [AgentKind::Generic]);
        let fused = engine
            .submit("blobs", snap(0, vec![rec("g1", AgentKind::Generic, 0.0, 0.0)]))
            .unwrap()
            .unwrap();
        assert_eq!(fused.snapshot.agents[0].kind, AgentKind::Animal);
    }

    #[test]
    fn stale_secondary_snapshots_are_not_used() {
        let mut engine = SensorFusionEngine::new(FusionSettings::default());
        engine.add_source("main", [AgentKind::Robot, AgentKind::Animal]);
        engine.add_source("aux", [AgentKind::Robot]);
        engine.submit("aux", snap(500, vec![rec("r9", AgentKind::Robot, 1.0, 1.0)])).unwrap();
        let fused = engine.submit("main", snap(1000, vec![])).unwrap().unwrap();
        assert!(fused.snapshot.is_empty());
        assert_eq!(engine.buffered("aux"), Some(0));
    }

    #[test]
    fn buffer_is_bounded() {
        let mut engine = SensorFusionEngine::new(FusionSettings {
            buffer_capacity: 3,
            ..FusionSettings::default()
        });
        engine.add_source("main", [AgentKind::Robot, AgentKind::Animal]);
        engine.add_source("aux", [AgentKind::Robot]);
        for t in 0..10 {
            engine.submit("aux", snap(t, vec![])).unwrap();
        }
        assert_eq!(engine.buffered("aux"), Some(3));
    }
}
