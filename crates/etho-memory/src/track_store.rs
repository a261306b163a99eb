//! Track Store – SQLite-backed record of fused world snapshots.
//!
//! Every complete frame produced by the fusion hub is written as one row of
//! `frames` plus one row per agent in `agent_states`.  After a run the store
//! answers two questions: "what did the arena look like between t0 and t1"
//! ([`TrackStore::frames_between`]) and "where did agent X go"
//! ([`TrackStore::agent_track`]).
//!
//! # Example
//!
//! ```rust
//! use etho_memory::track_store::TrackStore;
//! use etho_perception::FusedSnapshot;
//! use etho_types::{AgentKind, AgentRecord, AgentState, OrientationRad, PositionMeters, WorldSnapshot};
//!
//! let mut store = TrackStore::open_in_memory().unwrap();
//! let state = AgentState::new(PositionMeters::new(0.3, 0.4), OrientationRad::new(0.0));
//! let frame = FusedSnapshot {
//!     snapshot: WorldSnapshot::new(1_000, vec![AgentRecord::new("fish_1", AgentKind::Animal, state, 1_000)]),
//!     complete: true,
//!     matched_sources: vec!["overhead".into()],
//! };
//! store.store_frame(&frame).unwrap();
//!
//! let track = store.agent_track("fish_1").unwrap();
//! assert_eq!(track.len(), 1);
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use etho_perception::{FusedSnapshot, SnapshotSink};
use etho_types::{AgentKind, AgentRecord, AgentState, EthoError, OrientationRad, PositionMeters, WorldSnapshot};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TrackStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt row in {table}: {details}")]
    CorruptRow { table: &'static str, details: String },
}

impl From<TrackStoreError> for EthoError {
    fn from(e: TrackStoreError) -> Self {
        EthoError::Storage(e.to_string())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// StoredFrame
// ────────────────────────────────────────────────────────────────────────────

/// One persisted fused frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFrame {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub matched_sources: Vec<String>,
    pub snapshot: WorldSnapshot,
}

// ────────────────────────────────────────────────────────────────────────────
// TrackStore
// ────────────────────────────────────────────────────────────────────────────

/// SQLite store of fused frames.
///
/// Incomplete frames are skipped when used as a [`SnapshotSink`]; callers
/// that want them anyway can use [`TrackStore::store_frame`] directly.
pub struct TrackStore {
    conn: Connection,
}

impl TrackStore {
    /// Open (or create) a store backed by a file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TrackStoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory store, mostly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, TrackStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), TrackStoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS frames (
                id              TEXT    PRIMARY KEY,
                timestamp_ms    INTEGER NOT NULL,
                recorded_at     TEXT    NOT NULL,
                matched_sources TEXT    NOT NULL
            );
            CREATE INDEX IF NOT EXISTS frames_by_time ON frames(timestamp_ms);
            CREATE TABLE IF NOT EXISTS agent_states (
                frame_id          TEXT    NOT NULL REFERENCES frames(id),
                position_in_frame INTEGER NOT NULL,
                agent_id          TEXT    NOT NULL,
                kind              TEXT    NOT NULL,
                timestamp_ms      INTEGER NOT NULL,
                x                 REAL    NOT NULL,
                y                 REAL    NOT NULL,
                z                 REAL    NOT NULL,
                position_valid    INTEGER NOT NULL,
                angle_rad         REAL    NOT NULL,
                angle_valid       INTEGER NOT NULL,
                PRIMARY KEY (frame_id, position_in_frame)
            );
            CREATE INDEX IF NOT EXISTS agent_states_by_agent ON agent_states(agent_id);",
        )?;
        Ok(())
    }

    /// Persist one frame with all of its agents in a single transaction.
    pub fn store_frame(&mut self, frame: &FusedSnapshot) -> Result<Uuid, TrackStoreError> {
        let id = Uuid::new_v4();
        let sources = serde_json::to_string(&frame.matched_sources)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO frames (id, timestamp_ms, recorded_at, matched_sources)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id.to_string(),
                frame.snapshot.timestamp_ms as i64,
                Utc::now().to_rfc3339(),
                sources,
            ],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO agent_states (frame_id, position_in_frame, agent_id, kind, timestamp_ms,
                                           x, y, z, position_valid, angle_rad, angle_valid)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for (i, agent) in frame.snapshot.agents.iter().enumerate() {
                let p = &agent.state.position;
                let o = &agent.state.orientation;
                insert.execute(params![
                    id.to_string(),
                    i as i64,
                    agent.id,
                    kind_str(agent.kind),
                    agent.timestamp_ms as i64,
                    p.x,
                    p.y,
                    p.z,
                    p.valid,
                    if o.valid { o.angle } else { 0.0 },
                    o.valid,
                ])?;
            }
        }
        tx.commit()?;
        debug!(frame_id = %id, agents = frame.snapshot.agents.len(), "stored fused frame");
        Ok(id)
    }

    pub fn frame_count(&self) -> Result<usize, TrackStoreError> {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM frames", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Fetch one frame by id.
    pub fn frame(&self, id: Uuid) -> Result<Option<StoredFrame>, TrackStoreError> {
        let header = self
            .conn
            .query_row(
                "SELECT id, timestamp_ms, recorded_at, matched_sources FROM frames WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        header.map(|h| self.assemble(h)).transpose()
    }

    /// Frames with `start_ms <= timestamp_ms <= end_ms`, oldest first.
    pub fn frames_between(&self, start_ms: u64, end_ms: u64) -> Result<Vec<StoredFrame>, TrackStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp_ms, recorded_at, matched_sources FROM frames
             WHERE timestamp_ms BETWEEN ?1 AND ?2
             ORDER BY timestamp_ms ASC, recorded_at ASC",
        )?;
        let headers = stmt
            .query_map(params![start_ms as i64, end_ms as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<Vec<(String, i64, String, String)>, _>>()?;
        headers.into_iter().map(|h| self.assemble(h)).collect()
    }

    /// Every recorded state of `agent_id`, ordered by frame timestamp.
    pub fn agent_track(&self, agent_id: &str) -> Result<Vec<(u64, AgentState)>, TrackStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT f.timestamp_ms, a.x, a.y, a.z, a.position_valid, a.angle_rad, a.angle_valid
             FROM agent_states a JOIN frames f ON f.id = a.frame_id
             WHERE a.agent_id = ?1
             ORDER BY f.timestamp_ms ASC",
        )?;
        let rows = stmt.query_map(params![agent_id], |row| {
            let ts: i64 = row.get(0)?;
            let state = state_from_columns(row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?);
            Ok((ts as u64, state))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn assemble(&self, header: (String, i64, String, String)) -> Result<StoredFrame, TrackStoreError> {
        let (id_str, timestamp_ms, recorded_at, sources) = header;
        let id = Uuid::parse_str(&id_str).map_err(|e| TrackStoreError::CorruptRow {
            table: "frames",
            details: e.to_string(),
        })?;
        let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
            .map_err(|e| TrackStoreError::CorruptRow {
                table: "frames",
                details: e.to_string(),
            })?
            .with_timezone(&Utc);
        let matched_sources: Vec<String> = serde_json::from_str(&sources)?;

        let mut stmt = self.conn.prepare(
            "SELECT agent_id, kind, timestamp_ms, x, y, z, position_valid, angle_rad, angle_valid
             FROM agent_states WHERE frame_id = ?1 ORDER BY position_in_frame ASC",
        )?;
        let rows = stmt
            .query_map(params![id_str], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    state_from_columns(row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?),
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut agents = Vec::with_capacity(rows.len());
        for (agent_id, kind, ts, state) in rows {
            let kind: AgentKind = kind.parse().map_err(|details| TrackStoreError::CorruptRow {
                table: "agent_states",
                details,
            })?;
            agents.push(AgentRecord::new(agent_id, kind, state, ts as u64));
        }

        Ok(StoredFrame {
            id,
            recorded_at,
            matched_sources,
            snapshot: WorldSnapshot::new(timestamp_ms as u64, agents),
        })
    }
}

impl SnapshotSink for TrackStore {
    fn store(&mut self, snapshot: &FusedSnapshot) -> Result<(), EthoError> {
        if !snapshot.complete {
            return Ok(());
        }
        self.store_frame(snapshot)?;
        Ok(())
    }
}

fn kind_str(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Robot => "robot",
        AgentKind::Animal => "animal",
        AgentKind::Generic => "generic",
        AgentKind::Undefined => "undefined",
    }
}

fn state_from_columns(x: f64, y: f64, z: f64, position_valid: bool, angle: f64, angle_valid: bool) -> AgentState {
    let position = PositionMeters {
        x,
        y,
        z,
        valid: position_valid,
    };
    let orientation = if angle_valid {
        OrientationRad::new(angle)
    } else {
        OrientationRad::invalid()
    };
    AgentState::new(position, orientation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, kind: AgentKind, x: f64, y: f64) -> AgentRecord {
        AgentRecord::new(id, kind, AgentState::new(PositionMeters::new(x, y), OrientationRad::new(0.5)), 0)
    }

    fn frame(ts: u64, agents: Vec<AgentRecord>, complete: bool) -> FusedSnapshot {
        FusedSnapshot {
            snapshot: WorldSnapshot::new(ts, agents),
            complete,
            matched_sources: vec!["overhead".into(), "robots".into()],
        }
    }

    #[test]
    fn stored_frame_round_trips() {
        let mut store = TrackStore::open_in_memory().unwrap();
        let mut blind = record("g1", AgentKind::Generic, 0.2, 0.2);
        blind.state.orientation = OrientationRad::invalid();
        let original = frame(500, vec![record("r1", AgentKind::Robot, 0.1, 0.2), blind], true);

        let id = store.store_frame(&original).unwrap();
        let loaded = store.frame(id).unwrap().unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.matched_sources, original.matched_sources);
        assert_eq!(loaded.snapshot, original.snapshot);
    }

    #[test]
    fn unknown_frame_is_none() {
        let store = TrackStore::open_in_memory().unwrap();
        assert!(store.frame(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn sink_skips_incomplete_frames() {
        let mut store = TrackStore::open_in_memory().unwrap();
        SnapshotSink::store(&mut store, &frame(1, vec![], false)).unwrap();
        assert_eq!(store.frame_count().unwrap(), 0);
        SnapshotSink::store(&mut store, &frame(2, vec![], true)).unwrap();
        assert_eq!(store.frame_count().unwrap(), 1);
    }

    #[test]
    fn frames_between_is_inclusive_and_ordered() {
        let mut store = TrackStore::open_in_memory().unwrap();
        for ts in [300, 100, 200, 400] {
            store.store_frame(&frame(ts, vec![], true)).unwrap();
        }
        let stamps: Vec<u64> = store
            .frames_between(100, 300)
            .unwrap()
            .iter()
            .map(|f| f.snapshot.timestamp_ms)
            .collect();
        assert_eq!(stamps, vec![100, 200, 300]);
    }

    #[test]
    fn agent_track_follows_one_agent() {
        let mut store = TrackStore::open_in_memory().unwrap();
        store
            .store_frame(&frame(20, vec![record("fish", AgentKind::Animal, 0.2, 0.0)], true))
            .unwrap();
        store
            .store_frame(&frame(
                10,
                vec![record("robot", AgentKind::Robot, 0.5, 0.5), record("fish", AgentKind::Animal, 0.1, 0.0)],
                true,
            ))
            .unwrap();

        let track = store.agent_track("fish").unwrap();
        assert_eq!(track.len(), 2);
        assert_eq!(track[0].0, 10);
        assert!((track[0].1.position.x - 0.1).abs() < 1e-9);
        assert!((track[1].1.position.x - 0.2).abs() < 1e-9);
        assert!(store.agent_track("nobody").unwrap().is_empty());
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracks.db");
        {
            let mut store = TrackStore::open(&path).unwrap();
            store.store_frame(&frame(7, vec![], true)).unwrap();
        }
        let store = TrackStore::open(&path).unwrap();
        assert_eq!(store.frame_count().unwrap(), 1);
    }
}
