//! `etho-memory` – experiment recording.
//!
//! Persists the fused world snapshots of a run to a local SQLite database so
//! trajectories can be analysed after the experiment.
//!
//! # Modules
//!
//! - [`track_store`] – [`TrackStore`][track_store::TrackStore]: SQLite sink
//!   for complete fused snapshots, with per-agent track queries.

pub mod track_store;

pub use track_store::{StoredFrame, TrackStore, TrackStoreError};
