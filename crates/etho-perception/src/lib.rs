//! `etho-perception` – multi-tracker fusion.
//!
//! Turns the asynchronous agent lists of several vision trackers into one
//! consistent world snapshot per frame.
//!
//! # Modules
//!
//! - [`matching`] – weighted identity matching between two agent lists.
//! - [`queue`] – bounded drop-oldest snapshot buffer with closest-timestamp
//!   lookup.
//! - [`fusion`] – [`SensorFusionEngine`][fusion::SensorFusionEngine]: primary
//!   source election, timestamp alignment and merging.
//! - [`hub`] – [`FusionHub`][hub::FusionHub]: non-blocking per-source inboxes,
//!   a single consumer task and a `watch` channel of the latest fused frame.

pub mod fusion;
pub mod hub;
pub mod matching;
pub mod queue;

pub use fusion::{FusedSnapshot, FusionSettings, SensorFusionEngine};
pub use hub::{FusedReceiver, FusionHub, HubSettings, SnapshotSink, SourceHandle};
