//! Concurrent front end of the fusion engine.
//!
//! Trackers run on their own tasks or threads and hand snapshots to a
//! [`SourceHandle`].  Submitting never blocks: each source owns a bounded
//! inbox that drops its oldest entry when full, and a single consumer task
//! drains the inboxes (oldest timestamp first), feeds the
//! [`SensorFusionEngine`] and publishes every fused frame on a
//! [`tokio::sync::watch`] channel, where the latest value always wins.
//!
//! Complete frames also go to an optional [`SnapshotSink`].  Sinks do
//! blocking I/O, so they run on a blocking writer thread fed through a
//! channel; [`FusionHub::shutdown`] waits until every queued frame is stored.
//!
//! # Example
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use etho_perception::fusion::{FusionSettings, SensorFusionEngine};
//! use etho_perception::hub::{FusionHub, HubSettings};
//! use etho_types::{AgentKind, WorldSnapshot};
//!
//! let (mut hub, mut fused) = FusionHub::spawn(
//!     SensorFusionEngine::new(FusionSettings::default()),
//!     None,
//!     HubSettings::default(),
//! );
//! let camera = hub.register_source("camera", [AgentKind::Robot, AgentKind::Animal], true);
//! camera.submit(WorldSnapshot::new(40, vec![]));
//! fused.changed().await.unwrap();
//! assert_eq!(fused.borrow().as_ref().map(|f| f.snapshot.timestamp_ms), Some(40));
//! hub.shutdown().await;
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use etho_types::{AgentKind, EthoError, WorldSnapshot};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::fusion::{FusedSnapshot, SensorFusionEngine};

/// Latest fused frame, `None` until the first primary snapshot arrives.
pub type FusedReceiver = watch::Receiver<Option<Arc<FusedSnapshot>>>;

/// Destination of complete fused frames.
pub trait SnapshotSink: Send {
    fn store(&mut self, snapshot: &FusedSnapshot) -> Result<(), EthoError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Snapshots waiting per source before the oldest is dropped.
    pub inbox_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self { inbox_capacity: 32 }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Inbox {
    source_id: String,
    pending: VecDeque<WorldSnapshot>,
    detached: bool,
}

#[derive(Debug)]
struct Shared {
    engine: Mutex<SensorFusionEngine>,
    inboxes: Mutex<Vec<Inbox>>,
    wake: Notify,
    inbox_capacity: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    /// Remove the pending snapshot with the oldest timestamp, or the id of a
    /// detached source to unregister.
    fn next_work(&self) -> Option<Work> {
        let mut inboxes = lock(&self.inboxes);
        if let Some(i) = inboxes.iter().position(|b| b.detached) {
            let inbox = inboxes.remove(i);
            return Some(Work::Detach(inbox.source_id));
        }
        let (index, _) = inboxes
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.pending.front().map(|s| (i, s.timestamp_ms)))
            .min_by_key(|&(i, t)| (t, i))?;
        let inbox = &mut inboxes[index];
        let snapshot = inbox.pending.pop_front()?;
        Some(Work::Submit(inbox.source_id.clone(), snapshot))
    }
}

enum Work {
    Submit(String, WorldSnapshot),
    Detach(String),
}

// ────────────────────────────────────────────────────────────────────────────
// SourceHandle
// ────────────────────────────────────────────────────────────────────────────

/// Producer side of one tracking source.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct SourceHandle {
    source_id: String,
    shared: Arc<Shared>,
}

impl SourceHandle {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Queue a snapshot for fusion.  Never blocks on the consumer.
    pub fn submit(&self, snapshot: WorldSnapshot) {
        {
            let mut inboxes = lock(&self.shared.inboxes);
            let Some(inbox) = inboxes.iter_mut().find(|b| b.source_id == self.source_id && !b.detached) else {
                warn!(source = %self.source_id, "submit on a detached source ignored");
                return;
            };
            if inbox.pending.len() >= self.shared.inbox_capacity {
                inbox.pending.pop_front();
                debug!(source = %self.source_id, "inbox full, oldest snapshot dropped");
            }
            inbox.pending.push_back(snapshot);
        }
        self.shared.wake.notify_one();
    }

    /// Stop this source.  Pending snapshots are discarded and the engine
    /// keeps serving the remaining sources.
    pub fn detach(&self) {
        {
            let mut inboxes = lock(&self.shared.inboxes);
            for inbox in inboxes.iter_mut().filter(|b| b.source_id == self.source_id) {
                inbox.detached = true;
                inbox.pending.clear();
            }
        }
        self.shared.wake.notify_one();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FusionHub
// ────────────────────────────────────────────────────────────────────────────

/// Owner of the fusion consumer task.
pub struct FusionHub {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl FusionHub {
    /// Start the consumer task on the current Tokio runtime.
    pub fn spawn(
        engine: SensorFusionEngine,
        sink: Option<Box<dyn SnapshotSink>>,
        settings: HubSettings,
    ) -> (FusionHub, FusedReceiver) {
        let shared = Arc::new(Shared {
            engine: Mutex::new(engine),
            inboxes: Mutex::new(Vec::new()),
            wake: Notify::new(),
            inbox_capacity: settings.inbox_capacity.max(1),
        });
        let (fused_tx, fused_rx) = watch::channel(None);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (frames_tx, writer) = match sink {
            Some(sink) => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Some(tx), Some(tokio::task::spawn_blocking(move || store_frames(sink, rx))))
            }
            None => (None, None),
        };
        let task = tokio::spawn(consume(shared.clone(), frames_tx, fused_tx, shutdown_rx));
        let hub = FusionHub {
            shared,
            shutdown,
            task: Some(task),
            writer,
        };
        (hub, fused_rx)
    }

    /// Register a tracking source with the engine and open its inbox.
    pub fn register_source(
        &self,
        source_id: impl Into<String>,
        capabilities: impl IntoIterator<Item = AgentKind>,
        required: bool,
    ) -> SourceHandle {
        let source_id = source_id.into();
        {
            let mut engine = lock(&self.shared.engine);
            engine.add_source(source_id.clone(), capabilities);
            if let Err(e) = engine.set_required(&source_id, required) {
                warn!(source = %source_id, error = %e, "could not set source requirement");
            }
        }
        self.source(source_id)
    }

    /// Handle for an already registered source.
    pub fn source(&self, source_id: impl Into<String>) -> SourceHandle {
        let source_id = source_id.into();
        let mut inboxes = lock(&self.shared.inboxes);
        if !inboxes.iter().any(|b| b.source_id == source_id && !b.detached) {
            inboxes.push(Inbox {
                source_id: source_id.clone(),
                pending: VecDeque::new(),
                detached: false,
            });
        }
        SourceHandle {
            source_id,
            shared: self.shared.clone(),
        }
    }

    /// Id of the current primary source.
    pub fn primary(&self) -> Option<String> {
        lock(&self.shared.engine).primary().map(str::to_owned)
    }

    /// Stop the consumer task and flush the sink.  Calling it again is a
    /// no-op.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "fusion consumer ended abnormally");
            }
            info!("fusion hub stopped");
        }
        // The consumer owned the only sender, so the writer drains and ends.
        if let Some(writer) = self.writer.take()
            && let Err(e) = writer.await
        {
            warn!(error = %e, "snapshot writer ended abnormally");
        }
    }
}

fn store_frames(mut sink: Box<dyn SnapshotSink>, mut frames: mpsc::UnboundedReceiver<Arc<FusedSnapshot>>) {
    while let Some(frame) = frames.blocking_recv() {
        if let Err(e) = sink.store(&frame) {
            warn!(timestamp_ms = frame.snapshot.timestamp_ms, error = %e, "failed to persist fused snapshot");
        }
    }
    debug!("snapshot writer stopped");
}

async fn consume(
    shared: Arc<Shared>,
    frames: Option<mpsc::UnboundedSender<Arc<FusedSnapshot>>>,
    fused_tx: watch::Sender<Option<Arc<FusedSnapshot>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        while let Some(work) = shared.next_work() {
            match work {
                Work::Detach(source_id) => {
                    if let Err(e) = lock(&shared.engine).remove_source(&source_id) {
                        debug!(source = %source_id, error = %e, "detach of unknown source");
                    }
                }
                Work::Submit(source_id, snapshot) => {
                    let result = lock(&shared.engine).submit(&source_id, snapshot);
                    match result {
                        Ok(Some(fused)) => {
                            let fused = Arc::new(fused);
                            if fused.complete
                                && let Some(frames) = &frames
                                && frames.send(fused.clone()).is_err()
                            {
                                warn!("snapshot writer gone, frame not persisted");
                            }
                            fused_tx.send_replace(Some(fused));
                        }
                        Ok(None) => {}
                        Err(e) => warn!(source = %source_id, error = %e, "snapshot rejected"),
                    }
                }
            }
        }

        tokio::select! {
            _ = shared.wake.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
