//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others, and a slow subscriber never stalls the control loop.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::ControlStatus`] | mode / controller changes and their status strings |
//! | [`Topic::Navigation`] | motion pattern, target, trajectory and planner flags |
//! | [`Topic::Safety`] | obstacle and power-down alerts, connection changes |
//! | [`Topic::Statistics`] | per-area counts and experiment statistics |

use etho_types::{EthoError, Event, EventPayload};
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    ControlStatus,
    Navigation,
    Safety,
    Statistics,
}

impl Topic {
    pub const ALL: [Topic; 4] = [Topic::ControlStatus, Topic::Navigation, Topic::Safety, Topic::Statistics];

    /// The lane a payload is routed to.
    pub fn of(payload: &EventPayload) -> Topic {
        use EventPayload::*;
        match payload {
            ControlModeChanged(_)
            | ControlModeStatus(_)
            | ControllerChanged(_)
            | ControllerStatus(_)
            | InManualMode
            | SelectedRobotChanged(_) => Topic::ControlStatus,
            MotionPatternChanged(_)
            | MotionPatternFrequencyDividerChanged { .. }
            | UsePathPlanningChanged(_)
            | UseObstacleAvoidanceChanged(_)
            | TargetPositionChanged(_)
            | TrajectoryChanged(_) => Topic::Navigation,
            ObstacleDetectedChanged(_) | ConnectionStatusChanged(_) | SafetyStop { .. } => Topic::Safety,
            FishNumberByAreas(_)
            | CircularSetupTurningDirections { .. }
            | CircularSetupStatistics(_)
            | RoomsStatistics(_) => Topic::Statistics,
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    control_status: broadcast::Sender<Event>,
    navigation: broadcast::Sender<Event>,
    safety: broadcast::Sender<Event>,
    statistics: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (control_status, _) = broadcast::channel(capacity);
        let (navigation, _) = broadcast::channel(capacity);
        let (safety, _) = broadcast::channel(capacity);
        let (statistics, _) = broadcast::channel(capacity);
        Self {
            control_status,
            navigation,
            safety,
            statistics,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`EthoError::Channel`] when nobody listens on the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, EthoError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| EthoError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Publish `event` on the lane its payload belongs to.
    pub fn publish(&self, event: Event) -> Result<usize, EthoError> {
        self.publish_to(Topic::of(&event.payload), event)
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::ControlStatus => &self.control_status,
            Topic::Navigation => &self.navigation,
            Topic::Safety => &self.safety,
            Topic::Statistics => &self.statistics,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TopicReceiver
// ────────────────────────────────────────────────────────────────────────────

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// `Err(Lagged(n))` means the subscriber fell behind and `n` events were
    /// dropped; `Err(Closed)` means the bus is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Notifier
// ────────────────────────────────────────────────────────────────────────────

/// A bus handle stamped with the id of the component that emits through it.
///
/// Notifications are fire-and-forget: a topic nobody listens on is normal.
#[derive(Clone, Debug)]
pub struct Notifier {
    bus: EventBus,
    source: String,
}

impl Notifier {
    pub fn new(bus: EventBus, source: impl Into<String>) -> Self {
        Self {
            bus,
            source: source.into(),
        }
    }

    /// A notifier on a private bus nobody listens to.
    pub fn detached(source: impl Into<String>) -> Self {
        Self::new(EventBus::new(16), source)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn notify(&self, payload: EventPayload) {
        let topic = Topic::of(&payload);
        if let Err(e) = self.bus.publish_to(topic, Event::new(self.source.clone(), payload)) {
            trace!(source = %self.source, error = %e, "notification dropped");
        }
    }
}
