//! `etho-middleware` – status routing
//!
//! Carries status notifications from the control stacks to whoever wants
//! them (CLI, loggers, recorders) without the emitters knowing who listens.
//!
//! # Modules
//!
//! - [`bus`] – topic-partitioned publish/subscribe event bus built on Tokio
//!   broadcast channels, plus the [`Notifier`] handle components publish
//!   through.

pub mod bus;

pub use bus::{EventBus, Notifier, Topic, TopicReceiver};
