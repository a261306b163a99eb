//! `etho-runtime` – per-robot control and the fixed-frequency loop.
//!
//! Everything that decides what a robot does on a control tick lives here;
//! fusion of the tracker streams is in `etho-perception` and motion
//! execution in `etho-navigation`.
//!
//! # Modules
//!
//! - [`control_modes`] – the control modes (idle, manual, go-straight,
//!   go-to-position, follow-group, trajectory and the model-based family)
//!   and the [`ControlModeStateMachine`] choosing between them.
//! - [`behavior_model`] – [`BehaviorModel`][behavior_model::BehaviorModel],
//!   the collective-behavior model run by the model-based modes, with the
//!   zone model as the built-in implementation.
//! - [`experiment`] – the experiment controllers (control map, circular
//!   setup, initiation leader/lure, dominating set) and the
//!   [`ExperimentManager`] holding the active one.
//! - [`robot_stack`] – [`RobotControlStack`]: safety, experiment manager,
//!   state machine and navigation for one robot.
//! - [`control_loop`] – [`ControlLoop`]: feeds the latest fused snapshot to
//!   every stack, applies operator [`LoopCommand`]s and steps at a fixed
//!   frequency.
//! - [`telemetry`] – [`init_tracing`]: the global `tracing` subscriber with
//!   optional OTLP span export.

pub mod behavior_model;
pub mod control_loop;
pub mod control_modes;
pub mod experiment;
pub mod robot_stack;
pub mod telemetry;

pub use control_loop::{ControlLoop, ControlLoopSettings, LoopCommand};
pub use control_modes::{ControlContext, ControlModeSettings, ControlModeStateMachine};
pub use experiment::{ExperimentManager, ExperimentSettings};
pub use robot_stack::{RobotControlSettings, RobotControlStack, RobotStatus};
pub use telemetry::{TelemetryConfig, TracerProviderGuard, init_tracing};
