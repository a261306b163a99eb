//! `etho-hal` – robot hardware abstraction
//!
//! # Modules
//!
//! - [`robot_link`] – the [`RobotLink`] trait every robot transport
//!   implements: motor commands out, safety signals in.
//! - [`sim`] – [`SimRobotLink`], an in-process link with a shared probe for
//!   tests and headless runs.
//! - [`pid`] – heading PID controller with a sliding integral window.

pub mod pid;
pub mod robot_link;
pub mod sim;

pub use pid::{PidController, PidGains};
pub use robot_link::{LocalAvoidance, RobotLink, RobotSignals};
pub use sim::{SimProbe, SimRobotLink};
