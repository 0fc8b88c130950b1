//! Operator control surface: owner-only bot commands for managing accounts
//! and forwarding rules.

pub mod command;
pub mod poller;
pub mod surface;

pub use command::{Command, Input, RuleSpec, parse};
pub use surface::ControlSurface;
