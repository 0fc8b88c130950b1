//! Tele Relay — per-account message forwarding over a shared relay bot.

pub mod config;
pub mod control;
pub mod error;
pub mod forwarding;
pub mod model;
pub mod onboarding;
pub mod relay;
pub mod session;
pub mod store;
