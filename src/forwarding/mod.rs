//! Forwarding core: classify each inbound event, resolve its destinations
//! from the owner's rules, and deliver through the relay identity.

pub mod classifier;
pub mod dispatcher;
pub mod notice;
pub mod rules;

pub use classifier::{Classification, ContentKind, classify};
pub use dispatcher::{DestinationOutcome, DispatchReport, ForwardingDispatcher};
pub use notice::{Notice, build_notice};
pub use rules::{Resolution, RuleEngine};
