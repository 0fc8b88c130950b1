//! Account sessions: the transport boundary, the registry of running
//! sessions, and the lifecycle manager that supervises them.

pub mod event;
pub mod gateway;
pub mod manager;
pub mod registry;
pub mod transport;

pub use event::{Chat, ChatKind, InboundEvent, Payload, Sender};
pub use gateway::{GatewayAuthenticator, GatewayTransport};
pub use manager::{BatchReport, SessionManager};
pub use registry::{SessionHandle, SessionInfo, SessionRegistry};
pub use transport::{EventForwarder, EventHandler, SessionConnection, SessionContext, SessionTransport};
