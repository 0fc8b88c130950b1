//! Session transport boundary.
//!
//! A transport opens one authenticated connection per account. The lifecycle
//! manager hands each connection an [`EventHandler`] at creation time; the
//! connection calls it once per relevant inbound event, one event at a time.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::watch;

use crate::error::SessionError;
use crate::model::{AccountId, ChatId};
use crate::session::event::InboundEvent;

/// Opens authenticated sessions.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Connect and authenticate `account_id` with its stored credential.
    ///
    /// Bad credentials yield [`SessionError::Auth`]; network problems yield
    /// [`SessionError::Transport`].
    async fn connect(
        &self,
        account_id: AccountId,
        credential: &SecretString,
    ) -> Result<Box<dyn SessionConnection>, SessionError>;
}

/// Re-emits an event's original content to another identity.
#[async_trait]
pub trait EventForwarder: Send + Sync {
    async fn forward_event(&self, event: &InboundEvent, to: ChatId) -> Result<(), SessionError>;
}

/// A live, authenticated session.
#[async_trait]
pub trait SessionConnection: EventForwarder {
    fn account_id(&self) -> AccountId;

    /// Attach the event subscriber. A connection accepts exactly one.
    fn subscribe(&self, handler: Arc<dyn EventHandler>) -> Result<(), SessionError>;

    /// Stop delivering events, let the in-flight one finish (bounded), and
    /// close the connection. Calling it again is a no-op.
    async fn disconnect(&self) -> Result<(), SessionError>;

    /// Flips to `true` when the connection drops without `disconnect`
    /// having been called.
    fn lost(&self) -> watch::Receiver<bool>;
}

/// What a handler gets alongside each event.
#[derive(Clone, Copy)]
pub struct SessionContext<'a> {
    /// Account whose session observed the event.
    pub account_id: AccountId,
    /// That session's own forward capability.
    pub forwarder: &'a dyn EventForwarder,
}

/// Receives inbound events from a session.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, ctx: SessionContext<'_>, event: InboundEvent);
}
