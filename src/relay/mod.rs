//! The relay sender: the single shared identity that delivers notifications
//! and receives forwarded content.

pub mod telegram;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::model::ChatId;

pub use telegram::TelegramRelay;

/// Inline URL button attached under a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkButton {
    pub text: String,
    pub url: String,
}

#[async_trait]
pub trait RelaySender: Send + Sync {
    /// Chat id of the relay identity itself; forwards are sent here.
    fn identity(&self) -> ChatId;

    /// Send HTML text to `destination`, optionally with one link button.
    async fn send_text(
        &self,
        destination: ChatId,
        text: &str,
        button: Option<&LinkButton>,
    ) -> Result<(), RelayError>;
}
