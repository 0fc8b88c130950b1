//! Inbound events delivered by a live session.

use serde::{Deserialize, Serialize};

use crate::model::ChatId;

/// Kind of chat an event originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    /// One-to-one conversation.
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    /// Group or supergroup.
    pub fn is_group(self) -> bool {
        matches!(self, Self::Group | Self::Supergroup)
    }
}

/// Origin chat of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub kind: ChatKind,
    #[serde(default)]
    pub title: Option<String>,
}

/// Who sent the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
}

impl Sender {
    /// First name, falling back to username, then the numeric id.
    pub fn display_name(&self) -> String {
        self.first_name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Text {
        text: String,
    },
    Photo {
        #[serde(default)]
        caption: Option<String>,
    },
    Video {
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        caption: Option<String>,
    },
    VideoNote,
    Document {
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        caption: Option<String>,
    },
    Audio {
        #[serde(default)]
        file_name: Option<String>,
    },
    Voice,
    Sticker {
        #[serde(default)]
        emoji: Option<String>,
    },
    Animation {
        #[serde(default)]
        file_name: Option<String>,
    },
    Contact {
        #[serde(default)]
        first_name: Option<String>,
        #[serde(default)]
        phone_number: Option<String>,
    },
    Location {
        longitude: f64,
        latitude: f64,
    },
    Venue {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        address: Option<String>,
    },
    /// Anything the gateway reports that this crate does not model.
    #[serde(other)]
    Unknown,
}

impl Payload {
    /// Text body, else caption, if any.
    pub fn excerpt(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text.as_str()),
            Self::Photo { caption }
            | Self::Video { caption, .. }
            | Self::Document { caption, .. } => caption.as_deref(),
            _ => None,
        }
        .filter(|s| !s.is_empty())
    }
}

/// One inbound message observed by a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub sender: Option<Sender>,
    /// Sent by the account itself.
    #[serde(default)]
    pub outgoing: bool,
    /// The account is tagged in this message.
    #[serde(default)]
    pub mentions_account: bool,
    /// Deep link to the message, when the chat has one.
    #[serde(default)]
    pub link: Option<String>,
    pub payload: Payload,
}

impl InboundEvent {
    /// Origin chat id.
    pub fn origin(&self) -> ChatId {
        self.chat.id
    }

    /// A mention of the account inside a group or supergroup.
    pub fn is_group_mention(&self) -> bool {
        self.mentions_account && self.chat.kind.is_group()
    }

    /// Subscription filter applied by sessions before dispatch: incoming,
    /// not from a bot, and either a private message or a group mention.
    pub fn is_relevant(&self) -> bool {
        if self.outgoing {
            return false;
        }
        if self.sender.as_ref().is_some_and(|s| s.is_bot) {
            return false;
        }
        self.chat.kind == ChatKind::Private || self.is_group_mention()
    }
}
