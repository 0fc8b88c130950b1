//! Maps a payload to (kind, detail, forwardable).
//!
//! Only media is physically re-sent; text, contacts, locations, and venues
//! are summarized in the notification and nothing more.

use crate::forwarding::notice::escape_html;
use crate::session::event::Payload;

/// Maximum characters of a text message quoted in its notification.
pub const TEXT_EXCERPT_CHARS: usize = 200;

/// Fixed set of content kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    Photo,
    Video,
    VideoNote,
    Document,
    Audio,
    Voice,
    Sticker,
    Animation,
    Contact,
    Location,
    Venue,
    Unknown,
}

impl ContentKind {
    /// Human-readable label used in notifications and confirmations.
    pub fn label(self) -> &'static str {
        match self {
            Self::Text => "text message",
            Self::Photo => "photo",
            Self::Video => "video",
            Self::VideoNote => "video note",
            Self::Document => "file",
            Self::Audio => "audio",
            Self::Voice => "voice message",
            Self::Sticker => "sticker",
            Self::Animation => "animation",
            Self::Contact => "contact",
            Self::Location => "location",
            Self::Venue => "venue",
            Self::Unknown => "message",
        }
    }

    pub fn is_media(self) -> bool {
        matches!(
            self,
            Self::Photo
                | Self::Video
                | Self::VideoNote
                | Self::Document
                | Self::Audio
                | Self::Voice
                | Self::Sticker
                | Self::Animation
        )
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: ContentKind,
    /// HTML-safe detail lines; may be empty.
    pub detail: String,
    pub forwardable: bool,
}

/// Classify a payload.
pub fn classify(payload: &Payload) -> Classification {
    let mut lines = DetailLines::default();
    let kind = match payload {
        Payload::Text { text } => {
            let excerpt: String = text.chars().take(TEXT_EXCERPT_CHARS).collect();
            lines.push("Message", Some(&excerpt));
            ContentKind::Text
        }
        Payload::Photo { caption } => {
            lines.push("Caption", caption.as_deref());
            ContentKind::Photo
        }
        Payload::Video { file_name, caption } => {
            lines.push("File", file_name.as_deref());
            lines.push("Caption", caption.as_deref());
            ContentKind::Video
        }
        Payload::VideoNote => ContentKind::VideoNote,
        Payload::Document { file_name, caption } => {
            lines.push("File", file_name.as_deref());
            lines.push("Caption", caption.as_deref());
            ContentKind::Document
        }
        Payload::Audio { file_name } => {
            lines.push("File", file_name.as_deref());
            ContentKind::Audio
        }
        Payload::Voice => ContentKind::Voice,
        Payload::Sticker { emoji } => {
            lines.push("Emoji", emoji.as_deref());
            ContentKind::Sticker
        }
        Payload::Animation { file_name } => {
            lines.push("File", file_name.as_deref());
            ContentKind::Animation
        }
        Payload::Contact {
            first_name,
            phone_number,
        } => {
            lines.push("Name", first_name.as_deref());
            lines.push("Phone", phone_number.as_deref());
            ContentKind::Contact
        }
        Payload::Location {
            longitude,
            latitude,
        } => {
            lines.push("Longitude", Some(&longitude.to_string()));
            lines.push("Latitude", Some(&latitude.to_string()));
            ContentKind::Location
        }
        Payload::Venue { title, address } => {
            lines.push("Title", title.as_deref());
            lines.push("Address", address.as_deref());
            ContentKind::Venue
        }
        Payload::Unknown => ContentKind::Unknown,
    };

    Classification {
        kind,
        detail: lines.finish(),
        forwardable: kind.is_media(),
    }
}

#[derive(Default)]
struct DetailLines(Vec<String>);

impl DetailLines {
    fn push(&mut self, label: &str, value: Option<&str>) {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.0.push(format!("<b>{label}:</b> {}", escape_html(value)));
        }
    }

    fn finish(self) -> String {
        self.0.join("\n")
    }
}
