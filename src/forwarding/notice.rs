//! Notification and confirmation text, rendered as Bot API HTML.

use crate::forwarding::classifier::{Classification, ContentKind, TEXT_EXCERPT_CHARS, classify};
use crate::relay::LinkButton;
use crate::session::event::{InboundEvent, Sender};

/// A rendered notification plus what should follow it.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub text: String,
    pub button: Option<LinkButton>,
    /// Re-send the original content after the notification.
    pub should_forward: bool,
    pub kind: ContentKind,
}

/// Build the notice for an event. Group mentions are notify-only and skip
/// the classifier.
pub fn build_notice(event: &InboundEvent) -> Notice {
    if event.is_group_mention() {
        mention_notice(event)
    } else {
        content_notice(event, &classify(&event.payload))
    }
}

/// `🔔 New {label} from {sender}` plus the classifier detail.
pub fn content_notice(event: &InboundEvent, class: &Classification) -> Notice {
    let mut text = format!(
        "🔔 New {} from {}",
        class.kind.label(),
        sender_link(event.sender.as_ref())
    );
    if !class.detail.is_empty() {
        text.push_str("\n\n");
        text.push_str(&class.detail);
    }
    Notice {
        text,
        button: None,
        should_forward: class.forwardable,
        kind: class.kind,
    }
}

/// Mention summary with a button to the message when it has a link.
pub fn mention_notice(event: &InboundEvent) -> Notice {
    let title = event.chat.title.as_deref().unwrap_or("a group");
    let excerpt: String = event
        .payload
        .excerpt()
        .unwrap_or("...")
        .chars()
        .take(TEXT_EXCERPT_CHARS)
        .collect();
    let text = format!(
        "🔔 <b>You were mentioned in {}</b>\n\n<b>From:</b> {}\n<b>Message:</b> {}",
        escape_html(title),
        sender_link(event.sender.as_ref()),
        escape_html(&excerpt),
    );
    Notice {
        text,
        button: event.link.as_ref().map(|url| LinkButton {
            text: "💬 View message".to_string(),
            url: url.clone(),
        }),
        should_forward: false,
        kind: classify(&event.payload).kind,
    }
}

/// Sent after a successful forward.
pub fn confirmation(kind: ContentKind) -> String {
    format!("✅ Above is the forwarded {}", kind.label())
}

/// HTML user link, or `unknown` when the sender is hidden.
pub fn sender_link(sender: Option<&Sender>) -> String {
    match sender {
        Some(s) => format!(
            "<a href=\"tg://user?id={}\">{}</a>",
            s.id,
            escape_html(&s.display_name())
        ),
        None => "unknown".to_string(),
    }
}

/// Escape text for Bot API HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
