//! Telegram Bot API relay. Sends notifications and long-polls updates for
//! the control surface.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::BotConfig;
use crate::error::RelayError;
use crate::model::ChatId;
use crate::relay::{LinkButton, RelaySender};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Bot API envelope: `{ok, result}` or `{ok: false, description}`.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// A Bot API user.
#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotChat {
    pub id: ChatId,
    #[serde(rename = "type")]
    pub kind: String,
}

/// The subset of a Bot API message the control surface reads.
#[derive(Debug, Clone, Deserialize)]
pub struct BotMessage {
    pub message_id: i64,
    pub chat: BotChat,
    #[serde(default)]
    pub from: Option<BotUser>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<BotMessage>,
}

/// The relay identity, talking to the Bot API over HTTPS.
pub struct TelegramRelay {
    token: SecretString,
    api_base: String,
    client: reqwest::Client,
    identity: ChatId,
}

impl TelegramRelay {
    /// Build the client and resolve the bot's own identity via `getMe`.
    pub async fn connect(config: &BotConfig) -> Result<Self, RelayError> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy_url) = &config.proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| RelayError::RequestFailed {
                method: "proxy".into(),
                reason: e.to_string(),
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| RelayError::RequestFailed {
            method: "client".into(),
            reason: e.to_string(),
        })?;

        let mut relay = Self {
            token: config.token.clone(),
            api_base: config.api_url.clone(),
            client,
            identity: 0,
        };

        let me: BotUser = relay.call("getMe", serde_json::json!({})).await?;
        relay.identity = me.id;
        info!(
            bot_id = relay.identity,
            username = me.username.as_deref().unwrap_or(""),
            "Relay identity connected"
        );
        Ok(relay)
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token.expose_secret())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, RelayError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::RequestFailed {
                method: method.into(),
                reason: e.without_url().to_string(),
            })?;

        let envelope: ApiResponse<T> =
            resp.json().await.map_err(|e| RelayError::InvalidResponse {
                method: method.into(),
                reason: e.without_url().to_string(),
            })?;
        unwrap_envelope(method, envelope)
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, RelayError> {
        self.call(
            "getUpdates",
            serde_json::json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }
}

#[async_trait]
impl RelaySender for TelegramRelay {
    fn identity(&self) -> ChatId {
        self.identity
    }

    /// Splits texts over the 4096 limit; the button rides on the last chunk.
    async fn send_text(
        &self,
        destination: ChatId,
        text: &str,
        button: Option<&LinkButton>,
    ) -> Result<(), RelayError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.iter().enumerate() {
            let body = message_body(destination, chunk, button.filter(|_| i == last));
            let _: serde_json::Value = self.call("sendMessage", body).await?;
        }
        debug!(destination, chunks = chunks.len(), "Relay message sent");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn unwrap_envelope<T>(method: &str, envelope: ApiResponse<T>) -> Result<T, RelayError> {
    if !envelope.ok {
        return Err(RelayError::Rejected {
            method: method.into(),
            description: envelope
                .description
                .unwrap_or_else(|| "no description".into()),
        });
    }
    envelope.result.ok_or_else(|| RelayError::InvalidResponse {
        method: method.into(),
        reason: "missing result".into(),
    })
}

fn message_body(chat_id: ChatId, text: &str, button: Option<&LinkButton>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "chat_id": chat_id,
        "text": text,
        "parse_mode": "HTML",
        "link_preview_options": { "is_disabled": true },
    });
    if let Some(button) = button {
        body["reply_markup"] = serde_json::json!({
            "inline_keyboard": [[{ "text": button.text, "url": button.url }]]
        });
    }
    body
}

/// Split a message into chunks of at most `max_chars` characters.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    loop {
        // Byte offset of the first char past the limit, if any
        let Some((limit, _)) = remaining.char_indices().nth(max_chars) else {
            chunks.push(remaining.to_string());
            break;
        };

        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
        if remaining.is_empty() {
            break;
        }
    }

    chunks
}
