//! Domain types shared by the store, the session layer, and the dispatcher.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RuleError;

/// Identity of a managed messaging account.
pub type AccountId = i64;

/// Identity of a chat (user, group, supergroup, or channel).
pub type ChatId = i64;

/// A managed account whose session this process operates.
///
/// The credential is an opaque session token minted during onboarding. It is
/// never mutated; re-onboarding replaces it wholesale.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub credential: SecretString,
    pub active: bool,
}

/// A forwarding rule as stored, before validation.
///
/// `sources` and `destinations` hold whatever JSON the store returned so a
/// malformed rule can be skipped at evaluation time instead of failing the
/// whole rule fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRecord {
    pub id: Uuid,
    pub owner: AccountId,
    pub sources: serde_json::Value,
    pub destinations: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl RuleRecord {
    /// Build a record from already-validated chat id lists.
    pub fn new(owner: AccountId, sources: &[ChatId], destinations: &[ChatId]) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            sources: serde_json::json!(sources),
            destinations: serde_json::json!(destinations),
            created_at: Utc::now(),
        }
    }

    /// Validate the stored lists into a usable rule.
    pub fn parse(&self) -> Result<ForwardingRule, RuleError> {
        let rule_id = self.id.to_string();
        let sources = parse_chat_list(&rule_id, "source_chats", &self.sources)?;
        let destinations = parse_chat_list(&rule_id, "destination_chats", &self.destinations)?;
        if destinations.is_empty() {
            return Err(RuleError::NoDestinations { rule_id });
        }
        Ok(ForwardingRule {
            id: self.id,
            owner: self.owner,
            sources,
            destinations,
        })
    }
}

/// A validated forwarding rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingRule {
    pub id: Uuid,
    pub owner: AccountId,
    /// Empty means "any source".
    pub sources: BTreeSet<ChatId>,
    /// Never empty.
    pub destinations: BTreeSet<ChatId>,
}

impl ForwardingRule {
    /// Whether this rule applies to events from `origin`.
    pub fn matches(&self, origin: ChatId) -> bool {
        self.sources.is_empty() || self.sources.contains(&origin)
    }
}

fn parse_chat_list(
    rule_id: &str,
    field: &'static str,
    value: &serde_json::Value,
) -> Result<BTreeSet<ChatId>, RuleError> {
    let items = value.as_array().ok_or_else(|| RuleError::NotAList {
        rule_id: rule_id.to_string(),
        field,
    })?;

    items
        .iter()
        .map(|item| {
            item.as_i64().ok_or_else(|| RuleError::InvalidChatId {
                rule_id: rule_id.to_string(),
                field,
                value: item.to_string(),
            })
        })
        .collect()
}
