//! Command execution for the operator. Every outcome, including errors, is
//! rendered as reply text.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{ControlError, OnboardingError};
use crate::forwarding::notice::escape_html;
use crate::model::{AccountId, ChatId};
use crate::onboarding::OnboardingManager;
use crate::relay::RelaySender;
use crate::relay::telegram::BotMessage;
use crate::session::SessionManager;
use crate::store::Database;

use super::command::{Command, Input, RuleSpec, parse};

const HELP: &str = "<b>Tele Relay</b>\n\n\
    /adduser - add a managed account\n\
    /cancel - cancel adding an account\n\
    /deluser &lt;account_id&gt; - stop and deactivate an account\n\
    /listusers - list active accounts\n\
    /addrule &lt;account_id&gt; {\"source_chats\": [...], \"destination_chats\": [...]} - add a rule\n\
    /listrules &lt;account_id&gt; - list an account's rules\n\
    /delrule &lt;rule_id&gt; - delete a rule\n\n\
    An empty source_chats list matches every chat.";

const NOT_UNDERSTOOD: &str = "I received your message, but I'm not sure what you want me to do.";

/// Owner-only command surface.
pub struct ControlSurface {
    owner_id: i64,
    db: Arc<dyn Database>,
    sessions: Arc<SessionManager>,
    onboarding: Arc<OnboardingManager>,
}

impl ControlSurface {
    pub fn new(
        owner_id: i64,
        db: Arc<dyn Database>,
        sessions: Arc<SessionManager>,
        onboarding: Arc<OnboardingManager>,
    ) -> Self {
        Self {
            owner_id,
            db,
            sessions,
            onboarding,
        }
    }

    /// Only the owner, in a private chat, may drive the surface.
    pub fn is_authorized(&self, message: &BotMessage) -> bool {
        message.chat.kind == "private"
            && message.from.as_ref().is_some_and(|u| u.id == self.owner_id)
    }

    /// Handle one bot message and send the replies through `relay`.
    pub async fn handle_message(&self, relay: &dyn RelaySender, message: &BotMessage) {
        if !self.is_authorized(message) {
            warn!(
                chat_id = message.chat.id,
                user_id = message.from.as_ref().map(|u| u.id),
                "Ignoring control message from unauthorized user"
            );
            return;
        }
        let Some(text) = message.text.as_deref() else {
            return;
        };

        for reply in self.handle_text(self.owner_id, text).await {
            if let Err(e) = relay.send_text(message.chat.id, &reply, None).await {
                warn!(chat_id = message.chat.id, error = %e, "Failed to send control reply");
            }
        }
    }

    /// Execute one message from `operator` and return the replies.
    pub async fn handle_text(&self, operator: i64, text: &str) -> Vec<String> {
        let input = match parse(text) {
            Ok(input) => input,
            Err(e) => return vec![render_error(&e)],
        };

        let result = match input {
            Input::Command(command) => self.execute(operator, command).await,
            Input::Text(text) => Ok(self.converse(operator, &text).await),
        };
        result.unwrap_or_else(|e| vec![render_error(&e)])
    }

    async fn execute(&self, operator: i64, command: Command) -> Result<Vec<String>, ControlError> {
        info!(operator, command = command_name(&command), "Control command");
        match command {
            Command::Start | Command::Help => Ok(vec![HELP.to_string()]),
            Command::AddUser => Ok(vec![match self.onboarding.begin(operator).await {
                Ok(prompt) => prompt,
                Err(OnboardingError::AlreadyInProgress) => {
                    "You are already in the middle of an add-user process. Send /cancel to stop."
                        .to_string()
                }
                Err(e) => escape_html(&e.to_string()),
            }]),
            Command::Cancel => Ok(vec![match self.onboarding.cancel(operator).await {
                Ok(()) => "Operation cancelled.".to_string(),
                Err(_) => "No active operation to cancel.".to_string(),
            }]),
            Command::DelUser(id) => self.delete_user(id).await,
            Command::ListUsers => self.list_users().await,
            Command::AddRule { account_id, spec } => self.add_rule(account_id, spec).await,
            Command::ListRules(id) => self.list_rules(id).await,
            Command::DelRule(rule_id) => {
                if self.db.delete_rule(rule_id).await? {
                    Ok(vec![format!("✅ Rule <code>{rule_id}</code> deleted.")])
                } else {
                    Ok(vec![format!("Could not find rule <code>{rule_id}</code>.")])
                }
            }
            Command::Unknown(name) => Ok(vec![format!(
                "Unknown command /{}. Send /help for usage.",
                escape_html(&name)
            )]),
        }
    }

    async fn converse(&self, operator: i64, text: &str) -> Vec<String> {
        if !self.onboarding.is_active(operator).await {
            return vec![NOT_UNDERSTOOD.to_string()];
        }
        match self.onboarding.handle_input(operator, text).await {
            Ok(replies) => replies,
            Err(e) => vec![format!(
                "An unexpected error occurred: {}.\nPlease start again with /adduser.",
                escape_html(&e.to_string())
            )],
        }
    }

    async fn delete_user(&self, id: AccountId) -> Result<Vec<String>, ControlError> {
        let mut replies = Vec::new();
        if self.sessions.stop_session(id).await {
            replies.push(format!("✔️ Session for <code>{id}</code> stopped."));
        } else {
            replies.push(format!("⚠️ Session for <code>{id}</code> was not running."));
        }

        if self.db.deactivate_account(id).await? {
            replies.push(format!("✅ Account <code>{id}</code> deactivated and its rules deleted."));
        } else {
            replies.push(format!("⚠️ No active account <code>{id}</code> in the database."));
        }
        Ok(replies)
    }

    async fn list_users(&self) -> Result<Vec<String>, ControlError> {
        let accounts = self.db.active_accounts().await?;
        if accounts.is_empty() {
            return Ok(vec!["No active accounts are configured.".to_string()]);
        }

        let running = self.sessions.running_ids().await;
        let mut reply = String::from("<b>Managed accounts (active):</b>\n\n");
        for account in &accounts {
            let status = if running.contains(&account.id) {
                "✅ running"
            } else {
                "❌ stopped"
            };
            reply.push_str(&format!("- <code>{}</code> | {status}\n", account.id));
        }
        Ok(vec![reply])
    }

    async fn add_rule(&self, account_id: AccountId, spec: RuleSpec) -> Result<Vec<String>, ControlError> {
        self.require_account(account_id).await?;
        let rule = self
            .db
            .add_rule(account_id, &spec.source_chats, &spec.destination_chats)
            .await?;
        Ok(vec![format!(
            "✅ Forwarding rule added for <code>{account_id}</code>.\n<b>Rule ID:</b> <code>{}</code>",
            rule.id
        )])
    }

    async fn list_rules(&self, account_id: AccountId) -> Result<Vec<String>, ControlError> {
        self.require_account(account_id).await?;
        let rules = self.db.rules_for(account_id).await?;
        if rules.is_empty() {
            return Ok(vec![format!(
                "No forwarding rules for <code>{account_id}</code>."
            )]);
        }

        let mut reply = format!("<b>Forwarding rules for <code>{account_id}</code>:</b>\n\n");
        for record in &rules {
            match record.parse() {
                Ok(rule) => {
                    let sources = if rule.sources.is_empty() {
                        "Any Chat".to_string()
                    } else {
                        join_ids(rule.sources.iter().copied())
                    };
                    reply.push_str(&format!(
                        "<b>Rule ID:</b> <code>{}</code>\n  <b>Sources:</b> <code>{sources}</code>\n  <b>Destinations:</b> <code>{}</code>\n\n",
                        rule.id,
                        join_ids(rule.destinations.iter().copied()),
                    ));
                }
                Err(e) => reply.push_str(&format!(
                    "<b>Rule ID:</b> <code>{}</code>\n  ⚠️ {}\n\n",
                    record.id,
                    escape_html(&e.to_string())
                )),
            }
        }
        Ok(vec![reply])
    }

    async fn require_account(&self, id: AccountId) -> Result<(), ControlError> {
        match self.db.get_account(id).await? {
            Some(_) => Ok(()),
            None => Err(ControlError::UnknownAccount(id)),
        }
    }
}

fn join_ids(ids: impl Iterator<Item = ChatId>) -> String {
    ids.map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

fn render_error(e: &ControlError) -> String {
    escape_html(&e.to_string())
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Start => "start",
        Command::Help => "help",
        Command::AddUser => "adduser",
        Command::Cancel => "cancel",
        Command::DelUser(_) => "deluser",
        Command::ListUsers => "listusers",
        Command::AddRule { .. } => "addrule",
        Command::ListRules(_) => "listrules",
        Command::DelRule(_) => "delrule",
        Command::Unknown(_) => "unknown",
    }
}
