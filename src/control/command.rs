//! Operator command parsing.

use serde::Deserialize;
use uuid::Uuid;

use crate::error::ControlError;
use crate::model::{AccountId, ChatId};

pub const USAGE_DELUSER: &str = "/deluser <account_id>";
pub const USAGE_LISTRULES: &str = "/listrules <account_id>";
pub const USAGE_DELRULE: &str = "/delrule <rule_id>";
pub const USAGE_ADDRULE: &str = "/addrule <account_id> {\"source_chats\": [...], \"destination_chats\": [...]}\n\n\
     Example: /addrule 12345 {\"source_chats\": [-100123], \"destination_chats\": [-100456]}";

/// JSON body of `/addrule`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuleSpec {
    pub source_chats: Vec<ChatId>,
    pub destination_chats: Vec<ChatId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    AddUser,
    Cancel,
    DelUser(AccountId),
    ListUsers,
    AddRule { account_id: AccountId, spec: RuleSpec },
    ListRules(AccountId),
    DelRule(Uuid),
    Unknown(String),
}

/// One operator message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    Text(String),
}

/// Parse a message. Anything not starting with `/` is plain text.
pub fn parse(text: &str) -> Result<Input, ControlError> {
    let text = text.trim();
    let Some(body) = text.strip_prefix('/') else {
        return Ok(Input::Text(text.to_string()));
    };

    let (head, args) = match body.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (body, ""),
    };
    // `/cmd@BotName` in group-style invocations
    let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();

    let command = match name.as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "adduser" => Command::AddUser,
        "cancel" => Command::Cancel,
        "listusers" => Command::ListUsers,
        "deluser" => Command::DelUser(account_arg(args, USAGE_DELUSER)?),
        "listrules" => Command::ListRules(account_arg(args, USAGE_LISTRULES)?),
        "delrule" => {
            let raw = first_arg(args, USAGE_DELRULE)?;
            let id = Uuid::parse_str(raw).map_err(|_| ControlError::InvalidRuleId(raw.to_string()))?;
            Command::DelRule(id)
        }
        "addrule" => {
            let (id, json) = args
                .split_once(char::is_whitespace)
                .ok_or(ControlError::Usage(USAGE_ADDRULE))?;
            let account_id = parse_account(id)?;
            let spec = parse_rule_spec(json.trim())?;
            Command::AddRule { account_id, spec }
        }
        _ => Command::Unknown(name),
    };
    Ok(Input::Command(command))
}

fn first_arg<'a>(args: &'a str, usage: &'static str) -> Result<&'a str, ControlError> {
    args.split_whitespace()
        .next()
        .ok_or(ControlError::Usage(usage))
}

fn account_arg(args: &str, usage: &'static str) -> Result<AccountId, ControlError> {
    parse_account(first_arg(args, usage)?)
}

fn parse_account(raw: &str) -> Result<AccountId, ControlError> {
    raw.parse()
        .map_err(|_| ControlError::InvalidAccountId(raw.to_string()))
}

fn parse_rule_spec(json: &str) -> Result<RuleSpec, ControlError> {
    let spec: RuleSpec =
        serde_json::from_str(json).map_err(|e| ControlError::InvalidRule(e.to_string()))?;
    if spec.destination_chats.is_empty() {
        return Err(ControlError::InvalidRule(
            "destination_chats must list at least one chat id".into(),
        ));
    }
    Ok(spec)
}
