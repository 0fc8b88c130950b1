//! Error types for Tele Relay.

use std::time::Duration;

use crate::model::{AccountId, ChatId};

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Onboarding error: {0}")]
    Onboarding(#[from] OnboardingError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Session transport errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Bad or expired credential. Never retried by the lifecycle manager.
    #[error("Authentication failed for account {account_id}: {reason}")]
    Auth { account_id: AccountId, reason: String },

    /// Transient network failure while connecting, forwarding, or closing.
    #[error("Transport error for account {account_id}: {reason}")]
    Transport { account_id: AccountId, reason: String },

    #[error("Session operation for account {account_id} timed out after {timeout:?}")]
    Timeout {
        account_id: AccountId,
        timeout: Duration,
    },

    #[error("Session for account {0} already has a subscriber")]
    AlreadySubscribed(AccountId),

    #[error("Session for account {0} is closed")]
    Closed(AccountId),
}

impl SessionError {
    /// Whether this is a credential problem rather than a network one.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// Registry bookkeeping conflicts. Resolved internally by stop-then-register.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("A session for account {0} is already registered")]
    AlreadyRunning(AccountId),
}

/// A stored rule that cannot be evaluated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    #[error("Rule {rule_id}: {field} must be a list of chat ids")]
    NotAList { rule_id: String, field: &'static str },

    #[error("Rule {rule_id}: {field} contains a non-integer chat id: {value}")]
    InvalidChatId {
        rule_id: String,
        field: &'static str,
        value: String,
    },

    #[error("Rule {rule_id}: destination list is empty")]
    NoDestinations { rule_id: String },
}

/// Relay sender (Bot API) errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Relay request {method} failed: {reason}")]
    RequestFailed { method: String, reason: String },

    #[error("Relay API rejected {method}: {description}")]
    Rejected { method: String, description: String },

    #[error("Invalid relay response for {method}: {reason}")]
    InvalidResponse { method: String, reason: String },
}

/// Failure delivering one event to one destination.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("notification to {destination} failed: {source}")]
    Notify {
        destination: ChatId,
        #[source]
        source: RelayError,
    },

    #[error("forward for {destination} failed: {source}")]
    Forward {
        destination: ChatId,
        #[source]
        source: SessionError,
    },

    #[error("confirmation to {destination} failed: {source}")]
    Confirm {
        destination: ChatId,
        #[source]
        source: RelayError,
    },

    #[error("{step} for {destination} timed out after {timeout:?}")]
    Timeout {
        destination: ChatId,
        step: &'static str,
        timeout: Duration,
    },
}

/// Failure handling a whole event (before any destination was attempted).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Could not load rules for account {account_id}: {source}")]
    RuleFetch {
        account_id: AccountId,
        #[source]
        source: DatabaseError,
    },
}

/// Operator command errors. Rendered back to the operator as replies.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid account id: {0}. It must be an integer.")]
    InvalidAccountId(String),

    #[error("Invalid rule id: {0}")]
    InvalidRuleId(String),

    #[error("Invalid rule JSON: {0}")]
    InvalidRule(String),

    #[error("No managed account with id {0}")]
    UnknownAccount(AccountId),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Login flow errors.
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("Login gateway request {endpoint} failed: {reason}")]
    Gateway {
        endpoint: &'static str,
        reason: String,
    },

    #[error("A login is already in progress")]
    AlreadyInProgress,

    #[error("No login in progress")]
    NotInProgress,

    #[error("Cannot move login from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
