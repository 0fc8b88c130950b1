//! Persistence traits.
//!
//! `RuleSource` is the read-only view the forwarding core consumes. `Database`
//! adds the CRUD calls the control surface and onboarding need; the core
//! never mutates accounts or rules.

use async_trait::async_trait;
use secrecy::SecretString;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{Account, AccountId, ChatId, RuleRecord};

/// Read-only rule and account access for the forwarding core.
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// All rules owned by `owner`, in insertion order.
    async fn rules_for(&self, owner: AccountId) -> Result<Vec<RuleRecord>, DatabaseError>;

    /// Every account currently marked active.
    async fn active_accounts(&self) -> Result<Vec<Account>, DatabaseError>;
}

/// Backend-agnostic database trait covering accounts and rules.
#[async_trait]
pub trait Database: RuleSource {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Accounts ────────────────────────────────────────────────────

    /// Insert or replace an account's credential and mark it active.
    async fn upsert_account(
        &self,
        id: AccountId,
        credential: &SecretString,
    ) -> Result<Account, DatabaseError>;

    /// Get an account by id, active or not.
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, DatabaseError>;

    /// Delete the account's rules and mark it inactive.
    ///
    /// Returns `false` if the account is missing or already inactive.
    async fn deactivate_account(&self, id: AccountId) -> Result<bool, DatabaseError>;

    // ── Rules ───────────────────────────────────────────────────────

    /// Add a rule for `owner`. An empty `sources` list means "any chat".
    async fn add_rule(
        &self,
        owner: AccountId,
        sources: &[ChatId],
        destinations: &[ChatId],
    ) -> Result<RuleRecord, DatabaseError>;

    /// Get a rule by id.
    async fn get_rule(&self, id: Uuid) -> Result<Option<RuleRecord>, DatabaseError>;

    /// Delete a rule. Returns `false` if it did not exist.
    async fn delete_rule(&self, id: Uuid) -> Result<bool, DatabaseError>;
}
