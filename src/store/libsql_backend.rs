//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{Account, AccountId, ChatId, RuleRecord};
use crate::store::migrations;
use crate::store::traits::{Database, RuleSource};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Decode a stored JSON list. Unparseable text becomes `Null`, which the
/// rule engine reports as malformed and skips.
fn parse_json_column(rule_id: &str, column: &str, raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(rule_id, column, error = %e, "Stored rule column is not valid JSON");
        serde_json::Value::Null
    })
}

fn row_to_account(row: &libsql::Row) -> Result<Account, libsql::Error> {
    let id: i64 = row.get(0)?;
    let credential: String = row.get(1)?;
    let active: i64 = row.get(2)?;
    Ok(Account {
        id,
        credential: SecretString::from(credential),
        active: active != 0,
    })
}

fn row_to_rule(row: &libsql::Row) -> Result<RuleRecord, libsql::Error> {
    let id_str: String = row.get(0)?;
    let owner: i64 = row.get(1)?;
    let sources: String = row.get(2)?;
    let destinations: String = row.get(3)?;
    let created_at: String = row.get(4)?;

    let id = Uuid::parse_str(&id_str).unwrap_or_else(|e| {
        warn!(rule_id = %id_str, error = %e, "Stored rule id is not a UUID");
        Uuid::nil()
    });

    Ok(RuleRecord {
        id,
        owner,
        sources: parse_json_column(&id_str, "source_chats", &sources),
        destinations: parse_json_column(&id_str, "destination_chats", &destinations),
        created_at: parse_datetime(&created_at),
    })
}

async fn collect_rows<T>(
    mut rows: libsql::Rows,
    op: &str,
    convert: fn(&libsql::Row) -> Result<T, libsql::Error>,
) -> Result<Vec<T>, DatabaseError> {
    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
    {
        out.push(convert(&row).map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?);
    }
    Ok(out)
}

// ── Trait implementations ───────────────────────────────────────────

const ACCOUNT_COLUMNS: &str = "account_id, credential, is_active";

const RULE_COLUMNS: &str = "id, owner_id, source_chats, destination_chats, created_at";

#[async_trait]
impl RuleSource for LibSqlBackend {
    async fn rules_for(&self, owner: AccountId) -> Result<Vec<RuleRecord>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM forwarding_rules WHERE owner_id = ?1 ORDER BY seq ASC"),
                params![owner],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("rules_for: {e}")))?;

        collect_rows(rows, "rules_for", row_to_rule).await
    }

    async fn active_accounts(&self) -> Result<Vec<Account>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM managed_accounts WHERE is_active = 1 ORDER BY account_id ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("active_accounts: {e}")))?;

        collect_rows(rows, "active_accounts", row_to_account).await
    }
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Accounts ────────────────────────────────────────────────────

    async fn upsert_account(
        &self,
        id: AccountId,
        credential: &SecretString,
    ) -> Result<Account, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO managed_accounts (account_id, credential, is_active, created_at, updated_at)
                 VALUES (?1, ?2, 1, ?3, ?3)
                 ON CONFLICT (account_id) DO UPDATE SET credential = ?2, is_active = 1, updated_at = ?3",
                params![id, credential.expose_secret(), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_account: {e}")))?;

        debug!(account_id = id, "Account upserted");
        Ok(Account {
            id,
            credential: credential.clone(),
            active: true,
        })
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM managed_accounts WHERE account_id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_account: {e}")))?;

        Ok(collect_rows(rows, "get_account", row_to_account)
            .await?
            .into_iter()
            .next())
    }

    async fn deactivate_account(&self, id: AccountId) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let deleted = conn
            .execute("DELETE FROM forwarding_rules WHERE owner_id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("deactivate_account rules: {e}")))?;
        info!(account_id = id, deleted, "Deleted forwarding rules for account");

        let now = Utc::now().to_rfc3339();
        let updated = conn
            .execute(
                "UPDATE managed_accounts SET is_active = 0, updated_at = ?2
                 WHERE account_id = ?1 AND is_active = 1",
                params![id, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("deactivate_account: {e}")))?;

        if updated > 0 {
            info!(account_id = id, "Account deactivated");
            Ok(true)
        } else {
            warn!(account_id = id, "Account missing or already inactive");
            Ok(false)
        }
    }

    // ── Rules ───────────────────────────────────────────────────────

    async fn add_rule(
        &self,
        owner: AccountId,
        sources: &[ChatId],
        destinations: &[ChatId],
    ) -> Result<RuleRecord, DatabaseError> {
        let record = RuleRecord::new(owner, sources, destinations);
        let sources_json = serde_json::to_string(&record.sources)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let destinations_json = serde_json::to_string(&record.destinations)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO forwarding_rules (id, owner_id, source_chats, destination_chats, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id.to_string(),
                    owner,
                    sources_json,
                    destinations_json,
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_rule: {e}")))?;

        info!(rule_id = %record.id, owner, "Added forwarding rule");
        Ok(record)
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<RuleRecord>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM forwarding_rules WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_rule: {e}")))?;

        Ok(collect_rows(rows, "get_rule", row_to_rule)
            .await?
            .into_iter()
            .next())
    }

    async fn delete_rule(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM forwarding_rules WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_rule: {e}")))?;

        if count > 0 {
            info!(rule_id = %id, "Deleted forwarding rule");
        } else {
            warn!(rule_id = %id, "Attempted to delete non-existent rule");
        }
        Ok(count > 0)
    }
}
