//! Session lifecycle manager: start, stop, restart, and bulk supervision of
//! account sessions over the [`SessionRegistry`].

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use secrecy::SecretString;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{DatabaseError, SessionError};
use crate::model::AccountId;
use crate::session::registry::{SessionHandle, SessionInfo, SessionRegistry};
use crate::session::transport::{EventHandler, SessionTransport};
use crate::store::RuleSource;

/// Aggregate outcome of [`SessionManager::start_all_active`].
#[derive(Debug, Default)]
pub struct BatchReport {
    pub started: Vec<AccountId>,
    pub failed: Vec<(AccountId, SessionError)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.started.len() + self.failed.len()
    }
}

/// Owns start/stop semantics for every account session.
pub struct SessionManager {
    transport: Arc<dyn SessionTransport>,
    accounts: Arc<dyn RuleSource>,
    handler: Arc<dyn EventHandler>,
    registry: Arc<SessionRegistry>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn SessionTransport>,
        accounts: Arc<dyn RuleSource>,
        handler: Arc<dyn EventHandler>,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            accounts,
            handler,
            registry: Arc::new(SessionRegistry::new()),
            config,
        }
    }

    /// Start `id`, stopping any session already running for it first.
    ///
    /// On failure nothing is registered and no connection is left open.
    pub async fn start_session(
        &self,
        id: AccountId,
        credential: &SecretString,
    ) -> Result<(), SessionError> {
        let _guard = self.registry.lock(id).await;

        if let Some(old) = self.registry.unregister(id).await {
            info!(account_id = id, "Session already running, restarting");
            close(old).await;
        }

        let connection = match tokio::time::timeout(
            self.config.connect_timeout,
            self.transport.connect(id, credential),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                error!(account_id = id, error = %e, "Failed to start session");
                return Err(e);
            }
            Err(_) => {
                let e = SessionError::Timeout {
                    account_id: id,
                    timeout: self.config.connect_timeout,
                };
                error!(account_id = id, error = %e, "Failed to start session");
                return Err(e);
            }
        };

        if let Err(e) = connection.subscribe(Arc::clone(&self.handler)) {
            error!(account_id = id, error = %e, "Failed to attach event handler");
            if let Err(close_err) = connection.disconnect().await {
                warn!(account_id = id, error = %close_err, "Failed to close unsubscribed session");
            }
            return Err(e);
        }

        let lost = connection.lost();
        let handle = SessionHandle::new(connection, true);
        let session_id = handle.session_id;
        if let Err((conflict, handle)) = self.registry.register(handle).await {
            // Only reachable if something registered behind the per-id lock.
            warn!(account_id = id, error = %conflict, "Registry conflict, replacing entry");
            if let Some(stale) = self.registry.unregister(id).await {
                close(stale).await;
            }
            if let Err((conflict, handle)) = self.registry.register(handle).await {
                close(handle).await;
                return Err(SessionError::Transport {
                    account_id: id,
                    reason: conflict.to_string(),
                });
            }
        }

        self.watch_connection(id, session_id, lost);
        info!(account_id = id, "Session started");
        Ok(())
    }

    /// Stop `id`. Returns `false` if it was not running.
    ///
    /// Close errors are logged and swallowed; the entry is removed either way.
    pub async fn stop_session(&self, id: AccountId) -> bool {
        let _guard = self.registry.lock(id).await;
        match self.registry.unregister(id).await {
            Some(handle) => {
                close(handle).await;
                info!(account_id = id, "Session stopped");
                true
            }
            None => false,
        }
    }

    /// Start every active account concurrently. One account's failure never
    /// blocks the others.
    pub async fn start_all_active(&self) -> Result<BatchReport, DatabaseError> {
        let accounts = self.accounts.active_accounts().await?;
        info!(count = accounts.len(), "Starting sessions for active accounts");

        let results = join_all(accounts.iter().map(|account| async move {
            (
                account.id,
                self.start_session(account.id, &account.credential).await,
            )
        }))
        .await;

        let mut report = BatchReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.started.push(id),
                Err(e) => report.failed.push((id, e)),
            }
        }

        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "Bulk start complete"
        );
        Ok(report)
    }

    /// Stop every running session concurrently, bounded by the shutdown
    /// timeout. Returns how many were removed from the registry.
    pub async fn stop_all(&self) -> usize {
        let ids = self.registry.snapshot().await;
        if ids.is_empty() {
            return 0;
        }
        info!(count = ids.len(), "Stopping all sessions");

        let stops = join_all(ids.iter().map(|&id| self.stop_session(id)));
        match tokio::time::timeout(self.config.shutdown_timeout, stops).await {
            Ok(results) => results.into_iter().filter(|stopped| *stopped).count(),
            Err(_) => {
                let remaining = self.registry.snapshot().await;
                warn!(
                    timeout = ?self.config.shutdown_timeout,
                    remaining = ?remaining,
                    "Timed out stopping sessions; leaving the rest to drop"
                );
                ids.difference(&remaining).count()
            }
        }
    }

    pub async fn running_ids(&self) -> BTreeSet<AccountId> {
        self.registry.snapshot().await
    }

    pub async fn is_running(&self, id: AccountId) -> bool {
        self.registry.contains(id).await
    }

    pub async fn session_info(&self, id: AccountId) -> Option<SessionInfo> {
        self.registry.lookup(id).await
    }

    /// Drop `session_id` from the registry once its connection is lost.
    /// A restart in the meantime registers a new session id, which is left
    /// alone.
    fn watch_connection(&self, id: AccountId, session_id: Uuid, mut lost: watch::Receiver<bool>) {
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let dropped = lost.wait_for(|lost| *lost).await.is_ok();
            if !dropped {
                return;
            }
            let _guard = registry.lock(id).await;
            if let Some(handle) = registry.remove_session(id, session_id).await {
                warn!(account_id = id, "Session connection lost, marking it stopped");
                close(handle).await;
            }
        });
    }
}

async fn close(handle: SessionHandle) {
    if let Err(e) = handle.connection.disconnect().await {
        warn!(account_id = handle.account_id, error = %e, "Error while closing session");
    }
}
