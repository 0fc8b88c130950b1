//! Session registry, the single source of truth for which accounts run.
//!
//! The map itself is never exposed. Mutations for one account id are
//! serialized through a per-id lock that callers hold across the whole
//! stop/connect/register sequence; unrelated ids proceed independently.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::error::RegistryError;
use crate::model::AccountId;
use crate::session::transport::SessionConnection;

/// A running session, owned by the registry.
pub struct SessionHandle {
    pub account_id: AccountId,
    /// Distinguishes this session from a later restart of the same account.
    pub session_id: Uuid,
    pub connection: Box<dyn SessionConnection>,
    pub subscribed: bool,
    pub started_at: DateTime<Utc>,
}

impl SessionHandle {
    pub fn new(connection: Box<dyn SessionConnection>, subscribed: bool) -> Self {
        Self {
            account_id: connection.account_id(),
            session_id: Uuid::new_v4(),
            connection,
            subscribed,
            started_at: Utc::now(),
        }
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            account_id: self.account_id,
            session_id: self.session_id,
            subscribed: self.subscribed,
            started_at: self.started_at,
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("account_id", &self.account_id)
            .field("session_id", &self.session_id)
            .field("subscribed", &self.subscribed)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub account_id: AccountId,
    pub session_id: Uuid,
    pub subscribed: bool,
    pub started_at: DateTime<Utc>,
}

/// Concurrent map from account id to its live session handle.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<AccountId, SessionHandle>>,
    locks: Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive lock for `id`. Hold it across any sequence of
    /// registry calls that must not interleave with another start/stop.
    pub async fn lock(&self, id: AccountId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }

    /// Insert a handle. Fails if one is already present for its account;
    /// the rejected handle is given back so the caller can close it.
    pub async fn register(
        &self,
        handle: SessionHandle,
    ) -> Result<(), (RegistryError, SessionHandle)> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&handle.account_id) {
            return Err((RegistryError::AlreadyRunning(handle.account_id), handle));
        }
        sessions.insert(handle.account_id, handle);
        Ok(())
    }

    /// Remove and return the handle for `id`, if any.
    pub async fn unregister(&self, id: AccountId) -> Option<SessionHandle> {
        self.sessions.write().await.remove(&id)
    }

    /// Remove the handle for `id` only if it is still the session
    /// `session_id`.
    pub async fn remove_session(&self, id: AccountId, session_id: Uuid) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&id) {
            Some(handle) if handle.session_id == session_id => sessions.remove(&id),
            _ => None,
        }
    }

    pub async fn lookup(&self, id: AccountId) -> Option<SessionInfo> {
        self.sessions.read().await.get(&id).map(SessionHandle::info)
    }

    pub async fn contains(&self, id: AccountId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    /// Ids of every running session.
    pub async fn snapshot(&self) -> BTreeSet<AccountId> {
        self.sessions.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::model::ChatId;
    use crate::session::event::InboundEvent;
    use crate::session::transport::{EventForwarder, EventHandler};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::watch;

    struct NullConnection(AccountId);

    #[async_trait]
    impl EventForwarder for NullConnection {
        async fn forward_event(&self, _: &InboundEvent, _: ChatId) -> Result<(), SessionError> {
            Ok(())
        }
    }

    #[async_trait]
    impl SessionConnection for NullConnection {
        fn account_id(&self) -> AccountId {
            self.0
        }
        fn subscribe(&self, _: Arc<dyn EventHandler>) -> Result<(), SessionError> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), SessionError> {
            Ok(())
        }
        fn lost(&self) -> watch::Receiver<bool> {
            watch::channel(false).1
        }
    }

    fn handle(id: AccountId) -> SessionHandle {
        SessionHandle::new(Box::new(NullConnection(id)), true)
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_returns_handle() {
        let registry = SessionRegistry::new();
        registry.register(handle(1)).await.unwrap();

        let (err, rejected) = registry.register(handle(1)).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRunning(1)));
        assert_eq!(rejected.account_id, 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn unregister_missing_is_none() {
        let registry = SessionRegistry::new();
        assert!(registry.unregister(9).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn snapshot_and_lookup() {
        let registry = SessionRegistry::new();
        registry.register(handle(3)).await.unwrap();
        registry.register(handle(1)).await.unwrap();

        assert_eq!(registry.snapshot().await, BTreeSet::from([1, 3]));
        let info = registry.lookup(3).await.unwrap();
        assert_eq!(info.account_id, 3);
        assert!(info.subscribed);
        assert!(registry.lookup(2).await.is_none());

        registry.unregister(3).await.unwrap();
        assert!(!registry.contains(3).await);
    }

    #[tokio::test]
    async fn remove_session_ignores_a_newer_session() {
        let registry = SessionRegistry::new();
        let old = handle(4);
        let old_id = old.session_id;
        registry.register(old).await.unwrap();
        registry.unregister(4).await.unwrap();
        registry.register(handle(4)).await.unwrap();

        assert!(registry.remove_session(4, old_id).await.is_none());
        assert!(registry.contains(4).await);

        let current = registry.lookup(4).await.unwrap().session_id;
        assert!(registry.remove_session(4, current).await.is_some());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn same_id_lock_serializes() {
        let registry = Arc::new(SessionRegistry::new());
        let guard = registry.lock(5).await;

        let other = Arc::clone(&registry);
        let waiter = tokio::spawn(async move {
            let _g = other.lock(5).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // A different id is not blocked
        let _unrelated = tokio::time::timeout(Duration::from_secs(1), registry.lock(6))
            .await
            .unwrap();

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
