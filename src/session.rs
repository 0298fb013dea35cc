//! Session store
//!
//! Maps session ids to [`Session`]s. A session owns its conversation
//! history and a turn lock that admits one turn at a time; a second turn
//! is rejected with [`AgentError::SessionBusy`] rather than queued.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::{AgentError, Result};
use crate::llm::Message;

pub struct Session {
    id: String,
    app_name: String,
    user_id: String,
    created_at: DateTime<Utc>,
    history: RwLock<Vec<Message>>,
    turn: Arc<Mutex<()>>,
}

/// Held for the duration of a turn; dropping it admits the next one
#[derive(Debug)]
pub struct TurnGuard {
    _permit: OwnedMutexGuard<()>,
}

/// Serializable summary of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub messages: usize,
    pub busy: bool,
}

impl Session {
    fn new(id: &str, app_name: &str, user_id: &str) -> Self {
        Self {
            id: id.to_string(),
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            history: RwLock::new(Vec::new()),
            turn: Arc::new(Mutex::new(())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Snapshot of the conversation so far
    pub async fn history(&self) -> Vec<Message> {
        self.history.read().await.clone()
    }

    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }

    /// History only grows; there is no way to edit or drop entries.
    pub async fn append(&self, message: Message) {
        self.history.write().await.push(message);
    }

    /// Append several messages without interleaving with other writers
    pub async fn extend(&self, messages: impl IntoIterator<Item = Message>) {
        self.history.write().await.extend(messages);
    }

    /// Claim the session for a turn without waiting
    pub fn try_begin_turn(&self) -> Result<TurnGuard> {
        self.turn
            .clone()
            .try_lock_owned()
            .map(|permit| TurnGuard { _permit: permit })
            .map_err(|_| AgentError::SessionBusy(self.id.clone()))
    }

    pub fn is_busy(&self) -> bool {
        self.turn.try_lock().is_err()
    }

    pub async fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            app_name: self.app_name.clone(),
            user_id: self.user_id.clone(),
            created_at: self.created_at,
            messages: self.history_len().await,
            busy: self.is_busy(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("app_name", &self.app_name)
            .field("user_id", &self.user_id)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Concurrent map of live sessions
pub struct SessionStore {
    app_name: String,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    /// `app_name` is stamped on sessions created through `get_or_create`
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Return the session for `session_id`, creating it on first use.
    /// An existing session is returned unchanged.
    pub async fn get_or_create(&self, session_id: &str, user_id: &str) -> Arc<Session> {
        let app_name = self.app_name.clone();
        self.get_or_create_for_app(&app_name, session_id, user_id)
            .await
            .0
    }

    /// Like `get_or_create`, also reporting whether the session is new
    pub async fn get_or_create_for_app(
        &self,
        app_name: &str,
        session_id: &str,
        user_id: &str,
    ) -> (Arc<Session>, bool) {
        if let Some(existing) = self.get(session_id).await {
            if existing.user_id() != user_id {
                tracing::warn!(
                    session = %session_id,
                    owner = %existing.user_id(),
                    user = %user_id,
                    "Session requested by a different user"
                );
            }
            return (existing, false);
        }

        let mut sessions = self.sessions.write().await;
        // Another caller may have created it between the two locks
        if let Some(existing) = sessions.get(session_id) {
            return (existing.clone(), false);
        }
        let session = Arc::new(Session::new(session_id, app_name, user_id));
        sessions.insert(session_id.to_string(), session.clone());
        tracing::info!(session = %session_id, user = %user_id, app = %app_name, "Session created");
        (session, true)
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Drop a session from the store. A turn already running on it keeps
    /// its own handle and finishes normally.
    pub async fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(session_id);
        if removed.is_some() {
            tracing::info!(session = %session_id, "Session removed");
        }
        removed
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(session.info().await);
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = SessionStore::new("google_map_adk");
        let first = store.get_or_create("s1", "alice").await;
        first.append(Message::user("hello")).await;

        let second = store.get_or_create("s1", "alice").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.history_len().await, 1);
        assert_eq!(second.app_name(), "google_map_adk");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_or_create_for_app_reports_creation() {
        let store = SessionStore::new("default_app");
        let (session, created) = store.get_or_create_for_app("maps", "s1", "alice").await;
        assert!(created);
        assert_eq!(session.app_name(), "maps");

        let (again, created) = store.get_or_create_for_app("maps", "s1", "alice").await;
        assert!(!created);
        assert!(Arc::ptr_eq(&session, &again));
    }

    #[tokio::test]
    async fn test_existing_session_kept_for_other_user() {
        let store = SessionStore::new("app");
        let owned = store.get_or_create("s1", "alice").await;
        let other = store.get_or_create("s1", "bob").await;
        assert!(Arc::ptr_eq(&owned, &other));
        assert_eq!(other.user_id(), "alice");
    }

    #[tokio::test]
    async fn test_concurrent_first_use_yields_one_session() {
        let store = Arc::new(SessionStore::new("app"));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get_or_create("shared", "alice").await })
            })
            .collect();

        let sessions: Vec<Arc<Session>> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_turn_lock_rejects_second_turn() {
        let store = SessionStore::new("app");
        let session = store.get_or_create("s1", "alice").await;

        let guard = session.try_begin_turn().unwrap();
        assert!(session.is_busy());
        match session.try_begin_turn() {
            Err(AgentError::SessionBusy(id)) => assert_eq!(id, "s1"),
            other => panic!("expected SessionBusy, got {:?}", other),
        }

        drop(guard);
        assert!(!session.is_busy());
        assert!(session.try_begin_turn().is_ok());
    }

    #[tokio::test]
    async fn test_turn_locks_are_per_session() {
        let store = SessionStore::new("app");
        let a = store.get_or_create("a", "alice").await;
        let b = store.get_or_create("b", "bob").await;

        let _a_turn = a.try_begin_turn().unwrap();
        assert!(b.try_begin_turn().is_ok());
    }

    #[tokio::test]
    async fn test_remove_and_get() {
        let store = SessionStore::new("app");
        store.get_or_create("s1", "alice").await;
        assert!(store.get("s1").await.is_some());

        assert!(store.remove("s1").await.is_some());
        assert!(store.remove("s1").await.is_none());
        assert!(store.get("s1").await.is_none());
        assert!(store.is_empty().await);

        let fresh = store.get_or_create("s1", "alice").await;
        assert_eq!(fresh.history_len().await, 0);
    }

    #[tokio::test]
    async fn test_list_reports_sessions() {
        let store = SessionStore::new("app");
        let a = store.get_or_create("a", "alice").await;
        store.get_or_create("b", "bob").await;
        a.extend(vec![Message::user("hi"), Message::agent("hello")]).await;
        let _turn = a.try_begin_turn().unwrap();

        let infos = store.list().await;
        assert_eq!(infos.len(), 2);
        let info_a = infos.iter().find(|i| i.id == "a").unwrap();
        assert_eq!(info_a.messages, 2);
        assert!(info_a.busy);
        let info_b = infos.iter().find(|i| i.id == "b").unwrap();
        assert_eq!(info_b.user_id, "bob");
        assert!(!info_b.busy);
    }
}
