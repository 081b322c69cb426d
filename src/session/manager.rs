//! Live session map: `user_id -> ChatSession`, mirrored into a [`ChatStore`].
//!
//! Callers get cloned snapshots, never guards, so no lock is held across an
//! LLM round-trip. Store calls run on the blocking pool.
//!
//! Flushing does not delete rows. Instead a per-request watermark counts the
//! persisted turns that were flushed, and every reload from the store skips
//! them.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::AppError;
use crate::llm::ModelParams;

use super::store::ChatStore;
use super::{ChatSession, ChatTurn};

pub struct SessionManager {
    sessions: Mutex<HashMap<String, ChatSession>>,
    /// (user_id, request_id) -> persisted turns hidden by flushes.
    flushed: Mutex<HashMap<(String, String), usize>>,
    store: Arc<dyn ChatStore>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            flushed: Mutex::new(HashMap::new()),
            store,
        }
    }

    pub fn store_type(&self) -> &str {
        self.store.store_type()
    }

    /// Snapshot of the user's session.
    ///
    /// The cached session is returned when `request_id` is `None` or matches
    /// the cached one. Otherwise the session is rebuilt from the store and
    /// replaces the cache entry. `None` on a cold cache loads the request the
    /// user wrote to last.
    pub async fn get_session(&self, user_id: &str, request_id: Option<&str>) -> Result<ChatSession, AppError> {
        {
            let sessions = self.sessions.lock().await;
            if let Some(s) = sessions.get(user_id) {
                let same_request = request_id.is_none_or(|r| s.request_id.as_deref() == Some(r));
                if same_request {
                    return Ok(s.clone());
                }
            }
        }

        let request_id = match request_id {
            Some(r) => Some(r.to_string()),
            None => self.latest_request(user_id).await?,
        };
        let session = self.load(user_id, request_id).await?;
        self.sessions.lock().await.insert(user_id.to_string(), session.clone());
        Ok(session)
    }

    /// Persist a turn, then append it to the cached session.
    ///
    /// A store failure is returned and the turn is not cached. When the cache
    /// holds another request (or nothing) the session is rebuilt from the
    /// store, which already contains the new turn.
    pub async fn record_turn(
        &self,
        user_id: &str,
        request_id: &str,
        user_input: &str,
        model_output: &str,
    ) -> Result<(), AppError> {
        let turn = ChatTurn::new(user_input, model_output);

        let store = self.store.clone();
        let (u, r, t) = (user_id.to_string(), request_id.to_string(), turn.clone());
        tokio::task::spawn_blocking(move || store.push(&u, &r, &t))
            .await
            .map_err(|e| AppError::Store(format!("store task failed: {e}")))??;

        {
            let mut sessions = self.sessions.lock().await;
            if let Some(session) = sessions
                .get_mut(user_id)
                .filter(|s| s.request_id.as_deref() == Some(request_id))
            {
                session.add_chat(turn.user, turn.model);
                debug!(%user_id, %request_id, turns = session.chats.len(), "turn recorded");
                return Ok(());
            }
        }

        let session = self.load(user_id, Some(request_id.to_string())).await?;
        debug!(%user_id, %request_id, turns = session.chats.len(), "turn recorded, session rebuilt");
        self.sessions.lock().await.insert(user_id.to_string(), session);
        Ok(())
    }

    /// Remember which model and parameters served the session.
    pub async fn set_model(&self, user_id: &str, model_id: &str, params: ModelParams) {
        if let Some(s) = self.sessions.lock().await.get_mut(user_id) {
            s.model_id = Some(model_id.to_string());
            s.model_params = Some(params);
        }
    }

    /// Evict the cached session. Persisted turns are untouched.
    pub async fn remove_session(&self, user_id: &str) -> Option<ChatSession> {
        self.sessions.lock().await.remove(user_id)
    }

    /// Flush the cached session; returns how many turns were moved to history.
    /// The flushed turns are never reloaded for that request.
    pub async fn flush(&self, user_id: &str) -> usize {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(user_id) else {
            return 0;
        };
        let flushed = session.flush();
        if let Some(request_id) = session.request_id.clone() {
            *self
                .flushed
                .lock()
                .await
                .entry((user_id.to_string(), request_id))
                .or_default() += flushed;
        }
        flushed
    }

    /// Number of cached sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Build a session for one request from the store, minus flushed turns.
    async fn load(&self, user_id: &str, request_id: Option<String>) -> Result<ChatSession, AppError> {
        let Some(request_id) = request_id else {
            return Ok(ChatSession::new(user_id, None));
        };

        let mut turns = self.fetch(user_id, Some(&request_id)).await?;
        let hidden = self
            .flushed
            .lock()
            .await
            .get(&(user_id.to_string(), request_id.clone()))
            .copied()
            .unwrap_or(0);
        turns.drain(..hidden.min(turns.len()));

        info!(%user_id, %request_id, turns = turns.len(), hidden, "session loaded from store");
        Ok(ChatSession::restore(user_id, Some(request_id), turns))
    }

    async fn latest_request(&self, user_id: &str) -> Result<Option<String>, AppError> {
        let store = self.store.clone();
        let u = user_id.to_string();
        tokio::task::spawn_blocking(move || store.latest_request(&u))
            .await
            .map_err(|e| AppError::Store(format!("store task failed: {e}")))?
    }

    async fn fetch(&self, user_id: &str, request_id: Option<&str>) -> Result<Vec<ChatTurn>, AppError> {
        let store = self.store.clone();
        let (u, r) = (user_id.to_string(), request_id.map(str::to_string));
        tokio::task::spawn_blocking(move || store.fetch(&u, r.as_deref()))
            .await
            .map_err(|e| AppError::Store(format!("store task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::stores::memory::MemoryChatStore;

    /// Store that refuses every write.
    struct FailingStore;

    impl ChatStore for FailingStore {
        fn store_type(&self) -> &str {
            "failing"
        }
        fn push(&self, _: &str, _: &str, _: &ChatTurn) -> Result<(), AppError> {
            Err(AppError::Store("disk full".into()))
        }
        fn fetch(&self, _: &str, _: Option<&str>) -> Result<Vec<ChatTurn>, AppError> {
            Ok(Vec::new())
        }
        fn latest_request(&self, _: &str) -> Result<Option<String>, AppError> {
            Ok(None)
        }
    }

    fn manager() -> (Arc<MemoryChatStore>, SessionManager) {
        let store = Arc::new(MemoryChatStore::new());
        (store.clone(), SessionManager::new(store))
    }

    #[tokio::test]
    async fn new_user_gets_empty_session() {
        let (_, mgr) = manager();
        let s = mgr.get_session("u1", Some("r1")).await.unwrap();
        assert!(s.is_empty());
        assert_eq!(s.user_id.as_deref(), Some("u1"));
        assert_eq!(s.request_id.as_deref(), Some("r1"));
        assert_eq!(mgr.len().await, 1);
    }

    #[tokio::test]
    async fn record_turn_persists_and_caches() {
        let (store, mgr) = manager();
        mgr.record_turn("u1", "r1", "hi", "hello").await.unwrap();

        let s = mgr.get_session("u1", Some("r1")).await.unwrap();
        assert_eq!(s.chats, vec![ChatTurn::new("hi", "hello")]);
        assert_eq!(store.fetch("u1", Some("r1")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn removed_session_reloads_from_store() {
        let (_, mgr) = manager();
        mgr.record_turn("u1", "r1", "a", "1").await.unwrap();
        mgr.record_turn("u1", "r1", "b", "2").await.unwrap();

        assert!(mgr.remove_session("u1").await.is_some());
        assert!(mgr.is_empty().await);

        let s = mgr.get_session("u1", Some("r1")).await.unwrap();
        assert_eq!(s.chats.len(), 2);
        assert_eq!(s.chats[1], ChatTurn::new("b", "2"));
    }

    #[tokio::test]
    async fn different_request_switches_conversation() {
        let (_, mgr) = manager();
        mgr.record_turn("u1", "r1", "a", "1").await.unwrap();

        let other = mgr.get_session("u1", Some("r2")).await.unwrap();
        assert!(other.is_empty());

        let back = mgr.get_session("u1", Some("r1")).await.unwrap();
        assert_eq!(back.chats.len(), 1);
    }

    #[tokio::test]
    async fn flush_clears_active_turns() {
        let (_, mgr) = manager();
        mgr.record_turn("u1", "r1", "a", "1").await.unwrap();
        mgr.set_model("u1", "m", ModelParams::default()).await;

        assert_eq!(mgr.flush("u1").await, 1);
        let s = mgr.get_session("u1", None).await.unwrap();
        assert!(s.chats.is_empty());
        assert_eq!(s.history.len(), 1);
        assert!(s.model_id.is_none());
        assert_eq!(mgr.flush("ghost").await, 0);
    }

    #[tokio::test]
    async fn flushed_turns_stay_hidden_for_that_request() {
        let (store, mgr) = manager();
        mgr.record_turn("u1", "r1", "a", "1").await.unwrap();
        assert_eq!(mgr.flush("u1").await, 1);

        let s = mgr.get_session("u1", Some("r1")).await.unwrap();
        assert!(s.is_empty());
        assert_eq!(s.history, vec![ChatTurn::new("a", "1")]);

        mgr.remove_session("u1").await;
        assert!(mgr.get_session("u1", Some("r1")).await.unwrap().is_empty());

        mgr.record_turn("u1", "r1", "b", "2").await.unwrap();
        mgr.remove_session("u1").await;
        let s = mgr.get_session("u1", Some("r1")).await.unwrap();
        assert_eq!(s.chats, vec![ChatTurn::new("b", "2")]);
        assert_eq!(store.fetch("u1", Some("r1")).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn interleaved_requests_keep_their_own_turns() {
        let (_, mgr) = manager();
        mgr.record_turn("u1", "r1", "a", "1").await.unwrap();
        mgr.get_session("u1", Some("r2")).await.unwrap();
        mgr.record_turn("u1", "r2", "b", "2").await.unwrap();
        mgr.record_turn("u1", "r1", "c", "3").await.unwrap();

        let s = mgr.get_session("u1", None).await.unwrap();
        assert_eq!(s.request_id.as_deref(), Some("r1"));
        assert_eq!(s.chats, vec![ChatTurn::new("a", "1"), ChatTurn::new("c", "3")]);

        let s = mgr.get_session("u1", Some("r2")).await.unwrap();
        assert_eq!(s.chats, vec![ChatTurn::new("b", "2")]);
    }

    #[tokio::test]
    async fn cold_lookup_without_request_uses_latest() {
        let (_, mgr) = manager();
        mgr.record_turn("u1", "r1", "a", "1").await.unwrap();
        mgr.record_turn("u1", "r2", "b", "2").await.unwrap();
        mgr.remove_session("u1").await;

        let s = mgr.get_session("u1", None).await.unwrap();
        assert_eq!(s.request_id.as_deref(), Some("r2"));
        assert_eq!(s.chats, vec![ChatTurn::new("b", "2")]);

        mgr.remove_session("u1").await;
        let fresh = mgr.get_session("nobody", None).await.unwrap();
        assert!(fresh.is_empty());
        assert!(fresh.request_id.is_none());
    }

    #[tokio::test]
    async fn set_model_records_metadata() {
        let (_, mgr) = manager();
        mgr.record_turn("u1", "r1", "a", "1").await.unwrap();
        let params = ModelParams { temperature: 0.1, ..ModelParams::default() };
        mgr.set_model("u1", "gpt-4o", params).await;

        let s = mgr.get_session("u1", None).await.unwrap();
        assert_eq!(s.model_id.as_deref(), Some("gpt-4o"));
        assert_eq!(s.model_params, Some(params));
    }

    #[tokio::test]
    async fn store_failure_is_not_cached() {
        let mgr = SessionManager::new(Arc::new(FailingStore));
        let err = mgr.record_turn("u1", "r1", "a", "1").await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert!(mgr.get_session("u1", Some("r1")).await.unwrap().is_empty());
    }
}
