//! Abstract persistence for sessions, transcript lines and suggestions.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use crate::models::{Session, Suggestion, TranscriptLine};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Session {0} not found")]
    SessionNotFound(String),

    #[error("Storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Session store. Transcript lines come back in insertion order, which the
/// session service keeps equal to timestamp order.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: &Session) -> StoreResult<()>;

    async fn get_session(&self, session_id: &str) -> StoreResult<Option<Session>>;

    /// Mark a session completed. Returns `None` for an unknown id.
    async fn complete_session(&self, session_id: &str, ended_at: DateTime<Utc>) -> StoreResult<Option<Session>>;

    async fn active_sessions(&self) -> StoreResult<Vec<Session>>;

    async fn append_line(&self, session_id: &str, line: &TranscriptLine) -> StoreResult<()>;

    async fn last_line(&self, session_id: &str) -> StoreResult<Option<TranscriptLine>>;

    /// The `limit` most recent lines, oldest first.
    async fn recent_lines(&self, session_id: &str, limit: usize) -> StoreResult<Vec<TranscriptLine>>;

    async fn save_suggestions(&self, session_id: &str, suggestions: &[Suggestion]) -> StoreResult<()>;

    async fn list_suggestions(&self, session_id: &str) -> StoreResult<Vec<Suggestion>>;
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every `SessionStore` must share; run against each backend.

    use super::*;
    use crate::models::{Speaker, TriggerSource};
    use chrono::Duration;

    pub async fn exercise(store: &dyn SessionStore) {
        let session = Session::new("dr-7", Some("P1")).unwrap();
        store.create_session(&session).await.unwrap();
        assert_eq!(store.get_session(&session.id).await.unwrap(), Some(session.clone()));
        assert!(store.last_line(&session.id).await.unwrap().is_none());

        let t0 = Utc::now();
        for i in 0..12 {
            let speaker = if i == 0 { Speaker::Doctor } else { Speaker::Patient };
            let line = TranscriptLine::new(speaker, &format!("line {}", i), t0 + Duration::seconds(i), None);
            store.append_line(&session.id, &line).await.unwrap();
        }
        assert_eq!(store.last_line(&session.id).await.unwrap().unwrap().text, "line 11");

        let recent = store.recent_lines(&session.id, 10).await.unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent.first().unwrap().text, "line 2");
        assert_eq!(recent.last().unwrap().text, "line 11");

        let missing = TranscriptLine::new(Speaker::Doctor, "x", t0, None);
        assert!(matches!(
            store.append_line("nope", &missing).await,
            Err(StoreError::SessionNotFound(_))
        ));

        let s = Suggestion::new(&session.id, "Ask about penicillin reaction", "safety", "high", 0.8, TriggerSource::Batch)
            .unwrap();
        store.save_suggestions(&session.id, std::slice::from_ref(&s)).await.unwrap();
        assert_eq!(store.list_suggestions(&session.id).await.unwrap(), vec![s]);

        assert_eq!(store.active_sessions().await.unwrap().len(), 1);
        let ended = store.complete_session(&session.id, Utc::now()).await.unwrap().unwrap();
        assert!(!ended.is_active());
        assert!(store.active_sessions().await.unwrap().is_empty());
        assert!(store.complete_session("nope", Utc::now()).await.unwrap().is_none());
    }
}
